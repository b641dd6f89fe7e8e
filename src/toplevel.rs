use super::ast::{Function, Item, Prototype, ANONYMOUS};
use super::backend::{Backend, CompilationUnit};
use super::builtins;
use super::codegen::CodeGen;
use super::config::SessionConfig;
use super::error::{Error, ErrorKind, Result};
use super::parser::Parser;
use std::fmt;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

/// What became of one successfully processed unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Evaluated { value: f64, ir: Option<String> },
    Defined { name: String, ir: Option<String> },
    Declared { name: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Evaluated { value, ir } => {
                if let Some(ir) = ir {
                    writeln!(f, "read top-level expression:\n{}", ir.trim_end())?;
                }
                write!(f, "Evaluated to {}", value)
            }
            Outcome::Defined { name, ir } => match ir {
                Some(ir) => write!(f, "read function definition:\n{}", ir.trim_end()),
                None => write!(f, "defined {}", name),
            },
            Outcome::Declared { name } => write!(f, "read extern {}", name),
        }
    }
}

/// Drives units from text through code generation into a backend.
///
/// Named definitions are lowered into the unit currently being filled, which
/// is then loaded and left resident. Top-level expressions get the same
/// treatment but are run once and unloaded again, which frees the reserved
/// anonymous name for the next one. Either way a fresh unit is started
/// afterwards.
pub struct Session<B: Backend> {
    backend: B,
    config: SessionConfig,
    codegen: CodeGen,
    unit: B::Unit,
    units_created: usize,
}

impl<B: Backend> Session<B> {
    pub fn new(mut backend: B, config: SessionConfig) -> Self {
        let mut codegen = CodeGen::new(config.optimize);
        for proto in builtins::prototypes() {
            // nothing is resident yet, so registration cannot be refused
            let _ = codegen.codegen_proto(&proto);
        }
        let unit = backend.create_unit("unit0");
        Session {
            backend,
            config,
            codegen,
            unit,
            units_created: 1,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn codegen(&self) -> &CodeGen {
        &self.codegen
    }

    /// Processes every unit on `line`.
    ///
    /// A failing unit is reported in its slot and processing moves on, except
    /// after a parse error: there the unit boundary is lost, so the rest of the
    /// line is dropped.
    pub fn handle_line(&mut self, line: &str) -> Vec<Result<Outcome>> {
        let mut parser = Parser::new(line, self.config.precedence.clone());
        let mut outcomes = Vec::new();
        loop {
            match parser.parse_item() {
                Ok(Some(item)) => {
                    let outcome = self.handle_item(item);
                    if let Err(e) = &outcome {
                        warn!(error = %e, "unit failed");
                    }
                    outcomes.push(outcome);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "parse failed, skipping rest of line");
                    outcomes.push(Err(e));
                    break;
                }
            }
        }
        outcomes
    }

    pub fn handle_item(&mut self, item: Item) -> Result<Outcome> {
        match item {
            Item::Definition(func) => self.handle_definition(&func),
            Item::Extern(proto) => self.handle_extern(&proto),
            Item::TopLevel(func) => self.handle_toplevel(&func),
        }
    }

    fn next_unit(&mut self) -> B::Unit {
        let name = format!("unit{}", self.units_created);
        self.units_created += 1;
        let fresh = self.backend.create_unit(&name);
        std::mem::replace(&mut self.unit, fresh)
    }

    /// Lowers `func` into the accumulating unit. On failure the unit is
    /// thrown away, so callee declarations made on the way cannot leak into
    /// later units.
    fn lower(&mut self, func: &Function) -> Result<Option<String>> {
        let f = match self.codegen.codegen_func(&mut self.unit, func) {
            Ok(f) => f,
            Err(e) => {
                drop(self.next_unit());
                return Err(e);
            }
        };
        Ok(if self.config.dump_ir {
            Some(self.unit.print_function(f))
        } else {
            None
        })
    }

    fn handle_definition(&mut self, func: &Function) -> Result<Outcome> {
        let name = func.prototype().name().to_owned();
        debug!(function = %name, "parsed a function definition");
        let ir = self.lower(func)?;
        let unit = self.next_unit();
        self.backend.load_unit(unit)?;
        self.codegen.mark_resident(&name);
        Ok(Outcome::Defined { name, ir })
    }

    fn handle_extern(&mut self, proto: &Prototype) -> Result<Outcome> {
        debug!(function = proto.name(), "parsed an extern");
        self.codegen.codegen_proto(proto)?;
        Ok(Outcome::Declared {
            name: proto.name().to_owned(),
        })
    }

    fn handle_toplevel(&mut self, func: &Function) -> Result<Outcome> {
        debug!("parsed a top-level expression");
        let ir = self.lower(func)?;
        let unit = self.next_unit();
        let key = self.backend.load_unit(unit)?;

        let result = match self.backend.lookup_symbol(ANONYMOUS) {
            Some(entry) => self.backend.invoke(entry, &[]),
            None => Err(Error::from(ErrorKind::Internal(format!(
                "'{}' missing after load",
                ANONYMOUS
            )))),
        };
        let unloaded = self.backend.unload_unit(key);
        self.codegen.forget(ANONYMOUS);

        let value = result?;
        unloaded?;
        Ok(Outcome::Evaluated { value, ir })
    }
}

/// Reads lines from `input` until end of input or a line reading `exit()`,
/// writing each unit's outcome to `output`.
pub fn main_loop<B, R, W>(session: &mut Session<B>, input: R, output: &mut W, prompt: bool) -> std::io::Result<()>
where
    B: Backend,
    R: BufRead,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        if prompt {
            write!(output, "ready> ")?;
            output.flush()?;
        }
        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        if line.trim() == "exit()" {
            break;
        }

        for outcome in session.handle_line(&line) {
            match outcome {
                Ok(o) => writeln!(output, "{}", o)?,
                Err(e) => writeln!(output, "error: {}", e)?,
            }
        }
    }
    if prompt {
        writeln!(output)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::backend::interp::{InterpBackend, MAX_CALL_DEPTH};
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session() -> Session<InterpBackend> {
        Session::new(InterpBackend::bare(), SessionConfig::default())
    }

    /// A session with a host function `count(x)` that records its arguments.
    fn counting_session() -> (Session<InterpBackend>, Rc<RefCell<Vec<f64>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut s = session();
        let log = seen.clone();
        s.backend_mut().register_host(
            "count",
            1,
            Rc::new(move |args: &[f64]| {
                log.borrow_mut().push(args[0]);
                0.0
            }),
        );
        s.handle_line("extern count(x)");
        (s, seen)
    }

    fn eval(s: &mut Session<InterpBackend>, line: &str) -> f64 {
        let mut outcomes = s.handle_line(line);
        match outcomes.pop() {
            Some(Ok(Outcome::Evaluated { value, .. })) => value,
            other => panic!("'{}' did not evaluate: {:?}", line, other),
        }
    }

    fn fails(s: &mut Session<InterpBackend>, line: &str) -> ErrorKind {
        match s.handle_line(line).pop() {
            Some(Err(e)) => e.kind().clone(),
            other => panic!("'{}' did not fail: {:?}", line, other),
        }
    }

    #[test]
    fn test_arithmetic() {
        let mut s = session();
        assert_eq!(eval(&mut s, "1+2*3"), 7.0);
        assert_eq!(eval(&mut s, "(1+2)*3"), 9.0);
        assert_eq!(eval(&mut s, "10-2-3"), 5.0);
        assert_eq!(eval(&mut s, "1 < 2"), 1.0);
        assert_eq!(eval(&mut s, "2 < 1"), 0.0);
    }

    #[test]
    fn test_conditional() {
        let mut s = session();
        assert_eq!(eval(&mut s, "if 1 then 2 else 3"), 2.0);
        assert_eq!(eval(&mut s, "if 0 then 2 else 3"), 3.0);
        assert_eq!(eval(&mut s, "if 1 then (if 0 then 5 else 6) else 7"), 6.0);
    }

    #[test]
    fn test_definitions_and_recursion() {
        let mut s = session();
        let outcomes = s.handle_line("def fib(x) if x < 3 then 1 else fib(x-1)+fib(x-2)");
        assert_eq!(
            outcomes[0].as_ref().ok(),
            Some(&Outcome::Defined {
                name: "fib".to_owned(),
                ir: None
            })
        );
        assert_eq!(eval(&mut s, "fib(10)"), 55.0);
    }

    #[test]
    fn test_unknown_function_changes_nothing() {
        let mut s = session();
        s.handle_line("def f(x) x");
        let loaded = s.backend().loaded_units();

        assert_eq!(fails(&mut s, "nosuch(1)"), ErrorKind::UnknownFunction("nosuch".to_owned()));
        assert!(s.codegen().prototype("nosuch").is_none());
        assert!(s.codegen().prototype(ANONYMOUS).is_none());
        assert_eq!(s.backend().loaded_units(), loaded);
        assert_eq!(eval(&mut s, "f(3)"), 3.0);
    }

    #[test]
    fn test_duplicate_definition_keeps_original() {
        let mut s = session();
        s.handle_line("def f(x) x+1");
        assert_eq!(fails(&mut s, "def f(x) x*100"), ErrorKind::DuplicateDefinition("f".to_owned()));
        assert_eq!(fails(&mut s, "def f(a b) a"), ErrorKind::DuplicateDefinition("f".to_owned()));
        assert_eq!(eval(&mut s, "f(1)"), 2.0);
    }

    #[test]
    fn test_extern_then_define() {
        let mut s = session();
        assert_eq!(
            s.handle_line("extern g(x)").pop().unwrap().unwrap(),
            Outcome::Declared { name: "g".to_owned() }
        );
        assert_eq!(fails(&mut s, "g(2)"), ErrorKind::UnresolvedSymbol("g".to_owned()));
        s.handle_line("def g(x) x*3");
        assert_eq!(eval(&mut s, "g(2)"), 6.0);
    }

    #[test]
    fn test_extern_redeclaration_overwrites() {
        let mut s = session();
        s.handle_line("extern h(a); extern h(a b)");
        assert_eq!(s.codegen().prototype("h").map(|p| p.params().len()), Some(2));
    }

    #[test]
    fn test_failed_unit_leaves_no_stale_declarations() {
        let mut s = session();
        s.handle_line("extern f(a)");
        assert_eq!(
            fails(&mut s, "f(1) + nosuch(1)"),
            ErrorKind::UnknownFunction("nosuch".to_owned())
        );
        s.handle_line("extern f(a b)");
        assert_eq!(
            s.handle_line("def f(a b) a+b").pop().unwrap().unwrap(),
            Outcome::Defined {
                name: "f".to_owned(),
                ir: None
            }
        );
        assert_eq!(eval(&mut s, "f(1, 2)"), 3.0);
    }

    #[test]
    fn test_extern_over_resident_keeps_definition() {
        let mut s = session();
        s.handle_line("def f(x) x");
        assert_eq!(
            fails(&mut s, "extern f(a b)"),
            ErrorKind::DuplicateDefinition("f".to_owned())
        );
        assert_eq!(eval(&mut s, "f(7)"), 7.0);
        assert_eq!(
            fails(&mut s, "f(1, 2)"),
            ErrorKind::ArityMismatch {
                name: "f".to_owned(),
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_deep_recursion_is_reported() {
        // roomy stack so the limit, not the thread, ends the recursion
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let mut s = session();
                s.handle_line("def down(n) if n < 1 then 0 else down(n-1)");
                let err = fails(&mut s, "down(100000)");
                let value = eval(&mut s, "down(10)");
                (err, value)
            })
            .unwrap();
        let (err, value) = handle.join().unwrap();
        assert_eq!(err, ErrorKind::RecursionLimit(MAX_CALL_DEPTH));
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_loop_runs_body_per_iteration() {
        let (mut s, seen) = counting_session();
        assert_eq!(eval(&mut s, "for i = 1, i < 4, 1 in count(i)"), 0.0);
        assert_eq!(*seen.borrow(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_loop_default_and_explicit_step() {
        let (mut s, seen) = counting_session();
        eval(&mut s, "for i = 0, i < 3 in count(i)");
        assert_eq!(*seen.borrow(), vec![0.0, 1.0, 2.0]);

        seen.borrow_mut().clear();
        eval(&mut s, "for i = 0, i < 10, 2.5 in count(i)");
        assert_eq!(*seen.borrow(), vec![0.0, 2.5, 5.0, 7.5]);
    }

    #[test]
    fn test_loop_restores_outer_binding() {
        let (mut s, seen) = counting_session();
        s.handle_line("def f(i) (for i = 1, i < 4 in count(i)) + i");
        assert_eq!(eval(&mut s, "f(10)"), 10.0);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_anonymous_name_is_reusable() {
        let mut s = session();
        let loaded = s.backend().loaded_units();
        assert_eq!(eval(&mut s, "4"), 4.0);
        assert!(s.codegen().prototype(ANONYMOUS).is_none());
        assert_eq!(eval(&mut s, "5"), 5.0);
        assert_eq!(s.backend().loaded_units(), loaded);
    }

    #[test]
    fn test_codegen_error_does_not_stop_line() {
        let mut s = session();
        let outcomes = s.handle_line("nosuch(1); def bad(x) y; def good(x) x; good(4)");
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_err());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_ok());
        assert_eq!(
            outcomes[3].as_ref().ok(),
            Some(&Outcome::Evaluated { value: 4.0, ir: None })
        );
    }

    #[test]
    fn test_parse_error_drops_rest_of_line() {
        let mut s = session();
        let outcomes = s.handle_line("1; (2; 3");
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_ok());
        assert_eq!(
            *outcomes[1].as_ref().unwrap_err().kind(),
            ErrorKind::Parse("expected ')'".to_owned())
        );
        // the next line starts clean
        assert_eq!(eval(&mut s, "3"), 3.0);
    }

    #[test]
    fn test_builtins_need_no_extern() {
        let printed = Rc::new(RefCell::new(Vec::new()));
        let mut s = session();
        let sink = printed.clone();
        s.backend_mut().register_host(
            "printd",
            1,
            Rc::new(move |args: &[f64]| {
                sink.borrow_mut().push(args[0]);
                0.0
            }),
        );
        assert_eq!(eval(&mut s, "printd(42)"), 0.0);
        assert_eq!(*printed.borrow(), vec![42.0]);
        assert!(s.codegen().prototype("putchard").is_some());
    }

    #[test]
    fn test_dump_ir() {
        let config = SessionConfig {
            dump_ir: true,
            ..SessionConfig::default()
        };
        let mut s = Session::new(InterpBackend::bare(), config);
        match s.handle_line("def double(x) x*2").pop() {
            Some(Ok(Outcome::Defined { ir: Some(ir), .. })) => {
                assert!(ir.starts_with("define double @double(double %x)"), "{}", ir)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_main_loop() {
        let mut s = session();
        let input = "def f(x) x*2\nf(21)\nf(\nexit()\nf(1)\n";
        let mut output = Vec::new();
        main_loop(&mut s, input.as_bytes(), &mut output, false).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(
            text,
            "defined f\nEvaluated to 42\nerror: parse error: unknown token when expecting an expression\n"
        );
    }
}
