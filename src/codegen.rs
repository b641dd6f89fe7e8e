use super::ast::{Expr, Function, Prototype};
use super::backend::CompilationUnit;
use super::error::{Error, ErrorKind, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, warn};

/// Lowers parsed units onto a [`CompilationUnit`].
///
/// Lives as long as the session: the prototype table and the set of names
/// with a resident body carry over from one unit to the next, so a call can
/// re-declare a function that was defined in an earlier, already loaded unit.
#[derive(Debug, Default)]
pub struct CodeGen {
    protos: HashMap<String, Prototype>,
    resident: HashSet<String>,
    optimize: bool,
}

impl CodeGen {
    pub fn new(optimize: bool) -> Self {
        CodeGen {
            protos: HashMap::new(),
            resident: HashSet::new(),
            optimize,
        }
    }

    pub fn prototype(&self, name: &str) -> Option<&Prototype> {
        self.protos.get(name)
    }

    pub fn is_resident(&self, name: &str) -> bool {
        self.resident.contains(name)
    }

    /// Records that a body for `name` is now loaded in the backend.
    pub fn mark_resident(&mut self, name: &str) {
        self.resident.insert(name.to_owned());
    }

    /// Drops every trace of `name`, used when a unit is retired.
    pub fn forget(&mut self, name: &str) {
        self.protos.remove(name);
        self.resident.remove(name);
    }

    /// Registers an `extern`. Nothing reaches the backend until a call needs it.
    ///
    /// A name with a resident body keeps its arity: redeclaring it with a
    /// different parameter count is refused and the table is left alone.
    pub fn codegen_proto(&mut self, proto: &Prototype) -> Result<()> {
        if let Some(old) = self.protos.get(proto.name()) {
            if old.params().len() != proto.params().len() {
                if self.resident.contains(proto.name()) {
                    return Err(Error::from(ErrorKind::DuplicateDefinition(
                        proto.name().to_owned(),
                    )));
                }
                warn!(
                    function = proto.name(),
                    was = old.params().len(),
                    now = proto.params().len(),
                    "prototype redeclared with a different arity"
                );
            }
        }
        debug!(function = proto.name(), "prototype registered");
        self.protos.insert(proto.name().to_owned(), proto.clone());
        Ok(())
    }

    /// Lowers a function definition into `unit`.
    ///
    /// On failure the half-built function is deleted from the unit and the
    /// prototype table is left as it was before the call.
    pub fn codegen_func<U: CompilationUnit>(
        &mut self,
        unit: &mut U,
        func: &Function,
    ) -> Result<U::Function> {
        let proto = func.prototype();
        let name = proto.name();
        if self.resident.contains(name) {
            return Err(Error::from(ErrorKind::DuplicateDefinition(name.to_owned())));
        }

        let previous = self.protos.insert(name.to_owned(), proto.clone());
        let result = self.lower_function(unit, func);
        if result.is_err() {
            match previous {
                Some(p) => self.protos.insert(name.to_owned(), p),
                None => self.protos.remove(name),
            };
        }
        result
    }

    fn lower_function<U: CompilationUnit>(
        &self,
        unit: &mut U,
        func: &Function,
    ) -> Result<U::Function> {
        let proto = func.prototype();
        let name = proto.name();

        let function = match unit.get_function(name) {
            Some(f) => f,
            None => unit.declare_function(name, proto.params()),
        };
        if unit.has_body(function) {
            return Err(Error::from(ErrorKind::DuplicateDefinition(name.to_owned())));
        }
        if unit.param_count(function) != proto.params().len() {
            // an earlier call in this unit declared it with another arity
            return Err(Error::from(ErrorKind::FunctionNotFound(name.to_owned())));
        }

        let entry = unit.append_block(function, "entry");
        unit.position_at_end(entry);

        let named_values = proto
            .params()
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), unit.param(function, i)))
            .collect();

        let mut builder = FunctionBuilder {
            unit: &mut *unit,
            protos: &self.protos,
            function,
            named_values,
        };
        let body = match builder.codegen_expr(func.body()) {
            Ok(v) => v,
            Err(e) => {
                debug!(function = name, error = %e, "deleting partially built function");
                unit.delete_function(function);
                return Err(e);
            }
        };
        unit.build_ret(body);

        if let Err(msg) = unit.verify_function(function) {
            error!(function = name, error = %msg, "generated function failed verification");
            unit.delete_function(function);
            return Err(Error::from(ErrorKind::Internal(msg)));
        }
        if self.optimize {
            unit.optimize_function(function);
        }
        Ok(function)
    }
}

struct FunctionBuilder<'a, U: CompilationUnit> {
    unit: &'a mut U,
    protos: &'a HashMap<String, Prototype>,
    function: U::Function,
    named_values: HashMap<String, U::Value>,
}

impl<'a, U: CompilationUnit> FunctionBuilder<'a, U> {
    /// Finds `name` among the unit's functions, declaring it from the
    /// prototype table when the unit has not seen it yet.
    fn lookup_function(&mut self, name: &str) -> Result<U::Function> {
        if let Some(f) = self.unit.get_function(name) {
            return Ok(f);
        }
        match self.protos.get(name) {
            Some(proto) => Ok(self.unit.declare_function(name, proto.params())),
            None => Err(Error::from(ErrorKind::UnknownFunction(name.to_owned()))),
        }
    }

    fn codegen_expr(&mut self, e: &Expr) -> Result<U::Value> {
        match e {
            Expr::Number(n) => Ok(self.unit.const_number(*n)),
            Expr::Variable(name) => self
                .named_values
                .get(name)
                .copied()
                .ok_or_else(|| Error::from(ErrorKind::UnknownVariable(name.clone()))),
            Expr::Binary(op, lhs, rhs) => {
                let lhs_val = self.codegen_expr(lhs)?;
                let rhs_val = self.codegen_expr(rhs)?;
                match *op {
                    '+' => Ok(self.unit.build_add(lhs_val, rhs_val)),
                    '-' => Ok(self.unit.build_sub(lhs_val, rhs_val)),
                    '*' => Ok(self.unit.build_mul(lhs_val, rhs_val)),
                    '<' => {
                        let cmp = self.unit.build_cmp_ult(lhs_val, rhs_val);
                        Ok(self.unit.build_bool_to_number(cmp))
                    }
                    _ => Err(Error::from(ErrorKind::InvalidOperator(*op))),
                }
            }
            Expr::Call(callee, args) => {
                let f = self.lookup_function(callee)?;
                let expected = self.unit.param_count(f);
                if expected != args.len() {
                    return Err(Error::from(ErrorKind::ArityMismatch {
                        name: callee.clone(),
                        expected,
                        found: args.len(),
                    }));
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.codegen_expr(arg)?);
                }
                Ok(self.unit.build_call(f, &values))
            }
            Expr::If(cond, then, els) => self.codegen_if(cond, then, els),
            Expr::For(var, start, end, step, body) => {
                self.codegen_for(var, start, end, step.as_ref().map(|s| &**s), body)
            }
        }
    }

    fn condition(&mut self, e: &Expr) -> Result<U::Value> {
        let v = self.codegen_expr(e)?;
        let zero = self.unit.const_number(0.0);
        Ok(self.unit.build_cmp_one(v, zero))
    }

    fn codegen_if(&mut self, cond: &Expr, then: &Expr, els: &Expr) -> Result<U::Value> {
        let cond_val = self.condition(cond)?;

        let then_bb = self.unit.append_block(self.function, "then");
        let else_bb = self.unit.append_block(self.function, "else");
        let merge_bb = self.unit.append_block(self.function, "ifcont");
        self.unit.build_cond_br(cond_val, then_bb, else_bb);

        self.unit.position_at_end(then_bb);
        let then_val = self.codegen_expr(then)?;
        self.unit.build_br(merge_bb);
        // lowering the branch may have moved us to another block
        let then_end = self.unit.insert_block();

        self.unit.position_at_end(else_bb);
        let else_val = self.codegen_expr(els)?;
        self.unit.build_br(merge_bb);
        let else_end = self.unit.insert_block();

        self.unit.position_at_end(merge_bb);
        Ok(self
            .unit
            .build_phi(&[(then_val, then_end), (else_val, else_end)]))
    }

    fn codegen_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<U::Value> {
        let start_val = self.codegen_expr(start)?;
        let preheader = self.unit.insert_block();
        let header = self.unit.append_block(self.function, "loop");
        self.unit.build_br(header);

        self.unit.position_at_end(header);
        let variable = self.unit.build_phi(&[(start_val, preheader)]);

        let shadowed = self.named_values.insert(var.to_owned(), variable);
        let result = self.codegen_loop_tail(var, variable, header, end, step, body);
        match shadowed {
            Some(old) => self.named_values.insert(var.to_owned(), old),
            None => self.named_values.remove(var),
        };
        result
    }

    fn codegen_loop_tail(
        &mut self,
        var: &str,
        variable: U::Value,
        header: U::Block,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<U::Value> {
        self.codegen_expr(body)?;

        let step_val = match step {
            Some(s) => self.codegen_expr(s)?,
            None => self.unit.const_number(1.0),
        };
        let next = self.unit.build_add(variable, step_val);

        // the end condition decides whether another iteration runs, so it
        // sees the value that iteration would bind
        self.named_values.insert(var.to_owned(), next);
        let end_cond = self.condition(end)?;
        self.named_values.insert(var.to_owned(), variable);

        let loop_end = self.unit.insert_block();
        let after = self.unit.append_block(self.function, "afterloop");
        self.unit.build_cond_br(end_cond, header, after);

        self.unit.position_at_end(after);
        self.unit.add_incoming(variable, &[(next, loop_end)]);

        Ok(self.unit.const_number(0.0))
    }
}
