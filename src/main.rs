use clap::{Parser, ValueEnum};
use kaleidoscope_repl::backend::interp::InterpBackend;
use kaleidoscope_repl::backend::Backend;
use kaleidoscope_repl::config::SessionConfig;
use kaleidoscope_repl::logger::{self, LogLevel};
use kaleidoscope_repl::{main_loop, Session};
use std::fs::File;
use std::io::{stdin, stdout, BufReader};
use std::path::PathBuf;
use std::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Execute through the built-in SSA interpreter.
    Interp,
    /// JIT-compile through LLVM (requires the `llvm` feature).
    Llvm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

/// Kaleidoscope REPL: reads definitions, externs and expressions line by line.
#[derive(Parser, Debug)]
#[command(name = "kaleidoscope", version)]
struct Args {
    /// Read units from FILE instead of an interactive prompt
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "interp")]
    backend: BackendKind,

    /// Skip the per-function optimization pass
    #[arg(long)]
    no_optimize: bool,

    /// Print the IR of every lowered function
    #[arg(long)]
    dump_ir: bool,

    #[arg(long, value_enum, default_value = "warn")]
    log_level: Level,
}

fn run<B: Backend>(backend: B, args: &Args) -> std::io::Result<()> {
    let config = SessionConfig {
        optimize: !args.no_optimize,
        dump_ir: args.dump_ir,
        ..SessionConfig::default()
    };
    let mut session = Session::new(backend, config);
    let mut out = stdout();
    match &args.file {
        Some(path) => {
            let file = BufReader::new(File::open(path)?);
            main_loop(&mut session, file, &mut out, false)
        }
        None => main_loop(&mut session, stdin().lock(), &mut out, true),
    }
}

#[cfg(feature = "llvm")]
fn run_llvm(args: &Args) -> std::io::Result<()> {
    use kaleidoscope_repl::backend::llvm::LlvmBackend;
    match LlvmBackend::new() {
        Ok(backend) => run(backend, args),
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
    }
}

#[cfg(not(feature = "llvm"))]
fn run_llvm(_args: &Args) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Other,
        "built without the `llvm` feature",
    ))
}

fn main() {
    let args = Args::parse();
    logger::init_with_level(args.log_level.into());

    let result = match args.backend {
        BackendKind::Interp => run(InterpBackend::new(), &args),
        BackendKind::Llvm => run_llvm(&args),
    };
    if let Err(e) = result {
        eprintln!("kaleidoscope: {}", e);
        process::exit(1);
    }
}
