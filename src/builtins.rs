//! Primitives the host process offers to compiled programs. They can be
//! called without an `extern` because every session pre-registers their
//! prototypes.

use super::ast::Prototype;
use std::io::{self, stdout, Write};

fn write_char<W: Write>(out: &mut W, x: f64) -> io::Result<()> {
    writeln!(out, "{}", (x as u8) as char)?;
    out.flush()
}

fn write_number<W: Write>(out: &mut W, x: f64) -> io::Result<()> {
    writeln!(out, "{}", x)
}

/// Prints its argument as a character code on its own line. Returns 0.
#[no_mangle]
pub extern "C" fn putchard(x: f64) -> f64 {
    let _ = write_char(&mut stdout(), x);
    0.0
}

/// Prints its argument as a number on its own line. Returns 0.
#[no_mangle]
pub extern "C" fn printd(x: f64) -> f64 {
    let _ = write_number(&mut stdout(), x);
    0.0
}

pub fn prototypes() -> Vec<Prototype> {
    vec![
        Prototype("putchard".to_owned(), vec!["char".to_owned()]),
        Prototype("printd".to_owned(), vec!["x".to_owned()]),
    ]
}
