//! Session configuration.
//!
//! Everything the parser and driver would otherwise read from ambient global
//! state is held here and handed to them when a session is built.

use std::collections::HashMap;

/// Binding strength of each binary operator.
///
/// An operator with no entry, or with a precedence of zero or less, is not a
/// binary operator at all.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecedenceTable {
    table: HashMap<char, i32>,
}

impl PrecedenceTable {
    pub fn empty() -> Self {
        PrecedenceTable {
            table: HashMap::new(),
        }
    }

    pub fn set(&mut self, op: char, precedence: i32) {
        self.table.insert(op, precedence);
    }

    pub fn get(&self, op: char) -> Option<i32> {
        match self.table.get(&op) {
            Some(&p) if p > 0 => Some(p),
            _ => None,
        }
    }
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        let mut table = PrecedenceTable::empty();
        table.set('<', 10);
        table.set('+', 20);
        table.set('-', 20);
        table.set('*', 40);
        table
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub precedence: PrecedenceTable,
    /// Run the backend's per-function optimization pass after verification.
    pub optimize: bool,
    /// Print each lowered function's IR next to its outcome.
    pub dump_ir: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            precedence: PrecedenceTable::default(),
            optimize: true,
            dump_ir: false,
        }
    }
}
