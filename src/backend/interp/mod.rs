//! A backend that keeps lowered code as SSA in memory and executes it by
//! walking the instructions.
//!
//! It implements the whole capability surface, load/unload lifecycle included,
//! without any native code generation, so it runs anywhere the crate builds.

mod exec;
mod fold;
pub mod ir;
mod verify;

use super::Backend;
use crate::builtins;
use crate::error::{Error, ErrorKind, Result};
use exec::Machine;
use ir::FuncRef;
pub use ir::Unit;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

pub type HostFn = Rc<dyn Fn(&[f64]) -> f64>;

/// Deepest chain of nested calls a single invocation may build.
pub const MAX_CALL_DEPTH: usize = 512;

/// A function provided by the embedding process rather than by source code.
pub(crate) struct HostFunction {
    pub(crate) name: String,
    arity: usize,
    f: HostFn,
}

impl HostFunction {
    pub(crate) fn call(&self, args: &[f64]) -> Result<f64> {
        if args.len() != self.arity {
            return Err(Error::from(ErrorKind::Internal(format!(
                "host function '{}' takes {} arguments, got {}",
                self.name,
                self.arity,
                args.len()
            ))));
        }
        Ok((self.f)(args))
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HostFunction({}/{})", self.name, self.arity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitKey(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Compiled { unit: UnitKey, function: FuncRef },
    Host(usize),
}

#[derive(Debug)]
pub(crate) struct Loaded {
    key: UnitKey,
    pub(crate) unit: Unit,
}

#[derive(Debug)]
pub struct InterpBackend {
    next_key: usize,
    loaded: Vec<Loaded>,
    hosts: Vec<HostFunction>,
}

impl InterpBackend {
    /// A backend with `putchard` and `printd` already registered.
    pub fn new() -> Self {
        let mut backend = InterpBackend::bare();
        backend.register_host("putchard", 1, Rc::new(|args: &[f64]| builtins::putchard(args[0])));
        backend.register_host("printd", 1, Rc::new(|args: &[f64]| builtins::printd(args[0])));
        backend
    }

    /// A backend without any host functions.
    pub fn bare() -> Self {
        InterpBackend {
            next_key: 0,
            loaded: Vec::new(),
            hosts: Vec::new(),
        }
    }

    /// Makes `f` callable from compiled code as `name`. A later registration
    /// under the same name replaces the earlier one.
    pub fn register_host(&mut self, name: &str, arity: usize, f: HostFn) {
        self.hosts.retain(|h| h.name != name);
        self.hosts.push(HostFunction {
            name: name.to_owned(),
            arity,
            f,
        });
    }

    pub fn loaded_units(&self) -> usize {
        self.loaded.len()
    }

    fn machine(&self) -> Machine {
        Machine {
            loaded: &self.loaded,
            hosts: &self.hosts,
        }
    }
}

impl Default for InterpBackend {
    fn default() -> Self {
        InterpBackend::new()
    }
}

impl Backend for InterpBackend {
    type Unit = Unit;
    type UnitKey = UnitKey;
    type Symbol = Symbol;

    fn create_unit(&mut self, name: &str) -> Unit {
        Unit::new(name)
    }

    fn load_unit(&mut self, unit: Unit) -> Result<UnitKey> {
        let key = UnitKey(self.next_key);
        self.next_key += 1;
        debug!(unit = %unit.name(), key = key.0, "loading unit");
        self.loaded.push(Loaded { key, unit });
        Ok(key)
    }

    fn unload_unit(&mut self, key: UnitKey) -> Result<()> {
        match self.loaded.iter().position(|l| l.key == key) {
            Some(index) => {
                let removed = self.loaded.remove(index);
                debug!(unit = %removed.unit.name(), key = key.0, "unloaded unit");
                Ok(())
            }
            None => Err(Error::from(ErrorKind::Internal(format!(
                "unit {} is not loaded",
                key.0
            )))),
        }
    }

    fn lookup_symbol(&mut self, name: &str) -> Option<Symbol> {
        for loaded in self.loaded.iter().rev() {
            if let Some((function, _)) = loaded.unit.defined(name) {
                return Some(Symbol::Compiled {
                    unit: loaded.key,
                    function,
                });
            }
        }
        self.hosts
            .iter()
            .position(|h| h.name == name)
            .map(Symbol::Host)
    }

    fn invoke(&mut self, symbol: Symbol, args: &[f64]) -> Result<f64> {
        match symbol {
            Symbol::Compiled { unit, function } => {
                let loaded = self
                    .loaded
                    .iter()
                    .find(|l| l.key == unit)
                    .ok_or_else(|| {
                        Error::from(ErrorKind::Internal(format!("unit {} is not loaded", unit.0)))
                    })?;
                let f = loaded.unit.functions[function.0].as_ref().ok_or_else(|| {
                    Error::from(ErrorKind::Internal("symbol refers to a deleted function".to_owned()))
                })?;
                self.machine().run(f, args)
            }
            Symbol::Host(index) => match self.hosts.get(index) {
                Some(host) => host.call(args),
                None => Err(Error::from(ErrorKind::Internal(format!(
                    "no host function {}",
                    index
                )))),
            },
        }
    }
}
