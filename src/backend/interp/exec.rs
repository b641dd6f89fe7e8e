use super::fold::{one, truth, ult};
use super::ir::{BlockRef, FunctionData, Inst, Terminator};
use super::{HostFunction, Loaded, MAX_CALL_DEPTH};
use crate::error::{Error, ErrorKind, Result};

/// Walks loaded function bodies. Calls resolve by name against the most
/// recently loaded unit that defines the callee, then against host functions.
///
/// Every source-level call is one native stack frame, so nesting is capped at
/// `MAX_CALL_DEPTH`.
pub(crate) struct Machine<'a> {
    pub(crate) loaded: &'a [Loaded],
    pub(crate) hosts: &'a [HostFunction],
}

fn internal(message: String) -> Error {
    Error::from(ErrorKind::Internal(message))
}

impl<'a> Machine<'a> {
    fn call(&self, name: &str, args: &[f64], depth: usize) -> Result<f64> {
        for loaded in self.loaded.iter().rev() {
            if let Some((_, f)) = loaded.unit.defined(name) {
                return self.frame(f, args, depth);
            }
        }
        match self.hosts.iter().find(|h| h.name == name) {
            Some(host) => host.call(args),
            None => Err(Error::from(ErrorKind::UnresolvedSymbol(name.to_owned()))),
        }
    }

    pub(crate) fn run(&self, f: &FunctionData, args: &[f64]) -> Result<f64> {
        self.frame(f, args, 0)
    }

    fn frame(&self, f: &FunctionData, args: &[f64], depth: usize) -> Result<f64> {
        if depth >= MAX_CALL_DEPTH {
            return Err(Error::from(ErrorKind::RecursionLimit(MAX_CALL_DEPTH)));
        }
        if args.len() != f.params.len() {
            return Err(internal(format!(
                "'{}' invoked with {} arguments, takes {}",
                f.name,
                args.len(),
                f.params.len()
            )));
        }

        let mut vals: Vec<f64> = f
            .values
            .iter()
            .map(|inst| match *inst {
                Inst::Param(i) => args[i],
                Inst::Const(c) => c,
                _ => 0.0,
            })
            .collect();

        let mut block = 0;
        let mut pred: Option<usize> = None;
        loop {
            let data = f
                .blocks
                .get(block)
                .ok_or_else(|| internal(format!("'{}' has no block {}", f.name, block)))?;

            // phis read their inputs as of block entry, all at once
            let mut phis = Vec::new();
            for v in data.insts.iter().take_while(|v| matches!(f.values[v.0], Inst::Phi(_))) {
                if let Inst::Phi(incoming) = &f.values[v.0] {
                    let from = incoming
                        .iter()
                        .find(|(_, b)| Some(b.index) == pred)
                        .ok_or_else(|| {
                            internal(format!("phi in '{}' has no edge for its predecessor", data.name))
                        })?;
                    phis.push((v.0, vals[(from.0).0]));
                }
            }
            for &(slot, value) in &phis {
                vals[slot] = value;
            }

            for v in &data.insts[phis.len()..] {
                vals[v.0] = match &f.values[v.0] {
                    Inst::Add(l, r) => vals[l.0] + vals[r.0],
                    Inst::Sub(l, r) => vals[l.0] - vals[r.0],
                    Inst::Mul(l, r) => vals[l.0] * vals[r.0],
                    Inst::CmpUlt(l, r) => truth(ult(vals[l.0], vals[r.0])),
                    Inst::CmpOne(l, r) => truth(one(vals[l.0], vals[r.0])),
                    Inst::BoolToNumber(x) => vals[x.0],
                    Inst::Call(name, args) => {
                        let argv: Vec<f64> = args.iter().map(|a| vals[a.0]).collect();
                        self.call(name, &argv, depth + 1)?
                    }
                    Inst::Param(_) | Inst::Const(_) | Inst::Phi(_) => vals[v.0],
                };
            }

            let next: BlockRef = match data.term {
                Some(Terminator::Ret(v)) => return Ok(vals[v.0]),
                Some(Terminator::Br(b)) => b,
                Some(Terminator::CondBr(c, t, e)) => {
                    if vals[c.0] != 0.0 {
                        t
                    } else {
                        e
                    }
                }
                None => {
                    return Err(internal(format!(
                        "block '{}' in '{}' fell through",
                        data.name, f.name
                    )))
                }
            };
            pred = Some(block);
            block = next.index;
        }
    }
}
