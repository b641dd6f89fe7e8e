use super::ir::{BlockRef, FunctionData, Inst, Terminator, ValueRef};
use std::collections::HashSet;

/// Structural checks on a function body: terminated blocks, phis grouped at
/// block entry with one edge per predecessor, and operands that resolve to
/// parameters, constants or placed instructions of this same function.
pub(crate) fn verify(f: &FunctionData) -> Result<(), String> {
    let placed: HashSet<usize> = f
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter().map(|v| v.0))
        .collect();

    let defined = |v: ValueRef| match f.values.get(v.0) {
        Some(Inst::Param(_)) | Some(Inst::Const(_)) => true,
        Some(_) => placed.contains(&v.0),
        None => false,
    };
    let in_function = |b: BlockRef| b.index < f.blocks.len();

    let mut preds: Vec<HashSet<usize>> = vec![HashSet::new(); f.blocks.len()];
    for (i, block) in f.blocks.iter().enumerate() {
        let term = block
            .term
            .ok_or_else(|| format!("block '{}' in '{}' has no terminator", block.name, f.name))?;
        for succ in term.successors() {
            if !in_function(succ) {
                return Err(format!("block '{}' branches outside '{}'", block.name, f.name));
            }
            preds[succ.index].insert(i);
        }
    }

    for (i, block) in f.blocks.iter().enumerate() {
        if block.overrun {
            return Err(format!(
                "block '{}' in '{}' continues past its terminator",
                block.name, f.name
            ));
        }

        let mut past_phis = false;
        for v in &block.insts {
            let inst = &f.values[v.0];
            if let Inst::Phi(incoming) = inst {
                if past_phis {
                    return Err(format!("phi not at the start of block '{}'", block.name));
                }
                let from: HashSet<usize> = incoming.iter().map(|(_, b)| b.index).collect();
                if incoming.len() != preds[i].len() || from != preds[i] {
                    return Err(format!(
                        "phi in block '{}' does not match its predecessors",
                        block.name
                    ));
                }
            } else {
                past_phis = true;
            }

            if let Some(bad) = inst.operands().into_iter().find(|o| !defined(*o)) {
                return Err(format!("use of undefined value %{} in '{}'", bad.0, f.name));
            }
        }

        let used = match block.term {
            Some(Terminator::CondBr(c, _, _)) => Some(c),
            Some(Terminator::Ret(v)) => Some(v),
            _ => None,
        };
        if let Some(v) = used {
            if !defined(v) {
                return Err(format!("use of undefined value %{} in '{}'", v.0, f.name));
            }
        }
    }

    Ok(())
}
