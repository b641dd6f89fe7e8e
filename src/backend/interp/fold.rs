use super::ir::{FunctionData, Inst, ValueRef};

fn constant(f: &FunctionData, v: ValueRef) -> Option<f64> {
    match f.values[v.0] {
        Inst::Const(c) => Some(c),
        _ => None,
    }
}

pub(crate) fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Evaluates an arithmetic or comparison instruction whose operands are all
/// constants. Calls and phis are never folded.
fn evaluate(f: &FunctionData, inst: &Inst) -> Option<f64> {
    let both = |l: &ValueRef, r: &ValueRef| Some((constant(f, *l)?, constant(f, *r)?));
    match inst {
        Inst::Add(l, r) => both(l, r).map(|(l, r)| l + r),
        Inst::Sub(l, r) => both(l, r).map(|(l, r)| l - r),
        Inst::Mul(l, r) => both(l, r).map(|(l, r)| l * r),
        Inst::CmpUlt(l, r) => both(l, r).map(|(l, r)| truth(ult(l, r))),
        Inst::CmpOne(l, r) => both(l, r).map(|(l, r)| truth(one(l, r))),
        Inst::BoolToNumber(v) => constant(f, *v),
        _ => None,
    }
}

pub(crate) fn ult(l: f64, r: f64) -> bool {
    l.is_nan() || r.is_nan() || l < r
}

pub(crate) fn one(l: f64, r: f64) -> bool {
    !l.is_nan() && !r.is_nan() && l != r
}

/// Replaces instructions with constant operands by their result, repeating
/// until nothing changes. Folded instructions leave their block but keep
/// their slot in the arena, so existing uses now see a constant.
pub(crate) fn fold_constants(f: &mut FunctionData) -> usize {
    let mut folded = 0;
    loop {
        let mut changed = false;
        for b in 0..f.blocks.len() {
            let mut i = 0;
            while i < f.blocks[b].insts.len() {
                let v = f.blocks[b].insts[i];
                match evaluate(f, &f.values[v.0]) {
                    Some(c) => {
                        f.values[v.0] = Inst::Const(c);
                        f.blocks[b].insts.remove(i);
                        folded += 1;
                        changed = true;
                    }
                    None => i += 1,
                }
            }
        }
        if !changed {
            return folded;
        }
    }
}
