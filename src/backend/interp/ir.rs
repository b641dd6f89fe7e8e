//! In-memory SSA form used by the interpreting backend.
//!
//! Every function owns an arena of values. Parameters and constants live only
//! in the arena; instructions additionally appear, in order, in exactly one
//! block. Handles are plain indices and are only meaningful inside the unit
//! (and, for blocks and values, the function) that issued them.

use super::super::CompilationUnit;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub(crate) func: FuncRef,
    pub(crate) index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(pub(crate) usize);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inst {
    Param(usize),
    Const(f64),
    Add(ValueRef, ValueRef),
    Sub(ValueRef, ValueRef),
    Mul(ValueRef, ValueRef),
    CmpUlt(ValueRef, ValueRef),
    CmpOne(ValueRef, ValueRef),
    BoolToNumber(ValueRef),
    Call(String, Vec<ValueRef>),
    Phi(Vec<(ValueRef, BlockRef)>),
}

impl Inst {
    pub(crate) fn operands(&self) -> Vec<ValueRef> {
        match self {
            Inst::Param(_) | Inst::Const(_) => vec![],
            Inst::Add(l, r)
            | Inst::Sub(l, r)
            | Inst::Mul(l, r)
            | Inst::CmpUlt(l, r)
            | Inst::CmpOne(l, r) => vec![*l, *r],
            Inst::BoolToNumber(v) => vec![*v],
            Inst::Call(_, args) => args.clone(),
            Inst::Phi(incoming) => incoming.iter().map(|(v, _)| *v).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Terminator {
    Br(BlockRef),
    CondBr(ValueRef, BlockRef, BlockRef),
    Ret(ValueRef),
}

impl Terminator {
    pub(crate) fn successors(&self) -> Vec<BlockRef> {
        match *self {
            Terminator::Br(b) => vec![b],
            Terminator::CondBr(_, t, e) => vec![t, e],
            Terminator::Ret(_) => vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BlockData {
    pub(crate) name: String,
    pub(crate) insts: Vec<ValueRef>,
    pub(crate) term: Option<Terminator>,
    /// Set when anything was appended after the terminator.
    pub(crate) overrun: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionData {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) values: Vec<Inst>,
    pub(crate) blocks: Vec<BlockData>,
}

impl FunctionData {
    pub(crate) fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }
}

#[derive(Debug)]
pub struct Unit {
    pub(crate) name: String,
    pub(crate) functions: Vec<Option<FunctionData>>,
    cursor: Option<BlockRef>,
}

impl Unit {
    pub(crate) fn new(name: &str) -> Self {
        Unit {
            name: name.to_owned(),
            functions: Vec::new(),
            cursor: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn func(&self, f: FuncRef) -> &FunctionData {
        self.functions[f.0]
            .as_ref()
            .expect("handle to a deleted function")
    }

    fn func_mut(&mut self, f: FuncRef) -> &mut FunctionData {
        self.functions[f.0]
            .as_mut()
            .expect("handle to a deleted function")
    }

    fn cursor(&self) -> BlockRef {
        self.cursor
            .expect("instruction built without an insertion point")
    }

    /// Adds `inst` to the current function's arena without placing it in a block.
    fn push_value(&mut self, inst: Inst) -> ValueRef {
        let f = self.cursor().func;
        let data = self.func_mut(f);
        data.values.push(inst);
        ValueRef(data.values.len() - 1)
    }

    fn append_inst(&mut self, inst: Inst) -> ValueRef {
        let b = self.cursor();
        let v = self.push_value(inst);
        let block = &mut self.func_mut(b.func).blocks[b.index];
        if block.term.is_some() {
            block.overrun = true;
        }
        block.insts.push(v);
        v
    }

    fn terminate(&mut self, term: Terminator) {
        let b = self.cursor();
        let block = &mut self.func_mut(b.func).blocks[b.index];
        if block.term.is_some() {
            block.overrun = true;
        }
        block.term = Some(term);
    }

    /// The function called `name` if it carries a body.
    pub(crate) fn defined(&self, name: &str) -> Option<(FuncRef, &FunctionData)> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FuncRef(i), f)))
            .find(|(_, f)| f.name == name && f.has_body())
    }
}

impl CompilationUnit for Unit {
    type Function = FuncRef;
    type Block = BlockRef;
    type Value = ValueRef;

    fn get_function(&self, name: &str) -> Option<FuncRef> {
        self.functions
            .iter()
            .position(|f| f.as_ref().map_or(false, |f| f.name == name))
            .map(FuncRef)
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> FuncRef {
        let values = (0..params.len()).map(Inst::Param).collect();
        self.functions.push(Some(FunctionData {
            name: name.to_owned(),
            params: params.to_vec(),
            values,
            blocks: Vec::new(),
        }));
        FuncRef(self.functions.len() - 1)
    }

    fn param_count(&self, f: FuncRef) -> usize {
        self.func(f).params.len()
    }

    fn param(&self, _f: FuncRef, index: usize) -> ValueRef {
        // parameters occupy the first slots of the arena
        ValueRef(index)
    }

    fn has_body(&self, f: FuncRef) -> bool {
        self.func(f).has_body()
    }

    fn delete_function(&mut self, f: FuncRef) {
        self.functions[f.0] = None;
        if self.cursor.map_or(false, |b| b.func == f) {
            self.cursor = None;
        }
    }

    fn append_block(&mut self, f: FuncRef, name: &str) -> BlockRef {
        let data = self.func_mut(f);
        data.blocks.push(BlockData {
            name: name.to_owned(),
            insts: Vec::new(),
            term: None,
            overrun: false,
        });
        BlockRef {
            func: f,
            index: data.blocks.len() - 1,
        }
    }

    fn position_at_end(&mut self, block: BlockRef) {
        self.cursor = Some(block);
    }

    fn insert_block(&self) -> BlockRef {
        self.cursor()
    }

    fn const_number(&mut self, value: f64) -> ValueRef {
        self.push_value(Inst::Const(value))
    }

    fn build_add(&mut self, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        self.append_inst(Inst::Add(lhs, rhs))
    }

    fn build_sub(&mut self, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        self.append_inst(Inst::Sub(lhs, rhs))
    }

    fn build_mul(&mut self, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        self.append_inst(Inst::Mul(lhs, rhs))
    }

    fn build_cmp_ult(&mut self, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        self.append_inst(Inst::CmpUlt(lhs, rhs))
    }

    fn build_cmp_one(&mut self, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        self.append_inst(Inst::CmpOne(lhs, rhs))
    }

    fn build_bool_to_number(&mut self, value: ValueRef) -> ValueRef {
        self.append_inst(Inst::BoolToNumber(value))
    }

    fn build_call(&mut self, callee: FuncRef, args: &[ValueRef]) -> ValueRef {
        let name = self.func(callee).name.clone();
        self.append_inst(Inst::Call(name, args.to_vec()))
    }

    fn build_br(&mut self, dest: BlockRef) {
        self.terminate(Terminator::Br(dest));
    }

    fn build_cond_br(&mut self, cond: ValueRef, then: BlockRef, els: BlockRef) {
        self.terminate(Terminator::CondBr(cond, then, els));
    }

    fn build_phi(&mut self, incoming: &[(ValueRef, BlockRef)]) -> ValueRef {
        self.append_inst(Inst::Phi(incoming.to_vec()))
    }

    fn add_incoming(&mut self, phi: ValueRef, incoming: &[(ValueRef, BlockRef)]) {
        let f = self.cursor().func;
        if let Inst::Phi(edges) = &mut self.func_mut(f).values[phi.0] {
            edges.extend_from_slice(incoming);
        }
    }

    fn build_ret(&mut self, value: ValueRef) {
        self.terminate(Terminator::Ret(value));
    }

    fn verify_function(&self, f: FuncRef) -> Result<(), String> {
        super::verify::verify(self.func(f))
    }

    fn optimize_function(&mut self, f: FuncRef) {
        super::fold::fold_constants(self.func_mut(f));
    }

    fn print_function(&self, f: FuncRef) -> String {
        render(self.func(f))
    }
}

fn operand(f: &FunctionData, v: ValueRef) -> String {
    match f.values.get(v.0) {
        Some(Inst::Param(i)) => format!("%{}", f.params[*i]),
        Some(Inst::Const(c)) => format!("{:?}", c),
        _ => format!("%{}", v.0),
    }
}

fn render(f: &FunctionData) -> String {
    let params = f
        .params
        .iter()
        .map(|p| format!("double %{}", p))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    if !f.has_body() {
        let _ = writeln!(out, "declare double @{}({})", f.name, params);
        return out;
    }

    let _ = writeln!(out, "define double @{}({}) {{", f.name, params);
    for (i, block) in f.blocks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "{}:", block.name);
        for v in &block.insts {
            let op = |x: &ValueRef| operand(f, *x);
            let text = match &f.values[v.0] {
                Inst::Param(_) | Inst::Const(_) => continue,
                Inst::Add(l, r) => format!("fadd double {}, {}", op(l), op(r)),
                Inst::Sub(l, r) => format!("fsub double {}, {}", op(l), op(r)),
                Inst::Mul(l, r) => format!("fmul double {}, {}", op(l), op(r)),
                Inst::CmpUlt(l, r) => format!("fcmp ult double {}, {}", op(l), op(r)),
                Inst::CmpOne(l, r) => format!("fcmp one double {}, {}", op(l), op(r)),
                Inst::BoolToNumber(x) => format!("uitofp i1 {} to double", op(x)),
                Inst::Call(name, args) => format!(
                    "call double @{}({})",
                    name,
                    args.iter()
                        .map(|a| format!("double {}", op(a)))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                Inst::Phi(incoming) => format!(
                    "phi double {}",
                    incoming
                        .iter()
                        .map(|(x, b)| format!("[ {}, %{} ]", op(x), f.blocks[b.index].name))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            let _ = writeln!(out, "  %{} = {}", v.0, text);
        }
        let label = |b: BlockRef| format!("label %{}", f.blocks[b.index].name);
        match block.term {
            Some(Terminator::Br(b)) => {
                let _ = writeln!(out, "  br {}", label(b));
            }
            Some(Terminator::CondBr(c, t, e)) => {
                let _ = writeln!(
                    out,
                    "  br i1 {}, {}, {}",
                    operand(f, c),
                    label(t),
                    label(e)
                );
            }
            Some(Terminator::Ret(v)) => {
                let _ = writeln!(out, "  ret double {}", operand(f, v));
            }
            None => {}
        }
    }
    out.push_str("}\n");
    out
}
