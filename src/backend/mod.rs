//! The capabilities the code generator needs from a machine backend.
//!
//! A backend hands out [`CompilationUnit`]s. A unit is populated with
//! function declarations and bodies, then loaded, after which its symbols can
//! be looked up and invoked. A loaded unit can later be unloaded again, which
//! removes every symbol it defined.

use super::error::Result;

pub mod interp;
#[cfg(feature = "llvm")]
pub mod llvm;

/// One backend-loadable package of declarations and definitions, plus the
/// instruction builder used to populate it.
///
/// All numbers are `f64`; every function takes and returns `f64` only.
pub trait CompilationUnit {
    type Function: Copy + PartialEq;
    type Block: Copy + PartialEq;
    type Value: Copy;

    fn get_function(&self, name: &str) -> Option<Self::Function>;
    fn declare_function(&mut self, name: &str, params: &[String]) -> Self::Function;
    fn param_count(&self, f: Self::Function) -> usize;
    fn param(&self, f: Self::Function, index: usize) -> Self::Value;
    fn has_body(&self, f: Self::Function) -> bool;
    /// Removes `f`, declaration and body alike, from the unit.
    fn delete_function(&mut self, f: Self::Function);

    fn append_block(&mut self, f: Self::Function, name: &str) -> Self::Block;
    fn position_at_end(&mut self, block: Self::Block);
    /// The block instructions are currently appended to.
    fn insert_block(&self) -> Self::Block;

    fn const_number(&mut self, value: f64) -> Self::Value;
    fn build_add(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn build_sub(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn build_mul(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    /// Unordered-or-less-than; yields a boolean.
    fn build_cmp_ult(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    /// Ordered-and-not-equal; yields a boolean.
    fn build_cmp_one(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    /// Boolean to 0.0 / 1.0.
    fn build_bool_to_number(&mut self, value: Self::Value) -> Self::Value;
    fn build_call(&mut self, callee: Self::Function, args: &[Self::Value]) -> Self::Value;

    fn build_br(&mut self, dest: Self::Block);
    fn build_cond_br(&mut self, cond: Self::Value, then: Self::Block, els: Self::Block);
    fn build_phi(&mut self, incoming: &[(Self::Value, Self::Block)]) -> Self::Value;
    fn add_incoming(&mut self, phi: Self::Value, incoming: &[(Self::Value, Self::Block)]);
    fn build_ret(&mut self, value: Self::Value);

    /// Checks the structural consistency of `f`, describing the first problem found.
    fn verify_function(&self, f: Self::Function) -> std::result::Result<(), String>;
    fn optimize_function(&mut self, f: Self::Function);
    fn print_function(&self, f: Self::Function) -> String;
}

pub trait Backend {
    type Unit: CompilationUnit;
    type UnitKey: Copy;
    type Symbol: Copy;

    fn create_unit(&mut self, name: &str) -> Self::Unit;
    fn load_unit(&mut self, unit: Self::Unit) -> Result<Self::UnitKey>;
    fn unload_unit(&mut self, key: Self::UnitKey) -> Result<()>;

    /// Resolves `name`, preferring the most recently loaded definition.
    fn lookup_symbol(&mut self, name: &str) -> Option<Self::Symbol>;
    fn invoke(&mut self, symbol: Self::Symbol, args: &[f64]) -> Result<f64>;
}
