//! Native backend on top of LLVM's C API and MCJIT.
//!
//! Each unit is an LLVM module with its own function pass manager. Loading
//! hands the module to the execution engine; unloading removes and disposes
//! of it again. Host primitives are bound through global mappings, anything
//! else external is left to MCJIT's in-process symbol search.

use super::{Backend, CompilationUnit};
use crate::builtins;
use crate::error::{Error, ErrorKind, Result};
use libc::{c_char, c_uint, c_void};
use llvm_sys::analysis::{LLVMVerifierFailureAction, LLVMVerifyFunction};
use llvm_sys::core;
use llvm_sys::execution_engine as ee;
use llvm_sys::prelude::*;
use llvm_sys::target;
use llvm_sys::transforms::{instcombine, scalar};
use llvm_sys::LLVMRealPredicate;
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr;
use std::rc::Rc;
use tracing::debug;

fn c_name(s: &str) -> CString {
    // identifiers never contain NUL
    CString::new(s).unwrap_or_default()
}

unsafe fn take_message(message: *mut c_char) -> String {
    if message.is_null() {
        return String::new();
    }
    let s = CStr::from_ptr(message).to_string_lossy().into_owned();
    core::LLVMDisposeMessage(message);
    s
}

fn internal(message: String) -> Error {
    Error::from(ErrorKind::Internal(message))
}

struct Context {
    context: LLVMContextRef,
    builder: LLVMBuilderRef,
    double: LLVMTypeRef,
}

impl Context {
    fn new() -> Self {
        unsafe {
            let context = core::LLVMContextCreate();
            Context {
                context,
                builder: core::LLVMCreateBuilderInContext(context),
                double: core::LLVMDoubleTypeInContext(context),
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            core::LLVMDisposeBuilder(self.builder);
            core::LLVMContextDispose(self.context);
        }
    }
}

pub struct Unit {
    ctx: Rc<Context>,
    module: LLVMModuleRef,
    fpm: LLVMPassManagerRef,
}

impl Unit {
    /// Gives up ownership of the module, for handing it to the engine.
    fn into_module(mut self) -> LLVMModuleRef {
        let module = mem::replace(&mut self.module, ptr::null_mut());
        unsafe { core::LLVMDisposePassManager(self.fpm) };
        self.fpm = ptr::null_mut();
        module
    }
}

impl Drop for Unit {
    fn drop(&mut self) {
        unsafe {
            if !self.fpm.is_null() {
                core::LLVMDisposePassManager(self.fpm);
            }
            if !self.module.is_null() {
                core::LLVMDisposeModule(self.module);
            }
        }
    }
}

impl CompilationUnit for Unit {
    type Function = LLVMValueRef;
    type Block = LLVMBasicBlockRef;
    type Value = LLVMValueRef;

    fn get_function(&self, name: &str) -> Option<LLVMValueRef> {
        let name = c_name(name);
        let f = unsafe { core::LLVMGetNamedFunction(self.module, name.as_ptr()) };
        if f.is_null() {
            None
        } else {
            Some(f)
        }
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> LLVMValueRef {
        let cname = c_name(name);
        unsafe {
            let mut doubles = vec![self.ctx.double; params.len()];
            let fty = core::LLVMFunctionType(
                self.ctx.double,
                doubles.as_mut_ptr(),
                params.len() as c_uint,
                0,
            );
            let f = core::LLVMAddFunction(self.module, cname.as_ptr(), fty);
            for (i, p) in params.iter().enumerate() {
                let arg = core::LLVMGetParam(f, i as c_uint);
                let pname = c_name(p);
                core::LLVMSetValueName2(arg, pname.as_ptr(), p.len());
            }
            f
        }
    }

    fn param_count(&self, f: LLVMValueRef) -> usize {
        unsafe { core::LLVMCountParams(f) as usize }
    }

    fn param(&self, f: LLVMValueRef, index: usize) -> LLVMValueRef {
        unsafe { core::LLVMGetParam(f, index as c_uint) }
    }

    fn has_body(&self, f: LLVMValueRef) -> bool {
        unsafe { core::LLVMCountBasicBlocks(f) > 0 }
    }

    fn delete_function(&mut self, f: LLVMValueRef) {
        unsafe { core::LLVMDeleteFunction(f) }
    }

    fn append_block(&mut self, f: LLVMValueRef, name: &str) -> LLVMBasicBlockRef {
        let name = c_name(name);
        unsafe { core::LLVMAppendBasicBlockInContext(self.ctx.context, f, name.as_ptr()) }
    }

    fn position_at_end(&mut self, block: LLVMBasicBlockRef) {
        unsafe { core::LLVMPositionBuilderAtEnd(self.ctx.builder, block) }
    }

    fn insert_block(&self) -> LLVMBasicBlockRef {
        unsafe { core::LLVMGetInsertBlock(self.ctx.builder) }
    }

    fn const_number(&mut self, value: f64) -> LLVMValueRef {
        unsafe { core::LLVMConstReal(self.ctx.double, value) }
    }

    fn build_add(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildFAdd(
                self.ctx.builder,
                lhs,
                rhs,
                b"addtmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_sub(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildFSub(
                self.ctx.builder,
                lhs,
                rhs,
                b"subtmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_mul(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildFMul(
                self.ctx.builder,
                lhs,
                rhs,
                b"multmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_cmp_ult(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildFCmp(
                self.ctx.builder,
                LLVMRealPredicate::LLVMRealULT,
                lhs,
                rhs,
                b"cmptmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_cmp_one(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildFCmp(
                self.ctx.builder,
                LLVMRealPredicate::LLVMRealONE,
                lhs,
                rhs,
                b"cond\0".as_ptr() as *const _,
            )
        }
    }

    fn build_bool_to_number(&mut self, value: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildUIToFP(
                self.ctx.builder,
                value,
                self.ctx.double,
                b"booltmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_call(&mut self, callee: LLVMValueRef, args: &[LLVMValueRef]) -> LLVMValueRef {
        let mut args = args.to_vec();
        unsafe {
            core::LLVMBuildCall(
                self.ctx.builder,
                callee,
                args.as_mut_ptr(),
                args.len() as c_uint,
                b"calltmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_br(&mut self, dest: LLVMBasicBlockRef) {
        unsafe {
            core::LLVMBuildBr(self.ctx.builder, dest);
        }
    }

    fn build_cond_br(&mut self, cond: LLVMValueRef, then: LLVMBasicBlockRef, els: LLVMBasicBlockRef) {
        unsafe {
            core::LLVMBuildCondBr(self.ctx.builder, cond, then, els);
        }
    }

    fn build_phi(&mut self, incoming: &[(LLVMValueRef, LLVMBasicBlockRef)]) -> LLVMValueRef {
        let phi = unsafe {
            core::LLVMBuildPhi(
                self.ctx.builder,
                self.ctx.double,
                b"phitmp\0".as_ptr() as *const _,
            )
        };
        self.add_incoming(phi, incoming);
        phi
    }

    fn add_incoming(&mut self, phi: LLVMValueRef, incoming: &[(LLVMValueRef, LLVMBasicBlockRef)]) {
        let mut values: Vec<LLVMValueRef> = incoming.iter().map(|(v, _)| *v).collect();
        let mut blocks: Vec<LLVMBasicBlockRef> = incoming.iter().map(|(_, b)| *b).collect();
        unsafe {
            core::LLVMAddIncoming(
                phi,
                values.as_mut_ptr(),
                blocks.as_mut_ptr(),
                values.len() as c_uint,
            )
        }
    }

    fn build_ret(&mut self, value: LLVMValueRef) {
        unsafe {
            core::LLVMBuildRet(self.ctx.builder, value);
        }
    }

    fn verify_function(&self, f: LLVMValueRef) -> std::result::Result<(), String> {
        let broken = unsafe {
            LLVMVerifyFunction(f, LLVMVerifierFailureAction::LLVMReturnStatusAction)
        };
        if broken != 0 {
            Err(format!("LLVM rejected function:\n{}", self.print_function(f)))
        } else {
            Ok(())
        }
    }

    fn optimize_function(&mut self, f: LLVMValueRef) {
        unsafe {
            core::LLVMRunFunctionPassManager(self.fpm, f);
        }
    }

    fn print_function(&self, f: LLVMValueRef) -> String {
        unsafe { take_message(core::LLVMPrintValueToString(f)) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitKey(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol(u64);

pub struct LlvmBackend {
    ctx: Rc<Context>,
    engine: ee::LLVMExecutionEngineRef,
    next_key: usize,
    loaded: Vec<(UnitKey, LLVMModuleRef)>,
}

impl LlvmBackend {
    pub fn new() -> Result<Self> {
        unsafe {
            ee::LLVMLinkInMCJIT();
            if target::LLVM_InitializeNativeTarget() != 0
                || target::LLVM_InitializeNativeAsmPrinter() != 0
            {
                return Err(internal("native target unavailable".to_owned()));
            }

            let ctx = Rc::new(Context::new());
            let host = core::LLVMModuleCreateWithNameInContext(
                b"host\0".as_ptr() as *const _,
                ctx.context,
            );

            let mut options: ee::LLVMMCJITCompilerOptions = mem::zeroed();
            let size = mem::size_of::<ee::LLVMMCJITCompilerOptions>();
            ee::LLVMInitializeMCJITCompilerOptions(&mut options, size);

            let mut engine = ptr::null_mut();
            let mut err = ptr::null_mut();
            if ee::LLVMCreateMCJITCompilerForModule(&mut engine, host, &mut options, size, &mut err)
                != 0
            {
                return Err(internal(take_message(err)));
            }

            Ok(LlvmBackend {
                ctx,
                engine,
                next_key: 0,
                loaded: Vec::new(),
            })
        }
    }

    fn host_functions() -> [(&'static str, *mut c_void); 2] {
        [
            ("putchard", builtins::putchard as usize as *mut c_void),
            ("printd", builtins::printd as usize as *mut c_void),
        ]
    }
}

impl Drop for LlvmBackend {
    fn drop(&mut self) {
        // disposing the engine disposes every module it owns
        unsafe { ee::LLVMDisposeExecutionEngine(self.engine) }
    }
}

impl Backend for LlvmBackend {
    type Unit = Unit;
    type UnitKey = UnitKey;
    type Symbol = Symbol;

    fn create_unit(&mut self, name: &str) -> Unit {
        let cname = c_name(name);
        unsafe {
            let module = core::LLVMModuleCreateWithNameInContext(cname.as_ptr(), self.ctx.context);
            let data = ee::LLVMGetExecutionEngineTargetData(self.engine);
            let layout = target::LLVMCopyStringRepOfTargetData(data);
            core::LLVMSetDataLayout(module, layout);
            core::LLVMDisposeMessage(layout);

            let fpm = core::LLVMCreateFunctionPassManagerForModule(module);
            instcombine::LLVMAddInstructionCombiningPass(fpm);
            scalar::LLVMAddReassociatePass(fpm);
            scalar::LLVMAddGVNPass(fpm);
            scalar::LLVMAddCFGSimplificationPass(fpm);
            core::LLVMInitializeFunctionPassManager(fpm);

            Unit {
                ctx: self.ctx.clone(),
                module,
                fpm,
            }
        }
    }

    fn load_unit(&mut self, unit: Unit) -> Result<UnitKey> {
        let module = unit.into_module();
        unsafe {
            for (name, addr) in LlvmBackend::host_functions().iter() {
                let cname = c_name(name);
                let f = core::LLVMGetNamedFunction(module, cname.as_ptr());
                if !f.is_null() && core::LLVMCountBasicBlocks(f) == 0 {
                    ee::LLVMAddGlobalMapping(self.engine, f, *addr);
                }
            }
            ee::LLVMAddModule(self.engine, module);
        }
        let key = UnitKey(self.next_key);
        self.next_key += 1;
        debug!(key = key.0, "module added to engine");
        self.loaded.push((key, module));
        Ok(key)
    }

    fn unload_unit(&mut self, key: UnitKey) -> Result<()> {
        let index = self
            .loaded
            .iter()
            .position(|(k, _)| *k == key)
            .ok_or_else(|| internal(format!("unit {} is not loaded", key.0)))?;
        let (_, module) = self.loaded.remove(index);
        unsafe {
            let mut out = ptr::null_mut();
            let mut err = ptr::null_mut();
            if ee::LLVMRemoveModule(self.engine, module, &mut out, &mut err) != 0 {
                return Err(internal(take_message(err)));
            }
            core::LLVMDisposeModule(out);
        }
        debug!(key = key.0, "module removed from engine");
        Ok(())
    }

    fn lookup_symbol(&mut self, name: &str) -> Option<Symbol> {
        let cname = c_name(name);
        let addr = unsafe { ee::LLVMGetFunctionAddress(self.engine, cname.as_ptr()) };
        if addr == 0 {
            None
        } else {
            Some(Symbol(addr))
        }
    }

    fn invoke(&mut self, symbol: Symbol, args: &[f64]) -> Result<f64> {
        let addr = symbol.0 as usize;
        unsafe {
            match *args {
                [] => {
                    let f: extern "C" fn() -> f64 = mem::transmute(addr);
                    Ok(f())
                }
                [a] => {
                    let f: extern "C" fn(f64) -> f64 = mem::transmute(addr);
                    Ok(f(a))
                }
                [a, b] => {
                    let f: extern "C" fn(f64, f64) -> f64 = mem::transmute(addr);
                    Ok(f(a, b))
                }
                [a, b, c] => {
                    let f: extern "C" fn(f64, f64, f64) -> f64 = mem::transmute(addr);
                    Ok(f(a, b, c))
                }
                _ => Err(internal(format!(
                    "cannot invoke a native function with {} arguments",
                    args.len()
                ))),
            }
        }
    }
}
