//! # Program Builder Facade
//!
//! Typed IR construction behind a capability trait, so plan translators can
//! emit code without committing to a concrete backend. Two backends
//! implement the full capability set:
//!
//! - [`source::SourceProgram`] writes C++ source text (the ahead-of-time
//!   path: external compiler -> shared object -> dynamic load);
//! - [`bitcode::IrProgram`] builds a typed [`crate::ir::Program`] in memory
//!   (the bitcode path: verify -> serialize -> JIT boundary).
//!
//! Handles (blocks, values, types, functions) are opaque `Copy` tokens owned
//! by the backend. Partial backends are not permitted: every operation below
//! must be implemented.

pub mod abi;
pub mod bitcode;
pub mod control;
pub mod proxy;
pub mod source;

pub use bitcode::IrProgram;
pub use source::SourceProgram;

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to a program under construction. Translators and proxies
/// clone this freely; all emission is single-threaded and strictly
/// sequential, so borrows never overlap.
pub type ProgramRef<B> = Rc<RefCell<B>>;

/// Wrap a backend for use by translators and proxies.
pub fn program_ref<B: ProgramBuilder>(backend: B) -> ProgramRef<B> {
    Rc::new(RefCell::new(backend))
}

/// Comparison predicates. Logical results live in the i8 domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Scalar kinds keying arithmetic and comparison operations. `Ptr` is legal
/// for comparison only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    UI32,
    F64,
    Ptr,
}

/// One step of a `get_element_ptr` index chain: either an element offset
/// into an array of the pointee type, or a field of a struct pointee.
#[derive(Debug, Clone, Copy)]
pub enum GepIndex<V> {
    Element(V),
    Field(u32),
}

/// Capability-typed program construction. See module docs.
pub trait ProgramBuilder {
    type Block: Copy + Eq + std::fmt::Debug;
    type Value: Copy + std::fmt::Debug;
    type Type: Copy + Eq + std::fmt::Debug;
    type Function: Copy + std::fmt::Debug;

    // Types
    fn type_void(&mut self) -> Self::Type;
    fn type_i8(&mut self) -> Self::Type;
    fn type_i16(&mut self) -> Self::Type;
    fn type_i32(&mut self) -> Self::Type;
    fn type_i64(&mut self) -> Self::Type;
    fn type_ui32(&mut self) -> Self::Type;
    fn type_f64(&mut self) -> Self::Type;
    fn type_struct(&mut self, fields: &[Self::Type]) -> Self::Type;
    fn type_pointer(&mut self, pointee: Self::Type) -> Self::Type;
    fn type_array(&mut self, element: Self::Type) -> Self::Type;
    fn type_of(&mut self, v: Self::Value) -> Self::Type;
    /// Byte size of a type, as a ui32 value.
    fn size_of(&mut self, t: Self::Type) -> Self::Value;

    // Memory
    fn alloca(&mut self, t: Self::Type) -> Self::Value;
    fn null_ptr(&mut self, pointee: Self::Type) -> Self::Value;
    fn get_element_ptr(
        &mut self,
        ptr: Self::Value,
        indices: &[GepIndex<Self::Value>],
    ) -> Self::Value;
    fn pointer_cast(&mut self, v: Self::Value, to: Self::Type) -> Self::Value;
    fn load(&mut self, ptr: Self::Value) -> Self::Value;
    fn store(&mut self, ptr: Self::Value, v: Self::Value);
    fn memcpy(&mut self, dest: Self::Value, src: Self::Value, len: Self::Value);

    // Functions
    /// Internal-linkage function. Becomes current, with a fresh entry block.
    fn create_function(&mut self, ret: Self::Type, params: &[Self::Type]) -> Self::Function;
    /// Function defined here and exported under `name` with C linkage.
    fn create_public_function(
        &mut self,
        name: &str,
        ret: Self::Type,
        params: &[Self::Type],
    ) -> Self::Function;
    /// Function resolved by the linker or runtime. Idempotent per name.
    fn declare_external(
        &mut self,
        name: &str,
        ret: Self::Type,
        params: &[Self::Type],
    ) -> Self::Function;
    fn function_arguments(&mut self, f: Self::Function) -> Vec<Self::Value>;
    fn ret(&mut self, v: Self::Value);
    fn ret_void(&mut self);
    fn call(&mut self, f: Self::Function, args: &[Self::Value]) -> Self::Value;
    /// The function's address as an opaque pointer value.
    fn function_pointer(&mut self, f: Self::Function) -> Self::Value;

    // Control flow
    fn generate_block(&mut self) -> Self::Block;
    fn current_block(&self) -> Self::Block;
    fn set_current_block(&mut self, b: Self::Block);
    fn branch(&mut self, target: Self::Block);
    fn cond_branch(&mut self, cond: Self::Value, if_true: Self::Block, if_false: Self::Block);
    fn phi(&mut self, t: Self::Type) -> Self::Value;
    fn add_phi_incoming(&mut self, phi: Self::Value, v: Self::Value, from: Self::Block);

    // Arithmetic / comparison
    fn add(&mut self, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn sub(&mut self, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn mul(&mut self, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn div(&mut self, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn modulo(&mut self, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    /// i8-domain result: 1 when the predicate holds, 0 otherwise.
    fn cmp(&mut self, pred: Cmp, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn lnot(&mut self, v: Self::Value) -> Self::Value;
    /// Integer widening and int/float conversion.
    fn cast(&mut self, from: ScalarKind, to: ScalarKind, v: Self::Value) -> Self::Value;

    // Constants / globals
    fn const_i8(&mut self, v: i8) -> Self::Value;
    fn const_i16(&mut self, v: i16) -> Self::Value;
    fn const_i32(&mut self, v: i32) -> Self::Value;
    fn const_i64(&mut self, v: i64) -> Self::Value;
    fn const_ui32(&mut self, v: u32) -> Self::Value;
    fn const_f64(&mut self, v: f64) -> Self::Value;
    /// Pointer to a NUL-terminated global string constant.
    fn string_constant(&mut self, s: &str) -> Self::Value;
}
