//! # Typed IR
//!
//! The in-memory program representation built by the bitcode backend: a
//! [`Program`] owns interned types, global string constants, and functions;
//! a [`Function`] owns an ordered list of [`BasicBlock`]s; each block owns
//! its instructions plus successor and predecessor lists. Every instruction
//! produces at most one SSA value of a fixed type.
//!
//! Invariants (checked by [`verify`]):
//! - every block ends in exactly one terminator, at its end;
//! - successor/predecessor lists mutually agree with the terminators;
//! - phi operand blocks are predecessors of the containing block;
//! - every operand is defined on all paths from entry to its use.

pub mod bitcode;
pub mod verify;

pub use bitcode::{read_bitcode, write_bitcode, BitcodeError};
pub use verify::{verify, IrError};

use serde::{Deserialize, Serialize};

use crate::codegen::{Cmp, ScalarKind};

/// Interned type handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// SSA value handle, scoped to its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValId(pub u32);

/// Type structure. Arrays are unsized (element type only); structs list
/// their field types in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    I8,
    I16,
    I32,
    I64,
    UI32,
    F64,
    Pointer(TypeId),
    Array(TypeId),
    Struct(Vec<TypeId>),
}

/// Interning table for types. Small enough that interning is a linear scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable { kinds: Vec::new() }
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(i) = self.kinds.iter().position(|k| *k == kind) {
            return TypeId(i as u32);
        }
        self.kinds.push(kind);
        TypeId(self.kinds.len() as u32 - 1)
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// All struct types, in interning order.
    pub fn structs(&self) -> impl Iterator<Item = (TypeId, &[TypeId])> {
        self.kinds.iter().enumerate().filter_map(|(i, k)| match k {
            TypeKind::Struct(fields) => Some((TypeId(i as u32), fields.as_slice())),
            _ => None,
        })
    }

    /// Natural alignment in bytes. Unsized kinds align to 1.
    pub fn align_of(&self, id: TypeId) -> u32 {
        match self.kind(id) {
            TypeKind::Void => 1,
            TypeKind::I8 => 1,
            TypeKind::I16 => 2,
            TypeKind::I32 | TypeKind::UI32 => 4,
            TypeKind::I64 | TypeKind::F64 | TypeKind::Pointer(_) => 8,
            TypeKind::Array(elem) => self.align_of(*elem),
            TypeKind::Struct(fields) => fields.iter().map(|f| self.align_of(*f)).max().unwrap_or(1),
        }
    }

    /// Byte size under C layout rules (fields padded to natural alignment,
    /// struct size rounded up to struct alignment). Sized kinds only; void
    /// and unsized arrays report 0.
    pub fn size_of(&self, id: TypeId) -> u32 {
        match self.kind(id) {
            TypeKind::Void | TypeKind::Array(_) => 0,
            TypeKind::I8 => 1,
            TypeKind::I16 => 2,
            TypeKind::I32 | TypeKind::UI32 => 4,
            TypeKind::I64 | TypeKind::F64 | TypeKind::Pointer(_) => 8,
            TypeKind::Struct(fields) => {
                let mut offset = 0u32;
                for f in fields {
                    let align = self.align_of(*f);
                    offset = round_up(offset, align);
                    offset += self.size_of(*f);
                }
                round_up(offset, self.align_of(id))
            }
        }
    }

    /// Byte offset of field `index` of a struct type.
    pub fn field_offset(&self, id: TypeId, index: u32) -> u32 {
        let TypeKind::Struct(fields) = self.kind(id) else {
            return 0;
        };
        let fields = fields.clone();
        let mut offset = 0u32;
        for (i, f) in fields.iter().enumerate() {
            offset = round_up(offset, self.align_of(*f));
            if i as u32 == index {
                return offset;
            }
            offset += self.size_of(*f);
        }
        offset
    }
}

fn round_up(v: u32, align: u32) -> u32 {
    v.div_ceil(align) * align
}

/// One step of a GEP index chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GepStep {
    Element(ValId),
    Field(u32),
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// IR instructions. `result` handles reference the owning function's value
/// table; block references are indices into the owning function's blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Binary {
        op: BinOp,
        kind: ScalarKind,
        lhs: ValId,
        rhs: ValId,
        result: ValId,
    },
    Cmp {
        pred: Cmp,
        kind: ScalarKind,
        lhs: ValId,
        rhs: ValId,
        result: ValId,
    },
    LNot {
        v: ValId,
        result: ValId,
    },
    Cast {
        from: ScalarKind,
        to: ScalarKind,
        v: ValId,
        result: ValId,
    },
    ConstI8 {
        v: i8,
        result: ValId,
    },
    ConstI16 {
        v: i16,
        result: ValId,
    },
    ConstI32 {
        v: i32,
        result: ValId,
    },
    ConstI64 {
        v: i64,
        result: ValId,
    },
    ConstUI32 {
        v: u32,
        result: ValId,
    },
    ConstF64 {
        v: f64,
        result: ValId,
    },
    StringConst {
        index: u32,
        result: ValId,
    },
    SizeOf {
        ty: TypeId,
        result: ValId,
    },
    Alloca {
        ty: TypeId,
        result: ValId,
    },
    NullPtr {
        ty: TypeId,
        result: ValId,
    },
    Gep {
        ptr: ValId,
        steps: Vec<GepStep>,
        result: ValId,
    },
    PointerCast {
        v: ValId,
        to: TypeId,
        result: ValId,
    },
    Load {
        ptr: ValId,
        result: ValId,
    },
    Store {
        ptr: ValId,
        v: ValId,
    },
    Memcpy {
        dest: ValId,
        src: ValId,
        len: ValId,
    },
    Call {
        func: u32,
        args: Vec<ValId>,
        result: Option<ValId>,
    },
    FunctionPointer {
        func: u32,
        result: ValId,
    },
    Phi {
        ty: TypeId,
        incomings: Vec<(ValId, u32)>,
        result: ValId,
    },
    Branch {
        target: u32,
    },
    CondBranch {
        cond: ValId,
        if_true: u32,
        if_false: u32,
    },
    Ret {
        v: Option<ValId>,
    },
}

impl Instr {
    /// The SSA value this instruction produces, if any.
    pub fn result(&self) -> Option<ValId> {
        match self {
            Instr::Binary { result, .. }
            | Instr::Cmp { result, .. }
            | Instr::LNot { result, .. }
            | Instr::Cast { result, .. }
            | Instr::ConstI8 { result, .. }
            | Instr::ConstI16 { result, .. }
            | Instr::ConstI32 { result, .. }
            | Instr::ConstI64 { result, .. }
            | Instr::ConstUI32 { result, .. }
            | Instr::ConstF64 { result, .. }
            | Instr::StringConst { result, .. }
            | Instr::SizeOf { result, .. }
            | Instr::Alloca { result, .. }
            | Instr::NullPtr { result, .. }
            | Instr::Gep { result, .. }
            | Instr::PointerCast { result, .. }
            | Instr::Load { result, .. }
            | Instr::FunctionPointer { result, .. }
            | Instr::Phi { result, .. } => Some(*result),
            Instr::Call { result, .. } => *result,
            Instr::Store { .. }
            | Instr::Memcpy { .. }
            | Instr::Branch { .. }
            | Instr::CondBranch { .. }
            | Instr::Ret { .. } => None,
        }
    }

    /// Non-phi operand values. Phi incomings are checked separately against
    /// predecessor blocks.
    pub fn operands(&self) -> Vec<ValId> {
        match self {
            Instr::Binary { lhs, rhs, .. } | Instr::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::LNot { v, .. } | Instr::Cast { v, .. } | Instr::PointerCast { v, .. } => {
                vec![*v]
            }
            Instr::Gep { ptr, steps, .. } => {
                let mut ops = vec![*ptr];
                for s in steps {
                    if let GepStep::Element(v) = s {
                        ops.push(*v);
                    }
                }
                ops
            }
            Instr::Load { ptr, .. } => vec![*ptr],
            Instr::Store { ptr, v } => vec![*ptr, *v],
            Instr::Memcpy { dest, src, len } => vec![*dest, *src, *len],
            Instr::Call { args, .. } => args.clone(),
            Instr::CondBranch { cond, .. } => vec![*cond],
            Instr::Ret { v } => v.map(|v| vec![v]).unwrap_or_default(),
            _ => vec![],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Branch { .. } | Instr::CondBranch { .. } | Instr::Ret { .. }
        )
    }
}

/// A basic block: instructions plus its CFG adjacency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub instrs: Vec<Instr>,
    pub successors: Vec<usize>,
    pub predecessors: Vec<usize>,
}

/// Function linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Defined here, visible only within the module.
    Internal,
    /// Defined here, exported under its symbol name with C linkage.
    Public,
    /// Declared here, resolved by the linker or the runtime.
    External,
}

/// Per-value bookkeeping: the value's type. Values `0..params.len()` are the
/// function parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDef {
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub ret: TypeId,
    pub params: Vec<TypeId>,
    pub blocks: Vec<BasicBlock>,
    pub values: Vec<ValueDef>,
}

impl Function {
    pub fn is_external(&self) -> bool {
        self.linkage == Linkage::External
    }

    /// Successor adjacency for the CFG analyses.
    pub fn successor_lists(&self) -> Vec<Vec<usize>> {
        self.blocks.iter().map(|b| b.successors.clone()).collect()
    }

    /// Predecessor adjacency for the CFG analyses.
    pub fn predecessor_lists(&self) -> Vec<Vec<usize>> {
        self.blocks.iter().map(|b| b.predecessors.clone()).collect()
    }
}

/// A complete IR program: declared types, global constants, and functions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub types: TypeTable,
    pub strings: Vec<String>,
    pub functions: Vec<Function>,
}

impl Program {
    /// Find a function by symbol name.
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_interning_dedupes() {
        let mut types = TypeTable::new();
        let a = types.intern(TypeKind::I32);
        let b = types.intern(TypeKind::I32);
        assert_eq!(a, b);

        let p1 = types.intern(TypeKind::Pointer(a));
        let p2 = types.intern(TypeKind::Pointer(b));
        assert_eq!(p1, p2);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn test_struct_layout() {
        let mut types = TypeTable::new();
        let i8t = types.intern(TypeKind::I8);
        let i32t = types.intern(TypeKind::I32);
        let i64t = types.intern(TypeKind::I64);
        let s = types.intern(TypeKind::Struct(vec![i8t, i32t, i64t]));

        // i8 at 0, i32 padded to 4, i64 padded to 8; total 16.
        assert_eq!(types.field_offset(s, 0), 0);
        assert_eq!(types.field_offset(s, 1), 4);
        assert_eq!(types.field_offset(s, 2), 8);
        assert_eq!(types.size_of(s), 16);
        assert_eq!(types.align_of(s), 8);
    }

    #[test]
    fn test_string_record_layout() {
        let mut types = TypeTable::new();
        let i8t = types.intern(TypeKind::I8);
        let ptr = types.intern(TypeKind::Pointer(i8t));
        let u32t = types.intern(TypeKind::UI32);
        let s = types.intern(TypeKind::Struct(vec![ptr, u32t]));

        assert_eq!(types.field_offset(s, 0), 0);
        assert_eq!(types.field_offset(s, 1), 8);
        assert_eq!(types.size_of(s), 16);
    }
}
