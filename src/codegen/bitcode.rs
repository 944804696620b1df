//! In-memory IR backend for the program-builder facade.
//!
//! Builds a typed [`crate::ir::Program`] instruction by instruction,
//! maintaining successor/predecessor adjacency as terminators are emitted.
//! The result is verified and serialized (or handed to a JIT) by the
//! execution driver.

use std::collections::HashMap;

use crate::ir::{
    BasicBlock, BinOp, Function, GepStep, Instr, Linkage, Program, TypeId, TypeKind, TypeTable,
    ValId, ValueDef,
};

use super::{Cmp, GepIndex, ProgramBuilder, ScalarKind};

/// Basic-block handle: function index plus block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrBlock {
    func: u32,
    block: u32,
}

/// SSA value handle: function index plus value index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrValue {
    func: u32,
    id: u32,
}

/// Function handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrFunction(u32);

/// The bitcode backend.
#[derive(Debug, Default)]
pub struct IrProgram {
    program: Program,
    current: Option<IrBlock>,
    externals: HashMap<String, u32>,
    /// phi value -> (function, block, instruction index)
    phis: HashMap<(u32, u32), (u32, usize)>,
}

impl IrProgram {
    pub fn new() -> Self {
        IrProgram::default()
    }

    /// Consume the builder and return the finished program.
    pub fn finish(self) -> Program {
        self.program
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    fn types(&mut self) -> &mut TypeTable {
        &mut self.program.types
    }

    fn current(&self) -> IrBlock {
        self.current
            .expect("no current block: create a function first")
    }

    fn func_mut(&mut self, f: u32) -> &mut Function {
        &mut self.program.functions[f as usize]
    }

    fn new_value(&mut self, ty: TypeId) -> IrValue {
        let at = self.current();
        let func = self.func_mut(at.func);
        func.values.push(ValueDef { ty });
        IrValue {
            func: at.func,
            id: func.values.len() as u32 - 1,
        }
    }

    fn emit(&mut self, instr: Instr) {
        let at = self.current();
        self.func_mut(at.func).blocks[at.block as usize]
            .instrs
            .push(instr);
    }

    fn value_ty(&self, v: IrValue) -> TypeId {
        self.program.functions[v.func as usize].values[v.id as usize].ty
    }

    fn scalar_type(&mut self, kind: ScalarKind) -> TypeId {
        let kind = match kind {
            ScalarKind::I8 => TypeKind::I8,
            ScalarKind::I16 => TypeKind::I16,
            ScalarKind::I32 => TypeKind::I32,
            ScalarKind::I64 => TypeKind::I64,
            ScalarKind::UI32 => TypeKind::UI32,
            ScalarKind::F64 => TypeKind::F64,
            ScalarKind::Ptr => {
                let i8t = self.types().intern(TypeKind::I8);
                TypeKind::Pointer(i8t)
            }
        };
        self.types().intern(kind)
    }

    fn binary(&mut self, op: BinOp, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        debug_assert_ne!(kind, ScalarKind::Ptr, "pointer arithmetic is not typed");
        let ty = self.scalar_type(kind);
        let result = self.new_value(ty);
        self.emit(Instr::Binary {
            op,
            kind,
            lhs: ValId(a.id),
            rhs: ValId(b.id),
            result: ValId(result.id),
        });
        result
    }

    fn new_function(
        &mut self,
        name: String,
        linkage: Linkage,
        ret: TypeId,
        params: &[TypeId],
    ) -> IrFunction {
        let idx = self.program.functions.len() as u32;
        let values = params.iter().map(|&ty| ValueDef { ty }).collect();
        let blocks = if linkage == Linkage::External {
            vec![]
        } else {
            vec![BasicBlock::default()]
        };
        self.program.functions.push(Function {
            name,
            linkage,
            ret,
            params: params.to_vec(),
            blocks,
            values,
        });
        if linkage != Linkage::External {
            self.current = Some(IrBlock {
                func: idx,
                block: 0,
            });
        }
        IrFunction(idx)
    }
}

impl ProgramBuilder for IrProgram {
    type Block = IrBlock;
    type Value = IrValue;
    type Type = TypeId;
    type Function = IrFunction;

    fn type_void(&mut self) -> TypeId {
        self.types().intern(TypeKind::Void)
    }

    fn type_i8(&mut self) -> TypeId {
        self.types().intern(TypeKind::I8)
    }

    fn type_i16(&mut self) -> TypeId {
        self.types().intern(TypeKind::I16)
    }

    fn type_i32(&mut self) -> TypeId {
        self.types().intern(TypeKind::I32)
    }

    fn type_i64(&mut self) -> TypeId {
        self.types().intern(TypeKind::I64)
    }

    fn type_ui32(&mut self) -> TypeId {
        self.types().intern(TypeKind::UI32)
    }

    fn type_f64(&mut self) -> TypeId {
        self.types().intern(TypeKind::F64)
    }

    fn type_struct(&mut self, fields: &[TypeId]) -> TypeId {
        self.types().intern(TypeKind::Struct(fields.to_vec()))
    }

    fn type_pointer(&mut self, pointee: TypeId) -> TypeId {
        self.types().intern(TypeKind::Pointer(pointee))
    }

    fn type_array(&mut self, element: TypeId) -> TypeId {
        self.types().intern(TypeKind::Array(element))
    }

    fn type_of(&mut self, v: IrValue) -> TypeId {
        self.value_ty(v)
    }

    fn size_of(&mut self, t: TypeId) -> IrValue {
        let ui32 = self.type_ui32();
        let result = self.new_value(ui32);
        self.emit(Instr::SizeOf {
            ty: t,
            result: ValId(result.id),
        });
        result
    }

    fn alloca(&mut self, t: TypeId) -> IrValue {
        let ptr = self.type_pointer(t);
        let result = self.new_value(ptr);
        self.emit(Instr::Alloca {
            ty: t,
            result: ValId(result.id),
        });
        result
    }

    fn null_ptr(&mut self, pointee: TypeId) -> IrValue {
        let ptr = self.type_pointer(pointee);
        let result = self.new_value(ptr);
        self.emit(Instr::NullPtr {
            ty: pointee,
            result: ValId(result.id),
        });
        result
    }

    fn get_element_ptr(&mut self, ptr: IrValue, indices: &[GepIndex<IrValue>]) -> IrValue {
        // Walk the pointee type through the index chain to type the result.
        let ptr_ty = self.value_ty(ptr);
        let known = match self.program.types.kind(ptr_ty) {
            TypeKind::Pointer(inner) => Some(*inner),
            _ => None,
        };
        let mut pointee = match known {
            Some(inner) => inner,
            None => self.type_i8(),
        };
        let mut steps = Vec::with_capacity(indices.len());
        for idx in indices {
            match idx {
                GepIndex::Element(v) => {
                    steps.push(GepStep::Element(ValId(v.id)));
                }
                GepIndex::Field(i) => {
                    if let TypeKind::Struct(fields) = self.program.types.kind(pointee) {
                        pointee = fields[*i as usize];
                    }
                    steps.push(GepStep::Field(*i));
                }
            }
        }

        let result_ty = self.type_pointer(pointee);
        let result = self.new_value(result_ty);
        self.emit(Instr::Gep {
            ptr: ValId(ptr.id),
            steps,
            result: ValId(result.id),
        });
        result
    }

    fn pointer_cast(&mut self, v: IrValue, to: TypeId) -> IrValue {
        let result = self.new_value(to);
        self.emit(Instr::PointerCast {
            v: ValId(v.id),
            to,
            result: ValId(result.id),
        });
        result
    }

    fn load(&mut self, ptr: IrValue) -> IrValue {
        let ptr_ty = self.value_ty(ptr);
        let known = match self.program.types.kind(ptr_ty) {
            TypeKind::Pointer(inner) => Some(*inner),
            _ => None,
        };
        let ty = match known {
            Some(inner) => inner,
            None => self.type_i8(),
        };
        let result = self.new_value(ty);
        self.emit(Instr::Load {
            ptr: ValId(ptr.id),
            result: ValId(result.id),
        });
        result
    }

    fn store(&mut self, ptr: IrValue, v: IrValue) {
        self.emit(Instr::Store {
            ptr: ValId(ptr.id),
            v: ValId(v.id),
        });
    }

    fn memcpy(&mut self, dest: IrValue, src: IrValue, len: IrValue) {
        self.emit(Instr::Memcpy {
            dest: ValId(dest.id),
            src: ValId(src.id),
            len: ValId(len.id),
        });
    }

    fn create_function(&mut self, ret: TypeId, params: &[TypeId]) -> IrFunction {
        let name = format!("fn{}", self.program.functions.len());
        self.new_function(name, Linkage::Internal, ret, params)
    }

    fn create_public_function(&mut self, name: &str, ret: TypeId, params: &[TypeId]) -> IrFunction {
        self.new_function(name.to_string(), Linkage::Public, ret, params)
    }

    fn declare_external(&mut self, name: &str, ret: TypeId, params: &[TypeId]) -> IrFunction {
        if let Some(&idx) = self.externals.get(name) {
            return IrFunction(idx);
        }
        let idx = self.program.functions.len() as u32;
        self.program.functions.push(Function {
            name: name.to_string(),
            linkage: Linkage::External,
            ret,
            params: params.to_vec(),
            blocks: vec![],
            values: params.iter().map(|&ty| ValueDef { ty }).collect(),
        });
        self.externals.insert(name.to_string(), idx);
        IrFunction(idx)
    }

    fn function_arguments(&mut self, f: IrFunction) -> Vec<IrValue> {
        let func = &self.program.functions[f.0 as usize];
        (0..func.params.len() as u32)
            .map(|id| IrValue { func: f.0, id })
            .collect()
    }

    fn ret(&mut self, v: IrValue) {
        self.emit(Instr::Ret { v: Some(ValId(v.id)) });
    }

    fn ret_void(&mut self) {
        self.emit(Instr::Ret { v: None });
    }

    fn call(&mut self, f: IrFunction, args: &[IrValue]) -> IrValue {
        let ret_ty = self.program.functions[f.0 as usize].ret;
        let is_void = *self.program.types.kind(ret_ty) == TypeKind::Void;
        let result = self.new_value(ret_ty);
        self.emit(Instr::Call {
            func: f.0,
            args: args.iter().map(|a| ValId(a.id)).collect(),
            result: if is_void { None } else { Some(ValId(result.id)) },
        });
        result
    }

    fn function_pointer(&mut self, f: IrFunction) -> IrValue {
        let ty = self.scalar_type(ScalarKind::Ptr);
        let result = self.new_value(ty);
        self.emit(Instr::FunctionPointer {
            func: f.0,
            result: ValId(result.id),
        });
        result
    }

    fn generate_block(&mut self) -> IrBlock {
        let at = self.current();
        let func = self.func_mut(at.func);
        func.blocks.push(BasicBlock::default());
        IrBlock {
            func: at.func,
            block: func.blocks.len() as u32 - 1,
        }
    }

    fn current_block(&self) -> IrBlock {
        self.current()
    }

    fn set_current_block(&mut self, b: IrBlock) {
        self.current = Some(b);
    }

    fn branch(&mut self, target: IrBlock) {
        let at = self.current();
        debug_assert_eq!(at.func, target.func);
        self.emit(Instr::Branch {
            target: target.block,
        });
        let func = self.func_mut(at.func);
        func.blocks[at.block as usize]
            .successors
            .push(target.block as usize);
        func.blocks[target.block as usize]
            .predecessors
            .push(at.block as usize);
    }

    fn cond_branch(&mut self, cond: IrValue, if_true: IrBlock, if_false: IrBlock) {
        let at = self.current();
        self.emit(Instr::CondBranch {
            cond: ValId(cond.id),
            if_true: if_true.block,
            if_false: if_false.block,
        });
        let func = self.func_mut(at.func);
        func.blocks[at.block as usize]
            .successors
            .push(if_true.block as usize);
        func.blocks[at.block as usize]
            .successors
            .push(if_false.block as usize);
        func.blocks[if_true.block as usize]
            .predecessors
            .push(at.block as usize);
        func.blocks[if_false.block as usize]
            .predecessors
            .push(at.block as usize);
    }

    fn phi(&mut self, t: TypeId) -> IrValue {
        let at = self.current();
        let result = self.new_value(t);
        self.emit(Instr::Phi {
            ty: t,
            incomings: vec![],
            result: ValId(result.id),
        });
        let idx = self.func_mut(at.func).blocks[at.block as usize].instrs.len() - 1;
        self.phis.insert((at.func, result.id), (at.block, idx));
        result
    }

    fn add_phi_incoming(&mut self, phi: IrValue, v: IrValue, from: IrBlock) {
        if let Some(&(block, idx)) = self.phis.get(&(phi.func, phi.id)) {
            let func = self.func_mut(phi.func);
            if let Instr::Phi { incomings, .. } = &mut func.blocks[block as usize].instrs[idx] {
                incomings.push((ValId(v.id), from.block));
            }
        }
    }

    fn add(&mut self, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        self.binary(BinOp::Add, kind, a, b)
    }

    fn sub(&mut self, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        self.binary(BinOp::Sub, kind, a, b)
    }

    fn mul(&mut self, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        self.binary(BinOp::Mul, kind, a, b)
    }

    fn div(&mut self, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        self.binary(BinOp::Div, kind, a, b)
    }

    fn modulo(&mut self, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        self.binary(BinOp::Mod, kind, a, b)
    }

    fn cmp(&mut self, pred: Cmp, kind: ScalarKind, a: IrValue, b: IrValue) -> IrValue {
        let i8t = self.type_i8();
        let result = self.new_value(i8t);
        self.emit(Instr::Cmp {
            pred,
            kind,
            lhs: ValId(a.id),
            rhs: ValId(b.id),
            result: ValId(result.id),
        });
        result
    }

    fn lnot(&mut self, v: IrValue) -> IrValue {
        let i8t = self.type_i8();
        let result = self.new_value(i8t);
        self.emit(Instr::LNot {
            v: ValId(v.id),
            result: ValId(result.id),
        });
        result
    }

    fn cast(&mut self, from: ScalarKind, to: ScalarKind, v: IrValue) -> IrValue {
        let ty = self.scalar_type(to);
        let result = self.new_value(ty);
        self.emit(Instr::Cast {
            from,
            to,
            v: ValId(v.id),
            result: ValId(result.id),
        });
        result
    }

    fn const_i8(&mut self, v: i8) -> IrValue {
        let ty = self.type_i8();
        let result = self.new_value(ty);
        self.emit(Instr::ConstI8 {
            v,
            result: ValId(result.id),
        });
        result
    }

    fn const_i16(&mut self, v: i16) -> IrValue {
        let ty = self.type_i16();
        let result = self.new_value(ty);
        self.emit(Instr::ConstI16 {
            v,
            result: ValId(result.id),
        });
        result
    }

    fn const_i32(&mut self, v: i32) -> IrValue {
        let ty = self.type_i32();
        let result = self.new_value(ty);
        self.emit(Instr::ConstI32 {
            v,
            result: ValId(result.id),
        });
        result
    }

    fn const_i64(&mut self, v: i64) -> IrValue {
        let ty = self.type_i64();
        let result = self.new_value(ty);
        self.emit(Instr::ConstI64 {
            v,
            result: ValId(result.id),
        });
        result
    }

    fn const_ui32(&mut self, v: u32) -> IrValue {
        let ty = self.type_ui32();
        let result = self.new_value(ty);
        self.emit(Instr::ConstUI32 {
            v,
            result: ValId(result.id),
        });
        result
    }

    fn const_f64(&mut self, v: f64) -> IrValue {
        let ty = self.type_f64();
        let result = self.new_value(ty);
        self.emit(Instr::ConstF64 {
            v,
            result: ValId(result.id),
        });
        result
    }

    fn string_constant(&mut self, s: &str) -> IrValue {
        let index = match self.program.strings.iter().position(|x| x == s) {
            Some(i) => i as u32,
            None => {
                self.program.strings.push(s.to_string());
                self.program.strings.len() as u32 - 1
            }
        };
        let ty = self.scalar_type(ScalarKind::Ptr);
        let result = self.new_value(ty);
        self.emit(Instr::StringConst {
            index,
            result: ValId(result.id),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify;

    #[test]
    fn test_minimal_function_verifies() {
        let mut pb = IrProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);
        pb.ret_void();

        let program = pb.finish();
        assert!(verify(&program).is_ok());
        assert!(program.function_by_name("compute").is_some());
    }

    #[test]
    fn test_branch_adjacency_maintained() {
        let mut pb = IrProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);

        let header = pb.generate_block();
        let exit = pb.generate_block();

        let one = pb.const_i8(1);
        pb.cond_branch(one, header, exit);

        pb.set_current_block(header);
        pb.branch(exit);

        pb.set_current_block(exit);
        pb.ret_void();

        let program = pb.finish();
        let func = program.function_by_name("compute").unwrap();
        assert_eq!(func.blocks[0].successors, vec![1, 2]);
        assert_eq!(func.blocks[1].successors, vec![2]);
        let mut preds = func.blocks[2].predecessors.clone();
        preds.sort_unstable();
        assert_eq!(preds, vec![0, 1]);

        assert!(verify(&program).is_ok());
    }

    #[test]
    fn test_external_declaration_dedupes() {
        let mut pb = IrProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);

        let i32t = pb.type_i32();
        let a = pb.declare_external("fusedb_print_i32", void, &[i32t]);
        let b = pb.declare_external("fusedb_print_i32", void, &[i32t]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unterminated_block_detected() {
        let mut pb = IrProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);
        pb.const_i32(1);

        let program = pb.finish();
        assert!(matches!(
            verify(&program),
            Err(crate::ir::IrError::UnterminatedBlock { .. })
        ));
    }
}
