//! C++ source backend for the program-builder facade.
//!
//! Emits one statement per facade operation into an in-memory buffer. Fresh
//! variable names come from a monotonic counter; every declaration is
//! hoisted to the top of its function so the label-and-`goto` realization of
//! basic blocks never jumps over an initialization. Serialization is
//! deterministic: the same call sequence produces byte-identical source.
//!
//! Runtime symbols come from `fusedb_runtime.h`; only non-runtime externals
//! get an `extern "C"` forward declaration.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ir::{TypeId, TypeKind, TypeTable};

use super::{Cmp, GepIndex, ProgramBuilder, ScalarKind};

/// Basic-block handle: a global label id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcBlock(u32);

/// Value handle: a generated variable id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcValue(u32);

/// Function handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcFunction(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    Internal,
    Public,
    External,
}

#[derive(Debug)]
struct BlockBody {
    label: u32,
    stmts: Vec<String>,
    terminator: Option<String>,
}

#[derive(Debug)]
struct SourceFn {
    name: String,
    kind: FnKind,
    ret: TypeId,
    params: Vec<TypeId>,
    param_vars: Vec<u32>,
    decls: Vec<String>,
    blocks: Vec<BlockBody>,
}

/// The source-text backend.
#[derive(Debug, Default)]
pub struct SourceProgram {
    types: TypeTable,
    var_types: Vec<TypeId>,
    funcs: Vec<SourceFn>,
    /// Global block id -> (function index, local block index).
    block_homes: Vec<(u32, u32)>,
    current: Option<SrcBlock>,
    externals: HashMap<String, u32>,
}

impl SourceProgram {
    pub fn new() -> Self {
        SourceProgram::default()
    }

    /// Number of variables generated so far.
    pub fn variable_count(&self) -> usize {
        self.var_types.len()
    }

    fn current(&self) -> SrcBlock {
        self.current
            .expect("no current block: create a function first")
    }

    fn cpp_type(&self, ty: TypeId) -> String {
        match self.types.kind(ty) {
            TypeKind::Void => "void".to_string(),
            TypeKind::I8 => "int8_t".to_string(),
            TypeKind::I16 => "int16_t".to_string(),
            TypeKind::I32 => "int32_t".to_string(),
            TypeKind::I64 => "int64_t".to_string(),
            TypeKind::UI32 => "uint32_t".to_string(),
            TypeKind::F64 => "double".to_string(),
            TypeKind::Pointer(inner) | TypeKind::Array(inner) => {
                format!("{}*", self.cpp_type(*inner))
            }
            TypeKind::Struct(_) => format!("t{}", ty.0),
        }
    }

    fn current_fn_mut(&mut self) -> &mut SourceFn {
        let at = self.current();
        let (func, _) = self.block_homes[at.0 as usize];
        &mut self.funcs[func as usize]
    }

    fn block_mut(&mut self, b: SrcBlock) -> &mut BlockBody {
        let (func, local) = self.block_homes[b.0 as usize];
        &mut self.funcs[func as usize].blocks[local as usize]
    }

    /// Fresh variable with a hoisted declaration in the current function.
    fn new_var(&mut self, ty: TypeId) -> SrcValue {
        let id = self.var_types.len() as u32;
        self.var_types.push(ty);
        if *self.types.kind(ty) != TypeKind::Void {
            let decl = format!("{} v{};", self.cpp_type(ty), id);
            self.current_fn_mut().decls.push(decl);
        }
        SrcValue(id)
    }

    /// Fresh variable declared with an explicit C++ type.
    fn new_var_as(&mut self, ty: TypeId, cpp: &'static str) -> SrcValue {
        let id = self.var_types.len() as u32;
        self.var_types.push(ty);
        let decl = format!("{cpp} v{id};");
        self.current_fn_mut().decls.push(decl);
        SrcValue(id)
    }

    fn stmt(&mut self, s: String) {
        let at = self.current();
        self.block_mut(at).stmts.push(s);
    }

    fn terminate(&mut self, s: String) {
        let at = self.current();
        self.block_mut(at).terminator = Some(s);
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
                let i8t = self.types.intern(TypeKind::I8);
                TypeKind::Pointer(i8t)
            }
        };
        self.types.intern(kind)
    }

    fn binary(&mut self, op: &str, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        let ty = self.scalar_type(kind);
        let result = self.new_var(ty);
        self.stmt(format!("v{} = v{} {op} v{};", result.0, a.0, b.0));
        result
    }

    fn fn_symbol(&self, f: SrcFunction) -> &str {
        &self.funcs[f.0 as usize].name
    }

    fn new_function(
        &mut self,
        name: String,
        kind: FnKind,
        ret: TypeId,
        params: &[TypeId],
    ) -> SrcFunction {
        let idx = self.funcs.len() as u32;
        let param_vars: Vec<u32> = params
            .iter()
            .map(|&ty| {
                let id = self.var_types.len() as u32;
                self.var_types.push(ty);
                id
            })
            .collect();

        self.funcs.push(SourceFn {
            name,
            kind,
            ret,
            params: params.to_vec(),
            param_vars,
            decls: Vec::new(),
            blocks: Vec::new(),
        });

        if kind != FnKind::External {
            let label = self.block_homes.len() as u32;
            self.block_homes.push((idx, 0));
            self.funcs[idx as usize].blocks.push(BlockBody {
                label,
                stmts: Vec::new(),
                terminator: None,
            });
            self.current = Some(SrcBlock(label));
        }
        SrcFunction(idx)
    }

    fn signature(&self, f: &SourceFn) -> String {
        let params: Vec<String> = f
            .params
            .iter()
            .zip(&f.param_vars)
            .map(|(ty, var)| format!("{} v{var}", self.cpp_type(*ty)))
            .collect();
        let prefix = match f.kind {
            FnKind::Internal => "static ",
            FnKind::Public => "extern \"C\" ",
            FnKind::External => "extern \"C\" ",
        };
        format!(
            "{prefix}{} {}({})",
            self.cpp_type(f.ret),
            f.name,
            params.join(", ")
        )
    }

    /// Serialize the whole program as compilable C++.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        out.push_str("#include \"fusedb_runtime.h\"\n");
        out.push_str("#include <cstdint>\n");
        out.push_str("#include <cstring>\n\n");

        // Struct definitions, in interning order (fields intern first, so
        // this order is definition-before-use).
        for (id, fields) in self.types.structs() {
            let _ = write!(out, "struct t{} {{", id.0);
            for (i, field) in fields.iter().enumerate() {
                let _ = write!(out, " {} f{i};", self.cpp_type(*field));
            }
            out.push_str(" };\n");
        }
        if self.types.structs().next().is_some() {
            out.push('\n');
        }

        // Forward declarations: internal functions and non-runtime externals.
        for f in &self.funcs {
            match f.kind {
                FnKind::Internal => {
                    let _ = writeln!(out, "{};", self.signature(f));
                }
                FnKind::External if !f.name.starts_with("fusedb_") => {
                    let _ = writeln!(out, "{};", self.signature(f));
                }
                _ => {}
            }
        }
        out.push('\n');

        for f in &self.funcs {
            if f.kind == FnKind::External {
                continue;
            }
            let _ = writeln!(out, "{} {{", self.signature(f));
            for decl in &f.decls {
                let _ = writeln!(out, "  {decl}");
            }
            for block in &f.blocks {
                let _ = writeln!(out, "b{}:;", block.label);
                for stmt in &block.stmts {
                    let _ = writeln!(out, "  {stmt}");
                }
                if let Some(term) = &block.terminator {
                    let _ = writeln!(out, "  {term}");
                }
            }
            out.push_str("}\n\n");
        }

        out
    }
}

fn escape_cpp_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

impl ProgramBuilder for SourceProgram {
    type Block = SrcBlock;
    type Value = SrcValue;
    type Type = TypeId;
    type Function = SrcFunction;

    fn type_void(&mut self) -> TypeId {
        self.types.intern(TypeKind::Void)
    }

    fn type_i8(&mut self) -> TypeId {
        self.types.intern(TypeKind::I8)
    }

    fn type_i16(&mut self) -> TypeId {
        self.types.intern(TypeKind::I16)
    }

    fn type_i32(&mut self) -> TypeId {
        self.types.intern(TypeKind::I32)
    }

    fn type_i64(&mut self) -> TypeId {
        self.types.intern(TypeKind::I64)
    }

    fn type_ui32(&mut self) -> TypeId {
        self.types.intern(TypeKind::UI32)
    }

    fn type_f64(&mut self) -> TypeId {
        self.types.intern(TypeKind::F64)
    }

    fn type_struct(&mut self, fields: &[TypeId]) -> TypeId {
        self.types.intern(TypeKind::Struct(fields.to_vec()))
    }

    fn type_pointer(&mut self, pointee: TypeId) -> TypeId {
        self.types.intern(TypeKind::Pointer(pointee))
    }

    fn type_array(&mut self, element: TypeId) -> TypeId {
        self.types.intern(TypeKind::Array(element))
    }

    fn type_of(&mut self, v: SrcValue) -> TypeId {
        self.var_types[v.0 as usize]
    }

    fn size_of(&mut self, t: TypeId) -> SrcValue {
        let ui32 = self.type_ui32();
        let result = self.new_var(ui32);
        let cpp = self.cpp_type(t);
        self.stmt(format!("v{} = (uint32_t)sizeof({cpp});", result.0));
        result
    }

    fn alloca(&mut self, t: TypeId) -> SrcValue {
        let ptr = self.type_pointer(t);
        let result = self.new_var(ptr);
        let cpp = self.cpp_type(t);
        let buf_decl = format!("{cpp} v{}_buf;", result.0);
        self.current_fn_mut().decls.push(buf_decl);
        self.stmt(format!("v{0} = &v{0}_buf;", result.0));
        result
    }

    fn null_ptr(&mut self, pointee: TypeId) -> SrcValue {
        let ptr = self.type_pointer(pointee);
        let result = self.new_var(ptr);
        self.stmt(format!("v{} = nullptr;", result.0));
        result
    }

    fn get_element_ptr(&mut self, ptr: SrcValue, indices: &[GepIndex<SrcValue>]) -> SrcValue {
        let known = match self.types.kind(self.var_types[ptr.0 as usize]) {
            TypeKind::Pointer(inner) | TypeKind::Array(inner) => Some(*inner),
            _ => None,
        };
        let mut pointee = match known {
            Some(inner) => inner,
            None => self.type_i8(),
        };

        let mut expr = format!("v{}", ptr.0);
        for idx in indices {
            match idx {
                GepIndex::Element(v) => {
                    expr = format!("({expr} + v{})", v.0);
                }
                GepIndex::Field(i) => {
                    if let TypeKind::Struct(fields) = self.types.kind(pointee) {
                        pointee = fields[*i as usize];
                    }
                    expr = format!("(&({expr})->f{i})");
                }
            }
        }

        let result_ty = self.type_pointer(pointee);
        let result = self.new_var(result_ty);
        self.stmt(format!("v{} = {expr};", result.0));
        result
    }

    fn pointer_cast(&mut self, v: SrcValue, to: TypeId) -> SrcValue {
        let result = self.new_var(to);
        let cpp = self.cpp_type(to);
        self.stmt(format!("v{} = ({cpp})v{};", result.0, v.0));
        result
    }

    fn load(&mut self, ptr: SrcValue) -> SrcValue {
        let known = match self.types.kind(self.var_types[ptr.0 as usize]) {
            TypeKind::Pointer(inner) | TypeKind::Array(inner) => Some(*inner),
            _ => None,
        };
        let ty = match known {
            Some(inner) => inner,
            None => self.type_i8(),
        };
        let result = self.new_var(ty);
        self.stmt(format!("v{} = *v{};", result.0, ptr.0));
        result
    }

    fn store(&mut self, ptr: SrcValue, v: SrcValue) {
        self.stmt(format!("*v{} = v{};", ptr.0, v.0));
    }

    fn memcpy(&mut self, dest: SrcValue, src: SrcValue, len: SrcValue) {
        self.stmt(format!("memcpy(v{}, v{}, v{});", dest.0, src.0, len.0));
    }

    fn create_function(&mut self, ret: TypeId, params: &[TypeId]) -> SrcFunction {
        let name = format!("fn{}", self.funcs.len());
        self.new_function(name, FnKind::Internal, ret, params)
    }

    fn create_public_function(&mut self, name: &str, ret: TypeId, params: &[TypeId]) -> SrcFunction {
        self.new_function(name.to_string(), FnKind::Public, ret, params)
    }

    fn declare_external(&mut self, name: &str, ret: TypeId, params: &[TypeId]) -> SrcFunction {
        if let Some(&idx) = self.externals.get(name) {
            return SrcFunction(idx);
        }
        let idx = self.funcs.len() as u32;
        self.new_function(name.to_string(), FnKind::External, ret, params);
        self.externals.insert(name.to_string(), idx);
        SrcFunction(idx)
    }

    fn function_arguments(&mut self, f: SrcFunction) -> Vec<SrcValue> {
        self.funcs[f.0 as usize]
            .param_vars
            .iter()
            .map(|&id| SrcValue(id))
            .collect()
    }

    fn ret(&mut self, v: SrcValue) {
        self.terminate(format!("return v{};", v.0));
    }

    fn ret_void(&mut self) {
        self.terminate("return;".to_string());
    }

    fn call(&mut self, f: SrcFunction, args: &[SrcValue]) -> SrcValue {
        let ret_ty = self.funcs[f.0 as usize].ret;
        let name = self.fn_symbol(f).to_string();
        let args: Vec<String> = args.iter().map(|a| format!("v{}", a.0)).collect();
        let call = format!("{name}({})", args.join(", "));

        let result = self.new_var(ret_ty);
        if *self.types.kind(ret_ty) == TypeKind::Void {
            self.stmt(format!("{call};"));
        } else {
            // Cast through the declared type: runtime handles come back as
            // void*, which C++ will not implicitly narrow.
            let cpp = self.cpp_type(ret_ty);
            self.stmt(format!("v{} = ({cpp}){call};", result.0));
        }
        result
    }

    fn function_pointer(&mut self, f: SrcFunction) -> SrcValue {
        let ty = self.scalar_type(ScalarKind::Ptr);
        let name = self.fn_symbol(f).to_string();
        let result = self.new_var(ty);
        self.stmt(format!("v{} = (int8_t*)(void*)&{name};", result.0));
        result
    }

    fn generate_block(&mut self) -> SrcBlock {
        let at = self.current();
        let (func, _) = self.block_homes[at.0 as usize];
        let label = self.block_homes.len() as u32;
        let local = self.funcs[func as usize].blocks.len() as u32;
        self.block_homes.push((func, local));
        self.funcs[func as usize].blocks.push(BlockBody {
            label,
            stmts: Vec::new(),
            terminator: None,
        });
        SrcBlock(label)
    }

    fn current_block(&self) -> SrcBlock {
        self.current()
    }

    fn set_current_block(&mut self, b: SrcBlock) {
        self.current = Some(b);
    }

    fn branch(&mut self, target: SrcBlock) {
        self.terminate(format!("goto b{};", target.0));
    }

    fn cond_branch(&mut self, cond: SrcValue, if_true: SrcBlock, if_false: SrcBlock) {
        self.terminate(format!(
            "if (v{}) {{ goto b{}; }} else {{ goto b{}; }}",
            cond.0, if_true.0, if_false.0
        ));
    }

    fn phi(&mut self, t: TypeId) -> SrcValue {
        // The phi is a plain variable assigned at the end of each incoming
        // block; its declaration is hoisted like any other.
        self.new_var(t)
    }

    fn add_phi_incoming(&mut self, phi: SrcValue, v: SrcValue, from: SrcBlock) {
        let stmt = format!("v{} = v{};", phi.0, v.0);
        self.block_mut(from).stmts.push(stmt);
    }

    fn add(&mut self, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        self.binary("+", kind, a, b)
    }

    fn sub(&mut self, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        self.binary("-", kind, a, b)
    }

    fn mul(&mut self, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        self.binary("*", kind, a, b)
    }

    fn div(&mut self, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        self.binary("/", kind, a, b)
    }

    fn modulo(&mut self, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        self.binary("%", kind, a, b)
    }

    fn cmp(&mut self, pred: Cmp, kind: ScalarKind, a: SrcValue, b: SrcValue) -> SrcValue {
        let _ = kind;
        let op = match pred {
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        };
        let i8t = self.type_i8();
        let result = self.new_var(i8t);
        self.stmt(format!(
            "v{} = (int8_t)(v{} {op} v{});",
            result.0, a.0, b.0
        ));
        result
    }

    fn lnot(&mut self, v: SrcValue) -> SrcValue {
        let i8t = self.type_i8();
        let result = self.new_var(i8t);
        self.stmt(format!("v{} = (int8_t)(!v{});", result.0, v.0));
        result
    }

    fn cast(&mut self, from: ScalarKind, to: ScalarKind, v: SrcValue) -> SrcValue {
        let _ = from;
        let ty = self.scalar_type(to);
        let result = self.new_var(ty);
        let cpp = self.cpp_type(ty);
        self.stmt(format!("v{} = ({cpp})v{};", result.0, v.0));
        result
    }

    fn const_i8(&mut self, v: i8) -> SrcValue {
        let ty = self.type_i8();
        let result = self.new_var(ty);
        self.stmt(format!("v{} = {v};", result.0));
        result
    }

    fn const_i16(&mut self, v: i16) -> SrcValue {
        let ty = self.type_i16();
        let result = self.new_var(ty);
        self.stmt(format!("v{} = {v};", result.0));
        result
    }

    fn const_i32(&mut self, v: i32) -> SrcValue {
        let ty = self.type_i32();
        let result = self.new_var(ty);
        if v == i32::MIN {
            self.stmt(format!("v{} = -2147483647 - 1;", result.0));
        } else {
            self.stmt(format!("v{} = {v};", result.0));
        }
        result
    }

    fn const_i64(&mut self, v: i64) -> SrcValue {
        let ty = self.type_i64();
        let result = self.new_var(ty);
        if v == i64::MIN {
            self.stmt(format!("v{} = -9223372036854775807LL - 1;", result.0));
        } else {
            self.stmt(format!("v{} = {v}LL;", result.0));
        }
        result
    }

    fn const_ui32(&mut self, v: u32) -> SrcValue {
        let ty = self.type_ui32();
        let result = self.new_var(ty);
        self.stmt(format!("v{} = {v}u;", result.0));
        result
    }

    fn const_f64(&mut self, v: f64) -> SrcValue {
        let ty = self.type_f64();
        let result = self.new_var(ty);
        self.stmt(format!("v{} = {v:?};", result.0));
        result
    }

    fn string_constant(&mut self, s: &str) -> SrcValue {
        let ty = self.scalar_type(ScalarKind::Ptr);
        let result = self.new_var_as(ty, "const char*");
        self.stmt(format!("v{} = \"{}\";", result.0, escape_cpp_string(s)));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SourceProgram {
        let mut pb = SourceProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);
        pb
    }

    #[test]
    fn test_variable_counter_is_monotonic() {
        let mut pb = minimal();
        let a = pb.const_i32(1);
        let b = pb.const_i32(2);
        let c = pb.add(ScalarKind::I32, a, b);
        assert_eq!(c, SrcValue(2));
        assert_eq!(pb.variable_count(), 3);
    }

    #[test]
    fn test_serialization_shape() {
        let mut pb = minimal();
        let a = pb.const_i32(41);
        let b = pb.const_i32(1);
        let sum = pb.add(ScalarKind::I32, a, b);
        let void = pb.type_void();
        let i32t = pb.type_i32();
        let print = pb.declare_external("fusedb_print_i32", void, &[i32t]);
        pb.call(print, &[sum]);
        pb.ret_void();

        let src = pb.to_source();
        assert!(src.contains("#include \"fusedb_runtime.h\""));
        assert!(src.contains("extern \"C\" void compute()"));
        assert!(src.contains("int32_t v0;"));
        assert!(src.contains("v2 = v0 + v1;"));
        assert!(src.contains("fusedb_print_i32(v2);"));
        assert!(src.contains("return;"));
        // Runtime symbols come from the header, not a forward declaration.
        assert!(!src.contains("extern \"C\" void fusedb_print_i32"));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let build = || {
            let mut pb = minimal();
            let a = pb.const_i64(7);
            let b = pb.const_i64(35);
            let s = pb.add(ScalarKind::I64, a, b);
            let header = pb.generate_block();
            pb.branch(header);
            pb.set_current_block(header);
            let lim = pb.const_i64(100);
            let c = pb.cmp(Cmp::Lt, ScalarKind::I64, s, lim);
            let _ = pb.lnot(c);
            pb.ret_void();
            pb.to_source()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_struct_and_gep_emission() {
        let mut pb = minimal();
        let i32t = pb.type_i32();
        let f64t = pb.type_f64();
        let st = pb.type_struct(&[i32t, f64t]);
        let slot = pb.alloca(st);
        let field = pb.get_element_ptr(slot, &[GepIndex::Field(1)]);
        let v = pb.const_f64(1.5);
        pb.store(field, v);
        pb.ret_void();

        let src = pb.to_source();
        assert!(src.contains("struct t"));
        assert!(src.contains("double f1;"));
        assert!(src.contains("_buf;"));
        assert!(src.contains("->f1)"));
    }

    #[test]
    fn test_string_constant_escaped() {
        let mut pb = minimal();
        let _ = pb.string_constant("a\"b\\c");
        pb.ret_void();

        let src = pb.to_source();
        assert!(src.contains("\"a\\\"b\\\\c\""));
    }

    #[test]
    fn test_internal_function_forward_declared() {
        let mut pb = minimal();
        let entry = pb.current_block();
        let i8t = pb.type_i8();
        let ptr = pb.type_pointer(i8t);
        let cmp_fn = pb.create_function(i8t, &[ptr, ptr]);
        let one = pb.const_i8(1);
        pb.ret(one);

        pb.set_current_block(entry);
        let _ = pb.function_pointer(cmp_fn);
        pb.ret_void();

        let src = pb.to_source();
        assert!(src.contains("static int8_t fn1(int8_t* v0, int8_t* v1);"));
        assert!(src.contains("(int8_t*)(void*)&fn1;"));
    }
}
