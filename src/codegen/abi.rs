//! Runtime ABI shared by both backends.
//!
//! Generated code leans on a small `extern "C"` runtime (print, string
//! record operations, date extraction, column access, hashing, a chained
//! hash table and a tuple buffer). The calling convention both backends must
//! agree on is codified here, once: fixed symbol names, fixed signatures,
//! and opaque `void*` for every record pointer the runtime reinterprets.
//! `runtime/fusedb_runtime.h` mirrors this table on the C++ side.

use super::{GepIndex, ProgramBuilder};

/// Parameter/return types expressible at the runtime boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    Void,
    I8,
    I16,
    I32,
    I64,
    UI32,
    F64,
    /// Opaque record pointer (string record, table handle, entry slot).
    VoidPtr,
    /// NUL-terminated path or pattern bytes.
    CharPtr,
    I8Ptr,
    I16Ptr,
    I32Ptr,
    I64Ptr,
    F64Ptr,
    UI32Ptr,
}

/// One runtime function: fixed symbol name and signature.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeFn {
    pub name: &'static str,
    pub ret: AbiType,
    pub params: &'static [AbiType],
}

macro_rules! runtime_fn {
    ($const_name:ident, $symbol:literal, ($($param:ident),*) -> $ret:ident) => {
        pub const $const_name: RuntimeFn = RuntimeFn {
            name: $symbol,
            ret: AbiType::$ret,
            params: &[$(AbiType::$param),*],
        };
    };
}

// Print runtime. Each value is followed by `|`; newline ends the tuple.
runtime_fn!(PRINT_I8, "fusedb_print_i8", (I8) -> Void);
runtime_fn!(PRINT_I16, "fusedb_print_i16", (I16) -> Void);
runtime_fn!(PRINT_I32, "fusedb_print_i32", (I32) -> Void);
runtime_fn!(PRINT_I64, "fusedb_print_i64", (I64) -> Void);
runtime_fn!(PRINT_F64, "fusedb_print_f64", (F64) -> Void);
runtime_fn!(PRINT_STR, "fusedb_print_str", (VoidPtr) -> Void);
runtime_fn!(PRINT_NEWLINE, "fusedb_print_newline", () -> Void);

// String runtime over {data: *const u8, length: u32} records.
runtime_fn!(STRING_CREATE, "fusedb_string_create", (VoidPtr, CharPtr, UI32) -> Void);
runtime_fn!(STRING_DEEP_COPY, "fusedb_string_deep_copy", (VoidPtr, VoidPtr) -> Void);
runtime_fn!(STRING_FREE, "fusedb_string_free", (VoidPtr) -> Void);
runtime_fn!(STRING_CONTAINS, "fusedb_string_contains", (VoidPtr, VoidPtr) -> I8);
runtime_fn!(STRING_ENDS_WITH, "fusedb_string_ends_with", (VoidPtr, VoidPtr) -> I8);
runtime_fn!(STRING_STARTS_WITH, "fusedb_string_starts_with", (VoidPtr, VoidPtr) -> I8);
runtime_fn!(STRING_EQUALS, "fusedb_string_equals", (VoidPtr, VoidPtr) -> I8);
runtime_fn!(STRING_NOT_EQUALS, "fusedb_string_not_equals", (VoidPtr, VoidPtr) -> I8);
runtime_fn!(STRING_HASH, "fusedb_string_hash", (VoidPtr) -> I64);

// Date runtime.
runtime_fn!(EXTRACT_YEAR, "fusedb_extract_year", (I64) -> I32);

// Column access: numeric columns map a flat file; text columns pair a data
// blob with a (offset, length) u32 offsets file.
runtime_fn!(OPEN_I8, "fusedb_open_i8", (CharPtr, UI32Ptr) -> I8Ptr);
runtime_fn!(OPEN_I16, "fusedb_open_i16", (CharPtr, UI32Ptr) -> I16Ptr);
runtime_fn!(OPEN_I32, "fusedb_open_i32", (CharPtr, UI32Ptr) -> I32Ptr);
runtime_fn!(OPEN_I64, "fusedb_open_i64", (CharPtr, UI32Ptr) -> I64Ptr);
runtime_fn!(OPEN_F64, "fusedb_open_f64", (CharPtr, UI32Ptr) -> F64Ptr);
runtime_fn!(OPEN_STR, "fusedb_open_str", (CharPtr, CharPtr) -> VoidPtr);
runtime_fn!(STR_COL_LEN, "fusedb_str_col_len", (VoidPtr) -> UI32);
runtime_fn!(STR_COL_GET, "fusedb_str_col_get", (VoidPtr, UI32, VoidPtr) -> Void);

// Hash chaining, one helper per key type.
runtime_fn!(HASH_I8, "fusedb_hash_i8", (I64, I8) -> I64);
runtime_fn!(HASH_I16, "fusedb_hash_i16", (I64, I16) -> I64);
runtime_fn!(HASH_I32, "fusedb_hash_i32", (I64, I32) -> I64);
runtime_fn!(HASH_I64, "fusedb_hash_i64", (I64, I64) -> I64);
runtime_fn!(HASH_F64, "fusedb_hash_f64", (I64, F64) -> I64);
runtime_fn!(HASH_STR, "fusedb_hash_str", (I64, VoidPtr) -> I64);

// Chained hash table over fixed-size payload slots.
runtime_fn!(HT_CREATE, "fusedb_ht_create", (UI32) -> VoidPtr);
runtime_fn!(HT_INSERT, "fusedb_ht_insert", (VoidPtr, I64) -> I8Ptr);
runtime_fn!(HT_PROBE_FIRST, "fusedb_ht_probe_first", (VoidPtr, I64) -> I8Ptr);
runtime_fn!(HT_PROBE_NEXT, "fusedb_ht_probe_next", (I8Ptr) -> I8Ptr);
runtime_fn!(HT_SCAN_FIRST, "fusedb_ht_scan_first", (VoidPtr) -> I8Ptr);
runtime_fn!(HT_SCAN_NEXT, "fusedb_ht_scan_next", (I8Ptr) -> I8Ptr);

// Growable tuple buffer with caller-generated comparator sort.
runtime_fn!(VEC_CREATE, "fusedb_vec_create", (UI32) -> VoidPtr);
runtime_fn!(VEC_APPEND, "fusedb_vec_append", (VoidPtr) -> I8Ptr);
runtime_fn!(VEC_LEN, "fusedb_vec_len", (VoidPtr) -> UI32);
runtime_fn!(VEC_GET, "fusedb_vec_get", (VoidPtr, UI32) -> I8Ptr);
runtime_fn!(VEC_SORT, "fusedb_vec_sort", (VoidPtr, VoidPtr) -> Void);

/// Lower an [`AbiType`] to a backend type.
pub fn abi_type<B: ProgramBuilder>(pb: &mut B, t: AbiType) -> B::Type {
    match t {
        AbiType::Void => pb.type_void(),
        AbiType::I8 => pb.type_i8(),
        AbiType::I16 => pb.type_i16(),
        AbiType::I32 => pb.type_i32(),
        AbiType::I64 => pb.type_i64(),
        AbiType::UI32 => pb.type_ui32(),
        AbiType::F64 => pb.type_f64(),
        AbiType::VoidPtr | AbiType::CharPtr | AbiType::I8Ptr => {
            let i8t = pb.type_i8();
            pb.type_pointer(i8t)
        }
        AbiType::I16Ptr => {
            let t = pb.type_i16();
            pb.type_pointer(t)
        }
        AbiType::I32Ptr => {
            let t = pb.type_i32();
            pb.type_pointer(t)
        }
        AbiType::I64Ptr => {
            let t = pb.type_i64();
            pb.type_pointer(t)
        }
        AbiType::F64Ptr => {
            let t = pb.type_f64();
            pb.type_pointer(t)
        }
        AbiType::UI32Ptr => {
            let t = pb.type_ui32();
            pb.type_pointer(t)
        }
    }
}

/// Declare a runtime function through the facade. Backends deduplicate by
/// name, so repeated declaration is cheap.
pub fn declare<B: ProgramBuilder>(pb: &mut B, f: &RuntimeFn) -> B::Function {
    let ret = abi_type(pb, f.ret);
    let params: Vec<B::Type> = f.params.iter().map(|p| abi_type(pb, *p)).collect();
    pb.declare_external(f.name, ret, &params)
}

/// The string record type as generated code lays it out:
/// `{ data: *i8, length: u32 }`.
pub fn string_struct_type<B: ProgramBuilder>(pb: &mut B) -> B::Type {
    let i8t = pb.type_i8();
    let data = pb.type_pointer(i8t);
    let len = pb.type_ui32();
    pb.type_struct(&[data, len])
}

/// Pointer to the `data` field of a string record.
pub fn string_data_ptr<B: ProgramBuilder>(pb: &mut B, s: B::Value) -> B::Value {
    pb.get_element_ptr(s, &[GepIndex::Field(0)])
}

/// Pointer to the `length` field of a string record.
pub fn string_length_ptr<B: ProgramBuilder>(pb: &mut B, s: B::Value) -> B::Value {
    pb.get_element_ptr(s, &[GepIndex::Field(1)])
}
