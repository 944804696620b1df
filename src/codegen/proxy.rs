//! Typed proxy values over IR handles.
//!
//! Each proxy pairs a value handle with its scalar type and overloads the
//! operators that make expression evaluation read like ordinary code while
//! emitting exactly one instruction per operation. Proxies borrow the
//! program non-exclusively through [`ProgramRef`] and never outlive it; the
//! underlying IR value persists in the emitted function.
//!
//! String operations call the declared-external string runtime; logical
//! results live in the i8 domain.

use std::ops::{Add, BitAnd, BitOr, Div, Mul, Not, Sub};
use std::rc::Rc;

use super::abi;
use super::{Cmp, GepIndex, ProgramBuilder, ProgramRef, ScalarKind};

/// Boolean proxy (i8 domain).
pub struct Bool<B: ProgramBuilder> {
    program: ProgramRef<B>,
    value: B::Value,
}

impl<B: ProgramBuilder> Bool<B> {
    pub fn new(program: ProgramRef<B>, value: B::Value) -> Self {
        Bool { program, value }
    }

    pub fn constant(program: ProgramRef<B>, v: bool) -> Self {
        let value = program.borrow_mut().const_i8(i8::from(v));
        Bool { program, value }
    }

    pub fn value(&self) -> B::Value {
        self.value
    }

    pub fn program(&self) -> &ProgramRef<B> {
        &self.program
    }

    /// Store into a fixed slot (phi-less loop-carried state).
    pub fn assign_to(&self, slot: B::Value) {
        self.program.borrow_mut().store(slot, self.value);
    }

    pub fn eq(&self, rhs: &Self) -> Bool<B> {
        let value = self
            .program
            .borrow_mut()
            .cmp(Cmp::Eq, ScalarKind::I8, self.value, rhs.value);
        Bool::new(Rc::clone(&self.program), value)
    }

    pub fn neq(&self, rhs: &Self) -> Bool<B> {
        let value = self
            .program
            .borrow_mut()
            .cmp(Cmp::Ne, ScalarKind::I8, self.value, rhs.value);
        Bool::new(Rc::clone(&self.program), value)
    }
}

impl<B: ProgramBuilder> Clone for Bool<B> {
    fn clone(&self) -> Self {
        Bool {
            program: Rc::clone(&self.program),
            value: self.value,
        }
    }
}

impl<B: ProgramBuilder> std::fmt::Debug for Bool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bool").field("value", &self.value).finish()
    }
}

impl<B: ProgramBuilder> BitAnd for &Bool<B> {
    type Output = Bool<B>;

    fn bitand(self, rhs: Self) -> Bool<B> {
        let value = self
            .program
            .borrow_mut()
            .mul(ScalarKind::I8, self.value, rhs.value);
        Bool::new(Rc::clone(&self.program), value)
    }
}

impl<B: ProgramBuilder> BitOr for &Bool<B> {
    type Output = Bool<B>;

    fn bitor(self, rhs: Self) -> Bool<B> {
        // a | b in the i8 domain: (a + b) != 0.
        let mut pb = self.program.borrow_mut();
        let sum = pb.add(ScalarKind::I8, self.value, rhs.value);
        let zero = pb.const_i8(0);
        let value = pb.cmp(Cmp::Ne, ScalarKind::I8, sum, zero);
        drop(pb);
        Bool::new(Rc::clone(&self.program), value)
    }
}

impl<B: ProgramBuilder> Not for &Bool<B> {
    type Output = Bool<B>;

    fn not(self) -> Bool<B> {
        let value = self.program.borrow_mut().lnot(self.value);
        Bool::new(Rc::clone(&self.program), value)
    }
}

macro_rules! numeric_proxy {
    ($(#[$doc:meta])* $name:ident, $kind:expr, $rust_ty:ty, $const_fn:ident) => {
        $(#[$doc])*
        pub struct $name<B: ProgramBuilder> {
            program: ProgramRef<B>,
            value: B::Value,
        }

        impl<B: ProgramBuilder> $name<B> {
            pub fn new(program: ProgramRef<B>, value: B::Value) -> Self {
                $name { program, value }
            }

            pub fn constant(program: ProgramRef<B>, v: $rust_ty) -> Self {
                let value = program.borrow_mut().$const_fn(v);
                $name { program, value }
            }

            pub fn value(&self) -> B::Value {
                self.value
            }

            pub fn program(&self) -> &ProgramRef<B> {
                &self.program
            }

            /// Store into a fixed slot (phi-less loop-carried state).
            pub fn assign_to(&self, slot: B::Value) {
                self.program.borrow_mut().store(slot, self.value);
            }

            pub fn modulo(&self, rhs: &Self) -> Self {
                let value = self
                    .program
                    .borrow_mut()
                    .modulo($kind, self.value, rhs.value);
                $name::new(Rc::clone(&self.program), value)
            }

            fn compare(&self, pred: Cmp, rhs: &Self) -> Bool<B> {
                let value = self
                    .program
                    .borrow_mut()
                    .cmp(pred, $kind, self.value, rhs.value);
                Bool::new(Rc::clone(&self.program), value)
            }

            pub fn eq(&self, rhs: &Self) -> Bool<B> {
                self.compare(Cmp::Eq, rhs)
            }

            pub fn neq(&self, rhs: &Self) -> Bool<B> {
                self.compare(Cmp::Ne, rhs)
            }

            pub fn lt(&self, rhs: &Self) -> Bool<B> {
                self.compare(Cmp::Lt, rhs)
            }

            pub fn lte(&self, rhs: &Self) -> Bool<B> {
                self.compare(Cmp::Le, rhs)
            }

            pub fn gt(&self, rhs: &Self) -> Bool<B> {
                self.compare(Cmp::Gt, rhs)
            }

            pub fn gte(&self, rhs: &Self) -> Bool<B> {
                self.compare(Cmp::Ge, rhs)
            }
        }

        impl<B: ProgramBuilder> Clone for $name<B> {
            fn clone(&self) -> Self {
                $name {
                    program: Rc::clone(&self.program),
                    value: self.value,
                }
            }
        }

        impl<B: ProgramBuilder> std::fmt::Debug for $name<B> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("value", &self.value)
                    .finish()
            }
        }

        impl<B: ProgramBuilder> Add for &$name<B> {
            type Output = $name<B>;

            fn add(self, rhs: Self) -> $name<B> {
                let value = self.program.borrow_mut().add($kind, self.value, rhs.value);
                $name::new(Rc::clone(&self.program), value)
            }
        }

        impl<B: ProgramBuilder> Sub for &$name<B> {
            type Output = $name<B>;

            fn sub(self, rhs: Self) -> $name<B> {
                let value = self.program.borrow_mut().sub($kind, self.value, rhs.value);
                $name::new(Rc::clone(&self.program), value)
            }
        }

        impl<B: ProgramBuilder> Mul for &$name<B> {
            type Output = $name<B>;

            fn mul(self, rhs: Self) -> $name<B> {
                let value = self.program.borrow_mut().mul($kind, self.value, rhs.value);
                $name::new(Rc::clone(&self.program), value)
            }
        }

        impl<B: ProgramBuilder> Div for &$name<B> {
            type Output = $name<B>;

            fn div(self, rhs: Self) -> $name<B> {
                let value = self.program.borrow_mut().div($kind, self.value, rhs.value);
                $name::new(Rc::clone(&self.program), value)
            }
        }
    };
}

numeric_proxy!(
    /// 8-bit integer proxy.
    Int8, ScalarKind::I8, i8, const_i8
);
numeric_proxy!(
    /// 16-bit integer proxy.
    Int16, ScalarKind::I16, i16, const_i16
);
numeric_proxy!(
    /// 32-bit integer proxy.
    Int32, ScalarKind::I32, i32, const_i32
);
numeric_proxy!(
    /// 64-bit integer proxy.
    Int64, ScalarKind::I64, i64, const_i64
);
numeric_proxy!(
    /// Double-precision float proxy.
    Float64, ScalarKind::F64, f64, const_f64
);

/// String proxy over a pointer to a `{data, length}` record. Predicates go
/// through the declared-external string runtime.
pub struct Str<B: ProgramBuilder> {
    program: ProgramRef<B>,
    value: B::Value,
}

impl<B: ProgramBuilder> Str<B> {
    pub fn new(program: ProgramRef<B>, value: B::Value) -> Self {
        Str { program, value }
    }

    /// Materialize a string literal as a record in a fresh slot.
    pub fn literal(program: ProgramRef<B>, s: &str) -> Self {
        let mut pb = program.borrow_mut();
        let record_ty = abi::string_struct_type(&mut *pb);
        let record = pb.alloca(record_ty);
        let bytes = pb.string_constant(s);
        let len = pb.const_ui32(s.len() as u32);
        let create = abi::declare(&mut *pb, &abi::STRING_CREATE);
        pb.call(create, &[record, bytes, len]);
        drop(pb);
        Str {
            program,
            value: record,
        }
    }

    pub fn value(&self) -> B::Value {
        self.value
    }

    pub fn program(&self) -> &ProgramRef<B> {
        &self.program
    }

    fn runtime_predicate(&self, f: &abi::RuntimeFn, rhs: &Self) -> Bool<B> {
        let mut pb = self.program.borrow_mut();
        let func = abi::declare(&mut *pb, f);
        let value = pb.call(func, &[self.value, rhs.value]);
        drop(pb);
        Bool::new(Rc::clone(&self.program), value)
    }

    pub fn contains(&self, rhs: &Self) -> Bool<B> {
        self.runtime_predicate(&abi::STRING_CONTAINS, rhs)
    }

    pub fn starts_with(&self, rhs: &Self) -> Bool<B> {
        self.runtime_predicate(&abi::STRING_STARTS_WITH, rhs)
    }

    pub fn ends_with(&self, rhs: &Self) -> Bool<B> {
        self.runtime_predicate(&abi::STRING_ENDS_WITH, rhs)
    }

    pub fn eq(&self, rhs: &Self) -> Bool<B> {
        self.runtime_predicate(&abi::STRING_EQUALS, rhs)
    }

    pub fn neq(&self, rhs: &Self) -> Bool<B> {
        self.runtime_predicate(&abi::STRING_NOT_EQUALS, rhs)
    }

    pub fn hash(&self) -> Int64<B> {
        let mut pb = self.program.borrow_mut();
        let func = abi::declare(&mut *pb, &abi::STRING_HASH);
        let value = pb.call(func, &[self.value]);
        drop(pb);
        Int64::new(Rc::clone(&self.program), value)
    }

    /// Copy this record's fields into another record slot.
    pub fn copy_into(&self, dest: B::Value) {
        let mut pb = self.program.borrow_mut();
        let src_data = pb.get_element_ptr(self.value, &[GepIndex::Field(0)]);
        let data = pb.load(src_data);
        let dest_data = pb.get_element_ptr(dest, &[GepIndex::Field(0)]);
        pb.store(dest_data, data);

        let src_len = pb.get_element_ptr(self.value, &[GepIndex::Field(1)]);
        let len = pb.load(src_len);
        let dest_len = pb.get_element_ptr(dest, &[GepIndex::Field(1)]);
        pb.store(dest_len, len);
    }
}

impl<B: ProgramBuilder> Clone for Str<B> {
    fn clone(&self) -> Self {
        Str {
            program: Rc::clone(&self.program),
            value: self.value,
        }
    }
}

impl<B: ProgramBuilder> std::fmt::Debug for Str<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Str").field("value", &self.value).finish()
    }
}

/// A proxy value of any scalar type, as carried through schema values.
pub enum ProxyValue<B: ProgramBuilder> {
    Bool(Bool<B>),
    I8(Int8<B>),
    I16(Int16<B>),
    I32(Int32<B>),
    I64(Int64<B>),
    F64(Float64<B>),
    Str(Str<B>),
}

impl<B: ProgramBuilder> ProxyValue<B> {
    /// The raw handle behind the proxy.
    pub fn value(&self) -> B::Value {
        match self {
            ProxyValue::Bool(v) => v.value(),
            ProxyValue::I8(v) => v.value(),
            ProxyValue::I16(v) => v.value(),
            ProxyValue::I32(v) => v.value(),
            ProxyValue::I64(v) => v.value(),
            ProxyValue::F64(v) => v.value(),
            ProxyValue::Str(v) => v.value(),
        }
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            ProxyValue::Bool(_) | ProxyValue::I8(_) => ScalarKind::I8,
            ProxyValue::I16(_) => ScalarKind::I16,
            ProxyValue::I32(_) => ScalarKind::I32,
            ProxyValue::I64(_) => ScalarKind::I64,
            ProxyValue::F64(_) => ScalarKind::F64,
            ProxyValue::Str(_) => ScalarKind::Ptr,
        }
    }

    /// Expect a boolean proxy (predicate results).
    pub fn into_bool(self) -> Option<Bool<B>> {
        match self {
            ProxyValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_proxy(&self) -> Option<&Str<B>> {
        match self {
            ProxyValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl<B: ProgramBuilder> Clone for ProxyValue<B> {
    fn clone(&self) -> Self {
        match self {
            ProxyValue::Bool(v) => ProxyValue::Bool(v.clone()),
            ProxyValue::I8(v) => ProxyValue::I8(v.clone()),
            ProxyValue::I16(v) => ProxyValue::I16(v.clone()),
            ProxyValue::I32(v) => ProxyValue::I32(v.clone()),
            ProxyValue::I64(v) => ProxyValue::I64(v.clone()),
            ProxyValue::F64(v) => ProxyValue::F64(v.clone()),
            ProxyValue::Str(v) => ProxyValue::Str(v.clone()),
        }
    }
}

impl<B: ProgramBuilder> std::fmt::Debug for ProxyValue<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            ProxyValue::I8(v) => f.debug_tuple("I8").field(v).finish(),
            ProxyValue::I16(v) => f.debug_tuple("I16").field(v).finish(),
            ProxyValue::I32(v) => f.debug_tuple("I32").field(v).finish(),
            ProxyValue::I64(v) => f.debug_tuple("I64").field(v).finish(),
            ProxyValue::F64(v) => f.debug_tuple("F64").field(v).finish(),
            ProxyValue::Str(v) => f.debug_tuple("Str").field(v).finish(),
        }
    }
}
