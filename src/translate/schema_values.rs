//! Schema values: the IR-level name of the current tuple.
//!
//! An ordered sequence of (column name, scalar type, proxy value) naming the
//! columns of the tuple a translator has just produced. Consumers resolve
//! column references against this table.

use crate::codegen::proxy::ProxyValue;
use crate::codegen::ProgramBuilder;
use crate::plan::{ScalarType, Schema};

/// One named column of the current tuple.
pub struct NamedValue<B: ProgramBuilder> {
    pub name: String,
    pub ty: ScalarType,
    pub value: ProxyValue<B>,
}

impl<B: ProgramBuilder> Clone for NamedValue<B> {
    fn clone(&self) -> Self {
        NamedValue {
            name: self.name.clone(),
            ty: self.ty,
            value: self.value.clone(),
        }
    }
}

/// Ordered (variable, type) pairs for the tuple currently being emitted.
pub struct SchemaValues<B: ProgramBuilder> {
    values: Vec<NamedValue<B>>,
}

impl<B: ProgramBuilder> SchemaValues<B> {
    pub fn new() -> Self {
        SchemaValues { values: Vec::new() }
    }

    pub fn add_value(&mut self, name: &str, ty: ScalarType, value: ProxyValue<B>) {
        self.values.push(NamedValue {
            name: name.to_string(),
            ty,
            value,
        });
    }

    pub fn get(&self, idx: usize) -> &NamedValue<B> {
        &self.values[idx]
    }

    /// Resolve a column by name; duplicates resolve to the first occurrence.
    pub fn find(&self, name: &str) -> Option<&NamedValue<B>> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn values(&self) -> &[NamedValue<B>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The (name, type) schema these values carry.
    pub fn schema(&self) -> Schema {
        Schema::new(self.values.iter().map(|v| (v.name.clone(), v.ty)).collect())
    }
}

impl<B: ProgramBuilder> Default for SchemaValues<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ProgramBuilder> Clone for SchemaValues<B> {
    fn clone(&self) -> Self {
        SchemaValues {
            values: self.values.clone(),
        }
    }
}
