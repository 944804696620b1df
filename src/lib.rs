//! # FuseDB Query Compilation Engine
//!
//! An analytical, query-compiling relational database core: logical
//! relational-algebra plans are fused into a single loop nest by a
//! produce/consume translator pipeline and lowered to native code that
//! computes the result directly over columnar in-memory data.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! SQL Source
//!     ↓
//! [Parser]               → validated, frozen Operator tree
//!     ↓
//! [Translator Factory]   → translator tree (parent back-pointers)
//!     ↓
//! [Produce/Consume]      → emission through the ProgramBuilder facade
//!     ↓                     ├── SourceProgram  (path A: C++ text)
//!     ↓                     └── IrProgram      (path B: typed IR module)
//! [CFG Analyses]         → RPO, dominators, loops, block labels
//!     ↓
//! [Execution Driver]     → clang++ → .so → dlopen → compute()
//!                          or verify → bitcode → JIT boundary
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fusedb::{QueryEngine, ScalarType};
//!
//! let mut engine = QueryEngine::new();
//! engine.catalog_mut().register_table(
//!     "test",
//!     vec![("col0".to_string(), ScalarType::I32, "test.skdbcol".into())],
//! );
//!
//! let report = engine.run("SELECT * FROM test WHERE col0 < 10")?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `catalog` | Relation/column registry, opaque ids |
//! | `plan` | Operator trees, scalar expressions, validating builder |
//! | `parser` | SQL subset → plan |
//! | `translate` | Translator factory + produce/consume pipeline |
//! | `codegen` | ProgramBuilder facade, proxies, both backends |
//! | `ir` | Typed IR module, verifier, bitcode |
//! | `cfg` | RPO, dominators, natural loops, block labels |
//! | `exec` | External compile / dynamic load / JIT boundary |
//! | `storage` | Column files, buffer pool |
//! | `config` | Layered configuration |

pub mod catalog;
pub mod cfg;
pub mod codegen;
pub mod config;
pub mod exec;
pub mod ir;
pub mod parser;
pub mod plan;
pub mod storage;
pub mod translate;

// Re-export the surface most callers need.
pub use catalog::{Catalog, ColumnId, TableId};
pub use config::{Backend, Config};
pub use exec::{DylibArtifact, Timings, ToolchainError};
pub use parser::{parse_query, ParseError};
pub use plan::{
    AggregateFunc, BinaryOp, Direction, Expr, Operator, PlanBuilder, PlanError, ScalarType,
    Schema, Side,
};
pub use translate::TranslateError;

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use codegen::{program_ref, IrProgram, SourceProgram};
use translate::pipeline::compile_plan;

/// Everything that can go wrong between a SQL string and its result.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("internal IR invariant violated: {0}")]
    Ir(#[from] ir::IrError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error("bitcode backend has no JIT configured; artifact at {}", .0.display())]
    JitUnavailable(PathBuf),
}

/// What a finished query run produced.
#[derive(Debug)]
pub enum QueryReport {
    /// Path A executed; stage timings recorded.
    Executed(Timings),
    /// Path B serialized the verified module.
    Bitcode(PathBuf),
}

/// Main engine: owns the catalog and configuration, and orchestrates
/// parse → plan → translate → emit → compile → execute → teardown.
///
/// A compilation is one synchronous, single-threaded piece of work; the
/// only state shared across stages is the variable counter inside the
/// program being built.
pub struct QueryEngine {
    catalog: Catalog,
    config: Config,
}

impl QueryEngine {
    /// Create an engine with default configuration and an empty catalog.
    pub fn new() -> Self {
        QueryEngine {
            catalog: Catalog::new(),
            config: Config::default(),
        }
    }

    pub fn with_config(config: Config) -> Self {
        QueryEngine {
            catalog: Catalog::new(),
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse a SQL string into a frozen plan.
    pub fn parse(&self, sql: &str) -> Result<Operator, EngineError> {
        Ok(parse_query(sql, &self.catalog)?)
    }

    /// Open every registered column through the buffer pool and check that
    /// each file is a whole number of elements and that all columns of a
    /// table agree on row count. Generated code maps the same files later;
    /// failing here keeps broken relations out of compiled queries.
    pub fn validate_tables(&self, pool: &storage::BufferPool) -> Result<(), EngineError> {
        for table in self.catalog.tables() {
            let mut rows: Option<usize> = None;
            for column in &table.columns {
                let file = storage::ColumnFile::open(pool, &column.path, column.ty)?;
                match rows {
                    None => rows = Some(file.len()),
                    Some(expected) if expected == file.len() => {}
                    Some(expected) => {
                        return Err(EngineError::Plan(PlanError::ArityMismatch {
                            expected,
                            found: file.len(),
                        }))
                    }
                }
            }
        }
        Ok(())
    }

    /// Translate a plan through the source backend and return the emitted
    /// C++ text.
    pub fn emit_source(&self, plan: &Operator) -> Result<String, EngineError> {
        let program = program_ref(SourceProgram::new());
        compile_plan(&program, &self.catalog, plan)?;
        let source = program.borrow().to_source();
        Ok(source)
    }

    /// Translate a plan through the bitcode backend and return the verified
    /// IR module.
    pub fn build_ir(&self, plan: &Operator) -> Result<ir::Program, EngineError> {
        let program = program_ref(IrProgram::new());
        compile_plan(&program, &self.catalog, plan)?;
        let program = program.borrow().program().clone();
        ir::verify(&program)?;
        Ok(program)
    }

    /// Compile a plan to its on-disk artifact without executing: a shared
    /// object for the source backend, a bitcode file for the IR backend.
    pub fn compile(&self, plan: &Operator, name: &str) -> Result<PathBuf, EngineError> {
        match self.config.engine.backend {
            Backend::Source => {
                let source = self.emit_source(plan)?;
                let (artifact, _, _) =
                    exec::compile_to_dylib(&source, &self.config.toolchain, name)?;
                Ok(artifact.library_path)
            }
            Backend::Bitcode => {
                let module = self.build_ir(plan)?;
                Ok(exec::lower_bitcode(
                    &module,
                    &self.config.toolchain,
                    name,
                    None,
                )?)
            }
        }
    }

    /// Full pipeline for one query string.
    pub fn run(&self, sql: &str) -> Result<QueryReport, EngineError> {
        let plan = self.parse(sql)?;
        info!(backend = ?self.config.engine.backend, plan = %plan, "compiling query");
        self.run_plan(&plan)
    }

    /// Full pipeline from an already-built plan.
    pub fn run_plan(&self, plan: &Operator) -> Result<QueryReport, EngineError> {
        match self.config.engine.backend {
            Backend::Source => {
                let source = self.emit_source(plan)?;
                let timings = exec::compile_and_run(&source, &self.config.toolchain, "query")?;
                Ok(QueryReport::Executed(timings))
            }
            Backend::Bitcode => {
                let module = self.build_ir(plan)?;
                let path =
                    exec::lower_bitcode(&module, &self.config.toolchain, "query", None)?;
                Ok(QueryReport::Bitcode(path))
            }
        }
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_starts_empty() {
        let engine = QueryEngine::new();
        assert!(engine.catalog().all_tables().is_empty());
        assert_eq!(engine.config().engine.backend, Backend::Source);
    }

    #[test]
    fn test_parse_requires_registered_relation() {
        let engine = QueryEngine::new();
        let err = engine.parse("SELECT * FROM missing").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_emit_source_end_to_end() {
        let mut engine = QueryEngine::new();
        engine.catalog_mut().register_table(
            "test",
            vec![("col0".to_string(), ScalarType::I32, "test.skdbcol".into())],
        );

        let plan = engine.parse("SELECT * FROM test WHERE col0 < 10").unwrap();
        let source = engine.emit_source(&plan).unwrap();
        assert!(source.contains("extern \"C\" void compute()"));
        assert!(source.contains("fusedb_open_i32("));
    }

    #[test]
    fn test_validate_tables_checks_row_counts() {
        let dir = tempfile::tempdir().unwrap();
        let qty = dir.path().join("qty.col");
        let key = dir.path().join("key.col");
        storage::write_i32_column(&qty, &[1, 2, 3]).unwrap();
        storage::write_i64_column(&key, &[10, 20]).unwrap();

        let mut engine = QueryEngine::new();
        engine.catalog_mut().register_table(
            "t",
            vec![
                ("key".to_string(), ScalarType::I64, key),
                ("qty".to_string(), ScalarType::I32, qty),
            ],
        );

        let pool = storage::BufferPool::new();
        let err = engine.validate_tables(&pool).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Plan(PlanError::ArityMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_build_ir_verifies() {
        let mut engine = QueryEngine::new();
        engine.catalog_mut().register_table(
            "test",
            vec![("col0".to_string(), ScalarType::I32, "test.skdbcol".into())],
        );

        let plan = engine.parse("SELECT * FROM test").unwrap();
        let module = engine.build_ir(&plan).unwrap();
        assert!(module.function_by_name("compute").is_some());
    }
}
