//! # Lowering & Execution Driver
//!
//! Path A (ahead-of-time): write the emitted C++ to disk, invoke the
//! external compiler to produce a shared object, load it, resolve the
//! `compute` entry symbol, run it, unload. Timing checkpoints (emit /
//! compile / load / execute) are recorded and reported through tracing.
//!
//! Path B (bitcode): serialize the verified IR program to disk and/or hand
//! it to a [`Jit`] implementation.
//!
//! Nothing here retries: the pipeline is deterministic and a failed stage
//! aborts the query with its diagnostic. Partial artifacts are removed on
//! failure.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ToolchainConfig;
use crate::ir::{self, BitcodeError};

/// Toolchain failures, each carrying the external diagnostic.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to write query artifact: {0}")]
    EmitIo(#[from] io::Error),

    #[error("external compiler failed ({status}): {stderr}")]
    CompilerFailure { status: i32, stderr: String },

    #[error("failed to load query library: {0}")]
    LoadFailure(String),

    #[error("entry symbol `{0}` missing from query library")]
    SymbolMissing(String),

    #[error(transparent)]
    Bitcode(#[from] BitcodeError),
}

/// Wall-clock spent in each stage of an ahead-of-time run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub emit: Duration,
    pub compile: Duration,
    pub load: Duration,
    pub execute: Duration,
}

/// The compiled artifact of path A.
#[derive(Debug, Clone)]
pub struct DylibArtifact {
    pub source_path: PathBuf,
    pub library_path: PathBuf,
}

/// Write the emitted source and compile it into a shared object. On any
/// failure the partial artifacts are removed.
pub fn compile_to_dylib(
    source_text: &str,
    toolchain: &ToolchainConfig,
    name: &str,
) -> Result<(DylibArtifact, Duration, Duration), ToolchainError> {
    let source_path = toolchain.temp_dir.join(format!("{name}.cpp"));
    let library_path = toolchain.temp_dir.join(format!("{name}.so"));

    let emit_start = Instant::now();
    fs::create_dir_all(&toolchain.temp_dir)?;
    fs::write(&source_path, source_text)?;
    let emit = emit_start.elapsed();
    debug!(path = %source_path.display(), "wrote query source");

    let runtime_src = toolchain.runtime_dir.join("fusedb_runtime.cc");
    let compile_start = Instant::now();
    let output = Command::new(&toolchain.compiler)
        .arg(format!("-std={}", toolchain.standard))
        .arg("-I")
        .arg(&toolchain.runtime_dir)
        .arg("-shared")
        .arg("-fpic")
        .arg(&source_path)
        .arg(&runtime_src)
        .arg("-o")
        .arg(&library_path)
        .output()
        .map_err(|e| {
            let _ = fs::remove_file(&source_path);
            ToolchainError::EmitIo(e)
        })?;
    let compile = compile_start.elapsed();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let _ = fs::remove_file(&source_path);
        let _ = fs::remove_file(&library_path);
        return Err(ToolchainError::CompilerFailure {
            status: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    info!(
        library = %library_path.display(),
        compile_ms = compile.as_millis() as u64,
        "compiled query library"
    );
    Ok((
        DylibArtifact {
            source_path,
            library_path,
        },
        emit,
        compile,
    ))
}

/// Load a compiled query library, resolve `compute`, invoke it, and release
/// the handle.
pub fn run_dylib(library_path: &Path) -> Result<(Duration, Duration), ToolchainError> {
    let load_start = Instant::now();
    let library = unsafe { libloading::Library::new(library_path) }
        .map_err(|e| ToolchainError::LoadFailure(e.to_string()))?;

    let compute = unsafe { library.get::<unsafe extern "C" fn()>(b"compute") }
        .map_err(|_| ToolchainError::SymbolMissing("compute".to_string()))?;
    let load = load_start.elapsed();

    let execute_start = Instant::now();
    unsafe { compute() };
    let execute = execute_start.elapsed();

    drop(library);
    Ok((load, execute))
}

/// Full path A: emit, compile, load, execute, tear down.
pub fn compile_and_run(
    source_text: &str,
    toolchain: &ToolchainConfig,
    name: &str,
) -> Result<Timings, ToolchainError> {
    let (artifact, emit, compile) = compile_to_dylib(source_text, toolchain, name)?;
    let (load, execute) = run_dylib(&artifact.library_path)?;

    let timings = Timings {
        emit,
        compile,
        load,
        execute,
    };
    info!(
        emit_ms = timings.emit.as_millis() as u64,
        compile_ms = timings.compile.as_millis() as u64,
        load_ms = timings.load.as_millis() as u64,
        execute_ms = timings.execute.as_millis() as u64,
        "query complete"
    );
    Ok(timings)
}

/// Machine-code generation boundary for path B. Implementations take a
/// verified program, lower it, and expose its public symbols.
pub trait Jit {
    fn load(&mut self, program: &ir::Program) -> Result<(), ToolchainError>;
    fn invoke(&mut self, symbol: &str) -> Result<(), ToolchainError>;
}

/// Path B lowering: write bitcode next to the given name and, when a JIT is
/// supplied, hand the module over and invoke `compute`.
pub fn lower_bitcode(
    program: &ir::Program,
    toolchain: &ToolchainConfig,
    name: &str,
    jit: Option<&mut dyn Jit>,
) -> Result<PathBuf, ToolchainError> {
    fs::create_dir_all(&toolchain.temp_dir)?;
    let path = toolchain.temp_dir.join(format!("{name}.fbc"));
    ir::write_bitcode(program, &path)?;
    info!(path = %path.display(), "wrote query bitcode");

    if let Some(jit) = jit {
        jit.load(program)?;
        jit.invoke("compute")?;
    }
    Ok(path)
}
