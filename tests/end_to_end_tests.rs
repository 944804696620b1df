//! End-to-end tests for path A: write column files, compile a plan through
//! the external toolchain, run the produced library through the runner
//! binary, and check the printed result set.
//!
//! These tests need a working C++ toolchain; they skip (successfully) when
//! the configured compiler is not on PATH.

use std::path::{Path, PathBuf};
use std::process::Command;

use fusedb::storage::{write_i32_column, write_i64_column};
use fusedb::{Backend, Config, QueryEngine, ScalarType};

fn clang_available() -> bool {
    Command::new("clang++")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn runtime_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("runtime")
}

fn engine_for(dir: &Path) -> QueryEngine {
    let mut config = Config::default();
    config.toolchain.runtime_dir = runtime_dir();
    config.toolchain.temp_dir = dir.join("tmp");
    QueryEngine::with_config(config)
}

fn run_compiled(library: &Path) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_fusedb-run"))
        .arg(library)
        .output()
        .expect("failed to spawn fusedb-run");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

#[test]
fn test_select_prints_rows_under_ten() {
    if !clang_available() {
        eprintln!("skipping: clang++ not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let column = dir.path().join("test.skdbcol");
    write_i32_column(&column, &[3, 20, 7, 15]).unwrap();

    let mut engine = engine_for(dir.path());
    engine.catalog_mut().register_table(
        "test",
        vec![("col0".to_string(), ScalarType::I32, column)],
    );

    let plan = engine.parse("SELECT * FROM test WHERE col0 < 10").unwrap();
    let library = engine.compile(&plan, "q_select").unwrap();

    let (ok, stdout) = run_compiled(&library);
    assert!(ok);
    assert_eq!(stdout, "3|\n7|\n");
}

#[test]
fn test_group_by_sums_per_key() {
    if !clang_available() {
        eprintln!("skipping: clang++ not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let keys = dir.path().join("k.col");
    let vals = dir.path().join("v.col");
    write_i64_column(&keys, &[1, 2, 1, 2, 1]).unwrap();
    write_i32_column(&vals, &[10, 20, 30, 40, 50]).unwrap();

    let mut engine = engine_for(dir.path());
    engine.catalog_mut().register_table(
        "pairs",
        vec![
            ("k".to_string(), ScalarType::I64, keys),
            ("v".to_string(), ScalarType::I32, vals),
        ],
    );

    // Sort by key so the printed order is fixed.
    let plan = engine
        .parse("SELECT k, SUM(v) AS total FROM pairs GROUP BY k ORDER BY k")
        .unwrap();
    let library = engine.compile(&plan, "q_group").unwrap();

    let (ok, stdout) = run_compiled(&library);
    assert!(ok);
    assert_eq!(stdout, "1|90|\n2|60|\n");
}

#[test]
fn test_order_by_descending() {
    if !clang_available() {
        eprintln!("skipping: clang++ not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let column = dir.path().join("test.skdbcol");
    write_i32_column(&column, &[5, 1, 9, 3]).unwrap();

    let mut engine = engine_for(dir.path());
    engine.catalog_mut().register_table(
        "test",
        vec![("col0".to_string(), ScalarType::I32, column)],
    );

    let plan = engine
        .parse("SELECT * FROM test ORDER BY col0 DESC")
        .unwrap();
    let library = engine.compile(&plan, "q_order").unwrap();

    let (ok, stdout) = run_compiled(&library);
    assert!(ok);
    assert_eq!(stdout, "9|\n5|\n3|\n1|\n");
}

#[test]
fn test_hash_join_matches_keys() {
    if !clang_available() {
        eprintln!("skipping: clang++ not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let left_k = dir.path().join("lk.col");
    let left_v = dir.path().join("lv.col");
    let right_k = dir.path().join("rk.col");
    write_i64_column(&left_k, &[1, 2, 3]).unwrap();
    write_i32_column(&left_v, &[10, 20, 30]).unwrap();
    write_i64_column(&right_k, &[2, 3, 4, 3]).unwrap();

    let mut engine = engine_for(dir.path());
    engine.catalog_mut().register_table(
        "build",
        vec![
            ("k".to_string(), ScalarType::I64, left_k),
            ("v".to_string(), ScalarType::I32, left_v),
        ],
    );
    engine.catalog_mut().register_table(
        "probe",
        vec![("pk".to_string(), ScalarType::I64, right_k)],
    );

    use fusedb::plan::{PlanBuilder, Side};
    let builder = PlanBuilder::new(engine.catalog());
    let build = builder.scan("build").unwrap();
    let probe = builder.scan("probe").unwrap();
    let join = builder
        .hash_join(
            build,
            probe,
            &["k"],
            &["pk"],
            &[(Side::Right, "pk"), (Side::Left, "v")],
        )
        .unwrap();
    let sorted = builder
        .order_by(join, &[("pk", fusedb::Direction::Ascending)])
        .unwrap();
    let plan = builder.output(sorted).unwrap();

    let library = engine.compile(&plan, "q_join").unwrap();
    let (ok, stdout) = run_compiled(&library);
    assert!(ok);
    // Probe rows 2, 3, 3 match; row 4 does not.
    assert_eq!(stdout, "2|20|\n3|30|\n3|30|\n");
}

#[test]
fn test_compiler_failure_surfaces_diagnostic() {
    if !clang_available() {
        eprintln!("skipping: clang++ not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let toolchain = fusedb::config::ToolchainConfig {
        compiler: "clang++".to_string(),
        standard: "c++17".to_string(),
        runtime_dir: runtime_dir(),
        temp_dir: dir.path().join("tmp"),
    };

    let err = fusedb::exec::compile_to_dylib("this is not C++", &toolchain, "q_bad").unwrap_err();
    match err {
        fusedb::ToolchainError::CompilerFailure { status, stderr } => {
            assert_ne!(status, 0);
            assert!(!stderr.is_empty());
        }
        other => panic!("expected CompilerFailure, got {other:?}"),
    }
    // Partial artifacts are removed.
    assert!(!dir.path().join("tmp").join("q_bad.cpp").exists());
    assert!(!dir.path().join("tmp").join("q_bad.so").exists());
}

#[test]
fn test_bitcode_backend_writes_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let column = dir.path().join("test.skdbcol");
    write_i32_column(&column, &[1, 2, 3]).unwrap();

    let mut config = Config::default();
    config.engine.backend = Backend::Bitcode;
    config.toolchain.temp_dir = dir.path().join("tmp");
    let mut engine = QueryEngine::with_config(config);
    engine.catalog_mut().register_table(
        "test",
        vec![("col0".to_string(), ScalarType::I32, column)],
    );

    let plan = engine.parse("SELECT * FROM test").unwrap();
    let artifact = engine.compile(&plan, "q_bc").unwrap();
    assert!(artifact.exists());

    let module = fusedb::ir::read_bitcode(&artifact).unwrap();
    assert!(module.function_by_name("compute").is_some());
}
