//! # fusedb-parse
//!
//! Parses a SQL string against a catalog built from `--table` specs and
//! reports success or the parse error. Exit 0 on success, 1 with the
//! diagnostic on stderr otherwise.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fusedb::{parse_query, Catalog, ScalarType};

#[derive(Parser)]
#[command(name = "fusedb-parse", about = "Check that a query parses")]
struct Cli {
    /// Register a column: `table:column:type:path`. Repeat per column.
    #[arg(long = "table", value_name = "SPEC")]
    tables: Vec<String>,

    /// Print the parsed plan on success
    #[arg(long)]
    plan: bool,

    sql: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut catalog = Catalog::new();
    for spec in &cli.tables {
        let parts: Vec<&str> = spec.splitn(4, ':').collect();
        let [table, column, ty, path] = parts.as_slice() else {
            eprintln!("error: bad --table spec `{spec}`");
            return ExitCode::FAILURE;
        };
        let Some(ty) = parse_type(ty) else {
            eprintln!("error: unknown column type in `{spec}`");
            return ExitCode::FAILURE;
        };
        // Building the catalog incrementally: later specs for the same table
        // replace earlier ones, so collect per table first.
        let mut columns: Vec<(String, ScalarType, PathBuf)> = catalog
            .table_by_name(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.ty, c.path.clone()))
                    .collect()
            })
            .unwrap_or_default();
        columns.push(((*column).to_string(), ty, PathBuf::from(*path)));
        catalog.register_table(table, columns);
    }

    match parse_query(&cli.sql, &catalog) {
        Ok(plan) => {
            if cli.plan {
                print!("{plan}");
            } else {
                println!("ok");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn parse_type(s: &str) -> Option<ScalarType> {
    match s {
        "i8" => Some(ScalarType::I8),
        "i16" => Some(ScalarType::I16),
        "i32" => Some(ScalarType::I32),
        "i64" => Some(ScalarType::I64),
        "f64" => Some(ScalarType::F64),
        "text" => Some(ScalarType::Text),
        "date" => Some(ScalarType::Date),
        _ => None,
    }
}
