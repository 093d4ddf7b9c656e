// crates/tessera-cli/src/output.rs
//
// Output formatting for the Tessera CLI: tables for people, pretty JSON for
// scripts. Every command builds a serializable report and hands it here.

use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

/// A single `key | value` line in a detail table.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct Field {
    #[tabled(rename = "field")]
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

pub fn format_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).to_string()
}

pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("JSON serialization error: {}", e))
}

/// Print rows as a table, or `json` (usually the rows themselves or the
/// underlying record) as JSON.
pub fn emit<T: Tabled, J: Serialize>(format: OutputFormat, rows: &[T], json: &J) {
    match format {
        OutputFormat::Table => println!("{}", format_table(rows)),
        OutputFormat::Json => println!("{}", format_json(json)),
    }
}

/// Print the outcome of a single operation.
pub fn emit_fields<J: Serialize>(format: OutputFormat, fields: &[Field], json: &J) {
    emit(format, fields, json)
}
