//! `mend import` and `mend status`.

use std::path::PathBuf;

use mendkit_recon::model::Attributes;
use mendkit_recon::{AttrValue, MigrationState, RecordId};
use mendkit_store::SqliteStore;

use crate::exit_codes::EXIT_STORE_UNAVAILABLE;
use crate::CliError;

// ============================================================================
// import
// ============================================================================

pub fn cmd_import(
    csv_path: PathBuf,
    db: PathBuf,
    dataset: String,
    id_column: String,
    delimiter: char,
) -> Result<(), CliError> {
    if !delimiter.is_ascii() {
        return Err(CliError::usage(format!("delimiter must be a single ASCII character, got '{delimiter}'")));
    }
    if dataset.trim().is_empty() {
        return Err(CliError::usage("--dataset must not be empty"));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .from_path(&csv_path)
        .map_err(|e| CliError::usage(format!("cannot read {}: {e}", csv_path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| CliError::usage(format!("{}: {e}", csv_path.display())))?
        .clone();
    let id_index = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| {
            CliError::usage(format!("no '{id_column}' column in {}", csv_path.display()))
                .with_hint("pass --id-column to name the column holding record ids")
        })?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = i + 2;
        let record = record.map_err(|e| CliError::usage(format!("{}:{line}: {e}", csv_path.display())))?;

        let raw_id = record.get(id_index).unwrap_or("").trim();
        let id: u64 = raw_id.parse().map_err(|_| {
            CliError::usage(format!(
                "{}:{line}: record id '{raw_id}' is not a non-negative integer",
                csv_path.display()
            ))
        })?;

        rows.push((RecordId(id), attributes(&headers, &record, id_index)));
    }

    let mut store = SqliteStore::open(&db).map_err(CliError::store)?;
    let written = store.upsert(&dataset, rows).map_err(CliError::store)?;
    eprintln!("imported {written} records into '{dataset}' ({})", db.display());
    Ok(())
}

fn attributes(headers: &csv::StringRecord, record: &csv::StringRecord, id_index: usize) -> Attributes {
    headers
        .iter()
        .zip(record.iter())
        .enumerate()
        .filter(|(idx, _)| *idx != id_index)
        .map(|(_, (name, cell))| (name.to_string(), cell_value(cell)))
        .collect()
}

/// Empty cells are null; canonical integers (no sign padding, no leading
/// zeros) are integers; everything else stays text.
fn cell_value(cell: &str) -> AttrValue {
    if cell.is_empty() {
        return AttrValue::Null;
    }
    match cell.parse::<i64>() {
        Ok(n) if n.to_string() == cell => AttrValue::Integer(n),
        _ => AttrValue::Text(cell.to_string()),
    }
}

// ============================================================================
// status
// ============================================================================

pub fn cmd_status(db: PathBuf, json: bool) -> Result<(), CliError> {
    // Opening would create an empty database.
    if !db.exists() {
        return Err(CliError::new(
            EXIT_STORE_UNAVAILABLE,
            format!("no database at {}", db.display()),
        )
        .with_hint("create one with `mend import`"));
    }

    let store = SqliteStore::open(&db).map_err(CliError::store)?;
    let datasets = store.datasets().map_err(CliError::store)?;
    let states = store.states().map_err(CliError::store)?;

    if json {
        let migrations: Vec<_> = states
            .iter()
            .map(|(job, state)| serde_json::json!({ "job": job, "state": state }))
            .collect();
        println!(
            "{}",
            serde_json::json!({ "datasets": datasets, "migrations": migrations })
        );
        return Ok(());
    }

    println!("{:<32} {:>10}", "DATASET", "RECORDS");
    for d in &datasets {
        println!("{:<32} {:>10}", d.name, d.records);
    }
    if !states.is_empty() {
        println!();
        println!("{:<32} STATE", "JOB");
        for (job, state) in &states {
            println!("{:<32} {}", job, describe_state(state));
        }
    }
    Ok(())
}

fn describe_state(state: &MigrationState) -> String {
    match state {
        MigrationState::NotStarted => "not started".to_string(),
        MigrationState::InProgress { offset } => format!("in progress ({offset})"),
        MigrationState::Completed => "completed".to_string(),
    }
}
