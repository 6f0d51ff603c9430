//! SQLite database preview
//!
//! Opens a downloaded database read-only and reports the columns and first
//! rows of every table.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;

use super::types::{DatabasePreview, TablePreview};

/// Rows reported per table
pub const PREVIEW_ROWS: usize = 10;

pub(super) fn preview_database(path: &Path) -> Result<DatabasePreview, rusqlite::Error> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut preview = DatabasePreview::new();
    for table in tables {
        let quoted = quote_identifier(&table);

        let columns: Vec<String> = conn
            .prepare(&format!("PRAGMA table_info({})", quoted))?
            .query_map([], |row| row.get(1))?
            .collect::<Result<_, _>>()?;

        let mut stmt = conn.prepare(&format!("SELECT * FROM {} LIMIT {}", quoted, PREVIEW_ROWS))?;
        let width = stmt.column_count();
        let rows: Vec<Vec<Value>> = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(to_json))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<_, _>>()?;

        preview.insert(table, TablePreview { columns, rows });
    }

    Ok(preview)
}

/// Double-quote an identifier, doubling embedded quotes
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(format!("<{} byte blob>", blob.len())),
    }
}
