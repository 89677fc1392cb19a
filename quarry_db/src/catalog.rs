//! Loading table definitions from a catalog file.
//!
//! Each non-empty line defines one table as
//! `table_name (col_name col_type, ...)` with types `int` and `string`; a
//! trailing `pk` after a column's type marks the primary key. Data files
//! live next to the catalog file as `<table_name>.dat`.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use granite::database::Database;
use granite::errors::DbError;
use granite::heap_file::HeapFile;
use granite::tuple::{FieldType, TupleDesc, DEFAULT_STR_LEN};

use crate::quarry_debug_log;

/// Loads every table defined in the catalog file at `path`, registering
/// each in the database's catalog. Returns the table names in file order.
pub fn load_catalog(db: &Database, path: impl AsRef<Path>) -> Result<Vec<String>, DbError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut names = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, columns, primary_key) = parse_table_line(line)?;
        let file = HeapFile::open(dir.join(format!("{name}.dat")), Arc::new(TupleDesc::new(columns)))?;
        let table_id = db.catalog().add_table(Arc::new(file), &name, primary_key.as_deref());
        quarry_debug_log!("[load_catalog] Registered table '{name}' as {table_id}");
        names.push(name);
    }
    Ok(names)
}

type ParsedTable = (String, Vec<(FieldType, Option<String>)>, Option<String>);

fn parse_table_line(line: &str) -> Result<ParsedTable, DbError> {
    let open = line.find('(').ok_or_else(|| bad_line(line))?;
    let close = line.rfind(')').ok_or_else(|| bad_line(line))?;
    let name = line[..open].trim();
    if name.is_empty() || close < open {
        return Err(bad_line(line));
    }

    let mut columns = Vec::new();
    let mut primary_key = None;
    for part in line[open + 1..close].split(',') {
        let mut words = part.split_whitespace();
        let col_name = words.next().ok_or_else(|| bad_line(line))?;
        let col_type = match words.next() {
            Some("int") => FieldType::Int,
            Some("string") => FieldType::Str(DEFAULT_STR_LEN),
            _ => return Err(bad_line(line)),
        };
        if words.next() == Some("pk") {
            primary_key = Some(col_name.to_string());
        }
        columns.push((col_type, Some(col_name.to_string())));
    }
    if columns.is_empty() {
        return Err(bad_line(line));
    }
    Ok((name.to_string(), columns, primary_key))
}

fn bad_line(line: &str) -> DbError {
    DbError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed catalog line: {line}"),
    ))
}
