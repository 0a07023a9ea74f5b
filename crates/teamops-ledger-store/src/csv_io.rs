use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use teamops_ledger_core::{EventRow, EventTable, LedgerError};

fn reader_for(path: &Path) -> Result<csv::Reader<fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open csv file {}", path.display()))
}

fn writer_builder() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder.terminator(csv::Terminator::Any(b'\n'));
    builder
}

fn parse_table(path: &Path) -> Result<EventTable> {
    let mut reader = reader_for(path)?;
    let header: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read csv header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("failed to read row {} of {}", index + 1, path.display()))?;
        records.push(record.iter().map(str::to_string).collect());
    }

    tracing::debug!(path = %path.display(), rows = records.len(), "read csv ledger");
    Ok(EventTable::from_records(header, records))
}

/// Reads a ledger that must exist.
///
/// A missing file surfaces as [`LedgerError::MissingInput`] so callers can
/// map it to a distinct exit code.
pub fn read_required_table(path: &Path) -> Result<EventTable> {
    if !path.is_file() {
        return Err(LedgerError::MissingInput(path.to_path_buf()).into());
    }
    parse_table(path)
}

/// Reads a ledger, treating a missing file as an empty table.
pub fn read_optional_table(path: &Path) -> Result<EventTable> {
    if !path.is_file() {
        return Ok(EventTable::default());
    }
    parse_table(path)
}

fn write_records(path: &Path, table: &EventTable, rows: &[EventRow]) -> Result<()> {
    let mut writer = writer_builder()
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record(&table.header)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in rows {
        writer
            .write_record(table.record_for(row))
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "ledger".to_string(), |name| name.to_string_lossy().into_owned());
    path.with_file_name(format!("{name}.tmp"))
}

/// Replaces `path` with `table` by writing a sibling temp file and renaming
/// it over the target, so readers never see a half-written ledger.
pub fn write_table_atomic(path: &Path, table: &EventTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = temp_path_for(path);
    write_records(&tmp, table, &table.rows)?;
    fs::rename(&tmp, path).with_context(|| {
        format!("failed to move {} over {}", tmp.display(), path.display())
    })?;
    tracing::debug!(path = %path.display(), rows = table.len(), "rewrote csv ledger");
    Ok(())
}

/// Creates `path` with just `header` when it does not exist yet.
pub fn ensure_table(path: &Path, header: &[&str]) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let table = EventTable::new(header.iter().map(|name| (*name).to_string()).collect());
    write_table_atomic(path, &table)?;
    tracing::info!(path = %path.display(), "created ledger with header");
    Ok(())
}

fn ends_with_newline(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata().context("failed to stat ledger")?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))
        .context("failed to seek ledger")?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last).context("failed to read ledger")?;
    Ok(last[0] == b'\n')
}

/// Appends `rows` to an existing ledger, aligned to `table.header`. The file
/// is created with the header first when missing or empty.
pub fn append_rows(path: &Path, table: &EventTable, rows: &[EventRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let needs_header = fs::metadata(path).map_or(true, |meta| meta.len() == 0);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    if !ends_with_newline(&mut file)? {
        file.write_all(b"\n")
            .with_context(|| format!("failed to terminate last row of {}", path.display()))?;
    }

    let mut writer = writer_builder().has_headers(false).from_writer(file);
    if needs_header {
        writer
            .write_record(&table.header)
            .with_context(|| format!("failed to write header to {}", path.display()))?;
    }
    for row in rows {
        writer
            .write_record(table.record_for(row))
            .with_context(|| format!("failed to append row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    tracing::info!(path = %path.display(), rows = rows.len(), "appended ledger rows");
    Ok(())
}

/// Writes `rows` as a standalone CSV with `table`'s header.
pub fn write_rows(path: &Path, table: &EventTable, rows: &[EventRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    write_records(path, table, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamops_ledger_core::LedgerRow;
    use ulid::Ulid;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("teamops-csv-test-{}", Ulid::new()));
        must(fs::create_dir_all(&dir).map_err(anyhow::Error::from));
        dir
    }

    #[test]
    fn missing_required_file_is_typed() {
        let path = temp_dir().join("run_registry.csv");
        let err = match read_required_table(&path) {
            Ok(_) => panic!("expected missing input"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::MissingInput(missing)) if missing == &path
        ));
        assert!(must(read_optional_table(&path)).is_empty());
    }

    #[test]
    fn atomic_write_round_trips_quoted_cells() {
        let path = temp_dir().join("handoff_log.csv");
        let mut table = EventTable::new(vec!["entry_id".to_string(), "blocking_flags".to_string()]);
        table.push([("entry_id", "H-1"), ("blocking_flags", "[\"a, b\"]")]);
        table.push([("entry_id", "H-2")]);

        must(write_table_atomic(&path, &table));
        let read = must(read_required_table(&path));

        assert_eq!(read.header, table.header);
        assert_eq!(read.rows[0].field("blocking_flags"), Some("[\"a, b\"]"));
        assert_eq!(read.rows[1].field("blocking_flags"), Some(""));
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn append_repairs_missing_trailing_newline() {
        let path = temp_dir().join("TICKET_QUEUE.csv");
        must(fs::write(&path, "row_id,ticket_id\n1,T-1").map_err(anyhow::Error::from));
        let mut table = must(read_required_table(&path));
        let appended = table.push([("row_id", "2"), ("ticket_id", "T-2")]).clone();

        must(append_rows(&path, &table, &[appended]));

        let read = must(read_required_table(&path));
        assert_eq!(read.len(), 2);
        assert_eq!(read.rows[1].value("ticket_id"), "T-2");
    }

    #[test]
    fn append_to_missing_file_writes_header() {
        let path = temp_dir().join("nested").join("log.csv");
        let mut table = EventTable::new(vec!["a".to_string(), "b".to_string()]);
        let row = table.push([("b", "2"), ("a", "1")]).clone();

        must(append_rows(&path, &table, &[row]));

        let text = must(fs::read_to_string(&path).map_err(anyhow::Error::from));
        assert_eq!(text, "a,b\n1,2\n");
    }
}
