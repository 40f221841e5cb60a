//! Replication audit log
//!
//! Two append-only CSV streams per run: one row per failed push to a peer,
//! one row per chunk that finished its task still under-replicated. Every
//! row is flushed as soon as it is written.

use crate::common::{ChunkId, ChunkKind, Error, Result};
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const EXCEPTION_HEADER: [&str; 7] = [
    "Data or meta",
    "Required replications count",
    "Found replications count",
    "URL of server for failed replication",
    "Date",
    "Exception message",
    "Chunk hash",
];

pub const FAILURE_HEADER: [&str; 4] = [
    "Expected replications",
    "Found replications",
    "Data or meta",
    "Chunk hash",
];

/// A push to one peer that failed
#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    pub kind: ChunkKind,
    pub required: usize,
    pub found: usize,
    pub peer: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub chunk: ChunkId,
}

/// A chunk that ended its injection task below target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub expected: usize,
    pub found: usize,
    pub kind: ChunkKind,
    pub chunk: ChunkId,
}

/// Quote a CSV field, doubling embedded quotes
pub fn quote_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Ordered-field row writer over one stream
struct RowWriter {
    out: Mutex<Box<dyn Write + Send>>,
    rows: AtomicU64,
}

impl RowWriter {
    fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            rows: AtomicU64::new(0),
        }
    }

    fn write_row(&self, fields: &[&str]) -> io::Result<()> {
        let line = fields
            .iter()
            .map(|f| quote_field(f))
            .collect::<Vec<_>>()
            .join(",");
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit stream lock poisoned"))?;
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

/// Exception and failure streams of one run
pub struct ReplicationAuditLog {
    exceptions: RowWriter,
    failures: RowWriter,
}

impl ReplicationAuditLog {
    /// Create both files. Either already existing is an error.
    pub fn create(exception_path: &Path, failure_path: &Path) -> Result<Self> {
        let open = |path: &Path| -> Result<Box<dyn Write + Send>> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => Error::OutputExists(path.display().to_string()),
                    _ => Error::Io(e),
                })?;
            Ok(Box::new(BufWriter::new(file)))
        };
        Self::from_writers(open(exception_path)?, open(failure_path)?)
    }

    /// Wrap arbitrary writers and emit the header rows
    pub fn from_writers(
        exceptions: Box<dyn Write + Send>,
        failures: Box<dyn Write + Send>,
    ) -> Result<Self> {
        let log = Self {
            exceptions: RowWriter::new(exceptions),
            failures: RowWriter::new(failures),
        };
        log.exceptions.write_row(&EXCEPTION_HEADER)?;
        log.failures.write_row(&FAILURE_HEADER)?;
        Ok(log)
    }

    pub fn record_exception(&self, record: &ExceptionRecord) -> Result<()> {
        let required = record.required.to_string();
        let found = record.found.to_string();
        let date = record.timestamp.to_rfc3339();
        let hash = record.chunk.to_hex();
        self.exceptions.write_row(&[
            record.kind.as_str(),
            &required,
            &found,
            &record.peer,
            &date,
            &record.message,
            &hash,
        ])?;
        self.exceptions.rows.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn record_failure(&self, record: &FailureRecord) -> Result<()> {
        let expected = record.expected.to_string();
        let found = record.found.to_string();
        let hash = record.chunk.to_hex();
        self.failures
            .write_row(&[&expected, &found, record.kind.as_str(), &hash])?;
        self.failures.rows.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Exception rows written so far, header excluded
    pub fn exception_rows(&self) -> u64 {
        self.exceptions.rows.load(Ordering::Relaxed)
    }

    /// Failure rows written so far, header excluded
    pub fn failure_rows(&self) -> u64 {
        self.failures.rows.load(Ordering::Relaxed)
    }
}

/// Split CSV text into rows of unquoted fields
pub fn parse_rows(input: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Read a failure stream back, skipping the header row
pub fn read_failure_rows(path: &Path) -> Result<Vec<FailureRecord>> {
    let text = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (line, fields) in parse_rows(&text).into_iter().enumerate().skip(1) {
        if fields.len() != FAILURE_HEADER.len() {
            return Err(Error::Corrupted(format!(
                "{} row {}: expected {} fields, got {}",
                path.display(),
                line + 1,
                FAILURE_HEADER.len(),
                fields.len()
            )));
        }
        let number = |s: &str| -> Result<usize> {
            s.parse()
                .map_err(|_| Error::Corrupted(format!("{} row {}: bad count {}", path.display(), line + 1, s)))
        };
        records.push(FailureRecord {
            expected: number(&fields[0])?,
            found: number(&fields[1])?,
            kind: fields[2].parse()?,
            chunk: ChunkId::from_hex(&fields[3], 0)?,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_quote_field() {
        assert_eq!(quote_field("plain"), "\"plain\"");
        assert_eq!(quote_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_headers_written() {
        let exc = SharedBuf::default();
        let fail = SharedBuf::default();
        let _log = ReplicationAuditLog::from_writers(Box::new(exc.clone()), Box::new(fail.clone()))
            .unwrap();

        assert_eq!(
            exc.text(),
            "\"Data or meta\",\"Required replications count\",\"Found replications count\",\
             \"URL of server for failed replication\",\"Date\",\"Exception message\",\"Chunk hash\"\n"
        );
        assert_eq!(
            fail.text(),
            "\"Expected replications\",\"Found replications\",\"Data or meta\",\"Chunk hash\"\n"
        );
    }

    #[test]
    fn test_exception_message_escaping() {
        let exc = SharedBuf::default();
        let log =
            ReplicationAuditLog::from_writers(Box::new(exc.clone()), Box::new(SharedBuf::default()))
                .unwrap();
        let chunk = ChunkId::for_bytes(b"x");
        log.record_exception(&ExceptionRecord {
            kind: ChunkKind::Meta,
            required: 3,
            found: 1,
            peer: "http://p1:7000".into(),
            timestamp: Utc::now(),
            message: "refused, \"twice\"\nthen gave up".into(),
            chunk,
        })
        .unwrap();

        let rows = parse_rows(&exc.text());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "meta");
        assert_eq!(rows[1][1], "3");
        assert_eq!(rows[1][2], "1");
        assert_eq!(rows[1][3], "http://p1:7000");
        assert_eq!(rows[1][5], "refused, \"twice\"\nthen gave up");
        assert_eq!(rows[1][6], chunk.to_hex());
        assert_eq!(log.exception_rows(), 1);
    }

    #[test]
    fn test_failure_rows_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let exc_path = dir.path().join("exceptions.csv");
        let fail_path = dir.path().join("failures.csv");
        let log = ReplicationAuditLog::create(&exc_path, &fail_path).unwrap();

        let chunk = ChunkId::for_bytes(b"under");
        log.record_failure(&FailureRecord {
            expected: 3,
            found: 2,
            kind: ChunkKind::Data,
            chunk,
        })
        .unwrap();
        assert_eq!(log.failure_rows(), 1);

        let rows = read_failure_rows(&fail_path).unwrap();
        assert_eq!(
            rows,
            vec![FailureRecord {
                expected: 3,
                found: 2,
                kind: ChunkKind::Data,
                chunk
            }]
        );
    }

    #[test]
    fn test_create_refuses_existing_files() {
        let dir = TempDir::new().unwrap();
        let exc_path = dir.path().join("exceptions.csv");
        let fail_path = dir.path().join("failures.csv");
        std::fs::write(&fail_path, b"previous run").unwrap();

        let result = ReplicationAuditLog::create(&exc_path, &fail_path);
        assert!(matches!(result, Err(Error::OutputExists(_))));
    }

    #[test]
    fn test_read_failure_rows_rejects_short_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failures.csv");
        std::fs::write(&path, "\"Expected replications\"\n\"3\",\"1\"\n").unwrap();
        assert!(read_failure_rows(&path).is_err());
    }
}
