//! Attendance ledger: at most one record per identity per calendar day.
//!
//! The ledger owns the current [`Session`]. A record is persisted to the
//! [`LedgerStore`] (flushed to disk) before the session is updated, so a
//! failed write leaves the identity eligible for the next sighting.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%d-%m-%Y";
const TIME_FORMAT: &str = "%H:%M:%S";
const HEADER: [&str; 2] = ["Name", "Time"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub timestamp: NaiveDateTime,
}

impl AttendanceRecord {
    /// Wall-clock time as written to the ledger (`HH:MM:SS`).
    pub fn time_label(&self) -> String {
        self.timestamp.format(TIME_FORMAT).to_string()
    }
}

/// Everything logged for one calendar day.
#[derive(Debug, Clone)]
pub struct Session {
    date: NaiveDate,
    logged: HashSet<String>,
    records: Vec<AttendanceRecord>,
}

impl Session {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            logged: HashSet::new(),
            records: Vec::new(),
        }
    }

    /// Seed from previously persisted records, keeping the first per name.
    fn resume(date: NaiveDate, persisted: Vec<AttendanceRecord>) -> Self {
        let mut session = Self::new(date);
        for record in persisted {
            if !session.logged.contains(&record.name) {
                session.push(record);
            }
        }
        session
    }

    fn push(&mut self, record: AttendanceRecord) {
        self.logged.insert(record.name.clone());
        self.records.push(record);
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_logged(&self, name: &str) -> bool {
        self.logged.contains(name)
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Durable, append-only storage keyed by calendar date.
pub trait LedgerStore {
    /// Records already persisted for `date` (empty if none).
    fn load(&mut self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError>;
    /// Append one record; must be durable when this returns.
    fn append(&mut self, date: NaiveDate, record: &AttendanceRecord) -> Result<(), LedgerError>;
    fn flush(&mut self) -> Result<(), LedgerError>;
}

/// Session-scoped exactly-once attendance recording.
pub struct AttendanceLedger<S: LedgerStore> {
    store: S,
    session: Session,
}

impl<S: LedgerStore> AttendanceLedger<S> {
    /// Open the session for `date`, resuming any records already stored for it.
    pub fn open(mut store: S, date: NaiveDate) -> Result<Self, LedgerError> {
        let persisted = store.load(date)?;
        if !persisted.is_empty() {
            tracing::info!(%date, records = persisted.len(), "resuming attendance session");
        }
        Ok(Self {
            session: Session::resume(date, persisted),
            store,
        })
    }

    /// Record `name` at `timestamp` unless already recorded this session.
    ///
    /// Returns `Ok(true)` when a new record was persisted, `Ok(false)` when the
    /// name was already logged. A timestamp on a later (or earlier) date than
    /// the current session starts that date's session first.
    pub fn record(&mut self, name: &str, timestamp: NaiveDateTime) -> Result<bool, LedgerError> {
        let date = timestamp.date();
        self.roll_to(date)?;

        if self.session.is_logged(name) {
            return Ok(false);
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            timestamp,
        };
        self.store.append(date, &record)?;
        tracing::info!(name, time = %record.time_label(), "attendance recorded");
        self.session.push(record);
        Ok(true)
    }

    /// Move the session to `date`, resuming whatever is stored for it.
    ///
    /// `Ok(false)` when the session is already on `date`. On error the
    /// current session is kept.
    pub fn roll_to(&mut self, date: NaiveDate) -> Result<bool, LedgerError> {
        if date == self.session.date {
            return Ok(false);
        }
        self.store.flush()?;
        let persisted = self.store.load(date)?;
        tracing::info!(
            from = %self.session.date,
            to = %date,
            resumed = persisted.len(),
            "attendance session rolled over"
        );
        self.session = Session::resume(date, persisted);
        Ok(true)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        self.session.records()
    }

    pub fn flush(&mut self) -> Result<(), LedgerError> {
        self.store.flush()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// One CSV file per day (`DD-MM-YYYY.csv`) under a directory.
pub struct CsvLedgerStore {
    dir: PathBuf,
    open: Option<(NaiveDate, File)>,
}

impl CsvLedgerStore {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir, open: None })
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        ledger_file(&self.dir, date)
    }

    fn file_for(&mut self, date: NaiveDate) -> Result<&mut File, LedgerError> {
        let reuse = matches!(&self.open, Some((d, _)) if *d == date);
        if !reuse {
            let path = self.path_for(date);
            let io_err = |source: std::io::Error| LedgerError::Io {
                path: path.clone(),
                source,
            };
            let mut file = OpenOptions::new().create(true).append(true).open(&path).map_err(io_err)?;
            if file.metadata().map_err(io_err)?.len() == 0 {
                file.write_all(csv_row(&HEADER).as_bytes()).map_err(io_err)?;
                file.sync_data().map_err(io_err)?;
                tracing::debug!(path = %path.display(), "created attendance file");
            }
            self.open = Some((date, file));
        }
        match &mut self.open {
            Some((_, file)) => Ok(file),
            None => Err(LedgerError::Unavailable("attendance file not open".into())),
        }
    }
}

impl LedgerStore for CsvLedgerStore {
    fn load(&mut self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let path = self.path_for(date);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        let mut records = Vec::new();
        for (line, row) in parse_csv(&text).into_iter().enumerate() {
            if line == 0 && row == HEADER {
                continue;
            }
            match parse_record(date, &row) {
                Some(record) => records.push(record),
                None => tracing::warn!(path = %path.display(), line, ?row, "skipping malformed attendance row"),
            }
        }
        Ok(records)
    }

    fn append(&mut self, date: NaiveDate, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let path = self.path_for(date);
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: path.clone(),
            source,
        };
        let row = csv_row(&[record.name.as_str(), record.time_label().as_str()]);
        let file = self.file_for(date)?;
        file.write_all(row.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        file.sync_data().map_err(io_err)
    }

    fn flush(&mut self) -> Result<(), LedgerError> {
        if let Some((date, file)) = &mut self.open {
            let path = ledger_file(&self.dir, *date);
            file.sync_all().map_err(|source| LedgerError::Io { path, source })?;
        }
        Ok(())
    }
}

fn parse_record(date: NaiveDate, row: &[String]) -> Option<AttendanceRecord> {
    let [name, time] = row else {
        return None;
    };
    if name.is_empty() {
        return None;
    }
    let time = NaiveTime::parse_from_str(time.trim(), TIME_FORMAT).ok()?;
    Some(AttendanceRecord {
        name: name.clone(),
        timestamp: date.and_time(time),
    })
}

/// One CSV line with RFC 4180 quoting, terminated by `\n`.
fn csv_row(fields: &[&str]) -> String {
    let mut line = fields
        .iter()
        .map(|field| {
            if field.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Parse CSV text into rows, honouring quoted fields (which may span lines).
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (true, c) => field.push(c),
            (false, '"') => quoted = true,
            (false, ',') => row.push(std::mem::take(&mut field)),
            (false, '\r') => {}
            (false, '\n') => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            (false, c) => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Store whose writes always fail.
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
impl LedgerStore for FailingStore {
    fn load(&mut self, _date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(Vec::new())
    }

    fn append(&mut self, _date: NaiveDate, _record: &AttendanceRecord) -> Result<(), LedgerError> {
        Err(LedgerError::Unavailable("disk full".into()))
    }

    fn flush(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Day file for `date` inside `dir`.
pub fn ledger_file(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.csv", date.format(DATE_FORMAT)))
}
