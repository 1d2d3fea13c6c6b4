use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::AppError;
use crate::types::LedgerRecord;

/// Append-only CSV sink of funded accounts, one headerless row per obligation.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
    records: usize,
}

impl LedgerWriter<File> {
    /// Creates or truncates the ledger file.
    pub fn create(path: &Path) -> Result<Self, AppError> {
        let file = File::create(path).map_err(|e| {
            log::error!("Failed to create ledger file {:?}", path);
            AppError::Io(e)
        })?;
        log::info!("Writing ledger to {:?}", path);
        Ok(LedgerWriter::new(file))
    }
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(inner: W) -> Self {
        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        LedgerWriter { writer, records: 0 }
    }

    pub fn append(&mut self, record: &LedgerRecord) -> Result<(), AppError> {
        self.writer.serialize(record)?;
        self.records += 1;
        log::debug!("Ledger row {} written for {}", self.records, record.name);
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Flushes buffered rows and hands back the underlying writer.
    pub fn close(mut self) -> Result<W, AppError> {
        self.writer.flush()?;
        log::info!("Ledger closed with {} records", self.records);
        self.writer.into_inner().map_err(|e| AppError::Io(e.into_error()))
    }
}
