//! Staged batch state and the transitions that mutate it.
//!
//! Every change goes through [`UploadSession::apply`]; handlers run to
//! completion, so two transitions never interleave.

use crate::gate::{self, GateBlock, GateInputs};
use crate::parse::{self, ParseError};
use crate::schema::{ColumnKey, Header, RawRecord};
use crate::validate::{self, ValidationError, ValidationPolicy};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A file was picked and its contents are being read.
    LoadStarted,
    /// The read finished; `Err` carries an I/O or encoding failure.
    LoadFinished(Result<String, ParseError>),
    EditCell {
        row_index: usize,
        column: ColumnKey,
        value: String,
    },
    SetBatchLabel(String),
    SetPartitionKey(String),
    /// Drop the staged rows but keep the form fields.
    Clear,
    /// The upload dialog was dismissed.
    Close,
    CommitStarted,
    CommitSucceeded { inserted: usize },
    CommitFailed(String),
}

/// What the operator is told after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a file is already being read")]
    LoadInProgress,
    #[error("no file read is pending")]
    NoLoadPending,
    #[error("the batch is locked while a commit is in flight")]
    CommitInFlight,
    #[error("no commit is in flight")]
    NoCommitInFlight,
    #[error("row {row_index} is out of range ({len} rows staged)")]
    RowOutOfRange { row_index: usize, len: usize },
    #[error("column '{0}' is not part of this file")]
    UnknownColumn(ColumnKey),
    #[error("column '{0}' is assigned on upload and cannot be edited")]
    ReadOnlyColumn(ColumnKey),
    #[error(transparent)]
    Blocked(#[from] GateBlock),
}

#[derive(Debug, Clone, Default)]
pub struct UploadSession {
    policy: ValidationPolicy,
    header: Header,
    rows: Vec<RawRecord>,
    errors: Vec<ValidationError>,
    batch_label: String,
    partition_key: String,
    loading: bool,
    commit_in_flight: bool,
}

impl UploadSession {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<Option<Notice>, SessionError> {
        match event {
            SessionEvent::LoadStarted => {
                if self.loading {
                    log::warn!("ignoring file selection while a read is pending");
                    return Err(SessionError::LoadInProgress);
                }
                self.ensure_idle()?;
                self.loading = true;
                Ok(None)
            }
            SessionEvent::LoadFinished(read) => {
                if !self.loading {
                    log::warn!("discarding a read that is no longer pending");
                    return Err(SessionError::NoLoadPending);
                }
                self.loading = false;
                self.ensure_idle()?;
                Ok(Some(self.load(read)))
            }
            SessionEvent::EditCell {
                row_index,
                column,
                value,
            } => {
                self.edit_cell(row_index, column, value)?;
                Ok(None)
            }
            SessionEvent::SetBatchLabel(label) => {
                self.ensure_idle()?;
                self.batch_label = label;
                Ok(None)
            }
            SessionEvent::SetPartitionKey(key) => {
                self.ensure_idle()?;
                self.partition_key = key;
                Ok(None)
            }
            SessionEvent::Clear => {
                self.ensure_idle()?;
                self.drop_pending_read();
                self.clear_rows();
                Ok(None)
            }
            SessionEvent::Close => {
                self.ensure_idle()?;
                self.drop_pending_read();
                self.clear_rows();
                self.batch_label.clear();
                Ok(None)
            }
            SessionEvent::CommitStarted => {
                if self.loading {
                    return Err(SessionError::LoadInProgress);
                }
                gate::evaluate(self.gate_inputs())?;
                self.commit_in_flight = true;
                Ok(None)
            }
            SessionEvent::CommitSucceeded { inserted } => {
                self.finish_commit()?;
                self.clear_rows();
                self.batch_label.clear();
                self.partition_key.clear();
                Ok(Some(Notice::Success(format!(
                    "{inserted} stock items uploaded successfully"
                ))))
            }
            SessionEvent::CommitFailed(reason) => {
                self.finish_commit()?;
                log::warn!("commit failed, batch stays staged: {reason}");
                Ok(Some(Notice::Error(reason)))
            }
        }
    }

    fn load(&mut self, read: Result<String, ParseError>) -> Notice {
        let parsed = match read.and_then(|text| parse::ingest(&text)) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("ingestion failed: {err}");
                return Notice::Error(format!("Failed to parse CSV file: {err}"));
            }
        };

        self.errors = validate::validate(&parsed.header, &parsed.rows, &self.policy);
        self.header = parsed.header;
        self.rows = parsed.rows;
        log::info!(
            "staged {} rows ({} validation errors)",
            self.rows.len(),
            self.errors.len()
        );

        if self.errors.is_empty() {
            Notice::Success(format!(
                "{} records loaded. Detected columns: {}",
                self.rows.len(),
                self.header.describe()
            ))
        } else {
            Notice::Error("CSV contains validation errors. See preview for details.".into())
        }
    }

    fn edit_cell(
        &mut self,
        row_index: usize,
        column: ColumnKey,
        value: String,
    ) -> Result<(), SessionError> {
        self.ensure_idle()?;
        if self.loading {
            return Err(SessionError::LoadInProgress);
        }
        if column.is_read_only() {
            return Err(SessionError::ReadOnlyColumn(column));
        }
        if !self.header.contains(&column) {
            return Err(SessionError::UnknownColumn(column));
        }
        let len = self.rows.len();
        let record = self
            .rows
            .get_mut(row_index)
            .ok_or(SessionError::RowOutOfRange { row_index, len })?;
        if !record.set(&column, value) {
            return Err(SessionError::UnknownColumn(column));
        }
        self.errors = validate::validate(&self.header, &self.rows, &self.policy);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.commit_in_flight {
            return Err(SessionError::CommitInFlight);
        }
        Ok(())
    }

    /// A read still in progress will be refused when it finishes.
    fn drop_pending_read(&mut self) {
        if self.loading {
            log::info!("dropping pending file read");
            self.loading = false;
        }
    }

    fn finish_commit(&mut self) -> Result<(), SessionError> {
        if !self.commit_in_flight {
            return Err(SessionError::NoCommitInFlight);
        }
        self.commit_in_flight = false;
        Ok(())
    }

    fn clear_rows(&mut self) {
        self.header = Header::default();
        self.rows.clear();
        self.errors.clear();
    }

    pub fn gate_inputs(&self) -> GateInputs<'_> {
        GateInputs {
            row_count: self.rows.len(),
            batch_label: &self.batch_label,
            partition_key: &self.partition_key,
            error_count: self.errors.len(),
            commit_in_flight: self.commit_in_flight,
        }
    }

    /// `Ok` when Complete Upload may be pressed, otherwise the reason it may not.
    pub fn gate(&self) -> Result<(), GateBlock> {
        gate::evaluate(self.gate_inputs())
    }

    pub fn can_commit(&self) -> bool {
        self.gate().is_ok()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn rows(&self) -> &[RawRecord] {
        &self.rows
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn batch_label(&self) -> &str {
        &self.batch_label
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn commit_in_flight(&self) -> bool {
        self.commit_in_flight
    }
}
