//! Bulk stock upload: CSV ingestion, validation, inline correction and a
//! gated commit into a stock store.
//!
//! Pipeline:
//! - `io` reads the upload (gzip/zstd and non-UTF-8 charsets supported).
//! - `parse::ingest` turns text into a normalized `Header` plus `RawRecord`s.
//! - `validate::validate` lists every reason the batch cannot be committed.
//! - `UploadSession` stages the batch and re-validates after each cell edit.
//! - `gate::evaluate` decides whether the batch may be committed.
//! - `commit::commit` hands the rows to a `StockStore`.
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod codec;
pub mod commit;
pub mod gate;
mod io;
pub mod parse;
pub mod schema;
pub mod session;
pub mod validate;

pub use crate::commit::{
    commit, BatchRef, CommitError, CommitReceipt, CsvFileStore, MemoryStore, NewStockRecord,
    StockStore, StoreError,
};
pub use crate::gate::{GateBlock, GateInputs};
pub use crate::io::{build_upload_reader, read_upload_text, reader_from_path, UploadMeta};
pub use crate::parse::{ingest, parse_line, ParseError, ParsedCsv};
pub use crate::schema::{ColumnKey, Header, RawRecord, StockType};
pub use crate::session::{Notice, SessionError, SessionEvent, UploadSession};
pub use crate::validate::{validate, ValidationError, ValidationPolicy};

use std::path::Path;
use thiserror::Error;

/// Error type returned by this crate when not using `anyhow`.
#[derive(Debug, Error)]
pub enum StockIngestError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Commit(#[from] CommitError),
}

pub type IngestResult<T> = std::result::Result<T, StockIngestError>;

/// Read a local file into the session as one load.
///
/// A read or parse failure is reported through the returned `Notice` and
/// leaves any previously staged batch untouched.
pub async fn stage_file(session: &mut UploadSession, path: &Path) -> IngestResult<Notice> {
    session.apply(SessionEvent::LoadStarted)?;
    let text = match reader_from_path(path).await {
        Ok((reader, meta)) => {
            log::info!("reading {} ({})", meta.name_hint, meta.content_type);
            read_upload_text(reader).await
        }
        Err(e) => Err(e),
    };
    let notice = session.apply(SessionEvent::LoadFinished(text))?;
    Ok(notice.unwrap_or_else(|| Notice::Error("Failed to parse CSV file".into())))
}

/// Commit the staged batch by appending it to a stock CSV file.
pub async fn commit_to_file(
    session: &mut UploadSession,
    store_path: &Path,
) -> IngestResult<CommitReceipt> {
    let store = CsvFileStore::open(store_path).await?;
    let receipt = commit(session, &store).await?;
    log::info!(
        "appended {} rows to {}",
        receipt.inserted,
        store.path().display()
    );
    Ok(receipt)
}
