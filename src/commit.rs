use crate::gate::GateBlock;
use crate::schema::{RawRecord, StockType};
use crate::session::{SessionError, SessionEvent, UploadSession};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use csv_async::{AsyncReaderBuilder, ByteRecord};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Store-side handle for a named batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchRef {
    pub id: String,
    pub label: String,
}

impl fmt::Display for BatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// A row ready for insertion. The identifier is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockRecord {
    pub smartcard_number: Option<String>,
    pub serial_number: Option<String>,
    pub stock_type: String,
    pub batch_id: String,
    pub region_id: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate smartcard number '{0}'")]
    DuplicateSmartcard(String),
    #[error("store rejected the batch: {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Blocked(#[from] GateBlock),
    #[error(transparent)]
    Session(SessionError),
    #[error("Failed to upload stock: {0}")]
    Store(#[from] StoreError),
}

impl From<SessionError> for CommitError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Blocked(block) => Self::Blocked(block),
            other => Self::Session(other),
        }
    }
}

/// Persistence collaborator for staged stock.
///
/// `insert_stock` is all-or-nothing: either every record is stored or none is.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Look up a batch by label, creating it when it does not exist yet.
    async fn resolve_batch(&self, label: &str) -> Result<BatchRef, StoreError>;

    /// Insert every record and return how many were stored.
    async fn insert_stock(&self, records: Vec<NewStockRecord>) -> Result<usize, StoreError>;
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub inserted: usize,
    pub batch: BatchRef,
    pub region_id: String,
    pub by_type: BTreeMap<StockType, usize>,
    /// Rows whose `type` label matched no known category.
    pub unclassified: usize,
}

/// Map staged rows to insertable records.
///
/// `region_id` is always `partition_key`; any region column in the file is ignored.
pub fn build_records(
    rows: &[RawRecord],
    batch: &BatchRef,
    partition_key: &str,
) -> Vec<NewStockRecord> {
    rows.iter()
        .map(|row| NewStockRecord {
            smartcard_number: row.smartcard_number().map(str::to_string),
            serial_number: row.serial_number().map(str::to_string),
            stock_type: row.stock_type_label().unwrap_or_default().to_string(),
            batch_id: batch.id.clone(),
            region_id: partition_key.to_string(),
        })
        .collect()
}

fn tally(records: &[NewStockRecord]) -> (BTreeMap<StockType, usize>, usize) {
    let mut by_type = BTreeMap::new();
    let mut unclassified = 0usize;
    for record in records {
        match StockType::classify(&record.stock_type) {
            Some(t) => *by_type.entry(t).or_insert(0) += 1,
            None => unclassified += 1,
        }
    }
    (by_type, unclassified)
}

/// Push the staged batch through the gate into `store`.
///
/// On success the session is cleared. On store failure the rows stay staged
/// so the operator can retry, and a single aggregate error is returned.
pub async fn commit<S>(session: &mut UploadSession, store: &S) -> Result<CommitReceipt, CommitError>
where
    S: StockStore + ?Sized,
{
    session.apply(SessionEvent::CommitStarted)?;

    let label = session.batch_label().trim().to_string();
    let region_id = session.partition_key().trim().to_string();
    log::info!(
        "committing {} rows to batch '{label}' in region '{region_id}'",
        session.rows().len()
    );

    match persist(store, session.rows(), &label, &region_id).await {
        Ok(receipt) => {
            session.apply(SessionEvent::CommitSucceeded {
                inserted: receipt.inserted,
            })?;
            log::info!("committed {} rows as {}", receipt.inserted, receipt.batch);
            Ok(receipt)
        }
        Err(err) => {
            let err = CommitError::Store(err);
            session.apply(SessionEvent::CommitFailed(err.to_string()))?;
            Err(err)
        }
    }
}

async fn persist<S>(
    store: &S,
    rows: &[RawRecord],
    label: &str,
    region_id: &str,
) -> Result<CommitReceipt, StoreError>
where
    S: StockStore + ?Sized,
{
    let batch = store.resolve_batch(label).await?;
    let records = build_records(rows, &batch, region_id);
    let (by_type, unclassified) = tally(&records);
    let inserted = store.insert_stock(records).await?;
    Ok(CommitReceipt {
        inserted,
        batch,
        region_id: region_id.to_string(),
        by_type,
        unclassified,
    })
}

/// Batch id derived from the label, stable across runs.
fn batch_id_for(label: &str) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(label.as_bytes());
    format!("batch-{:08x}", hasher.finalize())
}

fn stock_id_for(seq: u64) -> String {
    format!("STK-{seq:06}")
}

/// Stored stock row, identifier included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStock {
    pub stock_id: String,
    pub record: NewStockRecord,
}

#[derive(Debug, Default)]
struct MemoryState {
    batches: HashMap<String, BatchRef>,
    stock: Vec<StoredStock>,
    smartcards: HashSet<String>,
    next_seq: u64,
}

/// In-process store. Rejects a batch whose smartcard numbers collide with
/// stored stock or with each other, without storing any of it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stock(&self) -> Vec<StoredStock> {
        self.state.lock().await.stock.clone()
    }

    pub async fn batches(&self) -> Vec<BatchRef> {
        let mut batches: Vec<_> = self.state.lock().await.batches.values().cloned().collect();
        batches.sort_by(|a, b| a.label.cmp(&b.label));
        batches
    }
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn resolve_batch(&self, label: &str) -> Result<BatchRef, StoreError> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .entry(label.to_string())
            .or_insert_with(|| BatchRef {
                id: batch_id_for(label),
                label: label.to_string(),
            });
        Ok(batch.clone())
    }

    async fn insert_stock(&self, records: Vec<NewStockRecord>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;

        let mut incoming = HashSet::new();
        for sc in records.iter().filter_map(|r| r.smartcard_number.as_deref()) {
            if state.smartcards.contains(sc) || !incoming.insert(sc) {
                return Err(StoreError::DuplicateSmartcard(sc.to_string()));
            }
        }

        let inserted = records.len();
        for record in records {
            state.next_seq += 1;
            let stock_id = stock_id_for(state.next_seq);
            if let Some(sc) = &record.smartcard_number {
                state.smartcards.insert(sc.clone());
            }
            state.stock.push(StoredStock { stock_id, record });
        }
        Ok(inserted)
    }
}

const STOCK_FILE_HEADER: [&str; 6] = [
    "stock_id",
    "smartcard_number",
    "serial_number",
    "type",
    "batch_id",
    "region_id",
];

/// Appends committed stock to a CSV file.
///
/// Identifiers continue from the highest `stock_id` already in the file and
/// smartcard numbers stay unique across everything the file holds. A batch
/// that fails to write is truncated away, so the file never keeps a partial
/// batch.
#[derive(Debug)]
pub struct CsvFileStore {
    path: PathBuf,
    state: Mutex<CsvFileState>,
}

#[derive(Debug, Default)]
struct CsvFileState {
    next_seq: u64,
    smartcards: HashSet<String>,
}

impl CsvFileStore {
    /// Open (or create) the stock file, writing the header for a new file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let existing_len = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let state = if existing_len == 0 {
            let file = File::create(&path).await?;
            let mut writer = csv_async::AsyncWriter::from_writer(file);
            writer.write_record(&STOCK_FILE_HEADER).await?;
            writer.flush().await?;
            CsvFileState::default()
        } else {
            scan_stock_file(&path).await?
        };
        log::debug!(
            "opened stock file {} (next id {}, {} smartcards on file)",
            path.display(),
            stock_id_for(state.next_seq + 1),
            state.smartcards.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn scan_stock_file(path: &Path) -> Result<CsvFileState, StoreError> {
    let file = File::open(path).await?;
    let mut rdr = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .create_reader(file);

    let headers = rdr.headers().await?.clone();
    let id_idx = headers.iter().position(|h| h == "stock_id");
    let smartcard_idx = headers.iter().position(|h| h == "smartcard_number");

    let mut state = CsvFileState::default();
    let mut record = ByteRecord::new();
    while rdr.read_byte_record(&mut record).await? {
        let field = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .and_then(|b| std::str::from_utf8(b).ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        if let Some(seq) = field(id_idx).and_then(parse_stock_id) {
            state.next_seq = state.next_seq.max(seq);
        }
        if let Some(sc) = field(smartcard_idx) {
            state.smartcards.insert(sc.to_string());
        }
    }
    Ok(state)
}

fn parse_stock_id(id: &str) -> Option<u64> {
    id.strip_prefix("STK-")?.parse().ok()
}

async fn append_all(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl StockStore for CsvFileStore {
    async fn resolve_batch(&self, label: &str) -> Result<BatchRef, StoreError> {
        Ok(BatchRef {
            id: batch_id_for(label),
            label: label.to_string(),
        })
    }

    async fn insert_stock(&self, records: Vec<NewStockRecord>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;

        let mut incoming = HashSet::new();
        for sc in records.iter().filter_map(|r| r.smartcard_number.as_deref()) {
            if state.smartcards.contains(sc) || !incoming.insert(sc) {
                return Err(StoreError::DuplicateSmartcard(sc.to_string()));
            }
        }

        let mut writer = csv_async::AsyncWriter::from_writer(Vec::new());
        let mut seq = state.next_seq;
        for record in &records {
            seq += 1;
            writer
                .write_record(&[
                    stock_id_for(seq).as_str(),
                    record.smartcard_number.as_deref().unwrap_or(""),
                    record.serial_number.as_deref().unwrap_or(""),
                    record.stock_type.as_str(),
                    record.batch_id.as_str(),
                    record.region_id.as_str(),
                ])
                .await?;
        }
        let encoded = writer
            .into_inner()
            .await
            .map_err(|_| StoreError::Rejected("could not encode stock rows".into()))?;

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        let committed_len = file.metadata().await?.len();
        if let Err(e) = append_all(&mut file, &encoded).await {
            log::warn!(
                "write to {} failed, truncating back to {committed_len} bytes: {e}",
                self.path.display()
            );
            if let Err(undo) = file.set_len(committed_len).await {
                log::error!("could not truncate {}: {undo}", self.path.display());
            }
            return Err(e.into());
        }

        state.next_seq = seq;
        state.smartcards.extend(incoming.into_iter().map(str::to_string));
        Ok(records.len())
    }
}
