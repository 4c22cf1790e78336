use async_trait::async_trait;
use stock_ingest::commit::build_records;
use stock_ingest::{
    commit, BatchRef, CommitError, CsvFileStore, GateBlock, MemoryStore, NewStockRecord,
    SessionEvent, StockStore, StockType, StoreError, UploadSession, ValidationPolicy,
};

fn ready(text: &str, batch: &str, region: &str) -> UploadSession {
    let mut session = UploadSession::new(ValidationPolicy::upload());
    session.apply(SessionEvent::LoadStarted).unwrap();
    session
        .apply(SessionEvent::LoadFinished(Ok(text.to_string())))
        .unwrap();
    session
        .apply(SessionEvent::SetBatchLabel(batch.to_string()))
        .unwrap();
    session
        .apply(SessionEvent::SetPartitionKey(region.to_string()))
        .unwrap();
    session
}

#[test]
fn selected_region_always_wins() {
    let parsed = stock_ingest::ingest(
        "type,smartcard,serial_no,region\nFS,SC1,SN1,\"Dar es Salaam, Region\"\nDO,,SN2,Arusha\n",
    )
    .unwrap();
    let batch = BatchRef {
        id: "batch-1".into(),
        label: "B1".into(),
    };
    let records = build_records(&parsed.rows, &batch, "region-mwanza");

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.region_id == "region-mwanza"));
    assert_eq!(records[0].smartcard_number.as_deref(), Some("SC1"));
    assert_eq!(records[0].serial_number.as_deref(), Some("SN1"));
    assert_eq!(records[1].smartcard_number, None);
    assert_eq!(records[1].batch_id, "batch-1");
}

#[test]
fn alias_columns_resolve_in_order() {
    let parsed = stock_ingest::ingest("type,smartcard_no,smartcard_number,sn,serial\nFS,A,,X,Y\n")
        .unwrap();
    let batch = BatchRef {
        id: "b".into(),
        label: "b".into(),
    };
    let record = &build_records(&parsed.rows, &batch, "r")[0];
    assert_eq!(record.smartcard_number.as_deref(), Some("A"));
    assert_eq!(record.serial_number.as_deref(), Some("X"));
}

#[tokio::test]
async fn commit_inserts_and_clears_session() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut session = ready(
        "stock_id,type,smartcard_number\nIGNORED-1,Full Set (FS),SC1\n,Decoder Only (DO),SC2\n,DVS,SC3\n",
        " B-2024-07 ",
        "region-dsm",
    );

    let receipt = commit(&mut session, &store).await?;
    assert_eq!(receipt.inserted, 3);
    assert_eq!(receipt.batch.label, "B-2024-07");
    assert_eq!(receipt.by_type.get(&StockType::FullSet), Some(&1));
    assert_eq!(receipt.by_type.get(&StockType::DecoderOnly), Some(&1));
    assert_eq!(receipt.by_type.get(&StockType::Dvs), Some(&1));
    assert_eq!(receipt.unclassified, 0);

    let stock = store.stock().await;
    let ids: Vec<&str> = stock.iter().map(|s| s.stock_id.as_str()).collect();
    assert_eq!(ids, vec!["STK-000001", "STK-000002", "STK-000003"]);
    assert!(stock.iter().all(|s| s.record.region_id == "region-dsm"));

    assert!(session.rows().is_empty());
    assert!(!session.commit_in_flight());
    assert_eq!(session.batch_label(), "");
    Ok(())
}

#[tokio::test]
async fn batch_label_is_reused() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut first = ready("type,sn\nFS,1\n", "B1", "R1");
    let mut second = ready("type,sn\nDO,2\n", "B1", "R2");

    let a = commit(&mut first, &store).await?;
    let b = commit(&mut second, &store).await?;
    assert_eq!(a.batch, b.batch);
    assert_eq!(store.batches().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn gate_failure_names_the_precondition() {
    let store = MemoryStore::new();

    let mut session = ready("type,sn\n,1\n", "B1", "R1");
    let err = commit(&mut session, &store).await.unwrap_err();
    assert!(matches!(err, CommitError::Blocked(GateBlock::OutstandingErrors(1))));

    let mut session = ready("type,sn\nFS,1\n", "B1", "  ");
    let err = commit(&mut session, &store).await.unwrap_err();
    assert!(matches!(err, CommitError::Blocked(GateBlock::MissingPartitionKey)));
    assert_eq!(
        err.to_string(),
        "Select a region to enable Complete Upload."
    );

    assert!(store.stock().await.is_empty());
}

#[tokio::test]
async fn duplicate_smartcards_reject_the_whole_batch() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut first = ready("type,smartcard_number\nFS,SC1\n", "B1", "R1");
    commit(&mut first, &store).await?;

    let mut second = ready(
        "type,smartcard_number\nFS,SC2\nDO,SC1\nDO,SC3\n",
        "B1",
        "R1",
    );
    let err = commit(&mut second, &store).await.unwrap_err();
    assert!(matches!(
        err,
        CommitError::Store(StoreError::DuplicateSmartcard(ref sc)) if sc == "SC1"
    ));
    assert_eq!(
        err.to_string(),
        "Failed to upload stock: duplicate smartcard number 'SC1'"
    );

    // nothing from the failed batch landed, and it is still staged for a retry
    assert_eq!(store.stock().await.len(), 1);
    assert_eq!(second.rows().len(), 3);
    assert!(!second.commit_in_flight());
    assert!(second.can_commit());
    Ok(())
}

struct FailingStore;

#[async_trait]
impl StockStore for FailingStore {
    async fn resolve_batch(&self, label: &str) -> Result<BatchRef, StoreError> {
        Ok(BatchRef {
            id: "batch-x".into(),
            label: label.into(),
        })
    }

    async fn insert_stock(&self, _records: Vec<NewStockRecord>) -> Result<usize, StoreError> {
        Err(StoreError::Rejected("permission denied".into()))
    }
}

#[tokio::test]
async fn store_failure_is_one_aggregate_error() {
    let mut session = ready("type\nFS\nDO\n", "B1", "R1");
    let err = commit(&mut session, &FailingStore).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to upload stock: store rejected the batch: permission denied"
    );
    assert_eq!(session.rows().len(), 2);
    assert_eq!(session.batch_label(), "B1");
}

#[tokio::test]
async fn csv_store_appends_and_continues_ids() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stock.csv");

    let store = CsvFileStore::open(&path).await?;
    let mut session = ready(
        "type,smartcard_number,serial_number\nFull Set (FS),SC1,\"SN, 1\"\nDVS,SC2,SN2\n",
        "B1",
        "region-dsm",
    );
    commit(&mut session, &store).await?;
    drop(store);

    let store = CsvFileStore::open(&path).await?;
    let mut session = ready("type\nDecoder Only (DO)\n", "B2", "region-arusha");
    commit(&mut session, &store).await?;

    let written = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "stock_id,smartcard_number,serial_number,type,batch_id,region_id"
    );
    assert!(lines[1].starts_with("STK-000001,SC1,\"SN, 1\",Full Set (FS),batch-"));
    assert!(lines[1].ends_with(",region-dsm"));
    assert!(lines[3].starts_with("STK-000003,,,Decoder Only (DO),batch-"));
    assert!(lines[3].ends_with(",region-arusha"));
    Ok(())
}

#[tokio::test]
async fn csv_store_picks_up_existing_ids_and_smartcards() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stock.csv");
    let existing = "stock_id,smartcard_number,serial_number,type,batch_id,region_id\n\
STK-000010,SC9,\"SN\nwith a break\",DVS,batch-00000001,region-dsm\n\
STK-000004,SC4,,FS,batch-00000001,region-dsm\n";
    std::fs::write(&path, existing)?;

    let store = CsvFileStore::open(&path).await?;
    let mut clashing = ready("type,smartcard_number\nFS,SC5\nDO,SC9\n", "B3", "R1");
    let err = commit(&mut clashing, &store).await.unwrap_err();
    assert!(matches!(
        err,
        CommitError::Store(StoreError::DuplicateSmartcard(ref sc)) if sc == "SC9"
    ));
    assert_eq!(std::fs::read_to_string(&path)?, existing);
    assert_eq!(clashing.rows().len(), 2);

    let mut twice = ready("type,smartcard_number\nFS,SC7\nDO,SC7\n", "B3", "R1");
    assert!(commit(&mut twice, &store).await.is_err());
    assert_eq!(std::fs::read_to_string(&path)?, existing);

    let mut session = ready("type,smartcard_number\nFS,SC5\n", "B3", "R1");
    commit(&mut session, &store).await?;
    let written = std::fs::read_to_string(&path)?;
    let appended = written.strip_prefix(existing).expect("existing rows kept");
    assert!(appended.starts_with("STK-000011,SC5,,FS,batch-"));

    let mut again = ready("type,smartcard_number\nDO,SC5\n", "B3", "R1");
    assert!(commit(&mut again, &store).await.is_err());
    Ok(())
}

#[tokio::test]
async fn empty_stock_file_gets_a_header() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stock.csv");
    std::fs::write(&path, "")?;

    let store = CsvFileStore::open(&path).await?;
    let mut session = ready("type\nDVS\n", "B1", "R1");
    commit(&mut session, &store).await?;

    let written = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("STK-000001,,,DVS,"));
    Ok(())
}
