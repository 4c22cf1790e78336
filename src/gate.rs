use thiserror::Error;

/// Everything the gate looks at, detached from the session that owns it.
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub row_count: usize,
    pub batch_label: &'a str,
    pub partition_key: &'a str,
    pub error_count: usize,
    pub commit_in_flight: bool,
}

/// The first unmet precondition, in the order the operator is told about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateBlock {
    #[error("Uploading... Please wait.")]
    CommitInFlight,
    #[error("Upload a CSV file to enable Complete Upload.")]
    NoRows,
    #[error("Enter a batch number to enable Complete Upload.")]
    MissingBatchLabel,
    #[error("Select a region to enable Complete Upload.")]
    MissingPartitionKey,
    #[error("Fix CSV errors before uploading ({0} outstanding).")]
    OutstandingErrors(usize),
}

/// Commit is allowed iff rows are staged, the batch label and partition key
/// are non-blank, no validation errors remain and nothing is in flight.
pub fn evaluate(inputs: GateInputs<'_>) -> Result<(), GateBlock> {
    if inputs.commit_in_flight {
        return Err(GateBlock::CommitInFlight);
    }
    if inputs.row_count == 0 {
        return Err(GateBlock::NoRows);
    }
    if inputs.batch_label.trim().is_empty() {
        return Err(GateBlock::MissingBatchLabel);
    }
    if inputs.partition_key.trim().is_empty() {
        return Err(GateBlock::MissingPartitionKey);
    }
    if inputs.error_count > 0 {
        return Err(GateBlock::OutstandingErrors(inputs.error_count));
    }
    Ok(())
}

pub fn is_open(inputs: GateInputs<'_>) -> bool {
    evaluate(inputs).is_ok()
}
