use crate::schema::{ColumnKey, Header, RawRecord, StockType};
use std::fmt;

/// Which columns must exist and which must be filled on every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub required_columns: Vec<ColumnKey>,
    pub required_fields: Vec<ColumnKey>,
    /// Also reject `type` values that are not a known stock category.
    pub strict_types: bool,
}

impl ValidationPolicy {
    /// Bulk upload: identifiers are assigned on commit, only `type` is required.
    pub fn upload() -> Self {
        Self {
            required_columns: vec![ColumnKey::Type],
            required_fields: vec![ColumnKey::Type],
            strict_types: false,
        }
    }

    /// Re-import of previously exported stock, where `stock_id` must be carried.
    pub fn with_stock_id() -> Self {
        Self {
            required_columns: vec![ColumnKey::StockId, ColumnKey::Type],
            required_fields: vec![ColumnKey::StockId, ColumnKey::Type],
            strict_types: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict_types = true;
        self
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::upload()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    MissingColumns(Vec<ColumnKey>),
    MissingField(ColumnKey),
    UnrecognizedType(String),
}

/// A single reason the batch cannot be committed.
///
/// `row` is `None` for schema errors, which concern the header as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub row: Option<usize>,
    pub kind: ErrorKind,
}

impl ValidationError {
    /// True when this error should highlight the given cell.
    pub fn flags_cell(&self, row: usize, column: &ColumnKey) -> bool {
        if self.row != Some(row) {
            return false;
        }
        match &self.kind {
            ErrorKind::MissingField(c) => c == column,
            ErrorKind::UnrecognizedType(_) => *column == ColumnKey::Type,
            ErrorKind::MissingColumns(_) => false,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(row) = self.row {
            write!(f, "Row {row}: ")?;
        }
        match &self.kind {
            ErrorKind::MissingColumns(cols) => {
                let names: Vec<&str> = cols.iter().map(ColumnKey::as_str).collect();
                write!(f, "Missing required columns: {}", names.join(", "))
            }
            ErrorKind::MissingField(col) => write!(f, "missing {col}"),
            ErrorKind::UnrecognizedType(label) => write!(f, "unrecognized type '{label}'"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check the header against the policy, then every row in order.
///
/// Pure: the same input always yields the same list, and callers replace
/// their stored list with the result rather than appending to it.
pub fn validate(
    header: &Header,
    rows: &[RawRecord],
    policy: &ValidationPolicy,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let missing: Vec<ColumnKey> = policy
        .required_columns
        .iter()
        .filter(|c| !header.contains(c))
        .cloned()
        .collect();
    if !missing.is_empty() {
        errors.push(ValidationError {
            row: None,
            kind: ErrorKind::MissingColumns(missing),
        });
    }

    for (idx, record) in rows.iter().enumerate() {
        let row = idx + 2;
        for field in &policy.required_fields {
            if record.is_blank(field) {
                errors.push(ValidationError {
                    row: Some(row),
                    kind: ErrorKind::MissingField(field.clone()),
                });
            }
        }
        if policy.strict_types {
            if let Some(label) = record.stock_type_label() {
                if StockType::from_label(label).is_none() {
                    errors.push(ValidationError {
                        row: Some(row),
                        kind: ErrorKind::UnrecognizedType(label.to_string()),
                    });
                }
            }
        }
    }

    log::debug!(
        "validated {} rows: {} error(s)",
        rows.len(),
        errors.len()
    );
    errors
}

/// Errors belonging to one 1-based row, for the row tooltip.
pub fn errors_for_row(errors: &[ValidationError], row: usize) -> Vec<&ValidationError> {
    errors.iter().filter(|e| e.row == Some(row)).collect()
}

/// Whether a cell should be highlighted in the preview grid.
pub fn is_cell_flagged(errors: &[ValidationError], row: usize, column: &ColumnKey) -> bool {
    errors.iter().any(|e| e.flags_cell(row, column))
}
