use std::collections::BTreeMap;
use std::fmt;

/// Normalized column names recognised by the stock upload.
///
/// Anything else lands in `Extra` so unexpected columns survive a round trip
/// through the editor without being dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnKey {
    StockId,
    Type,
    SmartcardNumber,
    Smartcard,
    SmartcardNo,
    SerialNumber,
    SerialNo,
    Sn,
    Serial,
    Region,
    Extra(String),
}

impl ColumnKey {
    /// Normalize a raw header cell and map it onto a known column.
    /// "Smartcard Number" -> `SmartcardNumber`, "Batch  Notes" -> `Extra("batch_notes")`.
    pub fn parse(raw: &str) -> Self {
        let normalized = normalize_header(raw);
        match normalized.as_str() {
            "stock_id" => Self::StockId,
            "type" => Self::Type,
            "smartcard_number" => Self::SmartcardNumber,
            "smartcard" => Self::Smartcard,
            "smartcard_no" => Self::SmartcardNo,
            "serial_number" => Self::SerialNumber,
            "serial_no" => Self::SerialNo,
            "sn" => Self::Sn,
            "serial" => Self::Serial,
            "region" => Self::Region,
            _ => Self::Extra(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StockId => "stock_id",
            Self::Type => "type",
            Self::SmartcardNumber => "smartcard_number",
            Self::Smartcard => "smartcard",
            Self::SmartcardNo => "smartcard_no",
            Self::SerialNumber => "serial_number",
            Self::SerialNo => "serial_no",
            Self::Sn => "sn",
            Self::Serial => "serial",
            Self::Region => "region",
            Self::Extra(name) => name,
        }
    }

    /// Values for this column are assigned by the store at commit time.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::StockId)
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case, trim, and collapse every whitespace run into a single `_`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_gap = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            pending_gap = true;
            continue;
        }
        if pending_gap {
            out.push('_');
            pending_gap = false;
        }
        out.extend(ch.to_lowercase());
    }
    out
}

/// Column order as it appeared in the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    columns: Vec<ColumnKey>,
}

impl Header {
    pub fn new(columns: Vec<ColumnKey>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn contains(&self, column: &ColumnKey) -> bool {
        self.columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Comma-joined names, as shown in the "Detected columns" line.
    pub fn describe(&self) -> String {
        self.columns
            .iter()
            .map(ColumnKey::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One staged data row.
///
/// Holds a value for every header column (missing trailing fields are empty
/// strings) plus the 1-based line number the row came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    source_row: usize,
    fields: BTreeMap<ColumnKey, String>,
}

impl RawRecord {
    /// Pair header columns with values, padding short rows.
    pub fn from_values(source_row: usize, header: &Header, values: Vec<String>) -> Self {
        let mut values = values.into_iter();
        let fields = header
            .columns()
            .iter()
            .map(|col| (col.clone(), values.next().unwrap_or_default()))
            .collect();
        Self { source_row, fields }
    }

    /// 1-based position in the original file (header is row 1).
    pub fn source_row(&self) -> usize {
        self.source_row
    }

    pub fn get(&self, column: &ColumnKey) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Replace a value in place. Returns `false` if the column is not part of this row.
    pub(crate) fn set(&mut self, column: &ColumnKey, value: String) -> bool {
        match self.fields.get_mut(column) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&ColumnKey, &str)> {
        self.fields.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Whether the column is absent or holds only whitespace.
    pub fn is_blank(&self, column: &ColumnKey) -> bool {
        self.get(column).map_or(true, |v| v.trim().is_empty())
    }

    pub fn stock_type_label(&self) -> Option<&str> {
        self.non_blank(&ColumnKey::Type)
    }

    pub fn smartcard_number(&self) -> Option<&str> {
        [
            ColumnKey::SmartcardNumber,
            ColumnKey::Smartcard,
            ColumnKey::SmartcardNo,
        ]
        .iter()
        .find_map(|c| self.non_blank(c))
    }

    pub fn serial_number(&self) -> Option<&str> {
        [
            ColumnKey::SerialNumber,
            ColumnKey::SerialNo,
            ColumnKey::Sn,
            ColumnKey::Serial,
        ]
        .iter()
        .find_map(|c| self.non_blank(c))
    }

    fn non_blank(&self, column: &ColumnKey) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Stock categories tracked by the inventory dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StockType {
    FullSet,
    DecoderOnly,
    Dvs,
}

impl StockType {
    pub fn label(self) -> &'static str {
        match self {
            Self::FullSet => "Full Set (FS)",
            Self::DecoderOnly => "Decoder Only (DO)",
            Self::Dvs => "DVS",
        }
    }

    /// Exact, case-insensitive match on the accepted labels and their
    /// abbreviations. Used where an unknown label must be rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "fs" | "full set" | "full set (fs)" => Some(Self::FullSet),
            "do" | "decoder" | "decoder only" | "decoder only (do)" => Some(Self::DecoderOnly),
            "dvs" => Some(Self::Dvs),
            _ => None,
        }
    }

    /// Lenient match on operator-entered labels ("fs", "Decoder Only (DO)", "dvs").
    pub fn classify(label: &str) -> Option<Self> {
        let upper = label.trim().to_uppercase();
        if upper.is_empty() {
            return None;
        }
        if upper.contains("DVS") {
            Some(Self::Dvs)
        } else if upper.contains("DECODER") || upper.contains("DO") {
            Some(Self::DecoderOnly)
        } else if upper.contains("FULL SET") || upper.contains("FS") {
            Some(Self::FullSet)
        } else {
            None
        }
    }
}

impl fmt::Display for StockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
