use crate::schema::{ColumnKey, Header, RawRecord};
use std::collections::HashSet;
use thiserror::Error;

/// Reasons a whole file is rejected. No partial batch is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("file is empty")]
    Empty,
    #[error("header row has no column names")]
    EmptyHeader,
    #[error("duplicate column '{0}' in header")]
    DuplicateColumn(String),
    #[error("row {row}: unterminated quoted field")]
    UnterminatedQuote { row: usize },
    #[error("file is not valid text: {0}")]
    Encoding(String),
    #[error("could not read file: {0}")]
    Unreadable(String),
}

/// Output of a successful ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCsv {
    pub header: Header,
    pub rows: Vec<RawRecord>,
}

/// Split one line on commas that sit outside double quotes.
///
/// Quotes delimit fields and are not kept; `""` inside a quoted field is a
/// literal quote. Fields are trimmed, which also drops a trailing `\r`.
/// Returns `None` when a quote is still open at the end of the line.
pub fn parse_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return None;
    }
    fields.push(current.trim().to_string());
    Some(fields)
}

/// Turn a whole file into a normalized header and one record per data line.
///
/// Blank lines are dropped before numbering: the header is row 1 and the
/// n-th data row (0-based) is row n + 2.
pub fn ingest(text: &str) -> Result<ParsedCsv, ParseError> {
    let lines: Vec<&str> = text
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect();

    let (header_line, body) = lines.split_first().ok_or(ParseError::Empty)?;
    let header_cells =
        parse_line(header_line).ok_or(ParseError::UnterminatedQuote { row: 1 })?;
    if header_cells.iter().all(|c| c.is_empty()) {
        return Err(ParseError::EmptyHeader);
    }

    let mut seen = HashSet::with_capacity(header_cells.len());
    let mut columns = Vec::with_capacity(header_cells.len());
    for (idx, cell) in header_cells.iter().enumerate() {
        // Unnamed cells (e.g. trailing commas from a spreadsheet export) are
        // kept by position so their values still line up.
        let key = if cell.is_empty() {
            ColumnKey::Extra(format!("column_{}", idx + 1))
        } else {
            ColumnKey::parse(cell)
        };
        if !seen.insert(key.clone()) {
            return Err(ParseError::DuplicateColumn(key.to_string()));
        }
        columns.push(key);
    }
    let header = Header::new(columns);

    let rows = body
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let row = idx + 2;
            parse_line(line)
                .map(|values| RawRecord::from_values(row, &header, values))
                .ok_or(ParseError::UnterminatedQuote { row })
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "parsed {} rows with columns [{}]",
        rows.len(),
        header.describe()
    );
    Ok(ParsedCsv { header, rows })
}
