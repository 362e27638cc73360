//! Lazy record reader over a buffered source.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::AppError;

use super::schema::{Layout, Record, RecordSchema};
use super::ErrorPolicy;

/// A line dropped under [`ErrorPolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

/// Field position after header names are resolved.
#[derive(Debug, Clone)]
enum Position {
    Index(usize),
    Range { start: usize, width: usize },
}

#[derive(Debug, Clone)]
struct ResolvedField {
    name: String,
    position: Position,
    required: bool,
}

/// Iterator of records from one source file.
///
/// With [`ErrorPolicy::Abort`] the first malformed line is yielded as an
/// error and iteration stops. With [`ErrorPolicy::Skip`] malformed lines are
/// logged and collected in [`skipped`](Self::skipped). Lines that are not
/// valid UTF-8 follow the same policy. I/O errors always stop iteration.
pub struct RecordReader<R> {
    source_name: String,
    schema: RecordSchema,
    policy: ErrorPolicy,
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    fields: Option<Vec<ResolvedField>>,
    header_pending: bool,
    skipped: Vec<SkippedLine>,
    done: bool,
}

impl RecordReader<BufReader<File>> {
    /// Opens `path` for reading.
    pub fn open(
        path: &Path,
        schema: RecordSchema,
        policy: ErrorPolicy,
    ) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| AppError::io(path, e))?;
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(BufReader::new(file), source_name, schema, policy))
    }
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(
        reader: R,
        source_name: impl Into<String>,
        schema: RecordSchema,
        policy: ErrorPolicy,
    ) -> Self {
        // Index-addressed schemas resolve immediately; header-addressed ones on the header line.
        let fields = if schema.fields.iter().any(|f| f.column.is_some()) {
            None
        } else {
            Some(resolve_positions(&schema))
        };

        Self {
            source_name: source_name.into(),
            header_pending: schema.skip_header,
            schema,
            policy,
            reader,
            buf: Vec::new(),
            line_no: 0,
            fields,
            skipped: Vec::new(),
            done: false,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Lines skipped so far, in line order.
    pub fn skipped(&self) -> &[SkippedLine] {
        &self.skipped
    }

    pub fn into_skipped(self) -> Vec<SkippedLine> {
        self.skipped
    }

    fn parse_error(&self, message: String) -> AppError {
        AppError::Parse {
            source_name: self.source_name.clone(),
            line: self.line_no,
            message,
        }
    }

    /// Reads the next raw line into `buf`. Returns false at end of input.
    fn read_line(&mut self) -> Result<bool, AppError> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| AppError::io(&self.source_name, e))?;
        Ok(read > 0)
    }

    /// Handles a malformed line per the error policy. Returns the error to
    /// yield when iteration must stop.
    fn reject(&mut self, reason: String) -> Option<AppError> {
        match self.policy {
            ErrorPolicy::Abort => {
                self.done = true;
                Some(self.parse_error(reason))
            }
            ErrorPolicy::Skip => {
                tracing::warn!(
                    source = %self.source_name,
                    line = self.line_no,
                    "Skipping malformed line: {}",
                    reason
                );
                self.skipped.push(SkippedLine {
                    line: self.line_no,
                    reason,
                });
                None
            }
        }
    }

    /// Reads the header line and maps named columns to indices.
    fn read_header(&mut self, text: &str) -> Result<(), AppError> {
        let columns = split_line(&self.schema.layout, text).map_err(|e| self.parse_error(e))?;
        let mut resolved = Vec::with_capacity(self.schema.fields.len());
        for field in &self.schema.fields {
            let position = match (&field.column, field.index) {
                (Some(column), _) => {
                    let index = columns
                        .iter()
                        .position(|c| c.trim() == column.as_str())
                        .ok_or_else(|| {
                            self.parse_error(format!("header has no column '{}'", column))
                        })?;
                    Position::Index(index)
                }
                (None, Some(index)) => Position::Index(index),
                (None, None) => Position::Range {
                    start: field.start.unwrap_or(0),
                    width: field.width.unwrap_or(0),
                },
            };
            resolved.push(ResolvedField {
                name: field.name.clone(),
                position,
                required: field.required,
            });
        }
        self.fields = Some(resolved);
        Ok(())
    }

    fn parse_record(&self, text: &str) -> Result<Record, String> {
        let fields = self.fields.as_deref().unwrap_or_default();
        let mut values = HashMap::with_capacity(fields.len());

        match &self.schema.layout {
            Layout::Delimited { .. } => {
                let columns = split_line(&self.schema.layout, text)?;
                let needed = match self.schema.expected_columns {
                    Some(expected) if columns.len() != expected => {
                        return Err(format!(
                            "expected {} columns, found {}",
                            expected,
                            columns.len()
                        ));
                    }
                    Some(expected) => expected,
                    None => fields
                        .iter()
                        .filter_map(|f| match f.position {
                            Position::Index(i) => Some(i + 1),
                            Position::Range { .. } => None,
                        })
                        .max()
                        .unwrap_or(0),
                };
                if columns.len() < needed {
                    return Err(format!(
                        "expected at least {} columns, found {}",
                        needed,
                        columns.len()
                    ));
                }
                for field in fields {
                    if let Position::Index(i) = field.position {
                        values.insert(field.name.clone(), columns[i].trim().to_string());
                    }
                }
            }
            Layout::FixedWidth => {
                let chars: Vec<char> = text.chars().collect();
                for field in fields {
                    if let Position::Range { start, width } = field.position {
                        if start >= chars.len() && field.required {
                            return Err(format!(
                                "line has {} characters, field '{}' starts at {}",
                                chars.len(),
                                field.name,
                                start
                            ));
                        }
                        let end = (start + width).min(chars.len());
                        let value: String = chars
                            .get(start.min(chars.len())..end)
                            .map(|s| s.iter().collect())
                            .unwrap_or_default();
                        values.insert(field.name.clone(), value.trim().to_string());
                    }
                }
            }
        }

        for field in fields.iter().filter(|f| f.required) {
            if values.get(&field.name).map_or(true, |v| v.is_empty()) {
                return Err(format!("required field '{}' is empty", field.name));
            }
        }

        Ok(Record::new(self.line_no, values))
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<Record, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.read_line() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            self.line_no += 1;

            let text = match String::from_utf8(std::mem::take(&mut self.buf)) {
                Ok(text) => text,
                Err(e) => {
                    let reason = format!(
                        "invalid UTF-8 at byte {}",
                        e.utf8_error().valid_up_to()
                    );
                    match self.reject(reason) {
                        Some(err) => return Some(Err(err)),
                        None => continue,
                    }
                }
            };

            // UTF-8 BOM on the first line
            let text = if self.line_no == 1 {
                text.trim_start_matches('\u{feff}')
            } else {
                text.as_str()
            };
            let content = text.trim_end_matches('\n').trim_end_matches('\r');

            if content.trim().is_empty() {
                continue;
            }
            if let Some(prefix) = &self.schema.comment_prefix {
                if content.trim_start().starts_with(prefix.as_str()) {
                    continue;
                }
            }

            if self.header_pending {
                self.header_pending = false;
                if self.fields.is_none() {
                    if let Err(e) = self.read_header(content) {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            match self.parse_record(content) {
                Ok(record) => return Some(Ok(record)),
                Err(reason) => {
                    if let Some(err) = self.reject(reason) {
                        return Some(Err(err));
                    }
                }
            }
        }
    }
}

fn resolve_positions(schema: &RecordSchema) -> Vec<ResolvedField> {
    schema
        .fields
        .iter()
        .map(|field| ResolvedField {
            name: field.name.clone(),
            position: match field.index {
                Some(index) => Position::Index(index),
                None => Position::Range {
                    start: field.start.unwrap_or(0),
                    width: field.width.unwrap_or(0),
                },
            },
            required: field.required,
        })
        .collect()
}

/// Splits a line per the layout. Fixed-width lines are one column.
fn split_line(layout: &Layout, line: &str) -> Result<Vec<String>, String> {
    match layout {
        Layout::FixedWidth => Ok(vec![line.to_string()]),
        Layout::Delimited {
            delimiter,
            quote: None,
        } => Ok(line.split(*delimiter).map(str::to_string).collect()),
        Layout::Delimited {
            delimiter,
            quote: Some(quote),
        } => split_quoted(line, *delimiter, *quote),
    }
}

fn split_quoted(line: &str, delimiter: char, quote: char) -> Result<Vec<String>, String> {
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == quote {
                if chars.peek() == Some(&quote) {
                    current.push(quote);
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == quote {
            in_quotes = true;
        } else if c == delimiter {
            columns.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    columns.push(current);
    Ok(columns)
}
