//! Row source: decode a vendor export and tokenize it into raw rows.
//!
//! ```text
//! bytes ─▶ detect / decode (encoding_rs) ─▶ csv::Reader ─▶ Option<RawRow> per record
//!                                                          (None = blank line)
//! ```
//!
//! Exports arrive as CP932 (Shift_JIS with vendor extensions) or UTF-8, with or
//! without a byte-order mark. The reader never treats the first record as a
//! header: re-embedded headers are recognized later through the vendor's
//! header sentinels, and fixed preambles through `header_rows`.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use encoding_rs::Encoding;

use crate::error::{SourceError, SourceResult};
use crate::models::RawRow;
use crate::vendor::SourceFormat;

const BOM: char = '\u{feff}';

/// Map a charset label to an `encoding_rs` encoding.
///
/// Accepts the WHATWG labels plus the Windows/PHP spellings used for Japanese
/// exports (`cp932`, `sjis-win`, `ms932`).
pub fn encoding_for(label: &str) -> Option<&'static Encoding> {
    let normalized = label.trim().to_lowercase();
    let label = match normalized.as_str() {
        "cp932" | "sjis-win" | "ms932" | "sjis" | "shift-jis" | "x-sjis" => "windows-31j",
        "utf8" => "utf-8",
        "latin-1" | "latin1" => "iso-8859-1",
        "cp1252" => "windows-1252",
        other => other,
    };
    Encoding::for_label(label.as_bytes())
}

/// Detect the encoding of raw bytes.
///
/// Valid UTF-8 wins outright; otherwise `chardet` guesses and its answer is
/// normalized. Japanese exports that chardet cannot place fall back to Shift_JIS.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if std::str::from_utf8(bytes).is_ok() {
        return encoding_rs::UTF_8;
    }
    let (charset, _confidence, _language) = chardet::detect(bytes);
    match charset.to_lowercase().as_str() {
        "" | "ascii" => encoding_rs::SHIFT_JIS,
        other => encoding_for(other).unwrap_or(encoding_rs::SHIFT_JIS),
    }
}

/// Decode bytes to UTF-8 text.
///
/// `encoding` of `None` means detect. A leading byte-order mark is removed.
/// Undecodable sequences become U+FFFD rather than failing the file.
pub fn decode_content(bytes: &[u8], encoding: Option<&str>) -> SourceResult<(String, &'static Encoding)> {
    let encoding = match encoding {
        Some(label) => encoding_for(label).ok_or_else(|| SourceError::Encoding(label.to_string()))?,
        None => detect_encoding(bytes),
    };
    let (text, used, _had_errors) = encoding.decode(bytes);
    let text = text.strip_prefix(BOM).map(str::to_string).unwrap_or_else(|| text.into_owned());
    Ok((text, used))
}

fn delimiter_byte(delimiter: char) -> SourceResult<u8> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(SourceError::InvalidDelimiter(delimiter))
    }
}

// =============================================================================
// Row Source
// =============================================================================

/// Lazy, single-pass sequence of raw rows from one file.
pub struct RowSource<R: Read> {
    reader: csv::Reader<R>,
    record: csv::StringRecord,
    encoding: &'static str,
    first: bool,
}

impl RowSource<Cursor<Vec<u8>>> {
    /// Read, decode and tokenize a file.
    pub fn from_path(path: &Path, format: &SourceFormat) -> SourceResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, format)
    }

    /// Decode and tokenize an in-memory export.
    pub fn from_bytes(bytes: &[u8], format: &SourceFormat) -> SourceResult<Self> {
        let (text, encoding) = decode_content(bytes, format.encoding.as_deref())?;
        let mut source = Self::from_reader(Cursor::new(text.into_bytes()), format.delimiter)?;
        source.encoding = encoding.name();
        Ok(source)
    }
}

impl<R: Read> RowSource<R> {
    /// Tokenize an already-decoded UTF-8 stream.
    pub fn from_reader(reader: R, delimiter: char) -> SourceResult<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter_byte(delimiter)?)
            .from_reader(reader);
        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            encoding: encoding_rs::UTF_8.name(),
            first: true,
        })
    }

    /// Name of the encoding the content was decoded from.
    pub fn encoding(&self) -> &'static str {
        self.encoding
    }
}

impl<R: Read> Iterator for RowSource<R> {
    type Item = SourceResult<Option<RawRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                let mut fields: Vec<String> = self.record.iter().map(str::to_string).collect();
                if std::mem::take(&mut self.first) {
                    if let Some(first) = fields.first_mut() {
                        if let Some(stripped) = first.strip_prefix(BOM) {
                            *first = stripped.to_string();
                        }
                    }
                }
                let row = RawRow::new(line, fields);
                Some(Ok(if row.is_blank() { None } else { Some(row) }))
            }
        }
    }
}

/// Read every row of a file. Blank rows are dropped.
pub fn read_rows(path: &Path, format: &SourceFormat) -> SourceResult<Vec<RawRow>> {
    RowSource::from_path(path, format)?
        .filter_map(Result::transpose)
        .collect()
}
