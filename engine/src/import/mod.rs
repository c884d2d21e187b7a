//! Import orchestration.
//!
//! ```text
//! ┌────────────┐    ┌────────────────────────────────────────┐    ┌──────────────┐
//! │ RowSource  │───▶│ Normalizer                             │───▶│ RecordWriter │
//! │ (per file) │    │ header ▶ pipeline ▶ decompose ▶ map    │    │ (policy)     │
//! └────────────┘    └────────────────────────────────────────┘    └──────────────┘
//!                                   │
//!                                   └─ skipped rows ─▶ ImportReport + log warnings
//! ```
//!
//! Files are processed one at a time, rows strictly in source order. Every file
//! gets a fresh [`RunState`]. Row problems never stop a file; a source error
//! stops the file, and rows already written stay written.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ImportError, ImportResult, RowError, SourceResult};
use crate::logs::{log_error, log_info, log_success, log_warning_indent};
use crate::models::RawRow;
use crate::normalize::{Normalizer, RowOutcome};
use crate::pipeline::RunState;
use crate::source::RowSource;
use crate::vendor::SourceFormat;
use crate::writer::{RecordWriter, WriteOutcome};

/// Per-run overrides of the profile's source format.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub encoding: Option<String>,
    pub delimiter: Option<char>,
}

impl ImportOptions {
    fn source_format(&self, base: &SourceFormat) -> SourceFormat {
        SourceFormat {
            delimiter: self.delimiter.unwrap_or(base.delimiter),
            encoding: self.encoding.clone().or_else(|| base.encoding.clone()),
            ..base.clone()
        }
    }
}

/// Counts for one imported file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub vendor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Non-blank rows read from the source.
    pub read: usize,
    pub blank: usize,
    /// Preamble rows and re-embedded headers.
    pub header: usize,
    /// Rows removed by a correction gate.
    pub dropped: usize,
    pub malformed: usize,
    /// Rows skipped because a step or enrichment failed.
    pub failed: usize,
    pub missing_id: usize,
    pub inserted: usize,
    /// Records the writer ignored under `ignore_on_conflict`.
    pub ignored: usize,
    #[serde(skip)]
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            ..Self::default()
        }
    }

    /// Rows that produced no record because of an error.
    pub fn skipped(&self) -> usize {
        self.malformed + self.failed + self.missing_id
    }

    fn record_error(&mut self, err: RowError) {
        match err {
            RowError::MalformedRow { .. } => self.malformed += 1,
            RowError::StepFailure { .. } => self.failed += 1,
            RowError::MissingMeasureId { .. } => self.missing_id += 1,
        }
        log_warning_indent(err.to_string(), 1);
        self.errors.push(err);
    }
}

/// Outcome of a batch of files.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<ImportReport>,
    /// Files that could not be read, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn inserted(&self) -> usize {
        self.files.iter().map(|r| r.inserted).sum()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().map(ImportReport::skipped).sum()
    }
}

/// Normalize and write one file's worth of rows.
///
/// `None` items are blank source lines. The first `header_rows` non-blank rows
/// of the profile's source format are skipped unconditionally.
pub fn import_rows<I, W>(normalizer: &Normalizer, rows: I, writer: &mut W) -> ImportResult<ImportReport>
where
    I: IntoIterator<Item = SourceResult<Option<RawRow>>>,
    W: RecordWriter + ?Sized,
{
    let profile = normalizer.profile();
    let mut report = ImportReport::new(profile.id.as_str());
    let mut state = RunState::new();
    let mut preamble = profile.source_format.header_rows;

    writer.set_natural_key(&profile.table, &profile.natural_key);

    for row in rows {
        let Some(row) = row? else {
            report.blank += 1;
            continue;
        };
        report.read += 1;

        if preamble > 0 {
            preamble -= 1;
            report.header += 1;
            continue;
        }

        match normalizer.process(row, &mut state) {
            RowOutcome::Record(record) => match writer.write(&record, profile.conflict_policy)? {
                WriteOutcome::Inserted => report.inserted += 1,
                WriteOutcome::Ignored => report.ignored += 1,
            },
            RowOutcome::Header => report.header += 1,
            RowOutcome::Dropped { .. } => report.dropped += 1,
            RowOutcome::Skipped(err) => report.record_error(err),
        }
    }

    writer.flush()?;
    Ok(report)
}

/// Import one file with the normalizer's vendor profile.
pub fn import_file<W>(
    normalizer: &Normalizer,
    path: &Path,
    writer: &mut W,
    options: &ImportOptions,
) -> ImportResult<ImportReport>
where
    W: RecordWriter + ?Sized,
{
    let format = options.source_format(&normalizer.profile().source_format);
    let source = RowSource::from_path(path, &format)?;
    let encoding = source.encoding();

    log_info(format!("{} → {} ({})", path.display(), normalizer.table(), encoding));

    let mut report = import_rows(normalizer, source, writer)?;
    report.file = Some(path.to_path_buf());
    report.encoding = Some(encoding.to_string());

    log_success(format!(
        "{}: {} inserted, {} ignored, {} dropped, {} skipped",
        path.display(),
        report.inserted,
        report.ignored,
        report.dropped,
        report.skipped()
    ));
    Ok(report)
}

/// Import files one after another.
///
/// A file that cannot be read is recorded and the batch moves on. Writer
/// errors abort the batch.
pub fn import_files<W, P>(
    normalizer: &Normalizer,
    paths: &[P],
    writer: &mut W,
    options: &ImportOptions,
) -> ImportResult<BatchReport>
where
    W: RecordWriter + ?Sized,
    P: AsRef<Path>,
{
    let mut batch = BatchReport::default();
    for path in paths {
        let path = path.as_ref();
        match import_file(normalizer, path, writer, options) {
            Ok(report) => batch.files.push(report),
            Err(ImportError::Source(err)) => {
                log_error(format!("{}: {}", path.display(), err));
                batch.failed.push((path.to_path_buf(), err.to_string()));
            }
            Err(other) => return Err(other),
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, StepError};
    use crate::logs::set_quiet;
    use crate::models::FieldValue;
    use crate::vendor::VendorProfile;
    use crate::writer::MemoryWriter;

    const PROFILE: &str = r#"{
        "id": "measure_test",
        "table": "measure_test",
        "header_sentinels": ["ID"],
        "min_fields": 2,
        "conflict_policy": "ignore_on_conflict",
        "tracking": { "field": 1 },
        "corrections": [
            { "order": 1, "name": "test_measure_01_dropTest", "rule": "drop_when",
              "when": [{ "if": "equals", "field": 0, "value": "TEST" }] }
        ],
        "columns": [
            { "column": "order_id", "field": 0 },
            { "column": "measure_id", "tracking": "measure_id" }
        ]
    }"#;

    fn normalizer() -> Normalizer {
        set_quiet(true);
        VendorProfile::from_json(PROFILE).unwrap().compile().unwrap()
    }

    fn rows(data: &[&[&str]]) -> Vec<SourceResult<Option<RawRow>>> {
        data.iter()
            .enumerate()
            .map(|(i, fields)| {
                let row = RawRow::new(i as u64 + 1, fields.iter().map(|s| s.to_string()).collect());
                Ok(if row.is_blank() { None } else { Some(row) })
            })
            .collect()
    }

    #[test]
    fn test_counts_every_outcome() {
        let n = normalizer();
        let mut writer = MemoryWriter::new();
        let input = rows(&[
            &["ID", "トラッキング"],
            &["1", "m1_TCLICK_t"],
            &["", ""],
            &["TEST", "m2"],
            &["2"],
            &["1", "m1_TCLICK_t"],
            &["ID", "トラッキング"],
            &["3", "m3"],
        ]);

        let report = import_rows(&n, input, &mut writer).unwrap();

        assert_eq!(report.read, 7);
        assert_eq!(report.blank, 1);
        assert_eq!(report.header, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.ignored, 1);
        assert_eq!(report.errors[0].line(), 5);

        let records = writer.records("measure_test");
        assert_eq!(records[1].get("measure_id"), Some(&FieldValue::Text("m3".into())));
    }

    #[test]
    fn test_failing_step_skips_only_that_row() {
        let n = normalizer()
            .with_steps(vec![crate::pipeline::Step::mutator(2, "test_measure_02_explode", |row, _| {
                if row.field(0) == "boom" {
                    Err(StepError::new("test_measure_02_explode", "cannot fix row"))
                } else {
                    Ok(())
                }
            })])
            .unwrap();
        let mut writer = MemoryWriter::new();

        let report = import_rows(&n, rows(&[&["boom", "m"], &["ok", "m"]]), &mut writer).unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(writer.records("measure_test")[0].get_str("order_id"), Some("ok"));
    }

    #[test]
    fn test_header_rows_preamble() {
        let mut profile = VendorProfile::from_json(PROFILE).unwrap();
        profile.source_format.header_rows = 1;
        let n = profile.compile().unwrap();
        let mut writer = MemoryWriter::new();

        let report = import_rows(&n, rows(&[&["", ""], &["集計", "x"], &["1", "m"]]), &mut writer).unwrap();
        assert_eq!(report.header, 1);
        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn test_source_error_stops_file_keeps_written_rows() {
        let n = normalizer();
        let mut writer = MemoryWriter::new();
        let mut input = rows(&[&["1", "m"]]);
        input.push(Err(SourceError::Csv { line: 2, message: "bad quote".into() }));
        input.extend(rows(&[&["9", "m"]]));

        let err = import_rows(&n, input, &mut writer).unwrap_err();
        assert!(matches!(err, ImportError::Source(_)));
        assert_eq!(writer.records("measure_test").len(), 1);
    }

    #[test]
    fn test_unreadable_file_recorded_in_batch() {
        let n = normalizer();
        let mut writer = MemoryWriter::new();
        let batch = import_files(&n, &["/nonexistent/affnorm/x.csv"], &mut writer, &ImportOptions::default()).unwrap();
        assert!(batch.files.is_empty());
        assert_eq!(batch.failed.len(), 1);
    }
}
