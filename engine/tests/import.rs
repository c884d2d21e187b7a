//! End-to-end imports through real files and writers.

use std::fs;
use std::path::{Path, PathBuf};

use affnorm::logs::set_quiet;
use affnorm::{
    builtin_ids, import_file, import_files, validate_profile, FieldValue, ImportOptions, JsonLinesWriter,
    MemoryWriter, Normalizer, VendorProfile,
};
use serde_json::Value;
use tempfile::{tempdir, TempDir};

const AFB_ROW: [&str; 18] = [
    "A001",
    "prog",
    "2025/01/01 10:00:00",
    "2025/01/02 11:00:00",
    "",
    "pgid",
    "pgname",
    "site",
    "URL",
    "1,000",
    "confirmed",
    "pb1",
    "ord1",
    "2,000",
    "ad1",
    "pc",
    "ref",
    "A001_TCLICK_T9_YCLID_C1_UTMC_U1",
];

const SALES_PROFILE: &str = r#"{
    "id": "sales_test",
    "table": "sales_test",
    "header_sentinels": ["注文番号"],
    "min_fields": 3,
    "conflict_policy": "ignore_on_conflict",
    "natural_key": ["order_id"],
    "tracking": { "field": 2 },
    "columns": [
        { "column": "order_id", "field": 0 },
        { "column": "sales", "field": 1, "as": "int" },
        { "column": "measure_id", "tracking": "measure_id" }
    ]
}"#;

fn afb() -> Normalizer {
    set_quiet(true);
    VendorProfile::builtin("measure_afb").unwrap().compile().unwrap()
}

fn csv_line(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains(',') {
                format!("\"{}\"", f)
            } else {
                f.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn write_file(dir: &TempDir, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn read_jsonl(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_afb_row_end_to_end() {
    let dir = tempdir().unwrap();
    let header = csv_line(&["番号", "クリック日時", "発生日時", "確定日時"]);
    let content = format!("{}\n{}\n", header, csv_line(&AFB_ROW));
    let file = write_file(&dir, "afb_measure.csv", content);

    let normalizer = afb();
    let mut writer = MemoryWriter::new();
    let report = import_file(&normalizer, &file, &mut writer, &ImportOptions::default()).unwrap();

    assert_eq!(report.header, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped(), 0);

    let record = &writer.records("measure_afb")[0];
    assert_eq!(record.get_str("keyword"), Some("A001"));
    assert_eq!(record.get_str("tclick"), Some("T9"));
    assert_eq!(record.get_str("gclid"), Some("C1"));
    assert_eq!(record.get_str("utm_content"), Some("U1"));
    assert_eq!(record.get("reward"), Some(&FieldValue::Int(1000)));
    assert_eq!(record.get("occur_time"), Some(&FieldValue::DateTime("2025-01-01 10:00:00".into())));
    assert_eq!(record.get("fix_time"), Some(&FieldValue::DateTime("2025-01-02 11:00:00".into())));
    assert_eq!(record.get("click_time"), Some(&FieldValue::Null));
    assert_eq!(record.get("useragent"), Some(&FieldValue::Null));
}

#[test]
fn test_short_afb_row_reads_missing_fields_as_absent() {
    let dir = tempdir().unwrap();
    let file = write_file(&dir, "afb_measure.csv", csv_line(&AFB_ROW[..17]));

    let mut writer = MemoryWriter::new();
    let report = import_file(&afb(), &file, &mut writer, &ImportOptions::default()).unwrap();

    assert_eq!(report.malformed, 0);
    assert_eq!(report.inserted, 1);

    let record = &writer.records("measure_afb")[0];
    assert_eq!(record.get("keyword"), Some(&FieldValue::Null));
    assert_eq!(record.get("tclick"), Some(&FieldValue::Null));
    assert_eq!(record.get("useragent"), Some(&FieldValue::Null));
    assert_eq!(record.get("reward"), Some(&FieldValue::Int(1000)));
}

#[test]
fn test_header_only_file_writes_nothing() {
    let dir = tempdir().unwrap();
    let mut header = AFB_ROW;
    header[0] = "番号";
    let file = write_file(&dir, "afb_measure.csv", csv_line(&header));

    let out = tempdir().unwrap();
    let mut writer = JsonLinesWriter::new(out.path());
    let report = import_file(&afb(), &file, &mut writer, &ImportOptions::default()).unwrap();

    assert_eq!(report.header, 1);
    assert_eq!(report.inserted, 0);
    assert!(!writer.table_path("measure_afb").exists());
}

#[test]
fn test_ignore_on_conflict_across_runs() {
    set_quiet(true);
    let dir = tempdir().unwrap();
    let out = tempdir().unwrap();
    let file = write_file(&dir, "sales.csv", "注文番号,売上,計測\nO1,\"1,200\",m1\nO2,300,m2\nO1,999,m1\n");
    let normalizer = VendorProfile::from_json(SALES_PROFILE).unwrap().compile().unwrap();

    {
        let mut writer = JsonLinesWriter::new(out.path());
        let report = import_file(&normalizer, &file, &mut writer, &ImportOptions::default()).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.ignored, 1);
    }

    let mut writer = JsonLinesWriter::new(out.path());
    let report = import_file(&normalizer, &file, &mut writer, &ImportOptions::default()).unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.ignored, 3);
    drop(writer);

    let rows = read_jsonl(&out.path().join("sales_test.jsonl"));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["order_id"], "O1");
    assert_eq!(rows[0]["sales"], 1200);
}

#[test]
fn test_append_policy_keeps_duplicates() {
    let dir = tempdir().unwrap();
    let line = csv_line(&AFB_ROW);
    let file = write_file(&dir, "afb_measure.csv", format!("{}\n{}\n", line, line));

    let mut writer = MemoryWriter::new();
    let report = import_file(&afb(), &file, &mut writer, &ImportOptions::default()).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.ignored, 0);
}

#[test]
fn test_timestamp_spreading_restarts_per_file() {
    set_quiet(true);
    let profile = r#"{
        "id": "measure_burst",
        "table": "measure_burst",
        "min_fields": 2,
        "tracking": { "field": 1 },
        "corrections": [
            { "order": 1, "name": "burst_measure_01_spread", "rule": "spread_identical_timestamps",
              "field": 0, "timestamp": "2021-07-30 16:15:35" }
        ],
        "columns": [
            { "column": "occur_time", "field": 0, "as": "date_time" },
            { "column": "measure_id", "tracking": "measure_id" }
        ]
    }"#;
    let normalizer = VendorProfile::from_json(profile).unwrap().compile().unwrap();

    let dir = tempdir().unwrap();
    let content = "2021-07-30 16:15:35,a\n2021-07-30 16:15:35,b\n";
    let first = write_file(&dir, "one.csv", content);
    let second = write_file(&dir, "two.csv", content);

    let mut writer = MemoryWriter::new();
    let batch = import_files(&normalizer, &[first, second], &mut writer, &ImportOptions::default()).unwrap();
    assert_eq!(batch.inserted(), 4);

    let times: Vec<_> = writer
        .records("measure_burst")
        .iter()
        .map(|r| r.get_str("occur_time").unwrap().to_string())
        .collect();
    assert_eq!(
        times,
        vec![
            "2021-07-30 16:15:35",
            "2021-07-30 16:15:36",
            "2021-07-30 16:15:35",
            "2021-07-30 16:15:36",
        ]
    );
}

#[test]
fn test_cp932_file_with_encoding_override() {
    set_quiet(true);
    let dir = tempdir().unwrap();
    let text = "注文番号,売上,計測\nO1,500,広告_TCLICK_t1\n";
    let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(text);
    let file = write_file(&dir, "sales.csv", bytes.as_ref());

    let normalizer = VendorProfile::from_json(SALES_PROFILE).unwrap().compile().unwrap();
    let options = ImportOptions {
        encoding: Some("cp932".into()),
        delimiter: None,
    };
    let mut writer = MemoryWriter::new();
    let report = import_file(&normalizer, &file, &mut writer, &options).unwrap();

    assert_eq!(report.header, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(writer.records("sales_test")[0].get_str("measure_id"), Some("広告"));
}

#[test]
fn test_unreadable_file_does_not_stop_batch() {
    let dir = tempdir().unwrap();
    let good = write_file(&dir, "afb_measure.csv", csv_line(&AFB_ROW));
    let missing = dir.path().join("missing.csv");

    let mut writer = MemoryWriter::new();
    let batch = import_files(&afb(), &[missing.clone(), good], &mut writer, &ImportOptions::default()).unwrap();

    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].0, missing);
    assert_eq!(batch.inserted(), 1);
}

#[test]
fn test_builtin_profiles_validate_and_compile() {
    for id in builtin_ids() {
        let profile = VendorProfile::builtin(id).unwrap();
        let value: Value = serde_json::from_str(&profile.to_json().unwrap()).unwrap();
        assert!(validate_profile(&value).is_ok(), "{} failed schema validation", id);
        profile.compile().unwrap();
    }
}
