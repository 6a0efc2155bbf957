//! Tabular loader family.
//!
//! Reads row-oriented sources (`.csv`, `.tsv`, `.json`, `.jsonl`,
//! `.xlsx`, `.parquet`, SQLite databases) into `table_row`
//! representations, plus two synthetic text representations per source:
//! a file summary and a schema description. Column kinds are inferred by
//! majority vote over a row sample; when a source exceeds the embedded
//! row cap, a stratified step sample or a uniform random sample selects
//! the rows, always emitted in ascending row order.

use std::collections::BTreeSet;
use std::path::Path;

use rand::seq::index::sample;

use crate::config::{SamplingKind, TabularConfig};
use crate::error::{SemangoError, SemangoResult};
use crate::loader::Loader;
use crate::types::{meta_keys, Modality, Representation};

/// Rows examined when inferring column kinds.
const KIND_SAMPLE_ROWS: usize = 100;

/// In-memory form of a tabular source.
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Inferred column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Numeric,
    Datetime,
    Categorical,
    Text,
    Unknown,
}

impl ColumnKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Datetime => "datetime",
            Self::Categorical => "categorical",
            Self::Text => "text",
            Self::Unknown => "unknown",
        }
    }

    fn is_textual(self) -> bool {
        matches!(self, Self::Categorical | Self::Text)
    }
}

/// Loader for row-oriented data files.
pub struct TabularLoader {
    config: TabularConfig,
}

impl TabularLoader {
    /// Build a tabular loader with the given ingestion settings.
    pub fn new(config: TabularConfig) -> Self {
        Self { config }
    }
}

impl Loader for TabularLoader {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv", "tsv", "json", "jsonl", "xlsx", "parquet", "db", "sqlite", "sqlite3"]
    }

    fn load(&self, rel: &str, abs: &Path) -> SemangoResult<Vec<Representation>> {
        let ext = rel
            .rsplit('/')
            .next()
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();

        let table = match ext.as_str() {
            "csv" => read_delimited(abs, self.config.delimiter as u8),
            "tsv" => read_delimited(abs, b'\t'),
            "json" => read_json(abs),
            "jsonl" => read_jsonl(abs),
            "xlsx" => read_xlsx(abs),
            "parquet" => read_parquet(abs),
            "db" | "sqlite" | "sqlite3" => read_sqlite(abs),
            other => {
                return Err(SemangoError::loader(
                    abs,
                    format!("unsupported tabular extension {other:?}"),
                ))
            }
        }?;

        if table.columns.is_empty() {
            return Ok(Vec::new());
        }

        let kinds = infer_column_kinds(&table);
        let num_rows = table.rows.len();

        let mut reps = Vec::new();
        reps.push(self.summary_rep(rel, &table, num_rows));
        reps.push(self.schema_rep(rel, &table, &kinds));

        for row_index in self.select_rows(num_rows) {
            let row = &table.rows[row_index];
            let text = row_text(&table.columns, &kinds, row);
            if text.split_whitespace().count() < self.config.min_text_tokens {
                continue;
            }
            let mut rep = Representation::new(rel, Modality::TableRow, row_index, text)
                .with_meta(meta_keys::SOURCE, "table_row")
                .with_meta(meta_keys::ROW, row_index.to_string());
            for (col, value) in table.columns.iter().zip(row.iter()) {
                if !value.is_empty() {
                    rep.meta
                        .insert(format!("{}{col}", meta_keys::COL_PREFIX), value.clone());
                }
            }
            reps.push(rep);
        }

        Ok(reps)
    }
}

impl TabularLoader {
    /// File summary representation (`offset` 0).
    fn summary_rep(&self, rel: &str, table: &Table, num_rows: usize) -> Representation {
        let text = format!(
            "Tabular file {rel} with {num_rows} rows. Columns: {}.",
            table.columns.join(", ")
        );
        Representation::new(rel, Modality::Text, 0, text)
            .with_meta(meta_keys::SOURCE, "table_file_summary")
            .with_meta(meta_keys::NUM_ROWS, num_rows.to_string())
    }

    /// Schema description representation (`offset` 1, keeping its id
    /// distinct from the summary's).
    fn schema_rep(&self, rel: &str, table: &Table, kinds: &[ColumnKind]) -> Representation {
        let described = table
            .columns
            .iter()
            .zip(kinds.iter())
            .map(|(col, kind)| format!("{col}({})", kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!("Schema: {described}");
        Representation::new(rel, Modality::Text, 1, text)
            .with_meta(meta_keys::SOURCE, "table_schema")
            .with_meta(meta_keys::SCHEMA, described)
    }

    /// Row indices to embed, ascending. Identity when under the cap.
    fn select_rows(&self, num_rows: usize) -> Vec<usize> {
        let max = self.config.max_rows_embedded;
        if num_rows <= max || max == 0 {
            return (0..num_rows).collect();
        }
        match self.config.sampling {
            SamplingKind::Stratified => (0..max).map(|k| k * num_rows / max).collect(),
            SamplingKind::Random => {
                let mut picked: Vec<usize> =
                    sample(&mut rand::thread_rng(), num_rows, max).into_vec();
                picked.sort_unstable();
                picked
            }
        }
    }
}

/// Newline-separated `col: value` lines over non-empty textual and
/// categorical columns.
fn row_text(columns: &[String], kinds: &[ColumnKind], row: &[String]) -> String {
    let mut lines = Vec::new();
    for ((col, kind), value) in columns.iter().zip(kinds.iter()).zip(row.iter()) {
        if kind.is_textual() && !value.is_empty() {
            lines.push(format!("{col}: {value}"));
        }
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Column kind inference
// ---------------------------------------------------------------------------

fn infer_column_kinds(table: &Table) -> Vec<ColumnKind> {
    let sample_rows = table.rows.iter().take(KIND_SAMPLE_ROWS);
    let mut votes = vec![[0usize; 4]; table.columns.len()];
    for row in sample_rows {
        for (col_index, value) in row.iter().enumerate() {
            if col_index >= votes.len() {
                break;
            }
            match classify_value(value) {
                Some(ColumnKind::Numeric) => votes[col_index][0] += 1,
                Some(ColumnKind::Datetime) => votes[col_index][1] += 1,
                Some(ColumnKind::Categorical) => votes[col_index][2] += 1,
                Some(ColumnKind::Text) => votes[col_index][3] += 1,
                _ => {}
            }
        }
    }

    votes
        .iter()
        .map(|counts| {
            let total: usize = counts.iter().sum();
            if total == 0 {
                return ColumnKind::Unknown;
            }
            let (best, _) = counts
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| **c)
                .unwrap_or((3, &0));
            match best {
                0 => ColumnKind::Numeric,
                1 => ColumnKind::Datetime,
                2 => ColumnKind::Categorical,
                _ => ColumnKind::Text,
            }
        })
        .collect()
}

/// Classify a single cell. Empty cells abstain from the vote.
fn classify_value(value: &str) -> Option<ColumnKind> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.parse::<f64>().is_ok() {
        return Some(ColumnKind::Numeric);
    }
    if looks_like_date(trimmed) {
        return Some(ColumnKind::Datetime);
    }
    if trimmed.split_whitespace().count() <= 3 {
        return Some(ColumnKind::Categorical);
    }
    Some(ColumnKind::Text)
}

/// Cheap date detector: `YYYY-MM-DD` / `YYYY/MM/DD` / `DD-MM-YYYY`
/// prefixes, with an optional time suffix.
fn looks_like_date(value: &str) -> bool {
    let date_part = value
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or(value);
    let bytes = date_part.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    let sep_ok = |b: u8| b == b'-' || b == b'/';
    let digits_at = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    digits_at(0..4) && sep_ok(bytes[4]) && digits_at(5..7) && sep_ok(bytes[7]) && digits_at(8..10)
        || digits_at(0..2) && sep_ok(bytes[2]) && digits_at(3..5) && sep_ok(bytes[5]) && digits_at(6..10)
}

// ---------------------------------------------------------------------------
// Format readers
// ---------------------------------------------------------------------------

fn read_delimited(abs: &Path, delimiter: u8) -> SemangoResult<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(abs)
        .map_err(|e| SemangoError::loader(abs, format!("csv open: {e}")))?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| SemangoError::loader(abs, format!("csv header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SemangoError::loader(abs, format!("csv record: {e}")))?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(columns.len(), String::new());
        rows.push(row);
    }
    Ok(Table { columns, rows })
}

fn read_jsonl(abs: &Path) -> SemangoResult<Table> {
    let content = std::fs::read_to_string(abs)
        .map_err(|e| SemangoError::loader(abs, format!("read failed: {e}")))?;
    let mut objects = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| SemangoError::loader(abs, format!("line {}: {e}", line_no + 1)))?;
        objects.push(value);
    }
    objects_to_table(abs, objects)
}

fn read_json(abs: &Path) -> SemangoResult<Table> {
    let content = std::fs::read_to_string(abs)
        .map_err(|e| SemangoError::loader(abs, format!("read failed: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| SemangoError::loader(abs, format!("json parse: {e}")))?;
    let objects = match value {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => {
            return Err(SemangoError::loader(
                abs,
                "json root must be an array or object",
            ))
        }
    };
    objects_to_table(abs, objects)
}

fn objects_to_table(abs: &Path, objects: Vec<serde_json::Value>) -> SemangoResult<Table> {
    let mut columns: BTreeSet<String> = BTreeSet::new();
    for value in &objects {
        let serde_json::Value::Object(map) = value else {
            return Err(SemangoError::loader(abs, "expected an array of objects"));
        };
        columns.extend(map.keys().cloned());
    }
    let columns: Vec<String> = columns.into_iter().collect();

    let mut rows = Vec::with_capacity(objects.len());
    for value in objects {
        let serde_json::Value::Object(map) = value else {
            continue;
        };
        let row = columns
            .iter()
            .map(|col| map.get(col).map(json_value_to_string).unwrap_or_default())
            .collect();
        rows.push(row);
    }
    Ok(Table { columns, rows })
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

fn read_xlsx(abs: &Path) -> SemangoResult<Table> {
    use calamine::{open_workbook_auto, Data, Reader};

    let mut workbook =
        open_workbook_auto(abs).map_err(|e| SemangoError::loader(abs, format!("xlsx open: {e}")))?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(Table {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };
    let range = range.map_err(|e| SemangoError::loader(abs, format!("xlsx sheet: {e}")))?;

    let mut iter = range.rows();
    let Some(header) = iter.next() else {
        return Ok(Table {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };
    let columns: Vec<String> = header
        .iter()
        .map(|cell| match cell {
            Data::Empty => String::new(),
            other => other.to_string(),
        })
        .collect();

    let mut rows = Vec::new();
    for row in iter {
        let mut values: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect();
        values.resize(columns.len(), String::new());
        rows.push(values);
    }
    Ok(Table { columns, rows })
}

fn read_parquet(abs: &Path) -> SemangoResult<Table> {
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use parquet::record::Field;

    let file =
        std::fs::File::open(abs).map_err(|e| SemangoError::loader(abs, format!("open: {e}")))?;
    let reader = SerializedFileReader::new(file)
        .map_err(|e| SemangoError::loader(abs, format!("parquet open: {e}")))?;

    let columns: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let mut rows = Vec::new();
    let iter = reader
        .get_row_iter(None)
        .map_err(|e| SemangoError::loader(abs, format!("parquet rows: {e}")))?;
    for row in iter {
        let row = row.map_err(|e| SemangoError::loader(abs, format!("parquet row: {e}")))?;
        let mut values = vec![String::new(); columns.len()];
        for (name, field) in row.get_column_iter() {
            if let Some(pos) = columns.iter().position(|c| c == name) {
                values[pos] = match field {
                    Field::Null => String::new(),
                    other => other.to_string(),
                };
            }
        }
        rows.push(values);
    }
    Ok(Table { columns, rows })
}

fn read_sqlite(abs: &Path) -> SemangoResult<Table> {
    use rusqlite::types::ValueRef;

    let conn = rusqlite::Connection::open_with_flags(
        abs,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?;

    // Multi-table databases: index the first user table in name order.
    let table_name: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name LIMIT 1",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| {
            if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                Ok(None)
            } else {
                Err(e)
            }
        })?;

    let Some(table_name) = table_name else {
        return Ok(Table {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };

    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{table_name}\""))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let column_count = columns.len();

    let mut rows = Vec::new();
    let mut query = stmt.query([])?;
    while let Some(row) = query.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = match row.get_ref(i)? {
                ValueRef::Null => String::new(),
                ValueRef::Integer(v) => v.to_string(),
                ValueRef::Real(v) => v.to_string(),
                ValueRef::Text(v) => String::from_utf8_lossy(v).into_owned(),
                ValueRef::Blob(_) => String::new(),
            };
            values.push(value);
        }
        rows.push(values);
    }
    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> TabularLoader {
        TabularLoader::new(TabularConfig::default())
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write");
        path
    }

    #[test]
    fn test_csv_rows_summary_and_schema() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = write_file(
            dir.path(),
            "t.csv",
            "name,comment\nAlice,Hello world\nBob,Another text\n",
        );
        let mut config = TabularConfig::default();
        config.min_text_tokens = 2;
        let loader = TabularLoader::new(config);
        let reps = loader.load("t.csv", &abs).expect("load");

        let sources: Vec<&str> = reps
            .iter()
            .filter_map(|r| r.meta.get(meta_keys::SOURCE).map(String::as_str))
            .collect();
        assert!(sources.contains(&"table_file_summary"));
        assert!(sources.contains(&"table_schema"));
        assert_eq!(sources.iter().filter(|s| **s == "table_row").count(), 2);

        let alice = reps
            .iter()
            .find(|r| r.text.contains("Hello world"))
            .expect("alice row");
        assert_eq!(alice.modality, Modality::TableRow);
        assert_eq!(alice.meta.get(meta_keys::ROW).map(String::as_str), Some("0"));
        assert_eq!(
            alice.meta.get("col.name").map(String::as_str),
            Some("Alice")
        );
        assert!(alice.text.contains("name: Alice"));
        assert!(alice.text.contains("comment: Hello world"));
    }

    #[test]
    fn test_summary_and_schema_ids_distinct() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = write_file(dir.path(), "t.csv", "a,b\n1,2\n");
        let reps = loader().load("t.csv", &abs).expect("load");
        let summary = reps
            .iter()
            .find(|r| r.meta.get(meta_keys::SOURCE).map(String::as_str) == Some("table_file_summary"))
            .expect("summary");
        let schema = reps
            .iter()
            .find(|r| r.meta.get(meta_keys::SOURCE).map(String::as_str) == Some("table_schema"))
            .expect("schema");
        assert_ne!(summary.id, schema.id);
    }

    #[test]
    fn test_short_rows_dropped_by_token_filter() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = write_file(dir.path(), "t.csv", "word\nhi\nhello again dear reader\n");
        let reps = loader().load("t.csv", &abs).expect("load");
        let row_texts: Vec<&str> = reps
            .iter()
            .filter(|r| r.modality == Modality::TableRow)
            .map(|r| r.text.as_str())
            .collect();
        assert_eq!(row_texts.len(), 1);
        assert!(row_texts[0].contains("hello again dear reader"));
    }

    #[test]
    fn test_numeric_columns_excluded_from_row_text() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = write_file(
            dir.path(),
            "t.csv",
            "price,summary\n9.99,a very fine product indeed\n",
        );
        let reps = loader().load("t.csv", &abs).expect("load");
        let row = reps
            .iter()
            .find(|r| r.modality == Modality::TableRow)
            .expect("row");
        assert!(!row.text.contains("price"));
        assert!(row.text.contains("summary: a very fine product indeed"));
        // Raw value still present in meta.
        assert_eq!(row.meta.get("col.price").map(String::as_str), Some("9.99"));
    }

    #[test]
    fn test_stratified_sampling_caps_rows_ascending() {
        let mut config = TabularConfig::default();
        config.max_rows_embedded = 10;
        let loader = TabularLoader::new(config);
        let picked = loader.select_rows(100);
        assert_eq!(picked.len(), 10);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(picked[0], 0);
    }

    #[test]
    fn test_random_sampling_caps_rows_ascending() {
        let mut config = TabularConfig::default();
        config.max_rows_embedded = 10;
        config.sampling = SamplingKind::Random;
        let loader = TabularLoader::new(config);
        let picked = loader.select_rows(100);
        assert_eq!(picked.len(), 10);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert!(picked.iter().all(|i| *i < 100));
    }

    #[test]
    fn test_jsonl_source() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = write_file(
            dir.path(),
            "t.jsonl",
            "{\"title\": \"a quiet morning walk\", \"views\": 3}\n\
             {\"title\": \"notes from the harbor\", \"views\": 7}\n",
        );
        let reps = loader().load("t.jsonl", &abs).expect("load");
        let rows: Vec<_> = reps
            .iter()
            .filter(|r| r.modality == Modality::TableRow)
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].text.contains("title: a quiet morning walk"));
    }

    #[test]
    fn test_sqlite_source() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = dir.path().join("t.sqlite");
        {
            let conn = rusqlite::Connection::open(&abs).expect("open");
            conn.execute_batch(
                "CREATE TABLE notes (title TEXT, body TEXT);\n\
                 INSERT INTO notes VALUES ('first', 'a longer body with words');\n\
                 INSERT INTO notes VALUES ('second', 'another body of text here');",
            )
            .expect("seed");
        }
        let reps = loader().load("t.sqlite", &abs).expect("load");
        let rows: Vec<_> = reps
            .iter()
            .filter(|r| r.modality == Modality::TableRow)
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].text.contains("body: a longer body with words"));
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(classify_value("12.5"), Some(ColumnKind::Numeric));
        assert_eq!(classify_value("2024-03-01"), Some(ColumnKind::Datetime));
        assert_eq!(classify_value("2024-03-01 10:30:00"), Some(ColumnKind::Datetime));
        assert_eq!(classify_value("blue"), Some(ColumnKind::Categorical));
        assert_eq!(
            classify_value("a longer free text value here"),
            Some(ColumnKind::Text)
        );
        assert_eq!(classify_value("  "), None);
    }

    #[test]
    fn test_schema_text_lists_kinds() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = write_file(
            dir.path(),
            "t.csv",
            "qty,label\n5,a short tag\n7,another tag\n",
        );
        let reps = loader().load("t.csv", &abs).expect("load");
        let schema = reps
            .iter()
            .find(|r| r.meta.get(meta_keys::SOURCE).map(String::as_str) == Some("table_schema"))
            .expect("schema");
        assert!(schema.text.starts_with("Schema: "));
        assert!(schema.text.contains("qty(numeric)"));
    }
}
