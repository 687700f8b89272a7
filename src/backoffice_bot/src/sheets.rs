//! The spreadsheet seam.
//!
//! The business keeps its permission matrix, min/max stock levels, export
//! group configuration and OCR mapping base in an external spreadsheet. The
//! core consumes exactly two semantic operations — read a tab as records,
//! write a tab as records — plus cosmetic column hiding; transport details
//! (API, auth, retries) live behind this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("sheet transport error: {0}")]
    Transport(String),

    #[error("tab not found: {0}")]
    TabNotFound(String),
}

/// A record is one row keyed by the header row. The first (meta) row of a tab
/// may carry machine keys; transports surface it as the record keys.
pub type Record = HashMap<String, String>;

#[async_trait]
pub trait SheetTransport: Send + Sync {
    async fn read_records(&self, tab: &str) -> Result<Vec<Record>, SheetError>;

    /// Replaces the tab contents with `headers` + `rows`. Writers are
    /// expected to have merged with existing data first — this is a raw
    /// write, not a merge.
    async fn write_records(
        &self,
        tab: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), SheetError>;

    /// Cosmetic: hides a column (the machine-key column). Optional.
    async fn hide_column(&self, _tab: &str, _column: usize) -> Result<(), SheetError> {
        Ok(())
    }
}

/// CSV-directory adapter: one tab = one `<tab>.csv` file, header row first.
/// The default transport for self-hosted deployments; a hosted-spreadsheet
/// adapter implements the same trait elsewhere.
pub mod csv_dir {
    use super::*;
    use std::path::PathBuf;

    pub struct CsvDirSheets {
        dir: PathBuf,
    }

    impl CsvDirSheets {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        fn tab_path(&self, tab: &str) -> PathBuf {
            self.dir.join(format!("{tab}.csv"))
        }
    }

    /// Minimal CSV line split with double-quote escaping.
    pub(crate) fn split_csv_line(line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    fields.push(std::mem::take(&mut current));
                }
                c => current.push(c),
            }
        }
        fields.push(current);
        fields
    }

    pub(crate) fn escape_csv_field(field: &str) -> String {
        if field.contains([',', '"', '\n']) {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    #[async_trait]
    impl SheetTransport for CsvDirSheets {
        async fn read_records(&self, tab: &str) -> Result<Vec<Record>, SheetError> {
            let path = self.tab_path(tab);
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|_| SheetError::TabNotFound(tab.to_string()))?;
            let mut lines = content.lines();
            let Some(header_line) = lines.next() else {
                return Ok(Vec::new());
            };
            let headers = split_csv_line(header_line);
            Ok(lines
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    headers
                        .iter()
                        .cloned()
                        .zip(split_csv_line(line))
                        .collect::<Record>()
                })
                .collect())
        }

        async fn write_records(
            &self,
            tab: &str,
            headers: &[String],
            rows: &[Vec<String>],
        ) -> Result<(), SheetError> {
            let mut out = headers
                .iter()
                .map(|h| escape_csv_field(h))
                .collect::<Vec<_>>()
                .join(",");
            out.push('\n');
            for row in rows {
                out.push_str(
                    &row.iter()
                        .map(|f| escape_csv_field(f))
                        .collect::<Vec<_>>()
                        .join(","),
                );
                out.push('\n');
            }
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| SheetError::Transport(e.to_string()))?;
            tokio::fs::write(self.tab_path(tab), out)
                .await
                .map_err(|e| SheetError::Transport(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn csv_line_roundtrip_with_quotes() {
            let fields = split_csv_line(r#"Иванов,123,"Списание, бар","он сказал ""нет""""#);
            assert_eq!(fields.len(), 4);
            assert_eq!(fields[2], "Списание, бар");
            assert_eq!(fields[3], "он сказал \"нет\"");

            assert_eq!(escape_csv_field("plain"), "plain");
            assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        }
    }
}

/// In-memory sheet for tests.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockSheet {
        tabs: Mutex<HashMap<String, Vec<Record>>>,
        pub fail_reads: Mutex<bool>,
    }

    impl MockSheet {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, tab: &str, records: Vec<Record>) {
            self.tabs.lock().unwrap().insert(tab.to_string(), records);
        }

        pub fn set_fail_reads(&self, fail: bool) {
            *self.fail_reads.lock().unwrap() = fail;
        }

        pub fn records(&self, tab: &str) -> Vec<Record> {
            self.tabs.lock().unwrap().get(tab).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl SheetTransport for MockSheet {
        async fn read_records(&self, tab: &str) -> Result<Vec<Record>, SheetError> {
            if *self.fail_reads.lock().unwrap() {
                return Err(SheetError::Transport("simulated outage".into()));
            }
            Ok(self.records(tab))
        }

        async fn write_records(
            &self,
            tab: &str,
            headers: &[String],
            rows: &[Vec<String>],
        ) -> Result<(), SheetError> {
            let records = rows
                .iter()
                .map(|row| {
                    headers
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect::<Record>()
                })
                .collect();
            self.tabs.lock().unwrap().insert(tab.to_string(), records);
            Ok(())
        }
    }
}
