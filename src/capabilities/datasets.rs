//! Dataset repositories and the HTTP dataset fetcher.
//!
//! Repositories turn a domain name into candidate file URLs; the fetcher
//! downloads one file, applies basic cleaning (blank and duplicate rows are
//! dropped) and writes a `cleaned_<name>.csv` copy.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use super::{check_status, http_client, DatasetFetcher, DatasetRepository};
use crate::error::CapabilityError;
use crate::records::DatasetRecord;

/// data.gov CKAN search endpoint.
const DATA_GOV_API_URL: &str = "https://catalog.data.gov/api/3/action/package_search";

/// Zenodo records endpoint.
const ZENODO_API_URL: &str = "https://zenodo.org/api/records";

/// File extensions treated as dataset files.
const DATASET_EXTENSIONS: &[&str] = &[".csv", ".json", ".xlsx", ".xls"];

/// URL path fragments that mark listing pages rather than files.
const LISTING_MARKERS: &[&str] = &["/search", "/browse", "/explore"];

/// Whether `url` looks like a directly downloadable dataset file.
///
/// Requires an http(s) URL whose path ends with a dataset extension and does
/// not point at a search, browse or explore page. Query strings are ignored.
pub fn is_dataset_file(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let path = parsed.path().to_lowercase();
    if LISTING_MARKERS.iter().any(|marker| path.contains(marker)) {
        return false;
    }
    DATASET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Extracts dataset file URLs from a CKAN `package_search` response.
pub fn parse_ckan_urls(body: &Value) -> Vec<String> {
    body.pointer("/result/results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|package| package.get("resources").and_then(Value::as_array))
        .flatten()
        .filter_map(|resource| resource.get("url").and_then(Value::as_str))
        .filter(|url| is_dataset_file(url))
        .map(str::to_string)
        .collect()
}

/// Extracts dataset file URLs from a Zenodo records response.
///
/// Uses each file's `links.self` when it is a dataset file, otherwise builds
/// the public download URL from the record id and file key.
pub fn parse_zenodo_urls(body: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for record in hits {
        let record_id = record.get("id").map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let files = record.get("files").and_then(Value::as_array).into_iter().flatten();
        for file in files {
            let link = file.pointer("/links/self").and_then(Value::as_str);
            if let Some(link) = link.filter(|l| is_dataset_file(l)) {
                urls.push(link.to_string());
                continue;
            }
            let key = file.get("key").and_then(Value::as_str);
            if let (Some(id), Some(key)) = (&record_id, key) {
                let candidate = format!(
                    "https://zenodo.org/records/{}/files/{}",
                    id,
                    urlencoding::encode(key)
                );
                if is_dataset_file(&candidate) {
                    urls.push(candidate);
                }
            }
        }
    }
    urls
}

/// data.gov (CKAN) dataset repository.
pub struct DataGovRepository {
    http_client: Client,
    rows: usize,
    endpoint: String,
}

impl Default for DataGovRepository {
    fn default() -> Self {
        Self {
            http_client: http_client(Duration::from_secs(15)),
            rows: 5,
            endpoint: DATA_GOV_API_URL.to_string(),
        }
    }
}

impl DataGovRepository {
    /// Sets how many packages to request per search.
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows.max(1);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl DatasetRepository for DataGovRepository {
    fn name(&self) -> &str {
        "data.gov"
    }

    async fn search(&self, domain: &str) -> Result<Vec<String>, CapabilityError> {
        let url = format!(
            "{}?q={}&rows={}",
            self.endpoint,
            urlencoding::encode(domain),
            self.rows
        );
        let body = get_json("data.gov", &self.http_client, &url).await?;
        let urls = parse_ckan_urls(&body);
        tracing::debug!(domain = %domain, found = urls.len(), "data.gov search completed");
        Ok(urls)
    }
}

/// Zenodo dataset repository.
pub struct ZenodoRepository {
    http_client: Client,
    size: usize,
    endpoint: String,
}

impl Default for ZenodoRepository {
    fn default() -> Self {
        Self {
            http_client: http_client(Duration::from_secs(15)),
            size: 5,
            endpoint: ZENODO_API_URL.to_string(),
        }
    }
}

impl ZenodoRepository {
    /// Sets how many records to request per search.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl DatasetRepository for ZenodoRepository {
    fn name(&self) -> &str {
        "zenodo"
    }

    async fn search(&self, domain: &str) -> Result<Vec<String>, CapabilityError> {
        let url = format!(
            "{}?q={}&type=dataset&size={}",
            self.endpoint,
            urlencoding::encode(domain),
            self.size
        );
        let body = get_json("zenodo", &self.http_client, &url).await?;
        let urls = parse_zenodo_urls(&body);
        tracing::debug!(domain = %domain, found = urls.len(), "Zenodo search completed");
        Ok(urls)
    }
}

async fn get_json(
    capability: &'static str,
    client: &Client,
    url: &str,
) -> Result<Value, CapabilityError> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| CapabilityError::RequestFailed {
            capability,
            message: e.to_string(),
        })?;
    let response = check_status(capability, response).await?;
    response
        .json()
        .await
        .map_err(|e| CapabilityError::UnexpectedPayload {
            capability,
            message: e.to_string(),
        })
}

/// A cleaned table: header plus de-duplicated, non-blank rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Drops rows with no non-empty cell and repeated rows, keeping the
    /// first occurrence.
    pub fn clean(mut self) -> Self {
        let mut seen = HashSet::new();
        self.rows.retain(|row| {
            row.iter().any(|cell| !cell.trim().is_empty()) && seen.insert(row.clone())
        });
        self
    }

    /// Serializes as CSV, quoting cells that need it.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for line in std::iter::once(&self.header).chain(&self.rows) {
            let cells: Vec<String> = line.iter().map(|cell| quote_cell(cell)).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

fn quote_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Splits one CSV line, honouring double-quoted fields.
pub fn split_csv_line(line: &str) -> Vec<String> {
    split_csv_records(line).into_iter().next().unwrap_or_else(|| vec![String::new()])
}

/// Splits CSV text into records. Quoted fields may contain commas, doubled
/// quotes and line breaks; `\r\n` outside quotes ends a record like `\n`.
pub fn split_csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => record.push(std::mem::take(&mut current)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut current));
                records.push(std::mem::take(&mut record));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() || !record.is_empty() || in_quotes {
        record.push(current);
        records.push(record);
    }
    records
}

/// Parses CSV text. The first non-blank record is the header; rows are
/// padded or truncated to the header width.
pub fn parse_csv(text: &str) -> Option<Table> {
    let mut records = split_csv_records(text.trim_start_matches('\u{feff}')).into_iter();
    let header = records
        .by_ref()
        .find(|record| record.iter().any(|cell| !cell.trim().is_empty()))?;
    let width = header.len();
    let rows = records
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();
    Some(Table { header, rows })
}

/// Flattens a JSON array of objects (or an object wrapping one) into a table.
/// Columns follow first-seen key order.
pub fn json_to_table(value: &Value) -> Option<Table> {
    let records = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.values().find_map(|v| {
            v.as_array()
                .filter(|items| items.iter().any(Value::is_object))
        })?,
        _ => return None,
    };

    let mut header: Vec<String> = Vec::new();
    for record in records.iter().filter_map(Value::as_object) {
        for key in record.keys() {
            if !header.contains(key) {
                header.push(key.clone());
            }
        }
    }
    if header.is_empty() {
        return None;
    }

    let rows = records
        .iter()
        .filter_map(Value::as_object)
        .map(|record| {
            header
                .iter()
                .map(|key| match record.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();
    Some(Table { header, rows })
}

/// Downloads dataset files over HTTP and writes cleaned CSV copies.
pub struct HttpDatasetFetcher {
    http_client: Client,
}

impl Default for HttpDatasetFetcher {
    fn default() -> Self {
        Self {
            http_client: http_client(Duration::from_secs(30)),
        }
    }
}

impl HttpDatasetFetcher {
    /// Cleans downloaded bytes and writes `cleaned_<stem>.csv` into `dest_dir`.
    pub fn clean_and_store(
        &self,
        url: &str,
        file_name: &str,
        bytes: &[u8],
        dest_dir: &Path,
    ) -> Result<DatasetRecord, CapabilityError> {
        let lower = file_name.to_lowercase();
        let text = String::from_utf8_lossy(bytes);
        let parsed = if lower.ends_with(".csv") {
            parse_csv(&text)
        } else if lower.ends_with(".json") {
            let value: Value = serde_json::from_str(&text)?;
            json_to_table(&value)
        } else {
            return Err(CapabilityError::UnsupportedFormat(file_name.to_string()));
        };
        let table = parsed
            .ok_or_else(|| CapabilityError::EmptyDataset(file_name.to_string()))?
            .clean();

        std::fs::create_dir_all(dest_dir)?;
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        let cleaned_path = dest_dir.join(format!("cleaned_{stem}.csv"));
        std::fs::write(&cleaned_path, table.to_csv())?;

        let size_mb = (bytes.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        Ok(DatasetRecord {
            source_url: url.to_string(),
            file_path: cleaned_path.display().to_string(),
            rows: table.rows.len() as u64,
            columns: table.header.len() as u64,
            column_names: table.header,
            size_mb,
        })
    }
}

#[async_trait]
impl DatasetFetcher for HttpDatasetFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<DatasetRecord, CapabilityError> {
        let file_name = Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|name| !name.is_empty())
            .map(|name| {
                urlencoding::decode(&name)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or(name)
            })
            .unwrap_or_else(|| "dataset.csv".to_string());

        let lower = file_name.to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            return Err(CapabilityError::UnsupportedFormat(file_name));
        }

        tracing::info!(url = %url, file = %file_name, "Downloading dataset");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CapabilityError::RequestFailed {
                capability: "dataset download",
                message: e.to_string(),
            })?;
        let response = check_status("dataset download", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CapabilityError::RequestFailed {
                capability: "dataset download",
                message: e.to_string(),
            })?;

        self.clean_and_store(url, &file_name, &bytes, dest_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_is_dataset_file() {
        assert!(is_dataset_file("https://data.example.gov/files/air_quality.csv"));
        assert!(is_dataset_file("http://x.example/a.JSON"));
        assert!(is_dataset_file("https://x.example/sheet.xlsx?download=1"));
        assert!(!is_dataset_file("ftp://x.example/a.csv"));
        assert!(!is_dataset_file("https://x.example/search/results.csv"));
        assert!(!is_dataset_file("https://x.example/browse.json"));
        assert!(!is_dataset_file("https://x.example/page.html"));
        assert!(!is_dataset_file("not a url"));
        assert!(!is_dataset_file(""));
    }

    #[test]
    fn test_parse_ckan_urls() {
        let body = json!({"result": {"results": [
            {"resources": [{"url": "https://a.example/one.csv"}, {"url": "https://a.example/page.html"}]},
            {"resources": [{"url": "https://b.example/two.json"}]},
            {"no_resources": true}
        ]}});
        assert_eq!(
            parse_ckan_urls(&body),
            vec!["https://a.example/one.csv", "https://b.example/two.json"]
        );
        assert!(parse_ckan_urls(&json!({"success": false})).is_empty());
    }

    #[test]
    fn test_parse_zenodo_urls() {
        let body = json!({"hits": {"hits": [
            {"id": 42, "files": [
                {"key": "measurements.csv", "links": {"self": "https://zenodo.org/api/records/42/files/measurements.csv/content"}},
                {"key": "readme.txt", "links": {"self": "https://zenodo.org/api/records/42/files/readme.txt/content"}}
            ]},
            {"id": "7", "files": [{"key": "x.json", "links": {"self": "https://zenodo.org/records/7/files/x.json"}}]}
        ]}});
        assert_eq!(
            parse_zenodo_urls(&body),
            vec![
                "https://zenodo.org/records/42/files/measurements.csv",
                "https://zenodo.org/records/7/files/x.json"
            ]
        );
    }

    #[test]
    fn test_split_csv_line_quotes() {
        assert_eq!(
            split_csv_line(r#"a,"b, c","say ""hi""",d"#),
            vec!["a", "b, c", "say \"hi\"", "d"]
        );
        assert_eq!(split_csv_line(""), vec![""]);
    }

    #[test]
    fn test_split_csv_records_keeps_quoted_line_breaks() {
        let records = split_csv_records("id,note\r\n1,\"line one\nline two\"\r\n2,plain\n");
        assert_eq!(
            records,
            vec![
                vec!["id", "note"],
                vec!["1", "line one\nline two"],
                vec!["2", "plain"],
            ]
        );
    }

    #[test]
    fn test_clean_and_store_multiline_field() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = HttpDatasetFetcher::default();
        let record = fetcher
            .clean_and_store(
                "u",
                "notes.csv",
                b"id,note\n1,\"line one\nline two\"\n2,plain\n",
                dir.path(),
            )
            .expect("stored");

        assert_eq!(record.rows, 2);
        let written = std::fs::read_to_string(&record.file_path).expect("read back");
        assert_eq!(written, "id,note\n1,\"line one\nline two\"\n2,plain\n");
    }

    #[test]
    fn test_clean_drops_blank_and_duplicate_rows() {
        let table = parse_csv("site,temp\nA,21\n,\nA,21\nB,19\n\n").expect("table").clean();
        assert_eq!(table.header, vec!["site", "temp"]);
        assert_eq!(table.rows, vec![vec!["A", "21"], vec!["B", "19"]]);
    }

    #[test]
    fn test_json_to_table() {
        let value = json!({"data": [{"a": 1, "b": "x"}, {"b": "y", "c": null}]});
        let table = json_to_table(&value).expect("table");
        assert_eq!(table.header, vec!["a", "b", "c"]);
        assert_eq!(table.rows[1], vec!["", "y", ""]);
        assert!(json_to_table(&json!([1, 2, 3])).is_none());
    }

    #[test]
    fn test_clean_and_store_writes_cleaned_csv() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = HttpDatasetFetcher::default();
        let record = fetcher
            .clean_and_store(
                "https://x.example/reef.csv",
                "reef.csv",
                b"site,note\nA,\"warm, shallow\"\nA,\"warm, shallow\"\nB,cold\n",
                dir.path(),
            )
            .expect("stored");

        assert_eq!(record.rows, 2);
        assert_eq!(record.columns, 2);
        assert_eq!(record.column_names, vec!["site", "note"]);
        assert!(record.file_path.ends_with("cleaned_reef.csv"));
        let written = std::fs::read_to_string(&record.file_path).expect("read back");
        assert_eq!(written, "site,note\nA,\"warm, shallow\"\nB,cold\n");
    }

    #[test]
    fn test_clean_and_store_rejects_unknown_and_empty() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = HttpDatasetFetcher::default();
        assert!(matches!(
            fetcher.clean_and_store("u", "a.parquet", b"", dir.path()),
            Err(CapabilityError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            fetcher.clean_and_store("u", "a.csv", b"\n\n", dir.path()),
            Err(CapabilityError::EmptyDataset(_))
        ));
        assert!(matches!(
            fetcher.clean_and_store("u", "a.json", b"{oops", dir.path()),
            Err(CapabilityError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_rejects_spreadsheets_without_downloading() {
        let dir = TempDir::new().expect("tempdir");
        let result = HttpDatasetFetcher::default()
            .fetch("https://x.example/book.xlsx", dir.path())
            .await;
        assert!(matches!(result, Err(CapabilityError::UnsupportedFormat(_))));
    }
}
