//! Analyzer — aggregates a flat stream of secret events into per-secret
//! history plus corpus-wide statistics.
//!
//! Input is the same [`crate::types::StreamEntry`] shape the Scanner's
//! streaming operations emit, either as a JSON array (`analyzeJson`) or one
//! object per line (`analyzeJsonl`). Because the input is raw events rather
//! than a pre-merged index, a value's `occurrences` here counts every event
//! that named it — it is not deduplicated by commit the way the Scanner's
//! `ScanValueHistory::occurrences` is. A secret's `changeCount`, by
//! contrast, *is* a distinct-commit count across all of its values, giving
//! callers both numbers.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{
    mask_value, Analysis, AnalysisSecret, AnalysisValueHistory, AuthorStat, FileStat, StreamEntry,
    Stats, TypeStat,
};

pub type ProgressFn = dyn Fn(usize) + Send + Sync;

#[derive(Default)]
struct ValueAgg {
    count: usize,
    authors: BTreeSet<String>,
    first_seen: String,
    last_seen: String,
}

#[derive(Default)]
struct SecretAgg {
    secret_type: String,
    commits: HashSet<String>,
    values: HashMap<String, ValueAgg>,
}

pub struct Analyzer;

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate a JSON input: either a bare array of events, or a top-level
    /// `{"results": [...]}` object wrapping the same array (the shape a
    /// full [`crate::types::ScanResult`]-adjacent export might use).
    pub fn analyze_json(&self, path: &Path) -> Result<Analysis> {
        if !path.exists() {
            return Err(Error::InputMissing(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let entries = parse_event_array(&text)?;

        let mut index: HashMap<(String, String), SecretAgg> = HashMap::new();
        for entry in entries {
            fold_entry(&mut index, entry);
        }
        Ok(finalize(index))
    }

    /// Aggregate a JSONL stream, one event per line. Invokes `on_progress`
    /// with the running line count every 1000 lines.
    pub fn analyze_jsonl(&self, path: &Path, on_progress: Option<&ProgressFn>) -> Result<Analysis> {
        if !path.exists() {
            return Err(Error::InputMissing(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let mut index: HashMap<(String, String), SecretAgg> = HashMap::new();

        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: StreamEntry =
                serde_json::from_str(&line).map_err(|e| Error::ParseError(e.to_string()))?;
            fold_entry(&mut index, entry);

            if (i + 1) % 1000 == 0 {
                if let Some(cb) = on_progress {
                    cb(i + 1);
                }
            }
        }

        Ok(finalize(index))
    }
}

/// Accept either a bare JSON array of events or a `{"results": [...]}`
/// wrapper object around the same array.
fn parse_event_array(text: &str) -> Result<Vec<StreamEntry>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::ParseError(e.to_string()))?;
    let array = match value {
        serde_json::Value::Object(mut obj) => {
            obj.remove("results").ok_or_else(|| Error::ParseError("missing \"results\" key".to_string()))?
        }
        array @ serde_json::Value::Array(_) => array,
        _ => return Err(Error::ParseError("expected a JSON array or {\"results\": [...]}".to_string())),
    };
    serde_json::from_value(array).map_err(|e| Error::ParseError(e.to_string()))
}

fn fold_entry(index: &mut HashMap<(String, String), SecretAgg>, entry: StreamEntry) {
    let secret_agg = index.entry((entry.file, entry.key)).or_default();
    secret_agg.secret_type = entry.secret_type;
    secret_agg.commits.insert(entry.commit.clone());

    let value_agg = secret_agg.values.entry(entry.value).or_default();
    value_agg.count += 1;
    value_agg.authors.insert(entry.author);
    if value_agg.first_seen.is_empty() || entry.date < value_agg.first_seen {
        value_agg.first_seen = entry.date.clone();
    }
    if value_agg.last_seen.is_empty() || entry.date > value_agg.last_seen {
        value_agg.last_seen = entry.date;
    }
}

fn finalize(index: HashMap<(String, String), SecretAgg>) -> Analysis {
    let mut secrets = Vec::new();

    let mut author_counts: HashMap<String, usize> = HashMap::new();
    let mut file_counts: HashMap<String, usize> = HashMap::new();
    let mut type_counts: HashMap<String, usize> = HashMap::new();
    let mut total_entries = 0usize;
    let mut unique_values: HashSet<(String, String, String)> = HashSet::new();

    for ((file, key), agg) in index {
        let mut history: Vec<AnalysisValueHistory> = agg
            .values
            .into_iter()
            .map(|(value, v)| {
                total_entries += v.count;
                unique_values.insert((file.clone(), key.clone(), value.clone()));
                AnalysisValueHistory {
                    masked_value: mask_value(&value),
                    value,
                    occurrences: v.count,
                    authors: v.authors.into_iter().collect(),
                    first_seen: v.first_seen,
                    last_seen: v.last_seen,
                }
            })
            .collect();
        history.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));

        let total_occurrences: usize = history.iter().map(|h| h.occurrences).sum();
        let mut authors: BTreeSet<String> = BTreeSet::new();
        for h in &history {
            authors.extend(h.authors.iter().cloned());
        }
        let first_seen = history.iter().map(|h| h.first_seen.clone()).min().unwrap_or_default();
        let last_seen = history.iter().map(|h| h.last_seen.clone()).max().unwrap_or_default();

        // One increment per secret, not per value: an author who touched
        // several values of the same (file,key) still counts once here.
        for author in &authors {
            *author_counts.entry(author.clone()).or_insert(0) += 1;
        }

        *file_counts.entry(file.clone()).or_insert(0) += 1;
        *type_counts.entry(agg.secret_type.clone()).or_insert(0) += 1;

        secrets.push(AnalysisSecret {
            file,
            key,
            secret_type: agg.secret_type,
            change_count: agg.commits.len(),
            total_occurrences,
            authors: authors.into_iter().collect(),
            first_seen,
            last_seen,
            history,
        });
    }

    secrets.sort_by(|a, b| b.change_count.cmp(&a.change_count));

    let mut top_authors: Vec<AuthorStat> =
        author_counts.into_iter().map(|(author, count)| AuthorStat { author, count }).collect();
    top_authors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.author.cmp(&b.author)));
    top_authors.truncate(10);

    let mut top_files: Vec<FileStat> =
        file_counts.into_iter().map(|(file, count)| FileStat { file, count }).collect();
    top_files.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.file.cmp(&b.file)));
    top_files.truncate(10);

    let mut type_breakdown: Vec<TypeStat> = type_counts
        .into_iter()
        .map(|(secret_type, count)| TypeStat { secret_type, count })
        .collect();
    type_breakdown.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.secret_type.cmp(&b.secret_type)));

    Analysis {
        stats: Stats {
            total_entries,
            unique_secrets: secrets.len(),
            unique_values: unique_values.len(),
            top_authors,
            top_files,
            type_breakdown,
        },
        secrets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn entry(file: &str, key: &str, value: &str, commit: &str, author: &str, date: &str) -> StreamEntry {
        StreamEntry {
            file: file.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            masked_value: mask_value(value),
            secret_type: "password".to_string(),
            commit: commit.to_string(),
            author: author.to_string(),
            date: date.to_string(),
        }
    }

    #[test]
    fn analyze_json_aggregates_distinct_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let events = vec![
            entry(".env", "password", "hunter2", "c1", "Alice", "2024-01-01T00:00:00Z"),
            entry(".env", "password", "hunter2", "c1", "Alice", "2024-01-01T00:00:00Z"),
            entry(".env", "password", "swordfish", "c2", "Bob", "2024-02-01T00:00:00Z"),
        ];
        std::fs::write(&path, serde_json::to_string(&events).unwrap()).unwrap();

        let analysis = Analyzer::new().analyze_json(&path).unwrap();
        assert_eq!(analysis.secrets.len(), 1);
        let secret = &analysis.secrets[0];
        assert_eq!(secret.change_count, 2); // distinct commits c1, c2
        assert_eq!(secret.total_occurrences, 3); // raw event count
        assert_eq!(secret.history.len(), 2);
        assert_eq!(secret.history[0].occurrences, 2); // hunter2 seen twice
    }

    #[test]
    fn analyze_json_accepts_results_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let events = vec![entry(".env", "password", "hunter2", "c1", "Alice", "2024-01-01T00:00:00Z")];
        let wrapped = serde_json::json!({ "results": events });
        std::fs::write(&path, serde_json::to_string(&wrapped).unwrap()).unwrap();

        let analysis = Analyzer::new().analyze_json(&path).unwrap();
        assert_eq!(analysis.stats.total_entries, 1);
    }

    #[test]
    fn analyze_jsonl_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..2500 {
            let e = entry("f.env", "token", &format!("v{i}"), "c", "A", "2024-01-01T00:00:00Z");
            writeln!(file, "{}", serde_json::to_string(&e).unwrap()).unwrap();
        }
        drop(file);

        let calls = std::sync::Mutex::new(Vec::new());
        let cb = |n: usize| calls.lock().unwrap().push(n);
        let analysis = Analyzer::new().analyze_jsonl(&path, Some(&cb)).unwrap();

        assert_eq!(analysis.stats.total_entries, 2500);
        assert_eq!(*calls.lock().unwrap(), vec![1000, 2000]);
    }

    #[test]
    fn top_authors_counts_once_per_secret_not_per_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        // Alice touches two distinct values of the same (file,key) secret.
        let events = vec![
            entry(".env", "api_key", "AAAAAAAAAA", "c1", "Alice", "2024-01-01T00:00:00Z"),
            entry(".env", "api_key", "BBBBBBBBBB", "c2", "Alice", "2024-02-01T00:00:00Z"),
        ];
        std::fs::write(&path, serde_json::to_string(&events).unwrap()).unwrap();

        let analysis = Analyzer::new().analyze_json(&path).unwrap();
        let alice = analysis.stats.top_authors.iter().find(|a| a.author == "Alice").unwrap();
        assert_eq!(alice.count, 1);
    }

    #[test]
    fn analyze_jsonl_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let e = entry("f.env", "token", "abcdef1234", "c", "A", "2024-01-01T00:00:00Z");
        std::fs::write(&path, format!("{}\n\n", serde_json::to_string(&e).unwrap())).unwrap();

        let analysis = Analyzer::new().analyze_jsonl(&path, None).unwrap();
        assert_eq!(analysis.stats.total_entries, 1);
    }
}
