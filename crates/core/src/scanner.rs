//! Scanner — parallel, pickaxe-driven history mining plus a working-tree walk.
//!
//! One subprocess per keyword fans out over `maxConcurrent` rayon threads
//! (bounded pool, mirroring `server/src/scan.rs`'s `walk_files_parallel`
//! thread-capped `ignore::WalkBuilder` usage); results merge into a shared
//! index behind a single [`std::sync::Mutex`], exactly as the Python
//! reference's `threading.Lock()`-guarded dict did.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use chrono::Utc;
use ignore::WalkBuilder;

use crate::config::CompiledConfig;
use crate::diff::{DiffStreamParser, LineEvent};
use crate::error::{Error, Result};
use crate::types::{mask_value, ScanResult, ScanValueHistory, Secret, StreamEntry};

pub type ProgressFn = dyn Fn(&str) + Send + Sync;

pub struct ScanOptions {
    pub branch: String,
    pub max_concurrent: usize,
    pub on_progress: Option<Box<ProgressFn>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { branch: "--all".to_string(), max_concurrent: 4, on_progress: None }
    }
}

// ---------------------------------------------------------------------------
// Internal index
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InternalValueHistory {
    masked_value: String,
    commits: Vec<String>,
    commits_seen: HashSet<String>,
    authors: BTreeSet<String>,
    first_seen: String,
    last_seen: String,
}

/// file -> key -> value -> history. The extra `value` level (beyond the
/// `file -> key -> ValueHistory` shorthand in the spec's merge-semantics
/// prose) is required so that two different values written to the same key
/// over time both survive as distinct history entries (see DESIGN.md).
type FileIndex = HashMap<String, HashMap<String, HashMap<String, InternalValueHistory>>>;

fn merge_tuple(
    index: &Mutex<FileIndex>,
    file: String,
    key: String,
    value: String,
    commit: String,
    author: String,
    date: String,
) {
    let mut index = index.lock().unwrap();
    let value_index = index.entry(file).or_default().entry(key).or_default();
    let entry = value_index.entry(value.clone()).or_insert_with(|| InternalValueHistory {
        masked_value: mask_value(&value),
        ..Default::default()
    });
    if entry.commits_seen.insert(commit.clone()) {
        entry.commits.push(commit);
    }
    entry.authors.insert(author);
    if entry.first_seen.is_empty() || date < entry.first_seen {
        entry.first_seen = date.clone();
    }
    if entry.last_seen.is_empty() || date > entry.last_seen {
        entry.last_seen = date;
    }
}

fn build_secrets(config: &CompiledConfig, index: FileIndex) -> (Vec<Secret>, usize) {
    let mut secrets = Vec::new();
    let mut total_values = 0usize;

    for (file, keys) in index {
        for (key, values) in keys {
            let secret_type = config.type_for_key(&key);
            let mut history: Vec<ScanValueHistory> = values
                .into_iter()
                .map(|(value, v)| {
                    total_values += 1;
                    ScanValueHistory {
                        value,
                        masked_value: v.masked_value,
                        commits: v.commits,
                        authors: v.authors.into_iter().collect(),
                        first_seen: v.first_seen,
                        last_seen: v.last_seen,
                    }
                })
                .collect();
            history.sort_by(|a, b| b.occurrences().cmp(&a.occurrences()));

            let total_occurrences: usize = history.iter().map(|h| h.occurrences()).sum();
            let mut authors: BTreeSet<String> = BTreeSet::new();
            for h in &history {
                authors.extend(h.authors.iter().cloned());
            }

            secrets.push(Secret {
                file: file.clone(),
                key,
                secret_type,
                change_count: total_occurrences,
                total_occurrences,
                authors: authors.into_iter().collect(),
                history,
            });
        }
    }

    secrets.sort_by(|a, b| (a.file.as_str(), a.key.as_str()).cmp(&(b.file.as_str(), b.key.as_str())));
    (secrets, total_values)
}

// ---------------------------------------------------------------------------
// History driver subprocess
// ---------------------------------------------------------------------------

fn spawn_history_driver(
    repo_path: &Path,
    keyword: &str,
    branch: &str,
    exclude_exts: &[String],
) -> std::io::Result<Child> {
    let mut cmd = Command::new("git");
    cmd.arg("log")
        .arg(branch)
        .arg(format!("-S{keyword}"))
        .arg("--pretty=format:COMMIT_START|%H|%an|%aI")
        .arg("-p")
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    if !exclude_exts.is_empty() {
        cmd.arg("--");
        for ext in exclude_exts {
            cmd.arg(format!(":!*{ext}"));
        }
    }
    cmd.spawn()
}

/// Drain a driver child's stdout through the diff parser, invoking
/// `on_event` for every added line that contains `keyword` verbatim.
/// Stdout is fully drained before `wait()`, avoiding the pipe-buffer
/// deadlock that can occur on large diffs.
fn drain_history(mut child: Child, keyword: &str, mut on_event: impl FnMut(LineEvent)) {
    let Some(stdout) = child.stdout.take() else {
        let _ = child.wait();
        return;
    };
    let mut parser = DiffStreamParser::new();
    for line in BufReader::new(stdout).lines() {
        let Ok(line) = line else { break };
        if let Some(event) = parser.feed_line(&line) {
            if event.content.contains(keyword) {
                on_event(event);
            }
        }
    }
    let _ = child.wait();
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    config: CompiledConfig,
}

impl Scanner {
    pub fn new(config: crate::config::Config) -> Self {
        Self { config: config.compile() }
    }

    pub fn extract_key_value(&self, line: &str) -> Option<(String, String)> {
        self.config.extract_key_value(line)
    }

    /// Full in-memory history scan: one subprocess per keyword, bounded
    /// parallelism, merged into a shared index.
    pub fn scan(&self, repo_path: &Path, opts: &ScanOptions) -> Result<ScanResult> {
        if !repo_path.exists() {
            return Err(Error::InputMissing(repo_path.display().to_string()));
        }
        let repo_path = repo_path
            .canonicalize()
            .map_err(|e| Error::IoFailure(e))?;

        let keywords = self.config.all_keywords().to_vec();
        let index: Mutex<FileIndex> = Mutex::new(HashMap::new());
        let n_keywords = keywords.len();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.max_concurrent.max(1))
            .build()
            .map_err(|e| Error::SubprocessFailure(e.to_string()))?;

        pool.install(|| {
            use rayon::prelude::*;
            keywords.par_iter().enumerate().for_each(|(i, keyword)| {
                if let Some(cb) = &opts.on_progress {
                    cb(&format!("Searching keyword {}/{n_keywords}: {keyword}", i + 1));
                }
                tracing::debug!(keyword, "scanning history for keyword");
                self.search_keyword_into_index(&repo_path, keyword, &opts.branch, &index);
            });
        });

        let index = index.into_inner().unwrap();
        let (secrets, total_values) = build_secrets(&self.config, index);

        Ok(ScanResult {
            repository: repo_path.display().to_string(),
            branch: opts.branch.clone(),
            secrets_found: secrets.len(),
            total_values,
            secrets,
            scan_date: Utc::now().to_rfc3339(),
        })
    }

    fn search_keyword_into_index(
        &self,
        repo_path: &Path,
        keyword: &str,
        branch: &str,
        index: &Mutex<FileIndex>,
    ) {
        let child = match spawn_history_driver(
            repo_path,
            keyword,
            branch,
            &self.config.config.exclude_binary_extensions,
        ) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(keyword, error = %e, "failed to spawn history driver");
                return;
            }
        };

        drain_history(child, keyword, |event| {
            let Some((key, value)) = self.config.extract_key_value(&event.content) else { return };
            if self.config.should_ignore_file(&event.file) {
                return;
            }
            merge_tuple(index, event.file, key, value, event.commit, event.author, event.date);
        });
    }

    /// Working-tree-only scan: single-threaded recursive walk, pruning `.git`.
    pub fn scan_current(&self, repo_path: &Path) -> Result<ScanResult> {
        if !repo_path.exists() {
            return Err(Error::InputMissing(repo_path.display().to_string()));
        }
        let repo_path = repo_path.canonicalize().map_err(Error::IoFailure)?;
        let index = self.walk_current(&repo_path)?;
        let (secrets, total_values) = build_secrets(&self.config, index);

        Ok(ScanResult {
            repository: repo_path.display().to_string(),
            branch: "HEAD".to_string(),
            secrets_found: secrets.len(),
            total_values,
            secrets,
            scan_date: Utc::now().to_rfc3339(),
        })
    }

    fn walk_current(&self, repo_path: &Path) -> Result<FileIndex> {
        let index: Mutex<FileIndex> = Mutex::new(HashMap::new());
        let keywords = self.config.all_keywords();

        let walker = WalkBuilder::new(repo_path)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        for entry in walker {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let abs_path = entry.path();
            let rel_path = abs_path
                .strip_prefix(repo_path)
                .unwrap_or(abs_path)
                .to_string_lossy()
                .replace('\\', "/");

            if self.config.should_ignore_file(&rel_path) {
                continue;
            }
            if self
                .config
                .config
                .exclude_binary_extensions
                .iter()
                .any(|ext| rel_path.ends_with(ext.as_str()))
            {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() > crate::types::MAX_FILE_READ {
                continue;
            }
            let Ok(bytes) = std::fs::read(abs_path) else { continue };
            let content = String::from_utf8_lossy(&bytes);
            let now = Utc::now().to_rfc3339();

            for line in content.lines() {
                for keyword in keywords {
                    if line.contains(keyword.as_str()) {
                        if let Some((key, value)) = self.config.extract_key_value(line) {
                            merge_tuple(
                                &index,
                                rel_path.clone(),
                                key,
                                value,
                                "HEAD".to_string(),
                                String::new(),
                                now.clone(),
                            );
                        }
                        break;
                    }
                }
            }
        }

        Ok(index.into_inner().unwrap())
    }

    /// Union of history and working-tree scans; on `(file,key)` collision
    /// the history entry wins.
    pub fn scan_both(&self, repo_path: &Path, opts: &ScanOptions) -> Result<ScanResult> {
        let history = self.scan(repo_path, opts)?;
        let current = self.scan_current(repo_path)?;

        let mut merged: HashMap<(String, String), Secret> = HashMap::new();
        for secret in history.secrets {
            merged.insert((secret.file.clone(), secret.key.clone()), secret);
        }
        for secret in current.secrets {
            merged.entry((secret.file.clone(), secret.key.clone())).or_insert(secret);
        }

        let mut secrets: Vec<Secret> = merged.into_values().collect();
        secrets.sort_by(|a, b| (a.file.as_str(), a.key.as_str()).cmp(&(b.file.as_str(), b.key.as_str())));

        Ok(ScanResult {
            repository: history.repository,
            branch: opts.branch.clone(),
            secrets_found: secrets.len(),
            total_values: history.total_values + current.total_values,
            secrets,
            scan_date: Utc::now().to_rfc3339(),
        })
    }

    /// Sequential, deduplicated JSONL stream of history events. Keywords run
    /// one at a time — streaming is deliberately single-threaded so output
    /// stays ordered by (keyword, commit).
    pub fn scan_stream(&self, repo_path: &Path, out: &Path, opts: &ScanOptions) -> Result<()> {
        if !repo_path.exists() {
            return Err(Error::InputMissing(repo_path.display().to_string()));
        }
        let repo_path = repo_path.canonicalize().map_err(Error::IoFailure)?;
        let mut writer = std::fs::File::create(out)?;
        let mut seen: HashSet<String> = HashSet::new();
        let keywords = self.config.all_keywords().to_vec();
        let n = keywords.len();

        for (i, keyword) in keywords.iter().enumerate() {
            if let Some(cb) = &opts.on_progress {
                cb(&format!("Streaming keyword {}/{n}: {keyword}", i + 1));
            }
            self.stream_keyword(&repo_path, keyword, &opts.branch, &mut writer, &mut seen)?;
        }
        Ok(())
    }

    fn stream_keyword(
        &self,
        repo_path: &Path,
        keyword: &str,
        branch: &str,
        writer: &mut impl Write,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let child = match spawn_history_driver(
            repo_path,
            keyword,
            branch,
            &self.config.config.exclude_binary_extensions,
        ) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(keyword, error = %e, "failed to spawn history driver");
                return Ok(());
            }
        };

        let mut io_err = None;
        drain_history(child, keyword, |event| {
            if io_err.is_some() {
                return;
            }
            let Some((key, value)) = self.config.extract_key_value(&event.content) else { return };
            if self.config.should_ignore_file(&event.file) {
                return;
            }
            let dedup_key = format!("{}|{key}|{value}", event.file);
            if !seen.insert(dedup_key) {
                return;
            }
            let entry = StreamEntry {
                file: event.file,
                key: key.clone(),
                masked_value: mask_value(&value),
                value,
                secret_type: self.config.type_for_key(&key),
                commit: event.commit,
                author: event.author,
                date: event.date,
            };
            if let Err(e) = writeln!(writer, "{}", serde_json::to_string(&entry).unwrap()) {
                io_err = Some(e);
            }
        });

        if let Some(e) = io_err {
            return Err(Error::IoFailure(e));
        }
        Ok(())
    }

    /// JSONL stream of the working tree, deduplicated by `file|key|value`.
    pub fn scan_current_stream(&self, repo_path: &Path, out: &Path) -> Result<()> {
        if !repo_path.exists() {
            return Err(Error::InputMissing(repo_path.display().to_string()));
        }
        let repo_path = repo_path.canonicalize().map_err(Error::IoFailure)?;
        let mut writer = std::fs::File::create(out)?;
        let mut seen: HashSet<String> = HashSet::new();
        self.stream_current(&repo_path, &mut writer, &mut seen)
    }

    fn stream_current(
        &self,
        repo_path: &Path,
        writer: &mut impl Write,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let keywords = self.config.all_keywords();
        let walker = WalkBuilder::new(repo_path)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        for entry in walker {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let abs_path = entry.path();
            let rel_path = abs_path
                .strip_prefix(repo_path)
                .unwrap_or(abs_path)
                .to_string_lossy()
                .replace('\\', "/");

            if self.config.should_ignore_file(&rel_path) {
                continue;
            }
            if self
                .config
                .config
                .exclude_binary_extensions
                .iter()
                .any(|ext| rel_path.ends_with(ext.as_str()))
            {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() > crate::types::MAX_FILE_READ {
                continue;
            }
            let Ok(bytes) = std::fs::read(abs_path) else { continue };
            let content = String::from_utf8_lossy(&bytes);

            for line in content.lines() {
                for keyword in keywords {
                    if line.contains(keyword.as_str()) {
                        if let Some((key, value)) = self.config.extract_key_value(line) {
                            let dedup_key = format!("{rel_path}|{key}|{value}");
                            if seen.insert(dedup_key) {
                                let entry = StreamEntry {
                                    file: rel_path.clone(),
                                    key: key.clone(),
                                    masked_value: mask_value(&value),
                                    value,
                                    secret_type: self.config.type_for_key(&key),
                                    commit: "HEAD".to_string(),
                                    author: String::new(),
                                    date: Utc::now().to_rfc3339(),
                                };
                                writeln!(writer, "{}", serde_json::to_string(&entry).unwrap())?;
                            }
                        }
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// JSONL union: history stream first, then working tree, each filtered
    /// through one shared dedup set (by `file|key|value`) before appending
    /// to `out`.
    pub fn scan_both_stream(&self, repo_path: &Path, out: &Path, opts: &ScanOptions) -> Result<()> {
        let repo_path_buf = repo_path.to_path_buf();
        let mut seen: HashSet<String> = HashSet::new();
        let mut final_writer = std::fs::File::create(out)?;

        let mut tmp_name = out.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);
        self.scan_stream(&repo_path_buf, &tmp_path, opts)?;
        copy_dedup(&tmp_path, &mut final_writer, &mut seen)?;
        let _ = std::fs::remove_file(&tmp_path);

        self.scan_current_stream(&repo_path_buf, &tmp_path)?;
        copy_dedup(&tmp_path, &mut final_writer, &mut seen)?;
        let _ = std::fs::remove_file(&tmp_path);

        Ok(())
    }
}

fn copy_dedup(tmp_path: &Path, out: &mut impl Write, seen: &mut HashSet<String>) -> Result<()> {
    let file = std::fs::File::open(tmp_path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let entry: StreamEntry = serde_json::from_str(&line).map_err(|e| Error::ParseError(e.to_string()))?;
        let dedup_key = format!("{}|{}|{}", entry.file, entry.key, entry.value);
        if seen.insert(dedup_key) {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use std::process::Command as StdCommand;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            StdCommand::new("git")
                .args(args)
                .current_dir(dir)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .unwrap();
        };
        run(&["init"]);
        run(&["config", "user.email", "test@test.com"]);
        run(&["config", "user.name", "Test"]);
    }

    fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
        std::fs::write(dir.join(name), content).unwrap();
        StdCommand::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", message])
            .current_dir(dir)
            .stdout(Stdio::null())
            .status()
            .unwrap();
    }

    #[test]
    fn scan_single_commit_extraction() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), ".env", "password=hunter2\n", "add env");

        let scanner = Scanner::new(default_config());
        let result = scanner.scan(dir.path(), &ScanOptions::default()).unwrap();

        assert_eq!(result.secrets_found, 1);
        let secret = &result.secrets[0];
        assert_eq!(secret.file, ".env");
        assert_eq!(secret.key, "password");
        assert_eq!(secret.secret_type, "password");
        assert_eq!(secret.change_count, 1);
        assert_eq!(secret.history.len(), 1);
        assert_eq!(secret.history[0].value, "hunter2");
        assert_eq!(secret.history[0].masked_value, "hu***er2");
    }

    #[test]
    fn scan_ignored_markdown_file_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "README.md", "password=hunter2\n", "add readme");

        let scanner = Scanner::new(default_config());
        let result = scanner.scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(result.secrets_found, 0);
    }

    #[test]
    fn scan_multi_value_history_orders_by_occurrences() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "config.env", "api_key=AAAAAAAAAA\n", "first key");
        commit_file(dir.path(), "config.env", "api_key=AAAAAAAAAA\napi_key=BBBBBBBBBB\n", "second key");

        let scanner = Scanner::new(default_config());
        let result = scanner.scan(dir.path(), &ScanOptions::default()).unwrap();

        assert_eq!(result.secrets_found, 1);
        let secret = &result.secrets[0];
        assert_eq!(secret.change_count, 2);
        assert!(secret.history.len() >= 2);
        assert!(secret.history[0].occurrences() >= secret.history[1].occurrences());
    }

    #[test]
    fn scan_current_finds_working_tree_secret() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join(".env"), "token=abcdefghij\n").unwrap();

        let scanner = Scanner::new(default_config());
        let result = scanner.scan_current(dir.path()).unwrap();
        assert_eq!(result.secrets_found, 1);
        assert_eq!(result.branch, "HEAD");
        assert_eq!(result.secrets[0].history[0].commits, vec!["HEAD".to_string()]);
    }
}
