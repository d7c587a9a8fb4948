//! Cleaner — purges secret values from the working tree and, optionally,
//! full git history via whichever history-rewrite tool is available.
//!
//! Tool detection shells out with a 5s timeout per probe; the rewrite
//! itself runs with inherited stdio and no timeout, since a large history
//! can legitimately take minutes. A backup branch and post-rewrite GC each
//! get their own bounded timeout (30s and 60s+120s respectively) so a wedged
//! git process can't hang the whole operation indefinitely.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::types::StreamEntry;

const DETECT_TIMEOUT: Duration = Duration::from_secs(5);
const BACKUP_TIMEOUT: Duration = Duration::from_secs(30);
const REFLOG_TIMEOUT: Duration = Duration::from_secs(60);
const GC_TIMEOUT: Duration = Duration::from_secs(120);
const BATCH_SIZE: usize = 100;
const REPLACEMENT: &str = "***REMOVED***";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    FilterRepo,
    Bfg,
    FilterBranch,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::FilterRepo => "filter-repo",
            Tool::Bfg => "bfg",
            Tool::FilterBranch => "filter-branch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Current,
    History,
    Both,
}

pub struct CleanOptions {
    pub tool: Option<Tool>,
    pub source: Source,
    /// Working-tree files to rewrite, relative to the repo root. Empty means
    /// every `git ls-files`-tracked path (see `clean_current_files`).
    pub file_paths: Vec<String>,
    pub dry_run: bool,
    pub backup: bool,
    /// Forwarded to `git filter-repo --force` when set, allowing a rewrite
    /// of a repo that isn't a fresh clone.
    pub force: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            tool: None,
            source: Source::Both,
            file_paths: Vec::new(),
            dry_run: false,
            backup: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanResult {
    pub tool: Option<String>,
    pub source: Source,
    pub secrets_removed: usize,
    pub patterns_used: usize,
    pub files_modified: usize,
    pub success: bool,
    pub message: String,
    pub backup_branch: Option<String>,
    pub dry_run: bool,
    pub preview_secrets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoadSecretsResult {
    pub values: Vec<String>,
    /// Distinct files named by the loaded events, in first-seen order.
    pub file_paths: Vec<String>,
    /// Event count per file, keyed the same way as `file_paths`.
    pub file_counts: HashMap<String, usize>,
    pub source: Source,
}

// ---------------------------------------------------------------------------
// Tool detection
// ---------------------------------------------------------------------------

pub fn has_filter_repo() -> bool {
    probe("git", &["filter-repo", "--version"])
}

pub fn has_bfg() -> bool {
    probe("bfg", &["--version"]) || probe("java", &["-jar", "bfg.jar", "--version"])
}

pub fn has_filter_branch() -> bool {
    probe("git", &["filter-branch", "--help"])
}

fn probe(program: &str, args: &[&str]) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::null()).stderr(Stdio::null());
    matches!(run_with_timeout(&mut cmd, DETECT_TIMEOUT), Ok(status) if status.success())
}

/// Tools available on this machine, fastest/safest first.
pub fn get_available_tools() -> Vec<Tool> {
    let mut tools = Vec::new();
    if has_filter_repo() {
        tools.push(Tool::FilterRepo);
    }
    if has_bfg() {
        tools.push(Tool::Bfg);
    }
    if has_filter_branch() {
        tools.push(Tool::FilterBranch);
    }
    tools
}

fn select_best_tool() -> Result<Tool> {
    get_available_tools()
        .into_iter()
        .next()
        .ok_or_else(|| Error::PolicyViolation("no history rewrite tool available".to_string()))
}

// ---------------------------------------------------------------------------
// Timed subprocess helper
// ---------------------------------------------------------------------------

fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<std::process::ExitStatus> {
    let mut child = cmd.spawn().map_err(|e| Error::SubprocessFailure(e.to_string()))?;
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::SubprocessFailure(format!(
                        "{:?} timed out after {:?}",
                        cmd.get_program(),
                        timeout
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(Error::SubprocessFailure(e.to_string())),
        }
    }
}

fn run_inherited(cmd: &mut Command) -> Result<std::process::ExitStatus> {
    cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    let mut child = cmd.spawn().map_err(|e| Error::SubprocessFailure(e.to_string()))?;
    child.wait().map_err(|e| Error::SubprocessFailure(e.to_string()))
}

// ---------------------------------------------------------------------------
// Cleaner
// ---------------------------------------------------------------------------

pub struct Cleaner;

impl Default for Cleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, repo_path: &Path, secrets: &[String], opts: &CleanOptions) -> Result<CleanResult> {
        if !repo_path.exists() {
            return Err(Error::InputMissing(repo_path.display().to_string()));
        }
        if secrets.is_empty() {
            return Err(Error::PolicyViolation("no secrets to clean".to_string()));
        }

        let patterns_used = (secrets.len() + BATCH_SIZE - 1) / BATCH_SIZE;
        let needs_history = matches!(opts.source, Source::History | Source::Both);
        let tool = if needs_history {
            Some(match opts.tool {
                Some(t) => t,
                None => select_best_tool()?,
            })
        } else {
            None
        };

        if opts.dry_run {
            let preview_secrets: Vec<String> =
                secrets.iter().take(10).map(|s| crate::types::mask_value(s)).collect();
            let message = match &tool {
                Some(t) => format!("would remove {} secret(s) using {}", secrets.len(), t.name()),
                None => format!("would remove {} secret(s) from the working tree", secrets.len()),
            };
            return Ok(CleanResult {
                tool: tool.map(|t| t.name().to_string()),
                source: opts.source,
                secrets_removed: secrets.len(),
                patterns_used,
                files_modified: 0,
                success: true,
                message,
                backup_branch: None,
                dry_run: true,
                preview_secrets,
            });
        }

        let tool_name = tool.map(|t| t.name().to_string());

        let backup_branch = if opts.backup {
            match create_backup_branch(repo_path) {
                Ok(name) => Some(name),
                Err(e) => {
                    return Ok(failure_result(
                        opts.source,
                        tool_name,
                        patterns_used,
                        0,
                        format!("failed to create backup branch: {e}"),
                    ))
                }
            }
        } else {
            None
        };

        let mut files_modified = 0;
        if matches!(opts.source, Source::Current | Source::Both) {
            files_modified = clean_current_files(repo_path, secrets, &opts.file_paths)?;
        }

        let mut tool_used = None;
        if needs_history {
            let tool = tool.expect("tool selected above when needs_history");
            let patterns = group_secrets_into_patterns(secrets);
            let rewrite = match tool {
                Tool::FilterRepo => clean_with_filter_repo(repo_path, &patterns, opts.force),
                Tool::Bfg => clean_with_bfg(repo_path, secrets),
                Tool::FilterBranch => clean_with_filter_branch(repo_path, &patterns),
            };
            if let Err(e) = rewrite {
                return Ok(failure_result(
                    opts.source,
                    tool_name,
                    patterns_used,
                    files_modified,
                    format!("failed to clean history with {}: {e}", tool.name()),
                ));
            }
            if let Err(e) = run_gc(repo_path) {
                return Ok(failure_result(
                    opts.source,
                    tool_name,
                    patterns_used,
                    files_modified,
                    format!("failed to clean up git: {e}"),
                ));
            }
            tool_used = Some(tool.name().to_string());
        }

        Ok(CleanResult {
            tool: tool_used,
            source: opts.source,
            secrets_removed: secrets.len(),
            patterns_used,
            files_modified,
            success: true,
            message: format!("removed {} secret(s) across {files_modified} file(s)", secrets.len()),
            backup_branch,
            dry_run: false,
            preview_secrets: Vec::new(),
        })
    }
}

/// Build a `success: false` result for a mid-pipeline failure (backup, history
/// rewrite, or post-rewrite GC) instead of aborting out of band — the core
/// always hands the caller a result object, never bubbles these as `Err`.
fn failure_result(
    source: Source,
    tool: Option<String>,
    patterns_used: usize,
    files_modified: usize,
    message: String,
) -> CleanResult {
    CleanResult {
        tool,
        source,
        secrets_removed: 0,
        patterns_used,
        files_modified,
        success: false,
        message,
        backup_branch: None,
        dry_run: false,
        preview_secrets: Vec::new(),
    }
}

fn create_backup_branch(repo_path: &Path) -> Result<String> {
    let name = format!("backup-before-clean-{}", std::process::id());
    let mut cmd = Command::new("git");
    cmd.args(["branch", &name, "HEAD"]).current_dir(repo_path);
    let status = run_with_timeout(&mut cmd, BACKUP_TIMEOUT)?;
    if !status.success() {
        return Err(Error::SubprocessFailure("failed to create backup branch".to_string()));
    }
    Ok(name)
}

/// Rewrite every occurrence of `secrets` to `***REMOVED***` across
/// `file_paths` (relative to `repo_path`). When `file_paths` is empty, every
/// `git ls-files`-tracked path is used instead.
fn clean_current_files(repo_path: &Path, secrets: &[String], file_paths: &[String]) -> Result<usize> {
    let mut modified = 0;
    let targets: Vec<String> =
        if file_paths.is_empty() { tracked_files(repo_path) } else { file_paths.to_vec() };

    for rel_path in targets {
        let full_path = repo_path.join(&rel_path);
        if !full_path.is_file() {
            continue;
        }
        let Ok(bytes) = std::fs::read(&full_path) else { continue };
        let mut content = String::from_utf8_lossy(&bytes).into_owned();
        let mut changed = false;
        for secret in secrets {
            if content.contains(secret.as_str()) {
                content = content.replace(secret.as_str(), REPLACEMENT);
                changed = true;
            }
        }
        if changed {
            std::fs::write(&full_path, content)?;
            modified += 1;
        }
    }
    Ok(modified)
}

/// Paths `git ls-files` reports as tracked, relative to `repo_path`.
fn tracked_files(repo_path: &Path) -> Vec<String> {
    let output = Command::new("git").arg("ls-files").current_dir(repo_path).output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Batch secrets into groups of `BATCH_SIZE`, each rendered as a single
/// regex-escaped alternation so a rewrite tool's replace-text pass makes one
/// substitution sweep per batch instead of one per secret.
fn group_secrets_into_patterns(secrets: &[String]) -> Vec<String> {
    secrets
        .chunks(BATCH_SIZE)
        .map(|chunk| chunk.iter().map(|s| regex::escape(s)).collect::<Vec<_>>().join("|"))
        .collect()
}

fn clean_with_filter_repo(repo_path: &Path, patterns: &[String], force: bool) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(repo_path)?;
    for pattern in patterns {
        writeln!(tmp, "regex:{pattern}===>{REPLACEMENT}")?;
    }
    tmp.flush()?;

    let mut cmd = Command::new("git");
    cmd.args(["filter-repo", "--replace-text"]).arg(tmp.path());
    if force {
        cmd.arg("--force");
    }
    cmd.current_dir(repo_path);
    let status = run_inherited(&mut cmd)?;
    if !status.success() {
        return Err(Error::SubprocessFailure("git filter-repo failed".to_string()));
    }
    Ok(())
}

fn clean_with_bfg(repo_path: &Path, secrets: &[String]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(repo_path)?;
    for secret in secrets {
        writeln!(tmp, "{secret}")?;
    }
    tmp.flush()?;

    let mut cmd = Command::new("bfg");
    cmd.arg("--replace-text").arg(tmp.path()).arg(repo_path);
    let status = run_inherited(&mut cmd)?;
    if !status.success() {
        return Err(Error::SubprocessFailure("bfg failed".to_string()));
    }
    Ok(())
}

fn clean_with_filter_branch(repo_path: &Path, patterns: &[String]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(repo_path)?;
    for pattern in patterns {
        let escaped = pattern.replace('~', r"\~");
        writeln!(tmp, "s~{escaped}~{REPLACEMENT}~g")?;
    }
    tmp.flush()?;

    let tree_filter =
        format!(r#"find . -type f ! -path "./.git*" -exec sed -i -f {} {{}} +"#, tmp.path().display());
    let mut cmd = Command::new("git");
    cmd.args(["filter-branch", "--force", "--tree-filter", &tree_filter, "--prune-empty", "--", "--all"])
        .current_dir(repo_path);
    let status = run_inherited(&mut cmd)?;
    if !status.success() {
        return Err(Error::SubprocessFailure("git filter-branch failed".to_string()));
    }
    Ok(())
}

fn run_gc(repo_path: &Path) -> Result<()> {
    let mut reflog = Command::new("git");
    reflog.args(["reflog", "expire", "--expire=now", "--all"]).current_dir(repo_path);
    run_with_timeout(&mut reflog, REFLOG_TIMEOUT)?;

    let mut gc = Command::new("git");
    gc.args(["gc", "--prune=now", "--aggressive"]).current_dir(repo_path);
    let status = run_with_timeout(&mut gc, GC_TIMEOUT)?;
    if !status.success() {
        tracing::warn!("git gc exited non-zero after history rewrite");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Loading secrets from scan output
// ---------------------------------------------------------------------------

pub fn load_secrets_from_json(path: &Path) -> Result<LoadSecretsResult> {
    if !path.exists() {
        return Err(Error::InputMissing(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| Error::ParseError(e.to_string()))?;
    let array = match value {
        serde_json::Value::Object(mut obj) => {
            obj.remove("results").ok_or_else(|| Error::ParseError("missing \"results\" key".to_string()))?
        }
        array @ serde_json::Value::Array(_) => array,
        _ => return Err(Error::ParseError("expected a JSON array or {\"results\": [...]}".to_string())),
    };
    let entries: Vec<StreamEntry> =
        serde_json::from_value(array).map_err(|e| Error::ParseError(e.to_string()))?;
    Ok(finalize_loaded(entries))
}

pub fn load_secrets_from_jsonl(path: &Path) -> Result<LoadSecretsResult> {
    if !path.exists() {
        return Err(Error::InputMissing(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line).map_err(|e| Error::ParseError(e.to_string()))?);
    }
    Ok(finalize_loaded(entries))
}

fn finalize_loaded(entries: Vec<StreamEntry>) -> LoadSecretsResult {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    let mut any_current = false;
    let mut any_history = false;
    let mut file_paths = Vec::new();
    let mut file_paths_seen = HashSet::new();
    let mut file_counts: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        if entry.commit == "HEAD" {
            any_current = true;
        } else {
            any_history = true;
        }
        if seen.insert(entry.value.clone()) {
            values.push(entry.value);
        }
        if file_paths_seen.insert(entry.file.clone()) {
            file_paths.push(entry.file.clone());
        }
        *file_counts.entry(entry.file).or_insert(0) += 1;
    }

    values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let source = match (any_current, any_history) {
        (true, true) => Source::Both,
        (true, false) => Source::Current,
        _ => Source::History,
    };

    LoadSecretsResult { values, file_paths, file_counts, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_secrets_into_patterns_batches_and_escapes() {
        let secrets: Vec<String> = (0..250).map(|i| format!("secret.{i}")).collect();
        let patterns = group_secrets_into_patterns(&secrets);
        assert_eq!(patterns.len(), 3);
        assert!(patterns[0].contains(r"secret\.0"));
    }

    #[test]
    fn finalize_loaded_dedups_and_sorts_by_length_desc() {
        let entries = vec![
            StreamEntry {
                file: "a".into(),
                key: "k".into(),
                value: "short".into(),
                masked_value: "****".into(),
                secret_type: "password".into(),
                commit: "HEAD".into(),
                author: String::new(),
                date: "2024-01-01T00:00:00Z".into(),
            },
            StreamEntry {
                file: "a".into(),
                key: "k".into(),
                value: "a-much-longer-secret".into(),
                masked_value: "****".into(),
                secret_type: "password".into(),
                commit: "abc123".into(),
                author: "Alice".into(),
                date: "2024-01-01T00:00:00Z".into(),
            },
            StreamEntry {
                file: "a".into(),
                key: "k".into(),
                value: "short".into(),
                masked_value: "****".into(),
                secret_type: "password".into(),
                commit: "HEAD".into(),
                author: String::new(),
                date: "2024-01-01T00:00:00Z".into(),
            },
        ];
        let result = finalize_loaded(entries);
        assert_eq!(result.values, vec!["a-much-longer-secret".to_string(), "short".to_string()]);
        assert_eq!(result.source, Source::Both);
        assert_eq!(result.file_paths, vec!["a".to_string()]);
        assert_eq!(result.file_counts.get("a"), Some(&3));
    }

    #[test]
    fn clean_current_files_redacts_secret_in_working_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "password=hunter2\nother=1\n").unwrap();
        let file_paths = vec![".env".to_string()];
        let modified = clean_current_files(dir.path(), &["hunter2".to_string()], &file_paths).unwrap();
        assert_eq!(modified, 1);
        let content = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(content.contains("***REMOVED***"));
        assert!(!content.contains("hunter2"));
    }

    #[test]
    fn clean_current_files_defaults_to_tracked_files_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").args(["init"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir.path()).output().unwrap();
        std::fs::write(dir.path().join(".env"), "password=hunter2\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "add env"]).current_dir(dir.path()).output().unwrap();

        let modified = clean_current_files(dir.path(), &["hunter2".to_string()], &[]).unwrap();
        assert_eq!(modified, 1);
    }

    #[test]
    fn clean_requires_non_empty_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let cleaner = Cleaner::new();
        let result = cleaner.clean(dir.path(), &[], &CleanOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn load_secrets_from_json_accepts_results_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let entry = StreamEntry {
            file: "a".into(),
            key: "k".into(),
            value: "hunter2".into(),
            masked_value: "hu***er2".into(),
            secret_type: "password".into(),
            commit: "abc123".into(),
            author: "Alice".into(),
            date: "2024-01-01T00:00:00Z".into(),
        };
        let wrapped = serde_json::json!({ "results": [entry] });
        std::fs::write(&path, serde_json::to_string(&wrapped).unwrap()).unwrap();

        let loaded = load_secrets_from_json(&path).unwrap();
        assert_eq!(loaded.values, vec!["hunter2".to_string()]);
        assert_eq!(loaded.source, Source::History);
    }

    #[test]
    fn clean_current_only_does_not_require_a_history_tool() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "password=hunter2\n").unwrap();
        let cleaner = Cleaner::new();
        let opts = CleanOptions {
            tool: None,
            source: Source::Current,
            file_paths: vec![".env".to_string()],
            dry_run: false,
            backup: false,
            force: false,
        };
        let result = cleaner.clean(dir.path(), &["hunter2".to_string()], &opts).unwrap();
        assert!(result.success);
        assert!(result.tool.is_none());
        assert_eq!(result.files_modified, 1);
    }

    #[test]
    fn clean_dry_run_previews_masked_secrets_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "password=hunter2\n").unwrap();
        let cleaner = Cleaner::new();
        let opts = CleanOptions {
            tool: None,
            source: Source::Current,
            file_paths: Vec::new(),
            dry_run: true,
            backup: false,
            force: false,
        };
        let result = cleaner.clean(dir.path(), &["hunter2".to_string()], &opts).unwrap();
        assert!(result.dry_run);
        assert_eq!(result.preview_secrets, vec!["hu***er2".to_string()]);
        let content = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(content.contains("hunter2"));
    }
}
