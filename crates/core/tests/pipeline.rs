//! End-to-end coverage of scan -> stream -> analyze -> clean(dry-run),
//! using real `git` fixture repositories the way
//! `server/tests/helpers/mod.rs` built them for the teacher's own
//! integration suite.

use std::path::Path;
use std::process::{Command, Stdio};

use gitsecret_core::cleaner::{self, CleanOptions};
use gitsecret_core::{default_config, Analyzer, Cleaner, ScanOptions, Scanner};

fn init_repo(dir: &Path) {
    let run = |args: &[&str]| {
        Command::new("git").args(args).current_dir(dir).stdout(Stdio::null()).stderr(Stdio::null()).status().unwrap()
    };
    run(&["init"]);
    run(&["config", "user.email", "test@test.com"]);
    run(&["config", "user.name", "Test"]);
}

fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
    std::fs::write(dir.join(name), content).unwrap();
    Command::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
    Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(dir)
        .stdout(Stdio::null())
        .status()
        .unwrap();
}

#[test]
fn full_pipeline_scan_stream_analyze_clean_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    commit_file(dir.path(), "config/.env", "db_url=postgres://u:p@host/db\n", "add db url");
    commit_file(
        dir.path(),
        "config/.env",
        "db_url=postgres://u:p@host/db\napi_key=AKIA1234567890ABCD\n",
        "add api key",
    );

    let scanner = Scanner::new(default_config());
    let opts = ScanOptions::default();

    // In-memory scan sees both keys, each with history.
    let scan_result = scanner.scan(dir.path(), &opts).unwrap();
    assert_eq!(scan_result.secrets_found, 2);

    // Streaming scan produces a JSONL file the analyzer can consume.
    let stream_path = dir.path().join("events.jsonl");
    scanner.scan_stream(dir.path(), &stream_path, &opts).unwrap();
    let stream_contents = std::fs::read_to_string(&stream_path).unwrap();
    assert!(stream_contents.lines().count() >= 2);

    let analysis = Analyzer::new().analyze_jsonl(&stream_path, None).unwrap();
    assert_eq!(analysis.stats.unique_secrets, 2);
    assert!(analysis.secrets.iter().any(|s| s.key == "api_key"));
    assert!(analysis.secrets.iter().any(|s| s.key == "db_url"));

    // Cleaner can load the same stream and preview a dry run without
    // requiring filter-repo/bfg/filter-branch to be installed.
    let loaded = cleaner::load_secrets_from_jsonl(&stream_path).unwrap();
    assert!(!loaded.values.is_empty());

    let clean_opts = CleanOptions {
        tool: Some(gitsecret_core::Tool::FilterRepo),
        source: gitsecret_core::Source::Both,
        file_paths: loaded.file_paths.clone(),
        dry_run: true,
        backup: false,
        force: false,
    };
    let result = Cleaner::new().clean(dir.path(), &loaded.values, &clean_opts).unwrap();
    assert!(result.dry_run);
    assert_eq!(result.secrets_removed, loaded.values.len());
    assert!(result.preview_secrets.len() <= 10);
    assert!(result.preview_secrets.iter().all(|v| v.contains('*') || v == "****"));
}

#[test]
fn scan_both_prefers_history_over_working_tree_on_collision() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    commit_file(dir.path(), "secrets.env", "token=committedvalue123\n", "commit token");
    // Overwrite the working tree with a different, uncommitted value for the same key.
    std::fs::write(dir.path().join("secrets.env"), "token=committedvalue123\nuncommitted=extra\n").unwrap();

    let scanner = Scanner::new(default_config());
    let result = scanner.scan_both(dir.path(), &ScanOptions::default()).unwrap();

    let token_secret = result.secrets.iter().find(|s| s.key == "token").unwrap();
    assert!(token_secret.history.iter().any(|h| h.value == "committedvalue123"));
    assert!(token_secret.history[0].commits.iter().all(|c| c != "HEAD"));
}
