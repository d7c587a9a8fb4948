//! Diff-Stream Parser — a state machine over the history driver's output.
//!
//! Input is produced by `git log --pretty=format:COMMIT_START|%H|%an|%aI -p`.
//! The parser never attempts rename resolution; the `b/` path from a
//! `diff --git` line is authoritative.

/// One added line, with the commit/file context active when it appeared.
#[derive(Debug, Clone)]
pub struct LineEvent {
    pub file: String,
    pub commit: String,
    pub author: String,
    pub date: String,
    pub content: String,
}

#[derive(Default)]
pub struct DiffStreamParser {
    current_commit: Option<String>,
    current_author: Option<String>,
    current_date: Option<String>,
    current_file: Option<String>,
}

impl DiffStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of driver output. Returns `Some(LineEvent)` only for
    /// added content lines (`+`, not `+++`) once both a commit header and a
    /// file header have been seen; content before either is discarded.
    pub fn feed_line(&mut self, line: &str) -> Option<LineEvent> {
        if let Some(rest) = line.strip_prefix("COMMIT_START|") {
            let parts: Vec<&str> = rest.splitn(3, '|').collect();
            if parts.len() == 3 {
                self.current_commit = Some(parts[0].to_string());
                self.current_author = Some(parts[1].to_string());
                self.current_date = Some(parts[2].to_string());
            }
            return None;
        }

        if line.starts_with("diff --git ") {
            if let Some(idx) = line.find(" b/") {
                self.current_file = Some(line[idx + 3..].to_string());
            }
            return None;
        }

        if line.starts_with('+') && !line.starts_with("+++") {
            let (Some(file), Some(commit), Some(author), Some(date)) = (
                self.current_file.clone(),
                self.current_commit.clone(),
                self.current_author.clone(),
                self.current_date.clone(),
            ) else {
                return None;
            };
            return Some(LineEvent { file, commit, author, date, content: line[1..].to_string() });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nothing_before_headers() {
        let mut parser = DiffStreamParser::new();
        assert!(parser.feed_line("+password=hunter2").is_none());
    }

    #[test]
    fn full_sequence_emits_one_event() {
        let mut parser = DiffStreamParser::new();
        assert!(parser.feed_line("COMMIT_START|abc123|Alice|2024-01-01T00:00:00+00:00").is_none());
        assert!(parser.feed_line("diff --git a/.env b/.env").is_none());
        assert!(parser.feed_line("+++ b/.env").is_none());
        let event = parser.feed_line("+password=hunter2").unwrap();
        assert_eq!(event.file, ".env");
        assert_eq!(event.commit, "abc123");
        assert_eq!(event.author, "Alice");
        assert_eq!(event.content, "password=hunter2");
    }

    #[test]
    fn plain_plus_plus_plus_header_not_emitted() {
        let mut parser = DiffStreamParser::new();
        parser.feed_line("COMMIT_START|abc|Bob|2024-01-01T00:00:00+00:00");
        parser.feed_line("diff --git a/x b/x");
        assert!(parser.feed_line("+++ b/x").is_none());
    }

    #[test]
    fn rename_uses_b_path_only() {
        let mut parser = DiffStreamParser::new();
        parser.feed_line("COMMIT_START|abc|Bob|2024-01-01T00:00:00+00:00");
        parser.feed_line("diff --git a/old.txt b/new.txt");
        let event = parser.feed_line("+token=abcdef123456").unwrap();
        assert_eq!(event.file, "new.txt");
    }
}
