//! Shared data model: events, secret records, scan/analysis results.
//!
//! Wire format is lowerCamelCase JSON throughout (see module docs on
//! [`crate::scanner`] and [`crate::analyzer`] for the two history shapes).

use serde::{Deserialize, Serialize};

/// Maximum size (in bytes) of a working-tree file read into memory.
pub const MAX_FILE_READ: u64 = 1024 * 1024;

/// Mask a secret value: first two and last two characters survive, the
/// middle is replaced with up to 16 asterisks.
///
/// `|v| <= 4` masks to exactly `"****"`.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let first_two: String = chars[..2].iter().collect();
    let last_two: String = chars[chars.len() - 2..].iter().collect();
    let num_asterisks = (chars.len() - 4).min(16);
    format!("{first_two}{}{last_two}", "*".repeat(num_asterisks))
}

// ---------------------------------------------------------------------------
// Wire event (sole JSONL format, shared by scan streams, analyzer input,
// and cleaner secret loading)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub file: String,
    pub key: String,
    pub value: String,
    #[serde(rename = "maskedValue")]
    pub masked_value: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    pub commit: String,
    pub author: String,
    pub date: String,
}

// ---------------------------------------------------------------------------
// Scanner output (history entries carry commit ids, not occurrence counts)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanValueHistory {
    pub value: String,
    #[serde(rename = "maskedValue")]
    pub masked_value: String,
    pub commits: Vec<String>,
    pub authors: Vec<String>,
    #[serde(rename = "firstSeen")]
    pub first_seen: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: String,
}

impl ScanValueHistory {
    /// Number of distinct commits that touched this value — the Scanner's
    /// notion of "occurrences" for invariant purposes.
    pub fn occurrences(&self) -> usize {
        self.commits.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub file: String,
    pub key: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    #[serde(rename = "changeCount")]
    pub change_count: usize,
    #[serde(rename = "totalOccurrences")]
    pub total_occurrences: usize,
    pub authors: Vec<String>,
    pub history: Vec<ScanValueHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub repository: String,
    pub branch: String,
    #[serde(rename = "secretsFound")]
    pub secrets_found: usize,
    #[serde(rename = "totalValues")]
    pub total_values: usize,
    pub secrets: Vec<Secret>,
    #[serde(rename = "scanDate")]
    pub scan_date: String,
}

// ---------------------------------------------------------------------------
// Analyzer output (history entries carry occurrence counts, not commit ids)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisValueHistory {
    pub value: String,
    #[serde(rename = "maskedValue")]
    pub masked_value: String,
    pub occurrences: usize,
    pub authors: Vec<String>,
    #[serde(rename = "firstSeen")]
    pub first_seen: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSecret {
    pub file: String,
    pub key: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    #[serde(rename = "changeCount")]
    pub change_count: usize,
    #[serde(rename = "totalOccurrences")]
    pub total_occurrences: usize,
    pub authors: Vec<String>,
    #[serde(rename = "firstSeen")]
    pub first_seen: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: String,
    pub history: Vec<AnalysisValueHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorStat {
    pub author: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub file: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeStat {
    #[serde(rename = "type")]
    pub secret_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    #[serde(rename = "totalEntries")]
    pub total_entries: usize,
    #[serde(rename = "uniqueSecrets")]
    pub unique_secrets: usize,
    #[serde(rename = "uniqueValues")]
    pub unique_values: usize,
    #[serde(rename = "topAuthors")]
    pub top_authors: Vec<AuthorStat>,
    #[serde(rename = "topFiles")]
    pub top_files: Vec<FileStat>,
    #[serde(rename = "typeBreakdown")]
    pub type_breakdown: Vec<TypeStat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub stats: Stats,
    pub secrets: Vec<AnalysisSecret>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_boundary_four() {
        assert_eq!(mask_value("abcd"), "****");
    }

    #[test]
    fn mask_boundary_five() {
        assert_eq!(mask_value("abcde"), "ab*de");
    }

    #[test]
    fn mask_caps_at_sixteen_asterisks() {
        // length 21: first two + 16 asterisks + last two
        let v = "a".repeat(21);
        let masked = mask_value(&v);
        assert_eq!(masked, format!("aa{}aa", "*".repeat(16)));
    }

    #[test]
    fn mask_never_reveals_more_than_edges() {
        let v = "supersecretvalue1234";
        let masked = mask_value(v);
        assert!(masked.starts_with(&v[..2]));
        assert!(masked.ends_with(&v[v.len() - 2..]));
        assert!(masked.contains("****"));
    }
}
