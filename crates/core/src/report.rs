//! Report rendering — CSV exports and a plain-text summary of an [`Analysis`].
//!
//! CSV output carries a UTF-8 BOM (so Excel on Windows opens it without
//! mangling accented author names) and uses `;` as the field delimiter;
//! authors are joined with `", "` and masked values with `"; "`, and the
//! writer quotes either list automatically when it collides with the
//! delimiter.

use std::io::Write as _;
use std::path::Path;

use chrono::DateTime;

use crate::error::{Error, Result};
use crate::types::Analysis;

const VALUES_PREVIEW_LIMIT: usize = 5;

fn format_date(iso: &str) -> String {
    DateTime::parse_from_rfc3339(iso).map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_else(|_| iso.to_string())
}

fn days_active(first_seen: &str, last_seen: &str) -> i64 {
    match (DateTime::parse_from_rfc3339(first_seen), DateTime::parse_from_rfc3339(last_seen)) {
        (Ok(a), Ok(b)) => (b - a).num_days(),
        _ => 0,
    }
}

fn truncate_list(items: &[String], limit: usize) -> String {
    if items.len() <= limit {
        return items.join(", ");
    }
    format!("{} and {} more", items[..limit].join(", "), items.len() - limit)
}

/// One row per secret: `File;Key;Type;ChangeCount;TotalOccurrences;Authors;
/// AuthorCount;FirstSeen;LastSeen;DaysActive;Values`.
pub fn export_csv(analysis: &Analysis, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(&[0xEF, 0xBB, 0xBF])?;

    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(file);
    writer
        .write_record([
            "File",
            "Key",
            "Type",
            "ChangeCount",
            "TotalOccurrences",
            "Authors",
            "AuthorCount",
            "FirstSeen",
            "LastSeen",
            "DaysActive",
            "Values",
        ])
        .map_err(|e| Error::ParseError(e.to_string()))?;

    for secret in &analysis.secrets {
        let masked_values: Vec<String> = secret.history.iter().map(|h| h.masked_value.clone()).collect();
        writer
            .write_record([
                secret.file.as_str(),
                secret.key.as_str(),
                secret.secret_type.as_str(),
                &secret.change_count.to_string(),
                &secret.total_occurrences.to_string(),
                &secret.authors.join(", "),
                &secret.authors.len().to_string(),
                &format_date(&secret.first_seen),
                &format_date(&secret.last_seen),
                &days_active(&secret.first_seen, &secret.last_seen).to_string(),
                &masked_values.join("; "),
            ])
            .map_err(|e| Error::ParseError(e.to_string()))?;
    }

    writer.flush().map_err(|e| Error::ParseError(e.to_string()))?;
    Ok(())
}

/// One row per stats dimension: `Category;Name;Count`.
pub fn export_stats_csv(analysis: &Analysis, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(&[0xEF, 0xBB, 0xBF])?;

    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(file);
    writer.write_record(["Category", "Name", "Count"]).map_err(|e| Error::ParseError(e.to_string()))?;

    for author in &analysis.stats.top_authors {
        writer
            .write_record(["Author", author.author.as_str(), &author.count.to_string()])
            .map_err(|e| Error::ParseError(e.to_string()))?;
    }
    for file_stat in &analysis.stats.top_files {
        writer
            .write_record(["File", file_stat.file.as_str(), &file_stat.count.to_string()])
            .map_err(|e| Error::ParseError(e.to_string()))?;
    }
    for type_stat in &analysis.stats.type_breakdown {
        writer
            .write_record(["Type", type_stat.secret_type.as_str(), &type_stat.count.to_string()])
            .map_err(|e| Error::ParseError(e.to_string()))?;
    }

    writer.flush().map_err(|e| Error::ParseError(e.to_string()))?;
    Ok(())
}

/// A short plain-text summary, suitable for terminal output.
///
/// `max_secrets` caps how many per-secret entries are listed (0 means no
/// cap), so a terminal run against a large corpus doesn't scroll forever.
pub fn generate_text_report(analysis: &Analysis, max_secrets: usize) -> String {
    let mut out = String::new();
    out.push_str("Secret Scan Analysis\n");
    out.push_str("====================\n\n");
    out.push_str(&format!("Total events:   {}\n", analysis.stats.total_entries));
    out.push_str(&format!("Unique secrets: {}\n", analysis.stats.unique_secrets));
    out.push_str(&format!("Unique values:  {}\n\n", analysis.stats.unique_values));

    if !analysis.stats.top_authors.is_empty() {
        out.push_str("Top authors:\n");
        for author in &analysis.stats.top_authors {
            out.push_str(&format!("  {:<30} {}\n", author.author, author.count));
        }
        out.push('\n');
    }

    if !analysis.stats.top_files.is_empty() {
        out.push_str("Top files:\n");
        for file_stat in &analysis.stats.top_files {
            out.push_str(&format!("  {:<30} {}\n", file_stat.file, file_stat.count));
        }
        out.push('\n');
    }

    if !analysis.stats.type_breakdown.is_empty() {
        out.push_str("By type:\n");
        for type_stat in &analysis.stats.type_breakdown {
            out.push_str(&format!("  {:<30} {}\n", type_stat.secret_type, type_stat.count));
        }
        out.push('\n');
    }

    out.push_str("Secrets:\n");
    let secrets_to_show =
        if max_secrets > 0 { &analysis.secrets[..max_secrets.min(analysis.secrets.len())] } else { &analysis.secrets[..] };
    for secret in secrets_to_show {
        out.push_str(&format!(
            "  {}:{} [{}] changed {} times across {} days ({} -> {})\n",
            secret.file,
            secret.key,
            secret.secret_type,
            secret.change_count,
            days_active(&secret.first_seen, &secret.last_seen),
            format_date(&secret.first_seen),
            format_date(&secret.last_seen),
        ));
        let masked_values: Vec<String> = secret.history.iter().map(|h| h.masked_value.clone()).collect();
        out.push_str(&format!("    values: {}\n", truncate_list(&masked_values, VALUES_PREVIEW_LIMIT)));
    }
    if max_secrets > 0 && analysis.secrets.len() > max_secrets {
        out.push_str(&format!("  ... and {} more\n", analysis.secrets.len() - max_secrets));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisSecret, AnalysisValueHistory, Stats};

    fn sample_analysis() -> Analysis {
        Analysis {
            stats: Stats {
                total_entries: 3,
                unique_secrets: 1,
                unique_values: 2,
                top_authors: vec![],
                top_files: vec![],
                type_breakdown: vec![],
            },
            secrets: vec![AnalysisSecret {
                file: ".env".to_string(),
                key: "password".to_string(),
                secret_type: "password".to_string(),
                change_count: 2,
                total_occurrences: 3,
                authors: vec!["Alice".to_string(), "Bob".to_string()],
                first_seen: "2024-01-01T00:00:00Z".to_string(),
                last_seen: "2024-03-01T00:00:00Z".to_string(),
                history: vec![AnalysisValueHistory {
                    value: "hunter2".to_string(),
                    masked_value: "hu***er2".to_string(),
                    occurrences: 2,
                    authors: vec!["Alice".to_string()],
                    first_seen: "2024-01-01T00:00:00Z".to_string(),
                    last_seen: "2024-02-01T00:00:00Z".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn export_csv_writes_bom_and_semicolon_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        export_csv(&sample_analysis(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains(".env;password;password;2;3;"));
    }

    #[test]
    fn days_active_computes_difference() {
        assert_eq!(days_active("2024-01-01T00:00:00Z", "2024-01-11T00:00:00Z"), 10);
    }

    #[test]
    fn truncate_list_appends_remainder_count() {
        let items: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let s = truncate_list(&items, 5);
        assert_eq!(s, "0, 1, 2, 3, 4 and 3 more");
    }

    #[test]
    fn generate_text_report_mentions_secret_key() {
        let report = generate_text_report(&sample_analysis(), 0);
        assert!(report.contains(".env:password"));
    }

    #[test]
    fn generate_text_report_caps_at_max_secrets() {
        let mut analysis = sample_analysis();
        let extra = analysis.secrets[0].clone();
        analysis.secrets.push(extra);
        let report = generate_text_report(&analysis, 1);
        assert_eq!(report.matches(".env:password").count(), 1);
        assert!(report.contains("and 1 more"));
    }
}
