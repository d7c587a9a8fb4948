//! Pattern & Filter Engine — extraction regexes, value/file ignore rules.
//!
//! Default patterns, keyword groups, and ignore lists are ported from the
//! reference Python implementation's `default_config()`; the distilled spec
//! leaves concrete defaults unspecified, so the original is authoritative.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(
        rename = "minSecretLength",
        alias = "min_secret_length",
        default = "default_min_len"
    )]
    pub min_secret_length: usize,
    #[serde(
        rename = "maxSecretLength",
        alias = "max_secret_length",
        default = "default_max_len"
    )]
    pub max_secret_length: usize,
    #[serde(rename = "caseSensitive", alias = "case_sensitive", default)]
    pub case_sensitive: bool,
}

fn default_min_len() -> usize {
    3
}
fn default_max_len() -> usize {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self { min_secret_length: 3, max_secret_length: 500, case_sensitive: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPattern {
    pub name: String,
    pub pattern: String,
    #[serde(rename = "valueGroup", alias = "value_group")]
    pub value_group: usize,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordGroup {
    pub name: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "extractionPatterns")]
    pub extraction_patterns: Vec<ExtractionPattern>,
    pub keywords: Vec<KeywordGroup>,
    #[serde(rename = "ignoredValues")]
    pub ignored_values: Vec<String>,
    #[serde(rename = "ignoredFiles")]
    pub ignored_files: Vec<String>,
    #[serde(rename = "excludeBinaryExtensions")]
    pub exclude_binary_extensions: Vec<String>,
    pub settings: Settings,
}

const URL_PREFIXES: &[&str] = &["http://", "https://", "ftp://", "ssh://", "file://", "mailto:"];
const COMMON_KEYWORDS: &[&str] =
    &["password", "secret", "token", "key", "credential", "auth", "pass", "pwd"];

impl Config {
    /// All keywords, flattened from every keyword group, in declared order.
    pub fn all_keywords(&self) -> Vec<String> {
        self.keywords.iter().flat_map(|g| g.patterns.iter().cloned()).collect()
    }

    /// Type name (keyword group) that owns `key`, or `"unknown"`.
    pub fn type_for_key(&self, key: &str) -> String {
        for group in &self.keywords {
            if group.patterns.iter().any(|p| p == key) {
                return group.name.clone();
            }
        }
        "unknown".to_string()
    }

    pub fn should_ignore_value(&self, value: &str) -> bool {
        let len = value.chars().count();
        if len < self.settings.min_secret_length || len > self.settings.max_secret_length {
            return true;
        }

        if looks_like_code(value) {
            return true;
        }

        let value_lower = value.to_lowercase();
        for prefix in URL_PREFIXES {
            if value_lower.starts_with(prefix) {
                return true;
            }
        }

        for kw in COMMON_KEYWORDS {
            if value_lower == *kw {
                return true;
            }
        }

        for ignored in &self.ignored_values {
            let (needle, haystack) = if self.settings.case_sensitive {
                (ignored.clone(), value.to_string())
            } else {
                (ignored.to_lowercase(), value_lower.clone())
            };
            if haystack.contains(&needle) {
                return true;
            }
        }

        false
    }

    pub fn should_ignore_file(&self, file_path: &str) -> bool {
        self.ignored_files.iter().any(|pattern| match_file_pattern(pattern, file_path))
    }

    pub fn compile(&self) -> CompiledConfig {
        let mut patterns = Vec::new();
        for ep in &self.extraction_patterns {
            match Regex::new(&ep.pattern) {
                Ok(regex) => {
                    patterns.push(CompiledPattern { name: ep.name.clone(), regex, value_group: ep.value_group })
                }
                Err(_) => continue,
            }
        }
        CompiledConfig { config: self.clone(), patterns, keywords: self.all_keywords() }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::ParseError(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn match_file_pattern(pattern: &str, path: &str) -> bool {
    if pattern.contains("**") {
        let prefix = pattern.split("**").next().unwrap_or("");
        return path.starts_with(prefix);
    }
    if let Some(ext) = pattern.strip_prefix('*') {
        return path.ends_with(ext);
    }
    if pattern.ends_with('/') {
        return path.starts_with(pattern);
    }
    path == pattern
}

fn looks_like_code(value: &str) -> bool {
    if value.contains('(') && value.contains(')') {
        return true;
    }
    if value.contains('[') && value.contains(']') {
        return true;
    }
    if value.starts_with('{') || value.ends_with('}') {
        return true;
    }
    if value.matches('.').count() > 2 {
        return true;
    }
    if value.matches('.').count() == 1 {
        let parts: Vec<&str> = value.split('.').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            let first_char = parts[1].chars().next().unwrap();
            if first_char.is_ascii_uppercase() {
                let is_simple_ident =
                    parts[0].chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if is_simple_ident {
                    return true;
                }
            }
        }
    }
    const CODE_KEYWORDS: &[&str] =
        &["func ", "return ", "if ", "for ", "range ", "make(", "append(", "new(", "len("];
    CODE_KEYWORDS.iter().any(|kw| value.starts_with(kw))
}

// ---------------------------------------------------------------------------
// Compiled form consumed by the Scanner
// ---------------------------------------------------------------------------

pub struct CompiledPattern {
    #[allow(dead_code)]
    pub name: String,
    pub regex: Regex,
    pub value_group: usize,
}

pub struct CompiledConfig {
    pub config: Config,
    pub patterns: Vec<CompiledPattern>,
    pub keywords: Vec<String>,
}

impl CompiledConfig {
    pub fn all_keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Try every compiled pattern in order. On a match whose value is
    /// rejected by `should_ignore_value`, keep trying later patterns instead
    /// of giving up on the line.
    pub fn extract_key_value(&self, line: &str) -> Option<(String, String)> {
        for pattern in &self.patterns {
            let Some(captures) = pattern.regex.captures(line) else { continue };
            let Some(key) = captures.get(1) else { continue };
            let Some(value) = captures.get(pattern.value_group) else { continue };
            let value_str = value.as_str();
            if self.config.should_ignore_value(value_str) {
                continue;
            }
            return Some((key.as_str().to_string(), value_str.to_string()));
        }
        None
    }

    pub fn should_ignore_value(&self, value: &str) -> bool {
        self.config.should_ignore_value(value)
    }

    pub fn should_ignore_file(&self, path: &str) -> bool {
        self.config.should_ignore_file(path)
    }

    pub fn type_for_key(&self, key: &str) -> String {
        self.config.type_for_key(key)
    }
}

// ---------------------------------------------------------------------------
// Default configuration (ported from original_source/python/gitsecret/config.py)
// ---------------------------------------------------------------------------

pub fn default_config() -> Config {
    Config {
        extraction_patterns: vec![
            ExtractionPattern {
                name: "key_equals_value".to_string(),
                pattern: r"^\s*([a-zA-Z_][\w.$/-]*)\s*=\s*(.+)$".to_string(),
                value_group: 2,
                description: "Standard key=value format".to_string(),
            },
            ExtractionPattern {
                name: "yaml_colon".to_string(),
                pattern: r#"^\s*([a-zA-Z_][\w._-]*)\s*:\s+['"]?([^'"\n=]+)['"]?\s*$"#.to_string(),
                value_group: 2,
                description: "YAML key: value format".to_string(),
            },
            ExtractionPattern {
                name: "json_quoted".to_string(),
                pattern: r#""([a-zA-Z_][\w._]*)"\s*:\s*"([^"]+)""#.to_string(),
                value_group: 2,
                description: "JSON \"key\": \"value\" format".to_string(),
            },
            ExtractionPattern {
                name: "export_env".to_string(),
                pattern: r#"^\s*export\s+([A-Z_][A-Z0-9_]*)\s*=\s*['"]?([^'"\n]+)['"]?"#.to_string(),
                value_group: 2,
                description: "Shell export KEY=value format".to_string(),
            },
        ],
        keywords: vec![
            KeywordGroup {
                name: "password".to_string(),
                patterns: vec!["password", "passwd", "pwd", "pass", "mot_de_passe"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "Passwords".to_string(),
            },
            KeywordGroup {
                name: "secret".to_string(),
                patterns: vec!["secret", "client_secret", "app_secret", "api_secret"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "Application secrets".to_string(),
            },
            KeywordGroup {
                name: "api_key".to_string(),
                patterns: vec!["api_key", "apikey", "api-key"].into_iter().map(String::from).collect(),
                description: "API keys".to_string(),
            },
            KeywordGroup {
                name: "token".to_string(),
                patterns: vec!["token", "access_token", "auth_token", "bearer"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "Authentication tokens".to_string(),
            },
            KeywordGroup {
                name: "credentials".to_string(),
                patterns: vec!["credential", "credentials", "auth"].into_iter().map(String::from).collect(),
                description: "Credentials".to_string(),
            },
            KeywordGroup {
                name: "private_key".to_string(),
                patterns: vec!["private_key", "privatekey", "private-key", "rsa_private"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "Private keys".to_string(),
            },
            KeywordGroup {
                name: "connection_string".to_string(),
                patterns: vec![
                    "connection_string",
                    "connectionstring",
                    "conn_str",
                    "database_url",
                    "db_url",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                description: "Connection strings".to_string(),
            },
            KeywordGroup {
                name: "oauth".to_string(),
                patterns: vec!["oauth", "client_id", "client_secret", "refresh_token"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "OAuth".to_string(),
            },
            KeywordGroup {
                name: "aws".to_string(),
                patterns: vec!["aws_access_key", "aws_secret", "aws_key"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "AWS credentials".to_string(),
            },
            KeywordGroup {
                name: "encryption".to_string(),
                patterns: vec!["encryption_key", "encrypt_key", "aes_key", "cipher"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                description: "Encryption keys".to_string(),
            },
        ],
        ignored_values: vec![
            "<empty>", "<none>", "<null>", "null", "nil", "undefined", "none", "N/A", "${", "{{",
            "%s", "<value>", "<your_", "[your_", "PLACEHOLDER", "your_", "YOUR_", "example",
            "EXAMPLE", "sample", "xxx", "XXX", "***", "----", "____", "REMOVED", "REDACTED",
            "HIDDEN", "MASKED", "changeme", "CHANGEME", "change_me", "TODO", "FIXME", "default",
            "DEFAULT",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        ignored_files: vec![
            "*.md", "*.txt", "*.rst", "*.lock", "*.go", "*.js", "*.ts", "*.jsx", "*.tsx", "*.py",
            "*.java", "*.rb", "*.php", "*.c", "*.cpp", "*.h", "*.cs", "*.swift", "*.kt", "*.rs",
            "*.scala", "*.json", "*.jsonl", "node_modules/**", "vendor/**", ".git/**", "*.min.js",
            "*.min.css",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        exclude_binary_extensions: vec![
            ".jar", ".war", ".zip", ".tar", ".gz", ".rar", ".png", ".jpg", ".jpeg", ".gif", ".ico",
            ".svg", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".exe", ".dll", ".so", ".dylib",
            ".class", ".pyc", ".o", ".a",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        settings: Settings::default(),
    }
}

/// Load configuration from `path`, or return built-in defaults when `path`
/// is `None`. Does not auto-detect a config file location.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        None => Ok(default_config()),
        Some(p) => load_from_file(p),
    }
}

/// Try common config file locations, falling back to defaults on any
/// failure (missing file, parse error).
pub fn load_auto() -> Config {
    let mut locations = vec![Path::new("patterns.json").to_path_buf(), Path::new("config/patterns.json").to_path_buf()];
    if let Ok(home) = std::env::var("HOME") {
        locations.push(Path::new(&home).join(".config/git-secret-scanner/patterns.json"));
    }

    for loc in locations {
        if loc.exists() {
            if let Ok(cfg) = load_from_file(&loc) {
                return cfg;
            }
        }
    }
    default_config()
}

fn load_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::InputMissing(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| Error::ParseError(e.to_string()))?;

    let mut config = default_config();

    if let Some(v) = raw.get("extractionPatterns") {
        if let Ok(patterns) = serde_json::from_value::<Vec<ExtractionPattern>>(v.clone()) {
            config.extraction_patterns = patterns;
        }
    }
    if let Some(v) = raw.get("keywords") {
        if let Ok(keywords) = serde_json::from_value::<Vec<KeywordGroup>>(v.clone()) {
            config.keywords = keywords;
        }
    }
    if let Some(v) = raw.get("ignoredValues") {
        if let Ok(values) = serde_json::from_value::<Vec<String>>(v.clone()) {
            config.ignored_values = values;
        }
    }
    if let Some(v) = raw.get("ignoredFiles") {
        if let Ok(values) = serde_json::from_value::<Vec<String>>(v.clone()) {
            config.ignored_files = values;
        }
    }
    if let Some(v) = raw.get("excludeBinaryExtensions") {
        if let Ok(values) = serde_json::from_value::<Vec<String>>(v.clone()) {
            config.exclude_binary_extensions = values;
        }
    }
    if let Some(v) = raw.get("settings") {
        if let Ok(settings) = serde_json::from_value::<Settings>(v.clone()) {
            config.settings = settings;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_compiles_all_patterns() {
        let compiled = default_config().compile();
        assert_eq!(compiled.patterns.len(), 4);
    }

    #[test]
    fn extract_key_value_basic() {
        let compiled = default_config().compile();
        let (key, value) = compiled.extract_key_value("password=hunter2").unwrap();
        assert_eq!(key, "password");
        assert_eq!(value, "hunter2");
    }

    #[test]
    fn extract_key_value_rejects_code_shape() {
        let compiled = default_config().compile();
        assert!(compiled.extract_key_value("token=getToken()").is_none());
    }

    #[test]
    fn should_ignore_file_glob_star_ext() {
        let cfg = default_config();
        assert!(cfg.should_ignore_file("README.md"));
        assert!(!cfg.should_ignore_file("README.env"));
    }

    #[test]
    fn should_ignore_file_prefix_double_star() {
        let cfg = default_config();
        assert!(cfg.should_ignore_file("node_modules/foo/bar.js"));
    }

    #[test]
    fn should_ignore_value_url() {
        let cfg = default_config();
        assert!(cfg.should_ignore_value("https://example.com/secret"));
    }

    #[test]
    fn should_ignore_value_placeholder_substring() {
        let cfg = default_config();
        assert!(cfg.should_ignore_value("${SOME_VAR}"));
    }

    #[test]
    fn invalid_regex_is_skipped_silently() {
        let mut cfg = default_config();
        cfg.extraction_patterns.push(ExtractionPattern {
            name: "broken".to_string(),
            pattern: "(unclosed".to_string(),
            value_group: 1,
            description: String::new(),
        });
        let compiled = cfg.compile();
        assert_eq!(compiled.patterns.len(), 4);
    }
}
