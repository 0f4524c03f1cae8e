//! Configuration parsing and validation.
//!
//! Link Harness is configured via a TOML file (default: `config/lnk.toml`).
//! The configuration defines the lookup service endpoint, which link rules
//! are enabled, batch parallelism, backup placement, validator allowlist
//! extensions, retry policies and text replacements.
//!
//! # Example Configuration
//!
//! ```toml
//! [lookup]
//! url = "https://lookup.example.com/api/lookup"
//! timeout_secs = 60
//!
//! [links]
//! retarget_base = "https://thesource.example.com/content/"
//! auto_replace_titles = false
//!
//! [batch]
//! max_concurrency = 8
//!
//! [retry.network]
//! max_attempts = 4
//! base_delay_ms = 1000
//! max_delay_ms = 32000
//! backoff = "exponential"
//!
//! [[replacements]]
//! find = "Old Department"
//! replace = "New Department"
//! whole_word = true
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects bad values up front: both URLs must be absolute
//! http(s) URLs, `batch.max_concurrency` and every retry `max_attempts` must
//! be at least 1, and replacement patterns must be non-empty.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use link_harness_core::rules::RuleOptions;

use crate::retry::{RetryPolicies, RetryPolicy};
use crate::validate::Allowlist;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub lookup: LookupConfig,
    pub links: LinksConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub retry: RetryPolicies,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    pub url: String,
    /// Transport timeout for one request.
    #[serde(default = "default_lookup_timeout")]
    pub timeout_secs: u64,
    /// Added to `timeout_secs` to form the overall budget of one call.
    #[serde(default = "default_lookup_margin")]
    pub margin_secs: u64,
    /// Name of the JSON array field carrying the identifiers.
    #[serde(default = "default_request_field")]
    pub request_field: String,
}

fn default_lookup_timeout() -> u64 {
    60
}
fn default_lookup_margin() -> u64 {
    15
}
fn default_request_field() -> String {
    "Lookup_ID".to_string()
}

impl LookupConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + self.margin_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinksConfig {
    pub retarget_base: String,
    #[serde(default)]
    pub auto_replace_titles: bool,
    #[serde(default = "default_true")]
    pub report_title_changes: bool,
    #[serde(default = "default_true")]
    pub fix_content_ids: bool,
    #[serde(default = "default_true")]
    pub append_status_suffixes: bool,
    #[serde(default = "default_true")]
    pub prune_invisible: bool,
}

fn default_true() -> bool {
    true
}

impl LinksConfig {
    pub fn rule_options(&self) -> RuleOptions {
        RuleOptions {
            retarget_base: self.retarget_base.clone(),
            fix_content_ids: self.fix_content_ids,
            auto_replace_titles: self.auto_replace_titles,
            report_title_changes: self.report_title_changes,
            append_status_suffixes: self.append_status_suffixes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl BatchConfig {
    /// Worker count: `min(max_concurrency, cpus * 2)`, at least 1.
    pub fn effective_workers(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_concurrency.min(cpus * 2).max(1)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Backup directory; `None` places backups in `.lnk-backups` next to each file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_restore_timeout")]
    pub restore_timeout_secs: u64,
    #[serde(default = "default_restore_retry_timeout")]
    pub restore_retry_timeout_secs: u64,
}

fn default_restore_timeout() -> u64 {
    30
}
fn default_restore_retry_timeout() -> u64 {
    15
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            restore_timeout_secs: default_restore_timeout(),
            restore_retry_timeout_secs: default_restore_retry_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ValidationConfig {
    #[serde(default)]
    pub ignore_exact: Vec<String>,
    #[serde(default)]
    pub ignore_prefix: Vec<String>,
}

impl ValidationConfig {
    pub fn allowlist(&self) -> Allowlist {
        Allowlist::with_extra(&self.ignore_exact, &self.ignore_prefix)
    }
}

/// One find/replace pair applied to document text.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
    #[serde(default)]
    pub match_case: bool,
    #[serde(default)]
    pub whole_word: bool,
}

impl Config {
    /// Offline configuration for commands that never call the lookup service.
    pub fn minimal() -> Self {
        Self {
            lookup: LookupConfig {
                url: String::new(),
                timeout_secs: default_lookup_timeout(),
                margin_secs: default_lookup_margin(),
                request_field: default_request_field(),
            },
            links: LinksConfig {
                retarget_base: String::new(),
                auto_replace_titles: false,
                report_title_changes: true,
                fix_content_ids: true,
                append_status_suffixes: true,
                prune_invisible: true,
            },
            batch: BatchConfig::default(),
            backup: BackupConfig::default(),
            validation: ValidationConfig::default(),
            retry: RetryPolicies::default(),
            replacements: Vec::new(),
        }
    }

    /// Check value ranges. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        check_http_url("lookup.url", &self.lookup.url)?;
        check_http_url("links.retarget_base", &self.links.retarget_base)?;

        if self.lookup.timeout_secs == 0 {
            anyhow::bail!("lookup.timeout_secs must be > 0");
        }
        if self.lookup.request_field.trim().is_empty() {
            anyhow::bail!("lookup.request_field must not be empty");
        }
        if self.batch.max_concurrency < 1 {
            anyhow::bail!("batch.max_concurrency must be >= 1");
        }
        if self.backup.restore_timeout_secs == 0 || self.backup.restore_retry_timeout_secs == 0 {
            anyhow::bail!("backup restore timeouts must be > 0");
        }

        let policies: [(&str, &RetryPolicy); 3] = [
            ("file_io", &self.retry.file_io),
            ("package", &self.retry.package),
            ("network", &self.retry.network),
        ];
        for (name, policy) in policies {
            if policy.max_attempts < 1 {
                anyhow::bail!("retry.{}.max_attempts must be >= 1", name);
            }
            if policy.max_delay_ms < policy.base_delay_ms {
                anyhow::bail!("retry.{}.max_delay_ms must be >= base_delay_ms", name);
            }
        }

        for (i, r) in self.replacements.iter().enumerate() {
            if r.find.is_empty() {
                anyhow::bail!("replacements[{}].find must not be empty", i);
            }
        }
        Ok(())
    }
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .with_context(|| format!("{} is not a valid URL: '{}'", field, value))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("{} must be an http(s) URL, got scheme '{}'", field, other),
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    const MINIMAL: &str = r#"
[lookup]
url = "https://lookup.example.com/api"

[links]
retarget_base = "https://thesource.example.com/content/"
"#;

    fn parse(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_apply() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.lookup.budget(), Duration::from_secs(75));
        assert_eq!(config.lookup.request_field, "Lookup_ID");
        assert!(config.links.report_title_changes);
        assert!(!config.links.auto_replace_titles);
        assert!(config.links.prune_invisible);
        assert_eq!(config.batch.max_concurrency, 8);
        assert_eq!(config.backup.restore_timeout_secs, 30);
        assert_eq!(config.backup.restore_retry_timeout_secs, 15);
        assert_eq!(config.retry, RetryPolicies::default());
        assert!(config.replacements.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let toml = format!(
            "{}\n{}",
            MINIMAL,
            r#"
[batch]
max_concurrency = 2

[validation]
ignore_prefix = ["The element 'w:foo'"]

[retry.network]
max_attempts = 2
base_delay_ms = 10
max_delay_ms = 20
backoff = "fixed"

[[replacements]]
find = "Old"
replace = "New"
whole_word = true
"#
        );
        let config = parse(&toml).unwrap();
        assert_eq!(config.batch.max_concurrency, 2);
        assert_eq!(config.retry.network.backoff, Backoff::Fixed);
        assert_eq!(config.retry.file_io, RetryPolicy::file_io());
        assert!(config.validation.allowlist().is_ignorable("The element 'w:foo' is odd"));
        assert!(config.replacements[0].whole_word);
        assert!(!config.replacements[0].match_case);
        assert!(config.batch.effective_workers() <= 2);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_url = MINIMAL.replace("https://lookup.example.com/api", "ftp://x");
        assert!(parse(&bad_url).is_err());

        let bad_base = MINIMAL.replace("https://thesource.example.com/content/", "not a url");
        assert!(parse(&bad_base).is_err());

        let zero_workers = format!("{}\n[batch]\nmax_concurrency = 0\n", MINIMAL);
        assert!(parse(&zero_workers).is_err());

        let empty_find = format!("{}\n[[replacements]]\nfind = \"\"\nreplace = \"x\"\n", MINIMAL);
        assert!(parse(&empty_find).is_err());

        let zero_attempts = format!(
            "{}\n[retry.file_io]\nmax_attempts = 0\nbase_delay_ms = 1\nmax_delay_ms = 1\nbackoff = \"fixed\"\n",
            MINIMAL
        );
        assert!(parse(&zero_attempts).is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lnk.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(load_config(&path).is_ok());
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn example_config_matches_defaults() {
        let config = parse(include_str!("../config/lnk.example.toml")).unwrap();
        assert_eq!(config.retry, RetryPolicies::default());
        assert_eq!(config.backup.restore_timeout_secs, 30);
        assert!(config.backup.dir.is_none());
    }

    #[test]
    fn minimal_config_is_offline() {
        let config = Config::minimal();
        assert!(config.lookup.url.is_empty());
        assert!(config.validate().is_err());
    }
}
