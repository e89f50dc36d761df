use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file structure for adoscan.
///
/// Holds the settings that rarely change between scans (API endpoints, retry
/// policy, expected build settings). Command line flags override these values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Azure DevOps connection settings
    #[serde(default)]
    pub azure_devops: AzureDevOpsConfig,

    /// Scan behaviour
    #[serde(default)]
    pub scan: ScanConfig,

    /// Result document settings
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AzureDevOpsConfig {
    /// Base URL of the REST API, the organization is appended to it
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Base URL of the identity (graph) API
    #[serde(default = "default_vssps_base_url")]
    pub vssps_base_url: String,

    /// Retries for transient failures (429 and 5xx)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay, doubled on every further attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Page size for `$top`/`$skip` paginated endpoints
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// How far back commits are collected
    #[serde(default = "default_commit_lookback_days")]
    pub commit_lookback_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScanConfig {
    /// Branches previewed per pipeline: -1 all, 0 default branch only, N top N plus default
    #[serde(default)]
    pub top_branches: i64,

    /// Expected value of each project build setting
    #[serde(default = "default_build_settings_expectations")]
    pub build_settings_expectations: IndexMap<String, bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory the result document is written to
    pub results_dir: Option<PathBuf>,

    /// Pretty-print the result document
    #[serde(default)]
    pub pretty: bool,
}

impl Default for AzureDevOpsConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            vssps_base_url: default_vssps_base_url(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            page_size: default_page_size(),
            commit_lookback_days: default_commit_lookback_days(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            top_branches: 0,
            build_settings_expectations: default_build_settings_expectations(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://dev.azure.com/".to_string()
}

fn default_vssps_base_url() -> String {
    "https://vssps.dev.azure.com/".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    100
}

fn default_commit_lookback_days() -> i64 {
    90
}

fn default_build_settings_expectations() -> IndexMap<String, bool> {
    [
        ("enforceReferencedRepoScopedToken", true),
        ("disableClassicPipelineCreation", true),
        ("disableClassicBuildPipelineCreation", true),
        ("disableClassicReleasePipelineCreation", true),
        ("forkProtectionEnabled", true),
        ("buildsEnabledForForks", false),
        ("enforceJobAuthScopeForForks", true),
        ("enforceNoAccessToSecretsFromForks", true),
        ("isCommentRequiredForPullRequest", true),
        ("requireCommentsForNonTeamMembersOnly", false),
        ("requireCommentsForNonTeamMemberAndNonContributors", true),
        ("enableShellTasksArgsSanitizing", true),
        ("enableShellTasksArgsSanitizingAudit", true),
        ("disableImpliedYAMLCiTrigger", true),
        ("statusBadgesArePrivate", true),
        ("enforceSettableVar", true),
        ("enforceJobAuthScope", true),
        ("enforceJobAuthScopeForReleases", true),
        ("publishPipelineMetadata", true),
    ]
    .into_iter()
    .map(|(key, expected)| (key.to_string(), expected))
    .collect()
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./adoscan.toml, ./adoscan.json, ./adoscan.yaml, ./adoscan.yml
    /// 3. `<user config dir>/adoscan/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["adoscan.toml", "adoscan.json", "adoscan.yaml", "adoscan.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        if let Some(user_config) = dirs::config_dir().map(|dir| dir.join("adoscan").join("config.toml")) {
            if user_config.exists() {
                return Self::load_from_path(&user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.azure_devops.api_base_url, "https://dev.azure.com/");
        assert_eq!(config.azure_devops.commit_lookback_days, 90);
        assert_eq!(config.azure_devops.page_size, 100);
        assert_eq!(config.scan.top_branches, 0);
        assert_eq!(config.scan.build_settings_expectations.len(), 19);
        assert_eq!(
            config.scan.build_settings_expectations.get("buildsEnabledForForks"),
            Some(&false)
        );
        assert!(!config.output.pretty);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[azure-devops]
api-base-url = "https://ado.example.com/"
max-retries = 2
commit-lookback-days = 30

[scan]
top-branches = -1

[output]
results-dir = "/tmp/adoscan"
pretty = true
"#;
        write!(temp_file, "{toml_content}").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.azure_devops.api_base_url, "https://ado.example.com/");
        assert_eq!(config.azure_devops.max_retries, 2);
        assert_eq!(config.azure_devops.commit_lookback_days, 30);
        assert_eq!(config.azure_devops.page_size, 100);
        assert_eq!(config.scan.top_branches, -1);
        assert_eq!(config.output.results_dir, Some(PathBuf::from("/tmp/adoscan")));
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_json_config_overrides_expectations() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "scan": {
    "build-settings-expectations": { "enforceJobAuthScope": true }
  }
}"#;
        write!(temp_file, "{json_content}").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.scan.build_settings_expectations.len(), 1);
        assert_eq!(config.azure_devops.vssps_base_url, "https://vssps.dev.azure.com/");
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yml").unwrap();
        write!(temp_file, "azure-devops:\n  page-size: 50\n").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.azure_devops.page_size, 50);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = Config::load(Some(Path::new("does-not-exist.toml")));
        assert!(result.is_err());
    }
}
