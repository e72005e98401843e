use crate::error::ConfigError;
use crate::tabs::RenderOptions;
use crate::title::TitleTemplate;
use crate::version::{PythonVersion, VersionRange};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the pytabs preprocessor.
///
/// Deserialized from the `[preprocessor.pytabs]` section of `book.toml`, or
/// from a standalone TOML file for `mdbook-pytabs transform`.
///
/// # Example
///
/// ```toml
/// [preprocessor.pytabs]
/// min_version = "3.8"
/// max_version = "3.12"
/// tab_title_template = "Python {min_version} and above"
///
/// [preprocessor.pytabs.upgrader]
/// command = "${HOME}/.local/bin/ruff"
/// timeout_secs = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PyTabsConfig {
    /// Lowest version a reader may be using; its tab shows the source as written
    pub min_version: PythonVersion,

    /// Highest version to generate a tab for
    pub max_version: PythonVersion,

    /// Tab title, `{min_version}`, `{major}` and `{minor}` are substituted
    pub tab_title_template: String,

    /// Disable the persistent cache
    pub no_cache: bool,

    /// Cache location, relative to the book root (supports ${VAR} expansion)
    pub cache_dir: Option<PathBuf>,

    /// Only transform `pytabs-code-block` / `pytabs-literalinclude` directives
    pub compat_mode: bool,

    /// Fence and directive language tags that are upgraded
    pub languages: Vec<String>,

    /// Which tab is selected when a page loads
    pub default_tab: DefaultTab,

    /// Emit the newest version first
    pub reverse_order: bool,

    /// What to do when a fragment cannot be upgraded
    pub on_upgrade_failure: FailurePolicy,

    pub upgrader: UpgraderConfig,

    /// Worker threads for multi-file processing, defaults to the CPU count
    pub jobs: Option<usize>,
}

impl Default for PyTabsConfig {
    fn default() -> Self {
        Self {
            min_version: PythonVersion::new(3, 7),
            max_version: PythonVersion::new(3, 11),
            tab_title_template: "Python {min_version}+".to_string(),
            no_cache: false,
            cache_dir: None,
            compat_mode: false,
            languages: vec!["python".to_string(), "py".to_string()],
            default_tab: DefaultTab::default(),
            reverse_order: false,
            on_upgrade_failure: FailurePolicy::default(),
            upgrader: UpgraderConfig::default(),
            jobs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultTab {
    #[default]
    Highest,
    Lowest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep the original block and report a warning
    #[default]
    Warn,
    /// Fail the build
    Fail,
}

/// The external modernization tool.
///
/// # Security
///
/// The command is validated before use: no shell metacharacters
/// and no parent directory traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgraderConfig {
    /// Executable (supports ${VAR} environment variable expansion)
    pub command: String,

    /// Give up on a single invocation after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for UpgraderConfig {
    fn default() -> Self {
        Self {
            command: "ruff".to_string(),
            timeout_secs: None,
        }
    }
}

impl UpgraderConfig {
    /// Validate the configuration for security and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCommand {
            command: self.command.clone(),
            reason,
        };

        if self.command.is_empty() {
            return Err(invalid("command cannot be empty".to_string()));
        }

        let dangerous_chars = [';', '|', '&', '`', '\n', '\r'];
        for ch in dangerous_chars {
            if self.command.contains(ch) {
                return Err(invalid(format!(
                    "contains invalid character '{}'",
                    ch.escape_default()
                )));
            }
        }

        let command_path = Path::new(&self.command);
        for component in command_path.components() {
            if matches!(component, std::path::Component::ParentDir) {
                return Err(invalid("cannot contain '..'".to_string()));
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Validated, ready-to-use form of [`PyTabsConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub range: VersionRange,
    pub title: TitleTemplate,
    pub languages: Vec<String>,
    pub render: RenderOptions,
    pub on_upgrade_failure: FailurePolicy,
    pub compat_mode: bool,
}

impl PyTabsConfig {
    /// Parse configuration from mdbook PreprocessorContext and expand environment variables
    pub fn from_preprocessor_context(
        ctx: &mdbook::preprocess::PreprocessorContext,
    ) -> Result<Self> {
        let mut config: PyTabsConfig =
            if let Some(config_value) = ctx.config.get("preprocessor.pytabs") {
                config_value
                    .clone()
                    .try_into()
                    .context("Invalid [preprocessor.pytabs] section")?
            } else {
                Self::default()
            };
        config.expand_env();
        Ok(config)
    }

    /// Parse configuration from a standalone TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: PyTabsConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.expand_env();
        Ok(config)
    }

    fn expand_env(&mut self) {
        self.upgrader.command = expand_env_vars(&self.upgrader.command);
        if let Some(dir) = &self.cache_dir {
            self.cache_dir = Some(PathBuf::from(expand_env_vars(&dir.to_string_lossy())));
        }
    }

    /// Check every option that affects rendering. Nothing is processed
    /// unless this succeeds.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let range = VersionRange::new(self.min_version, self.max_version)?;
        let title = TitleTemplate::parse(&self.tab_title_template)?;
        if self.languages.iter().all(|l| l.trim().is_empty()) {
            return Err(ConfigError::NoLanguages);
        }
        self.upgrader.validate()?;

        Ok(Settings {
            range,
            title,
            languages: self.languages.clone(),
            render: RenderOptions {
                default_tab: self.default_tab,
                reverse_order: self.reverse_order,
            },
            on_upgrade_failure: self.on_upgrade_failure,
            compat_mode: self.compat_mode,
        })
    }

    /// Directory holding persisted cache entries.
    ///
    /// An explicit `cache_dir` is resolved against `root`. Otherwise each
    /// project gets its own subdirectory of [`default_cache_dir`], so that
    /// eviction in one book never removes another book's entries.
    pub fn resolve_cache_dir(&self, root: &Path) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(root.join(dir));
        }
        project_cache_dir(root)
    }

    pub fn worker_count(&self) -> usize {
        self.jobs.filter(|&n| n > 0).unwrap_or_else(num_cpus::get)
    }
}

/// Platform cache directory for this tool.
pub fn default_cache_dir() -> Result<PathBuf> {
    // Check for XDG_CACHE_HOME environment variable first (respects XDG standard on all platforms)
    if let Ok(xdg_cache_home) = env::var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg_cache_home).join("mdbook-pytabs"));
    }

    let proj_dirs = ProjectDirs::from("", "", "mdbook-pytabs")
        .context("Failed to determine project directories")?;
    Ok(proj_dirs.cache_dir().to_path_buf())
}

/// Default cache directory of the project rooted at `root`.
pub fn project_cache_dir(root: &Path) -> Result<PathBuf> {
    Ok(default_cache_dir()?.join(project_id(root)))
}

/// First 16 hex digits of the SHA-256 of the canonical project root.
fn project_id(root: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Expand environment variables in a string
/// Supports ${VAR_NAME} syntax
/// This function processes the string in a single pass to avoid re-processing expanded values
fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_name = String::new();
            let mut found_close = false;

            for ch in chars.by_ref() {
                if ch == '}' {
                    found_close = true;
                    break;
                }
                var_name.push(ch);
            }

            if found_close {
                match env::var(&var_name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        log::warn!(
                            "Environment variable '{}' not found, leaving unexpanded",
                            var_name
                        );
                        result.push_str("${");
                        result.push_str(&var_name);
                        result.push('}');
                    }
                }
            } else {
                // No closing brace found, treat as literal
                result.push_str("${");
                result.push_str(&var_name);
            }
        } else {
            result.push(ch);
        }
    }

    result
}
