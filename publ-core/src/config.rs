//! Configuration parsing and management.

use chrono::FixedOffset;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid timezone offset: {0}")]
    InvalidTimezone(String),

    #[error("Invalid path regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Main configuration struct matching the publ.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub site: SiteConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Fixed UTC offset ("+HH:MM") applied to dates that carry no offset
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Seconds to wait for filesystem activity to settle before indexing
    #[serde(default = "default_wait_time")]
    pub index_wait_time: f64,

    /// Optional periodic full rescan, in seconds
    #[serde(default)]
    pub index_rescan_interval: Option<u64>,

    #[serde(default)]
    pub markdown: MarkdownConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub path_regexes: Vec<PathRegexConfig>,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_timezone() -> String {
    String::from("+00:00")
}

fn default_wait_time() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub title: String,

    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_content")]
    pub content: PathBuf,

    #[serde(default = "default_templates")]
    pub templates: PathBuf,

    #[serde(default = "default_static")]
    pub r#static: PathBuf,

    #[serde(default)]
    pub cache: Option<PathBuf>,
}

fn default_content() -> PathBuf {
    PathBuf::from("content")
}

fn default_templates() -> PathBuf {
    PathBuf::from("templates")
}

fn default_static() -> PathBuf {
    PathBuf::from("static")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            content: default_content(),
            templates: default_templates(),
            r#static: default_static(),
            cache: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownConfig {
    #[serde(default = "default_true")]
    pub smartquotes: bool,

    #[serde(default = "default_true")]
    pub code_highlight: bool,

    #[serde(default)]
    pub toc_max_level: Option<u32>,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            smartquotes: true,
            code_highlight: true,
            toc_max_level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_page_cache_size")]
    pub page_cache_size: usize,
}

fn default_port() -> u16 {
    5000
}

fn default_page_cache_size() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            page_cache_size: default_page_cache_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_user_header")]
    pub user_header: String,

    #[serde(default = "default_groups_header")]
    pub groups_header: String,

    #[serde(default = "default_login_url")]
    pub login_url: String,
}

fn default_user_header() -> String {
    String::from("X-Remote-User")
}

fn default_groups_header() -> String {
    String::from("X-Remote-Groups")
}

fn default_login_url() -> String {
    String::from("/_login")
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            groups_header: default_groups_header(),
            login_url: default_login_url(),
        }
    }
}

/// A regex-based redirect rule, consulted after path aliases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRegexConfig {
    pub pattern: String,
    pub target: String,

    #[serde(default)]
    pub permanent: bool,
}

/// A compiled [`PathRegexConfig`]
#[derive(Debug, Clone)]
pub struct PathRegex {
    pub regex: Regex,
    pub target: String,
    pub permanent: bool,
}

impl PathRegex {
    /// Expand the target for `path`, if the rule matches
    pub fn apply(&self, path: &str) -> Option<String> {
        let captures = self.regex.captures(path)?;
        let mut expanded = String::new();
        // Targets use `\1`-style backreferences
        let template = BACKREF.replace_all(&self.target, "$${$1}");
        captures.expand(&template, &mut expanded);
        Some(expanded)
    }
}

static BACKREF: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"\\(\d+)").unwrap());

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Parse configuration from YAML text; paths stay relative to the working directory
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.timezone()?;
        config.compiled_path_regexes()?;
        Ok(config)
    }

    /// Build a config rooted at `root` with every other setting defaulted
    pub fn for_root(title: &str, root: &Path) -> Self {
        Self {
            site: SiteConfig {
                title: title.to_string(),
                url: String::new(),
            },
            paths: PathsConfig::default(),
            timezone: default_timezone(),
            index_wait_time: default_wait_time(),
            index_rescan_interval: None,
            markdown: MarkdownConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            path_regexes: Vec::new(),
            config_path: Some(root.join("publ.yml")),
        }
    }

    /// Get the content directory, resolved relative to config file
    pub fn content_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.content)
    }

    /// Get the user template directory, resolved relative to config file
    pub fn template_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.templates)
    }

    /// Get the static file directory, resolved relative to config file
    pub fn static_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.r#static)
    }

    /// Where the index is persisted between runs, if anywhere
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.paths.cache.as_ref().map(|p| self.resolve_path(p))
    }

    /// The fixed offset applied to naive timestamps
    pub fn timezone(&self) -> Result<FixedOffset, ConfigError> {
        parse_offset(&self.timezone).ok_or_else(|| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    /// Compile the configured redirect rules
    pub fn compiled_path_regexes(&self) -> Result<Vec<PathRegex>, ConfigError> {
        self.path_regexes
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| ConfigError::InvalidRegex {
                    pattern: rule.pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(PathRegex {
                    regex,
                    target: rule.target.clone(),
                    permanent: rule.permanent,
                })
            })
            .collect()
    }

    /// Site URL without a trailing slash, for building absolute links
    pub fn site_root(&self) -> &str {
        self.site.url.trim_end_matches('/')
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            if let Some(parent) = config_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }
}

/// Parse "Z", "UTC", "+HH:MM", "-HHMM" or "+HH" into an offset
pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
