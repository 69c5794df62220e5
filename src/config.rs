use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Folder holding one subfolder per session
    pub sessions: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sessions: "sessions".to_string(),
        }
    }
}

/// Pacing, retry schedule and completeness thresholds copied into every new session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Seconds between two items of a batch (default: 3)
    #[serde(default = "default_item_delay")]
    pub item_delay_secs: u64,
    /// Items between checkpoints (default: 5)
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    /// Wait before each retry phase, in minutes
    #[serde(default = "default_retry_phases")]
    pub retry_phase_minutes: Vec<u64>,
    /// Seconds between remaining-time reports while waiting (default: 30)
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
    /// Smallest raw report considered complete (default: 300000)
    #[serde(default = "default_min_report_bytes")]
    pub min_report_bytes: u64,
    /// Summaries must be longer than this many characters (default: 100)
    #[serde(default = "default_min_summary_chars")]
    pub min_summary_chars: usize,
    #[serde(default = "default_fetch_wait")]
    pub fetch_wait_secs: u64,
    /// Settle time for the single retry after an incomplete fetch
    #[serde(default = "default_fetch_extended_wait")]
    pub fetch_extended_wait_secs: u64,
}

fn default_item_delay() -> u64 {
    3
}

fn default_checkpoint_every() -> usize {
    5
}

fn default_retry_phases() -> Vec<u64> {
    vec![5, 10, 30, 60]
}

fn default_progress_interval() -> u64 {
    30
}

fn default_min_report_bytes() -> u64 {
    300_000 // 300 KB
}

fn default_min_summary_chars() -> usize {
    100
}

fn default_fetch_wait() -> u64 {
    10
}

fn default_fetch_extended_wait() -> u64 {
    15
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            item_delay_secs: default_item_delay(),
            checkpoint_every: default_checkpoint_every(),
            retry_phase_minutes: default_retry_phases(),
            progress_interval_secs: default_progress_interval(),
            min_report_bytes: default_min_report_bytes(),
            min_summary_chars: default_min_summary_chars(),
            fetch_wait_secs: default_fetch_wait(),
            fetch_extended_wait_secs: default_fetch_extended_wait(),
        }
    }
}

/// External scraper program driving the analytics web app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_scraper_program")]
    pub program: String,
    /// Arguments placed before the subcommand (e.g. a script path)
    #[serde(default)]
    pub args: Vec<String>,
    /// Upper bound for one scraper invocation (default: 600 = 10 min)
    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub headless: bool,
}

fn default_scraper_program() -> String {
    "brandscout-scraper".to_string()
}

fn default_scraper_timeout() -> u64 {
    600 // 10 minutes
}

fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            program: default_scraper_program(),
            args: Vec::new(),
            timeout_secs: default_scraper_timeout(),
            headless: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,
    /// Provider default when unset
    #[serde(default)]
    pub model: Option<String>,
    /// Report text is truncated to this many characters before prompting
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Transport retries for timeouts, 429 and 5xx responses
    #[serde(default = "default_llm_retries")]
    pub max_retries: usize,
}

fn default_max_input_chars() -> usize {
    200_000
}

fn default_llm_timeout() -> u64 {
    120 // 2 minutes
}

fn default_llm_retries() -> usize {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            max_input_chars: default_max_input_chars(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether session runs log to the session's logs folder (false = stderr)
    #[serde(default = "default_true")]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: default_true(),
        }
    }
}

impl Config {
    /// Project-local config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".brandscout/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Embedded defaults so brandscout runs without any config file
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/brandscout/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("brandscout").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with BRANDSCOUT_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("BRANDSCOUT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("pipeline.retry_phase_minutes")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Write the effective config to `.brandscout/config.toml`
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::project_config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(&config_path, toml_str).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get absolute path to the sessions root
    pub fn sessions_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.paths.sessions);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            pipeline: PipelineConfig::default(),
            scraper: ScraperConfig::default(),
            llm: LlmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
