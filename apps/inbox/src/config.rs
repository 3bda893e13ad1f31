use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use url::Url;

use crate::messaging::sla::SlaThresholds;
use crate::messaging::store::DEFAULT_PAGE_SIZE;

#[derive(Clone, Debug, Parser)]
#[command(version, about = "Watches a patient conversation and reports reply SLA status", long_about = None)]
pub struct Config {
    /// Conversation to watch
    #[arg(long = "conversation", env = "INBOX_CONVERSATION_ID")]
    pub conversation_id: String,

    #[command(flatten)]
    pub api: ApiConfig,

    #[command(flatten)]
    pub sla: SlaConfig,

    #[command(flatten)]
    pub logging: LoggingConfig,

    /// Messages per history page
    #[arg(long, env = "INBOX_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Seconds between refreshes of the newest messages
    #[arg(long, env = "INBOX_POLL_SECS", default_value_t = 15)]
    pub poll_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ApiConfig {
    /// Base URL of the conversation API
    #[arg(long = "api-url", env = "INBOX_API_URL")]
    pub base_url: Url,

    /// Bearer token sent with every request
    #[arg(long = "api-token", env = "INBOX_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long = "request-timeout-secs", env = "INBOX_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct SlaConfig {
    /// Seconds without a reply before a conversation is flagged
    #[arg(long = "sla-warn-secs", env = "INBOX_SLA_WARN_SECS", default_value_t = 420)]
    pub warn_secs: u64,

    /// Seconds without a reply before the SLA is breached
    #[arg(long = "sla-breach-secs", env = "INBOX_SLA_BREACH_SECS", default_value_t = 600)]
    pub breach_secs: u64,

    /// Seconds between SLA re-evaluations
    #[arg(long = "sla-tick-secs", env = "INBOX_SLA_TICK_SECS", default_value_t = 30)]
    pub tick_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct LoggingConfig {
    /// Default filter when neither INBOX_LOG_LEVEL nor RUST_LOG is set
    #[arg(long = "log-level", default_value = "info")]
    pub level: String,

    #[arg(long = "log-format", env = "INBOX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub format: LogFormat,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.conversation_id.trim().is_empty() {
            return Err("conversation id must not be empty".to_string());
        }
        if self.page_size == 0 {
            return Err("page size must be at least 1".to_string());
        }
        if self.poll_secs == 0 || self.sla.tick_secs == 0 || self.api.request_timeout_secs == 0 {
            return Err("intervals and timeouts must be positive".to_string());
        }
        self.sla.thresholds().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SlaConfig {
    pub fn thresholds(&self) -> Result<SlaThresholds, crate::messaging::error::MessagingError> {
        SlaThresholds::new(
            Duration::from_secs(self.warn_secs),
            Duration::from_secs(self.breach_secs),
        )
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reply_policy() {
        let config = Config::try_parse_from([
            "inbox",
            "--conversation",
            "conv-1",
            "--api-url",
            "https://api.example.test/v1/",
        ])
        .expect("parse config");

        assert!(config.validate().is_ok());
        assert_eq!(config.page_size, 50);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.sla.tick(), Duration::from_secs(30));
        assert_eq!(config.sla.thresholds().expect("thresholds"), SlaThresholds::default());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.api.token.is_none());
    }

    #[test]
    fn rejects_warning_after_breach() {
        let config = Config::try_parse_from([
            "inbox",
            "--conversation",
            "conv-1",
            "--api-url",
            "https://api.example.test/",
            "--sla-warn-secs",
            "900",
            "--sla-breach-secs",
            "600",
        ])
        .expect("parse config");

        let err = config.validate().expect_err("inverted thresholds");
        assert!(err.contains("must not come after breach"));
    }

    #[test]
    fn rejects_malformed_api_url() {
        let parsed = Config::try_parse_from([
            "inbox",
            "--conversation",
            "conv-1",
            "--api-url",
            "not a url",
        ]);
        assert!(parsed.is_err());
    }
}
