use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use uuid::Uuid;

use crate::config::{LogFormat, LoggingConfig};

static SESSION_TRACE_ID: OnceLock<String> = OnceLock::new();

/// Installs the global subscriber. The filter comes from `INBOX_LOG_LEVEL`,
/// then `RUST_LOG`, then the configured default.
pub fn init_tracing(config: &LoggingConfig) {
    let directives = std::env::var("INBOX_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| config.level.clone());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = Registry::default().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!(
            component = "bootstrap",
            trace_id = %trace_id(),
            filter = %directives,
            user_agent = crate::protocol::USER_AGENT,
            "structured tracing initialized"
        );
    }
}

/// Identifier shared by every request and error of this process.
pub fn trace_id() -> &'static str {
    SESSION_TRACE_ID.get_or_init(|| Uuid::new_v4().to_string())
}

pub fn request_id() -> String {
    Uuid::new_v4().to_string()
}
