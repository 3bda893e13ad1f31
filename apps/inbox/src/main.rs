use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use inbox::api::ApiClient;
use inbox::backoff::RetryPolicy;
use inbox::config::Config;
use inbox::error::{AppError, AppResult};
use inbox::messaging::clock::SystemClock;
use inbox::messaging::service::MessagingService;
use inbox::messaging::sla::SlaMonitor;
use inbox::messaging::store::ConversationStore;
use inbox::observability;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    observability::init_tracing(&config.logging);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(
                component = "bootstrap",
                code = ?err.code,
                retryable = err.retryable,
                trace_id = err.trace_id.as_deref().unwrap_or_default(),
                error = %err,
                "inbox stopped"
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> AppResult<()> {
    config.validate().map_err(AppError::config)?;
    let thresholds = config.sla.thresholds()?;

    let client = ApiClient::new(config.api.base_url.clone(), config.api.request_timeout())?;
    client.set_token(config.api.token.clone()).await;

    let conversation = client.fetch_conversation(&config.conversation_id).await?;
    tracing::info!(
        component = "bootstrap",
        conversation_id = %conversation.id,
        friendly_name = %conversation.friendly_name,
        opted_out = conversation.opted_out,
        "conversation loaded"
    );

    let client = Arc::new(client);
    let clock = Arc::new(SystemClock);
    let store = Arc::new(
        ConversationStore::new(client.clone(), clock.clone()).with_page_size(config.page_size),
    );
    let service = MessagingService::new(client, store.clone(), conversation);

    let snapshot = service.load_initial().await?;
    tracing::info!(
        component = "bootstrap",
        messages = snapshot.len(),
        has_more = snapshot.has_more,
        "history loaded"
    );

    let monitor = SlaMonitor::spawn(store.subscribe(), thresholds, config.sla.tick(), clock);
    let report = monitor.current();
    tracing::info!(
        component = "sla.monitor",
        status = report.status.as_str(),
        elapsed_ms = report.elapsed_ms,
        remaining_ms = report.remaining_ms,
        awaiting = report.awaiting.as_deref().unwrap_or_default(),
        "initial sla status"
    );

    let policy = RetryPolicy::for_poll(config.poll_interval());
    let mut failures = 0u32;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(component = "bootstrap", "shutdown requested");
                break;
            }
            _ = tokio::time::sleep(policy.delay(failures)) => {}
        }

        match service.refresh().await {
            Ok(summary) => {
                failures = 0;
                if summary.changed() {
                    tracing::info!(
                        component = "poll",
                        inserted = summary.inserted,
                        updated = summary.updated,
                        "thread updated"
                    );
                }
            }
            Err(err) if err.retryable() => {
                failures = failures.saturating_add(1);
                tracing::warn!(
                    component = "poll",
                    failures,
                    error = %err,
                    "refresh failed"
                );
            }
            Err(err) => {
                service.close();
                return Err(err.into());
            }
        }
    }

    service.close();
    drop(monitor);
    Ok(())
}
