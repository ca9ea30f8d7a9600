//! Completion service providers.
//!
//! Provides the HTTP implementation of the `CompletionService` trait for
//! Azure OpenAI deployments and any OpenAI-compatible chat completions API,
//! plus the shared retry helper used by `CompletionClient`.
//!
//! Use `create_service()` to instantiate the provider selected by config.

pub mod openai_compat;

use crate::completion::CompletionService;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::{ConfigError, ServiceError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use openai_compat::OpenAiCompatibleService;

/// Execute an async operation with bounded exponential backoff retry.
///
/// Every error is retried except `ServiceError::AuthFailed` and
/// `ServiceError::Cancelled`, which return immediately. `RateLimited` waits
/// for the server's `retry_after_secs`. A backoff sleep is abandoned with
/// `ServiceError::Cancelled` when `cancel` fires.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_retryable() || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after service error"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ServiceError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &ServiceError) -> u64 {
    if let ServiceError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs.saturating_mul(1000);
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% extra
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap time-based pseudo-random value in `[0, 1)` for jitter.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Create a completion service based on the configuration.
///
/// `"azure"` and `"openai"` both route to `OpenAiCompatibleService`, which
/// differs only in URL layout and auth header. The API key is resolved here,
/// so a missing credential surfaces before any pipeline runs.
pub fn create_service(config: &LlmConfig) -> Result<Arc<dyn CompletionService>, ConfigError> {
    match config.provider.as_str() {
        "azure" | "openai" => Ok(Arc::new(OpenAiCompatibleService::new(config)?)),
        other => Err(ConfigError::Invalid {
            message: format!("unknown provider '{other}' (expected 'azure' or 'openai')"),
        }),
    }
}
