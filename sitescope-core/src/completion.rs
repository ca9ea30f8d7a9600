//! Completion module: text-generation service abstraction.
//!
//! Defines the `CompletionService` trait for backend-agnostic text generation,
//! the `CompletionClient` wrapper that adds per-call timeouts, bounded retry
//! with exponential backoff and cancellation, and a scriptable mock service
//! used by tests and offline runs.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::ServiceError;
use crate::providers::with_retry;
use crate::types::Message;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Trait for text-generation backends.
///
/// `context` is the ordered sequence of prior turns the prompt continues;
/// it may start with a system message carrying stage instructions.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate text for `prompt` following the given context.
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, ServiceError>;

    /// Return the model or deployment name.
    fn model_name(&self) -> &str;
}

/// Wraps a completion service with timeout, retry, and cancellation.
///
/// Cloning is cheap; every aspect chain holds its own clone.
#[derive(Clone)]
pub struct CompletionClient {
    service: Arc<dyn CompletionService>,
    retry: RetryConfig,
    timeout: Duration,
}

impl CompletionClient {
    pub fn new(service: Arc<dyn CompletionService>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            service,
            retry,
            timeout,
        }
    }

    /// Build a client using the retry policy and timeout from configuration.
    pub fn from_config(service: Arc<dyn CompletionService>, config: &LlmConfig) -> Self {
        Self::new(
            service,
            config.retry.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Generate text, retrying failed calls up to the configured bound.
    ///
    /// Each attempt is bounded by the per-call timeout. Returns
    /// `ServiceError::Cancelled` as soon as `cancel` fires, including during
    /// a backoff sleep.
    pub async fn generate(
        &self,
        prompt: &str,
        context: &[Message],
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        with_retry(&self.retry, cancel, || self.attempt(prompt, context, cancel)).await
    }

    async fn attempt(
        &self,
        prompt: &str,
        context: &[Message],
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        debug!(
            model = self.service.model_name(),
            context_len = context.len(),
            prompt_len = prompt.len(),
            "Sending completion request"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.service.generate(prompt, context)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }),
                }
            }
        }
    }

    /// Get the model name of the underlying service.
    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    /// Get the retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }
}

type Responder = dyn Fn(&str, &[Message]) -> Result<String, ServiceError> + Send + Sync;
type DelayFn = dyn Fn(&str) -> Duration + Send + Sync;

/// A completion call captured by [`MockCompletionService`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub context: Vec<Message>,
}

/// A mock completion service for testing and development.
///
/// Queued responses are returned first, in order. When the queue is empty
/// the responder (if set) decides the reply from the prompt and context;
/// otherwise a fixed placeholder is returned. Every call is recorded.
pub struct MockCompletionService {
    model: String,
    responses: Mutex<VecDeque<Result<String, ServiceError>>>,
    responder: Option<Box<Responder>>,
    delay: Option<Box<DelayFn>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            responder: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that answers every call with the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::from_fn(move |_, _| Ok(text.clone()))
    }

    /// Create a mock whose replies are computed from the prompt and context.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Message]) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Delay each reply by a prompt-dependent duration.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Queue a successful response for the next call.
    pub fn queue_response(&self, text: impl Into<String>) {
        lock(&self.responses).push_back(Ok(text.into()));
    }

    /// Queue a failure for the next call.
    pub fn queue_error(&self, error: ServiceError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for MockCompletionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, ServiceError> {
        lock(&self.calls).push(RecordedCall {
            prompt: prompt.to_string(),
            context: context.to_vec(),
        });

        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(prompt)).await;
        }

        let queued = lock(&self.responses).pop_front();
        match (queued, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(prompt, context),
            (None, None) => Ok("I'm a mock completion service. No queued responses available.".to_string()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn client(service: Arc<MockCompletionService>, max_retries: u32) -> CompletionClient {
        CompletionClient::new(service, fast_retry(max_retries), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_mock_default_response() {
        let service = MockCompletionService::new();
        let text = service.generate("hello", &[]).await.unwrap();
        assert!(text.contains("mock"));
    }

    #[tokio::test]
    async fn test_mock_queued_responses_in_order() {
        let service = MockCompletionService::new();
        service.queue_response("first");
        service.queue_response("second");

        assert_eq!(service.generate("a", &[]).await.unwrap(), "first");
        assert_eq!(service.generate("b", &[]).await.unwrap(), "second");
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_records_context() {
        let service = MockCompletionService::with_response("ok");
        let context = vec![Message::system("instructions"), Message::user("earlier")];
        service.generate("now", &context).await.unwrap();

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "now");
        assert_eq!(calls[0].context, context);
    }

    #[tokio::test]
    async fn test_client_retries_transient_errors() {
        let service = Arc::new(MockCompletionService::with_response("Success after retry"));
        service.queue_error(ServiceError::Connection {
            message: "reset".into(),
        });
        service.queue_error(ServiceError::RateLimited {
            retry_after_secs: 0,
        });

        let result = client(service.clone(), 3)
            .generate("prompt", &[], &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap(), "Success after retry");
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_client_retries_server_error() {
        let service = Arc::new(MockCompletionService::with_response("recovered"));
        service.queue_error(ServiceError::ApiRequest {
            message: "Server error (500): upstream failure".into(),
        });

        let result = client(service.clone(), 3)
            .generate("prompt", &[], &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_client_retry_exhausted() {
        let service = Arc::new(MockCompletionService::from_fn(|_, _| {
            Err(ServiceError::Timeout { timeout_secs: 5 })
        }));

        let result = client(service.clone(), 2)
            .generate("prompt", &[], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout { .. })));
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_client_non_retryable_fails_immediately() {
        let service = Arc::new(MockCompletionService::new());
        service.queue_error(ServiceError::AuthFailed {
            provider: "azure".into(),
        });

        let result = client(service.clone(), 3)
            .generate("prompt", &[], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServiceError::AuthFailed { .. })));
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_client_applies_timeout() {
        let service = Arc::new(
            MockCompletionService::with_response("too late")
                .with_delay(|_| Duration::from_millis(500)),
        );
        let client = CompletionClient::new(service, fast_retry(0), Duration::from_millis(20));

        let result = client
            .generate("prompt", &[], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_client_observes_cancellation() {
        let service = Arc::new(
            MockCompletionService::with_response("never")
                .with_delay(|_| Duration::from_secs(10)),
        );
        let client = client(service, 3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = client.generate("prompt", &[], &cancel).await;
        assert_eq!(result, Err(ServiceError::Cancelled));
    }

    #[test]
    fn test_from_config_uses_timeout() {
        let config = LlmConfig {
            timeout_secs: 42,
            ..Default::default()
        };
        let client =
            CompletionClient::from_config(Arc::new(MockCompletionService::new()), &config);
        assert_eq!(client.timeout, Duration::from_secs(42));
        assert_eq!(client.model_name(), "mock-model");
        assert_eq!(client.retry_config().max_retries, 3);
    }
}
