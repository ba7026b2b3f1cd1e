use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::warn;

use crewforge_core::config::{ModelConfig, RetryConfig};
use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::LlmClient;
use crewforge_core::types::*;

/// Retries transient request failures with exponential backoff.
///
/// Only the request phase is retried; once a stream has been handed out,
/// mid-stream errors surface to the caller.
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

pub(crate) fn is_retryable(e: &CrewForgeError) -> bool {
    match e {
        CrewForgeError::LlmRequest(msg) => {
            let msg = msg.to_ascii_lowercase();
            ["429", "500", "502", "503", "504", "timeout", "timed out", "connection"]
                .iter()
                .any(|needle| msg.contains(needle))
        }
        CrewForgeError::LlmStream(_) => true,
        _ => false,
    }
}

pub(crate) fn backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter between 0.8x and 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry.max_retries;
            let mut attempt = 0;
            loop {
                match self
                    .inner
                    .chat_stream(&config, messages.clone(), &tools)
                    .await
                {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let wait = backoff(attempt, &self.retry);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = wait.as_millis() as u64,
                            model = %config.model_id,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl LlmClient for Flaky {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolSpec],
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    return Err(CrewForgeError::LlmRequest("HTTP 503: busy".into()));
                }
                let deltas = vec![Ok(StreamDelta::TextDelta("ok".into()))];
                Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, _>)
            })
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn classifies_errors() {
        assert!(is_retryable(&CrewForgeError::LlmRequest("HTTP 429: slow down".into())));
        assert!(is_retryable(&CrewForgeError::LlmRequest("Connection reset".into())));
        assert!(!is_retryable(&CrewForgeError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&CrewForgeError::Cancelled));
    }

    #[test]
    fn backoff_is_capped() {
        let cfg = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        assert!(backoff(10, &cfg) <= Duration::from_millis(6000));
        assert!(backoff(0, &cfg) >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let client = RetryingClient::new(flaky.clone(), fast_retry(3));
        let result = client
            .chat_stream(&ModelConfig::default(), vec![ChatMessage::user("hi")], &[])
            .await;
        assert!(result.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let client = RetryingClient::new(flaky.clone(), fast_retry(1));
        let result = client
            .chat_stream(&ModelConfig::default(), vec![], &[])
            .await;
        assert!(result.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }
}
