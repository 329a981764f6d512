use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use parking_lot::RwLock;
use tracing::{info, warn};

use strand_core::errors::GatewayError;
use strand_core::provider::{LlmContext, LlmProvider, StreamOptions};
use strand_core::stream::StreamEvent;

/// Configuration for ReliableProvider retry and circuit-breaker behavior.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps an LlmProvider with retry logic and a circuit breaker.
///
/// - Retries retryable errors with exponential backoff + jitter
/// - Respects `retry_after` hints from rate-limit responses
/// - N consecutive failures → open → cooldown → half-open → success → closed
/// - Retries apply only to establishing the stream; once events are flowing
///   the call is committed and failures surface to the caller unchanged.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    circuit_state: Arc<RwLock<CircuitState>>,
    consecutive_failures: Arc<AtomicU32>,
    total_retries: Arc<AtomicU64>,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            total_retries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    fn check_circuit(&self) -> Result<(), GatewayError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(GatewayError::ProviderOverloaded)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if *state == CircuitState::Closed || *state == CircuitState::HalfOpen {
                warn!(
                    failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "circuit breaker opened"
                );
                *state = CircuitState::Open { since: Instant::now() };
            }
        }
    }

    /// Delay for a retry attempt: exponential backoff + jitter, or the
    /// server-suggested delay when one was provided.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range >= 1.0 {
            (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range
        } else {
            0.0
        };
        let final_ms = (capped + jitter).max(100.0);

        Duration::from_millis(final_ms as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Simple non-cryptographic random u64 using thread-local xorshift state.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn context_window(&self) -> usize {
        self.inner.context_window()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            match self.inner.stream(context, options).await {
                Ok(stream) => {
                    self.record_success();
                    return Ok(stream);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.record_failure();
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn fast_config() -> ReliableConfig {
        ReliableConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
            circuit_breaker_threshold: 2,
            circuit_breaker_cooldown: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn passes_through_success() {
        let inner = MockProvider::new(vec![MockResponse::stream_text("ok")]);
        let provider = ReliableProvider::new(inner, fast_config());

        let result = provider
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(provider.total_retries(), 0);
    }

    #[tokio::test]
    async fn retries_retryable_errors() {
        let inner = MockProvider::new(vec![
            MockResponse::Error(GatewayError::ProviderOverloaded),
            MockResponse::Error(GatewayError::RateLimited { retry_after: None }),
            MockResponse::stream_text("finally"),
        ]);
        let provider = ReliableProvider::new(inner, fast_config());

        let result = provider
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(provider.total_retries(), 2);
    }

    #[tokio::test]
    async fn fatal_errors_not_retried() {
        let inner = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
            MockResponse::stream_text("unreachable"),
        ]);
        let provider = ReliableProvider::new(inner, fast_config());

        let result = provider
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed(_))));
        assert_eq!(provider.total_retries(), 0);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures() {
        let inner = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("1".into())),
            MockResponse::Error(GatewayError::AuthenticationFailed("2".into())),
        ]);
        let provider = ReliableProvider::new(inner, fast_config());

        let _ = provider.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        let _ = provider.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert_eq!(provider.circuit_state_name(), "open");

        // While open, calls are rejected without touching the inner provider.
        let result = provider
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await;
        assert!(matches!(result, Err(GatewayError::ProviderOverloaded)));
    }

    #[tokio::test]
    async fn circuit_half_opens_after_cooldown() {
        let inner = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("1".into())),
            MockResponse::Error(GatewayError::AuthenticationFailed("2".into())),
            MockResponse::stream_text("recovered"),
        ]);
        let provider = ReliableProvider::new(inner, fast_config());

        let _ = provider.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        let _ = provider.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert_eq!(provider.circuit_state_name(), "open");

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = provider
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(provider.circuit_state_name(), "closed");
    }

    #[test]
    fn retry_delay_respects_suggestion() {
        let inner = MockProvider::new(vec![]);
        let provider = ReliableProvider::new(inner, fast_config());
        let delay = provider.retry_delay(0, Some(Duration::from_secs(7)));
        assert_eq!(delay, Duration::from_secs(7));
    }

    #[test]
    fn retry_delay_backs_off() {
        let inner = MockProvider::new(vec![]);
        let config = ReliableConfig {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            ..fast_config()
        };
        let provider = ReliableProvider::new(inner, config);
        let d0 = provider.retry_delay(0, None);
        let d1 = provider.retry_delay(1, None);
        let d2 = provider.retry_delay(2, None);
        assert!(d0 < d1 && d1 < d2, "{d0:?} {d1:?} {d2:?}");
    }
}
