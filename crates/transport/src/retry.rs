//! Bounded exponential-backoff retry with cancellation.
//!
//! [`RetryingTransport::execute`] makes up to `max_attempts` attempts. The
//! wait before attempt `k + 1` is `min(base_delay * 2^(k-1), max_delay)`, and
//! there is no wait after the final attempt. Both the in-flight call and the
//! wait race the caller's [`CancellationToken`].
//!
//! Only status 200 with a readable body is a success.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::TransportError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exchange::{Exchange, ExchangeResponse};
use crate::request::OutboundRequest;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryBudget {
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// The wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1));
        factor
            .and_then(|f| self.base_delay.checked_mul(f))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Upper bound on the total time spent waiting when every attempt fails.
    pub fn total_wait(&self) -> Duration {
        (1..self.max_attempts).map(|k| self.delay_after(k)).sum()
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(5))
    }
}

#[derive(Clone)]
pub struct RetryingTransport {
    exchange: Arc<dyn Exchange>,
    budget: RetryBudget,
}

impl RetryingTransport {
    pub fn new(exchange: Arc<dyn Exchange>, budget: RetryBudget) -> Self {
        Self { exchange, budget }
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Send `request` until it succeeds, the budget runs out, or `cancel` fires.
    pub async fn execute(
        &self,
        request: &OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let max_attempts = self.budget.max_attempts;
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                outcome = self.exchange.send(request) => outcome,
            };

            let failure = match outcome {
                Ok(ExchangeResponse { status: 200, body }) => {
                    debug!(url = %request.url, attempt, "Request succeeded");
                    return Ok(body);
                }
                Ok(ExchangeResponse { status, body }) => TransportError::UpstreamStatus {
                    status_code: status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                },
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            warn!(
                method = request.method.as_str(),
                url = %request.url,
                attempt,
                max_attempts,
                error = %failure,
                "Request attempt failed"
            );

            if attempt < max_attempts {
                let delay = self.budget.delay_after(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            last_failure = Some(failure);
        }

        Err(TransportError::ExhaustedRetries {
            attempts: max_attempts,
            last: Box::new(last_failure.unwrap_or(TransportError::Cancelled)),
        })
    }

    /// [`execute`](Self::execute), then decode the body as JSON.
    pub async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        request: &OutboundRequest,
        cancel: &CancellationToken,
    ) -> chatrelay_core::Result<T> {
        let body = self.execute(request, cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Plays back a fixed list of outcomes, then fails with a network error.
    struct ScriptedExchange {
        outcomes: Mutex<VecDeque<Result<ExchangeResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedExchange {
        fn new(outcomes: Vec<Result<ExchangeResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            })
        }

        fn always_failing() -> Arc<Self> {
            Self::new(Vec::new())
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn send(&self, _request: &OutboundRequest) -> Result<ExchangeResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("connection refused".into())))
        }
    }

    /// Never answers; only cancellation ends the call.
    struct HangingExchange;

    #[async_trait]
    impl Exchange for HangingExchange {
        async fn send(&self, _request: &OutboundRequest) -> Result<ExchangeResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn budget(attempts: u32, base_ms: u64, max_ms: u64) -> RetryBudget {
        RetryBudget::new(
            attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
    }

    fn request() -> OutboundRequest {
        OutboundRequest::get("http://assistant.test/threads/t1/runs/r1")
    }

    #[test]
    fn delays_double_until_capped() {
        let b = budget(6, 1000, 5000);
        assert_eq!(b.delay_after(1), Duration::from_millis(1000));
        assert_eq!(b.delay_after(2), Duration::from_millis(2000));
        assert_eq!(b.delay_after(3), Duration::from_millis(4000));
        assert_eq!(b.delay_after(4), Duration::from_millis(5000));
        assert_eq!(b.delay_after(40), Duration::from_millis(5000));
        assert_eq!(b.total_wait(), Duration::from_millis(17_000));
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        assert_eq!(budget(0, 10, 10).max_attempts, 1);
        assert_eq!(budget(1, 10, 10).total_wait(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_makes_exactly_n_attempts() {
        let exchange = ScriptedExchange::always_failing();
        let b = budget(4, 1000, 5000);
        let transport = RetryingTransport::new(exchange.clone(), b);

        let started = Instant::now();
        let err = transport
            .execute(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        let waited = started.elapsed();

        assert_eq!(exchange.calls(), 4);
        match err {
            TransportError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, TransportError::Network(_)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        // 1s + 2s + 4s, no wait after the last attempt
        assert!(waited <= b.total_wait());
        assert!(waited >= Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn non_200_status_is_retried_and_reported() {
        let exchange = ScriptedExchange::new(vec![
            Ok(ExchangeResponse::new(201, "created")),
            Ok(ExchangeResponse::new(502, "bad gateway")),
        ]);
        let transport = RetryingTransport::new(exchange.clone(), budget(2, 10, 10));

        let err = transport
            .execute(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(exchange.calls(), 2);
        match err.last_failure() {
            TransportError::UpstreamStatus { status_code, body } => {
                assert_eq!(*status_code, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_retrying() {
        let exchange = ScriptedExchange::new(vec![
            Err(TransportError::Timeout("slow".into())),
            Err(TransportError::BodyRead("reset".into())),
            Ok(ExchangeResponse::new(200, r#"{"id":"run_1"}"#)),
            Ok(ExchangeResponse::new(200, "never read")),
        ]);
        let transport = RetryingTransport::new(exchange.clone(), budget(5, 100, 1000));

        let body = transport
            .execute(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(body, br#"{"id":"run_1"}"#);
        assert_eq!(exchange.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_is_not_retried() {
        let exchange = ScriptedExchange::new(vec![Err(TransportError::InvalidRequest(
            "bad header".into(),
        ))]);
        let transport = RetryingTransport::new(exchange.clone(), budget(3, 10, 10));

        let err = transport
            .execute(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_returns_promptly() {
        let exchange = ScriptedExchange::always_failing();
        let transport = RetryingTransport::new(exchange.clone(), budget(3, 10_000, 10_000));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = transport.execute(&request(), &cancel).await.unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(exchange.calls(), 1);
        // Returns as soon as the token fires, not at the end of the backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_call() {
        let transport = RetryingTransport::new(Arc::new(HangingExchange), budget(3, 10, 10));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = transport.execute(&request(), &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn already_cancelled_makes_no_attempt() {
        let exchange = ScriptedExchange::always_failing();
        let transport = RetryingTransport::new(exchange.clone(), budget(3, 10, 10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport.execute(&request(), &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(exchange.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_json_decodes_body() {
        #[derive(serde::Deserialize)]
        struct Thread {
            id: String,
        }

        let exchange = ScriptedExchange::new(vec![Ok(ExchangeResponse::new(
            200,
            r#"{"id":"thread_9","object":"thread"}"#,
        ))]);
        let transport = RetryingTransport::new(exchange, budget(1, 10, 10));

        let thread: Thread = transport
            .execute_json(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(thread.id, "thread_9");
    }
}
