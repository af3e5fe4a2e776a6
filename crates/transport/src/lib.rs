//! Outbound HTTP for chatrelay.
//!
//! Every call to the assistant service and the messaging platform goes
//! through a [`RetryingTransport`]: requests are described as owned
//! [`OutboundRequest`] values, sent by an [`Exchange`], and retried with
//! bounded exponential backoff until they succeed, the budget is spent, or
//! the caller cancels.

pub mod exchange;
pub mod request;
pub mod retry;

pub use exchange::{Exchange, ExchangeResponse, HttpExchange};
pub use request::{Body, Method, OutboundRequest, Part};
pub use retry::{RetryBudget, RetryingTransport};

use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::TransportError;

/// A reqwest-backed transport with the given per-request timeout.
pub fn http_transport(
    timeout: Duration,
    budget: RetryBudget,
) -> Result<RetryingTransport, TransportError> {
    let exchange = HttpExchange::new(timeout)?;
    Ok(RetryingTransport::new(Arc::new(exchange), budget))
}
