//! The integration seam between the dispatcher and a commerce platform.

use async_trait::async_trait;
use stockrelay_database::Movement;

/// Classified result of pushing one movement to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The platform acknowledged the stock update.
    Success,
    /// Infrastructure trouble (timeouts, 5xx, rate limits). Retryable.
    Transient(String),
    /// The platform does not recognize the SKU. Never retried; the SKU
    /// goes to the unmapped registry for an operator to map.
    UnmappedSku(String),
    /// The platform rejected the movement outright. Never retried.
    Permanent(String),
}

impl PushOutcome {
    /// Stable label for structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            PushOutcome::Success => "success",
            PushOutcome::Transient(_) => "transient",
            PushOutcome::UnmappedSku(_) => "unmapped_sku",
            PushOutcome::Permanent(_) => "permanent",
        }
    }
}

/// A connector that can push stock movements to an external platform.
///
/// Implementations classify everything that can happen into a
/// [`PushOutcome`]; they do not return errors. The dispatcher wraps `push`
/// in a timeout and treats an elapsed timer as transient, so `push` must be
/// cancellation safe.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Adapter name for log fields.
    fn name(&self) -> &'static str;

    /// Push one movement and classify the result.
    async fn push(&self, movement: &Movement) -> PushOutcome;
}
