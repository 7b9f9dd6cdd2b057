//! Host-side redelivery: what the collector does when an output answers `RETRY`.

pub mod retry;

pub use retry::{RedeliveryPolicy, RetryConfig, RetryError, RetryStrategy};

use crate::output::{FlushResult, OutputInstance};
use crate::sender::LogWriter;
use bytes::Bytes;
use tracing::{debug, warn};

/// Final state of one buffer after redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub result: FlushResult,
    pub deliveries: u32,
}

/// Delivers `data` until the instance stops answering `Retry` or the policy
/// gives up. Every redelivery hands over the complete buffer again.
pub async fn deliver_with_redelivery<W: LogWriter>(
    policy: &RedeliveryPolicy,
    instance: &mut OutputInstance<W>,
    data: Bytes,
    tag: &str,
) -> DeliveryOutcome {
    let mut deliveries = 0;
    loop {
        deliveries += 1;
        let result = instance.flush(data.clone(), tag).await;
        if result != FlushResult::Retry {
            return DeliveryOutcome { result, deliveries };
        }
        if policy.should_give_up(deliveries) {
            warn!("Giving up on {} after {} deliveries", tag, deliveries);
            return DeliveryOutcome { result, deliveries };
        }

        let delay = policy.calculate_delay(deliveries);
        debug!(
            "Redelivering {} in {:?} (delivery {})",
            tag,
            delay,
            deliveries + 1
        );
        tokio::time::sleep(delay).await;
    }
}
