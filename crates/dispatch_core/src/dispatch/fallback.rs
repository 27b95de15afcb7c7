use std::sync::Arc;

use async_trait::async_trait;

use super::{ChannelRegistry, DispatchNotifier};
use crate::error::DispatchError;
use crate::model::MatchOffer;

/// Offers go to the driver's live session when there is one, otherwise to `fallback`.
///
/// A session that exists but fails the write is reported as is; only a missing or
/// already closed session falls through.
pub struct SessionFirstNotifier {
    registry: Arc<ChannelRegistry>,
    fallback: Arc<dyn DispatchNotifier>,
}

impl SessionFirstNotifier {
    pub fn new(registry: Arc<ChannelRegistry>, fallback: Arc<dyn DispatchNotifier>) -> Self {
        Self { registry, fallback }
    }
}

#[async_trait]
impl DispatchNotifier for SessionFirstNotifier {
    async fn offer(&self, ride_id: &str, offer: &MatchOffer) -> Result<(), DispatchError> {
        match self.registry.offer_to(&offer.driver_id, offer).await {
            Err(DispatchError::NoSession(_) | DispatchError::ChannelClosed(_)) => {
                tracing::debug!(driver_id = %offer.driver_id, ride_id, "no live session; using fallback");
                self.fallback.offer(ride_id, offer).await
            }
            delivered_or_failed => delivered_or_failed,
        }
    }
}
