//! Offer delivery to drivers.
//!
//! This module provides:
//!
//! - **DispatchNotifier**: the capability the matcher uses to push an offer to a driver
//! - **ChannelRegistry**: live driver sessions keyed by driver id, at most one per driver
//! - **MpscOfferChannel**: bounded in-process channel a transport task drains
//! - **SessionFirstNotifier**: live session first, another notifier when there is none
//! - **HttpPushNotifier**: forwards offers to an external push provider (feature `push`)

mod fallback;
mod registry;
#[cfg(feature = "push")]
mod push;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::model::MatchOffer;

pub use fallback::SessionFirstNotifier;
pub use registry::{ChannelRegistry, MpscOfferChannel, SessionId};
#[cfg(feature = "push")]
pub use push::HttpPushNotifier;

#[async_trait]
pub trait DispatchNotifier: Send + Sync {
    /// Deliver `offer` to `offer.driver_id`. Best effort; failures are for the caller to log.
    async fn offer(&self, ride_id: &str, offer: &MatchOffer) -> Result<(), DispatchError>;
}

/// Transport end of one driver session.
#[async_trait]
pub trait OfferChannel: Send + Sync {
    async fn send(&self, payload: String) -> Result<(), DispatchError>;

    /// Stop accepting payloads. The transport notices and tears the session down.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
