use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::DispatchNotifier;
use crate::error::DispatchError;
use crate::model::MatchOffer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct PushBody<'a> {
    ride_id: &'a str,
    offer: &'a MatchOffer,
}

/// Forwards offers to an HTTP push provider. Wrapped in a
/// [`SessionFirstNotifier`](super::SessionFirstNotifier) it serves drivers without a
/// live session.
#[derive(Debug, Clone)]
pub struct HttpPushNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushNotifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(endpoint, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DispatchNotifier for HttpPushNotifier {
    async fn offer(&self, ride_id: &str, offer: &MatchOffer) -> Result<(), DispatchError> {
        self.client
            .post(&self.endpoint)
            .json(&PushBody { ride_id, offer })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|err| DispatchError::Push(err.to_string()))
    }
}
