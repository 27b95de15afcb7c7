use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::EtaEstimator;
use crate::error::EtaError;
use crate::model::Coordinate;

/// Keeps one slow candidate from stalling a whole match.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Driving-time estimates from an OSRM `/route` endpoint.
#[derive(Debug, Clone)]
pub struct OsrmEstimator {
    client: Client,
    endpoint: String,
}

impl OsrmEstimator {
    /// Create an estimator for the given OSRM endpoint (e.g. `http://localhost:5000`).
    pub fn new(endpoint: &str) -> Result<Self, reqwest::Error> {
        Self::with_timeout(endpoint, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn route_url(&self, from: Coordinate, to: Coordinate) -> String {
        format!(
            "{}/route/v1/driving/{:.6},{:.6};{:.6},{:.6}?overview=false",
            self.endpoint, from.lon, from.lat, to.lon, to.lat
        )
    }
}

/// Minimal OSRM JSON response structures.
#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    routes: Option<Vec<OsrmRoute>>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    duration: f64, // seconds
}

#[async_trait]
impl EtaEstimator for OsrmEstimator {
    async fn estimate_seconds(&self, from: Coordinate, to: Coordinate) -> Result<f64, EtaError> {
        let response = self
            .client
            .get(self.route_url(from, to))
            .send()
            .await
            .map_err(|err| EtaError::RouteUnavailable(format!("osrm request failed: {err}")))?;

        let parsed: OsrmResponse = response
            .json()
            .await
            .map_err(|err| EtaError::RouteUnavailable(format!("osrm response invalid: {err}")))?;

        if parsed.code != "Ok" {
            return Err(EtaError::RouteUnavailable(format!("osrm code {}", parsed.code)));
        }

        parsed
            .routes
            .and_then(|routes| routes.into_iter().next())
            .map(|route| route.duration)
            .ok_or_else(|| EtaError::RouteUnavailable("osrm returned no routes".to_string()))
    }
}
