//! Real-time ride dispatch: driver geo index, ETA estimation, cost-based matching,
//! offer delivery and location ingestion.

pub mod dispatch;
pub mod error;
pub mod eta;
pub mod ingest;
pub mod matching;
pub mod model;
pub mod retry;
pub mod spatial;
pub mod storage;
pub mod telemetry;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
