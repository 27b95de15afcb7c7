//! Ride persistence.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::Ride;

/// Owns ride records once the matcher hands them off.
#[async_trait]
pub trait TripRecorder: Send + Sync {
    async fn save_ride(&self, ride: &Ride) -> Result<(), StoreError>;
    async fn update_ride(&self, ride: &Ride) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryTripStore {
    rides: RwLock<HashMap<String, Ride>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Ride> {
        self.rides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rides.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TripRecorder for MemoryTripStore {
    async fn save_ride(&self, ride: &Ride) -> Result<(), StoreError> {
        let mut rides = self.rides.write().unwrap_or_else(PoisonError::into_inner);
        rides.insert(ride.id.clone(), ride.clone());
        Ok(())
    }

    async fn update_ride(&self, ride: &Ride) -> Result<(), StoreError> {
        let mut rides = self.rides.write().unwrap_or_else(PoisonError::into_inner);
        match rides.get_mut(&ride.id) {
            Some(existing) => {
                *existing = ride.clone();
                Ok(())
            }
            None => Err(StoreError::Persistence(format!("unknown ride {}", ride.id))),
        }
    }
}
