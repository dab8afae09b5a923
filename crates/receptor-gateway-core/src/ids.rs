//! Correlation identifier generation.

use rand::{RngCore, rngs::OsRng};
use uuid::{Builder, Uuid};

use crate::GatewayError;

/// Source of fresh job identifiers.
pub trait IdSource: Send + Sync {
    /// Produce a new random 128-bit identifier.
    ///
    /// # Errors
    /// Returns `IdentifierGeneration` if the randomness source is unavailable.
    fn next_id(&self) -> Result<Uuid, GatewayError>;
}

/// Identifiers drawn from the operating system RNG.
///
/// Unlike `Uuid::new_v4`, an RNG failure is reported instead of panicking.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomIds;

impl IdSource for OsRandomIds {
    fn next_id(&self) -> Result<Uuid, GatewayError> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| GatewayError::IdentifierGeneration(e.to_string()))?;
        Ok(Builder::from_random_bytes(bytes).into_uuid())
    }
}
