//! Codec Module
//!
//! Pluggable marshal/unmarshal step applied to envelopes.

use super::Envelope;
use crate::error::Result;

/// Turns envelopes into bytes and back.
pub trait Codec: Send + Sync {
    fn marshal(&self, envelope: &Envelope) -> Result<Vec<u8>>;
    fn unmarshal(&self, data: &[u8]) -> Result<Envelope>;
}

/// Default codec, serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn marshal(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(data)?)
    }
}
