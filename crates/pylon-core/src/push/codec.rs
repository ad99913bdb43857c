//! Frame codec seam for session sockets.
//!
//! Sockets carry opaque byte frames; the codec turns them into typed session
//! records and back. JSON is the stock encoding, other formats plug in
//! behind the same trait.

use thiserror::Error;

use super::dispatch::{Request, Response};
use super::event::Event;
use super::filter::PushFilter;

/// Errors raised while encoding or decoding session frames.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The frame does not decode as the expected record.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A record could not be encoded.
    #[error("unencodable record: {0}")]
    Unencodable(String),
}

/// Encodes outbound session records and decodes inbound ones.
pub trait Codec: Send + Sync {
    /// Decodes an inbound frame as an API request.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] when the frame is not a request.
    fn decode_request(&self, frame: &[u8]) -> Result<Request, CodecError>;

    /// Decodes an inbound frame as a push filter.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] when the frame is not a filter.
    fn decode_filter(&self, frame: &[u8]) -> Result<PushFilter, CodecError>;

    /// Encodes an event for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Unencodable`] when encoding fails.
    fn encode_event(&self, event: &Event) -> Result<Vec<u8>, CodecError>;

    /// Encodes a response for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Unencodable`] when encoding fails.
    fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError>;
}

/// JSON implementation of [`Codec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode_request(&self, frame: &[u8]) -> Result<Request, CodecError> {
        serde_json::from_slice(frame).map_err(|err| CodecError::Malformed(err.to_string()))
    }

    fn decode_filter(&self, frame: &[u8]) -> Result<PushFilter, CodecError> {
        serde_json::from_slice(frame).map_err(|err| CodecError::Malformed(err.to_string()))
    }

    fn encode_event(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(event).map_err(|err| CodecError::Unencodable(err.to_string()))
    }

    fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(response).map_err(|err| CodecError::Unencodable(err.to_string()))
    }
}
