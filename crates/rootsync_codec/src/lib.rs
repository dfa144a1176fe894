//! # rootsync codec
//!
//! CBOR encoding/decoding for every record rootsync persists or sends over
//! the wire.
//!
//! Records are plain `serde` types. A record opts into the wire format by
//! implementing [`Encode`] and [`Decode`], usually by delegating to
//! [`to_cbor`] and [`from_cbor`]:
//!
//! ```
//! use rootsync_codec::{from_cbor, to_cbor, CodecResult, Decode, Encode};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Ping {
//!     seq: u64,
//! }
//!
//! impl Encode for Ping {
//!     fn encode(&self) -> CodecResult<Vec<u8>> {
//!         to_cbor(self)
//!     }
//! }
//!
//! impl Decode for Ping {
//!     fn decode(bytes: &[u8]) -> CodecResult<Self> {
//!         from_cbor(bytes)
//!     }
//! }
//!
//! let bytes = Ping { seq: 7 }.encode().unwrap();
//! assert_eq!(Ping::decode(&bytes).unwrap(), Ping { seq: 7 });
//! ```
//!
//! Decoding is all-or-nothing: truncated input, malformed input and input
//! with trailing bytes are rejected.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}
