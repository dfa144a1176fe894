//! # rootsync protocol
//!
//! Entity records and protocol messages for rootsync.
//!
//! This crate provides:
//! - The persisted entities: [`Client`], [`RootDirectory`], [`File`],
//!   [`FileHistory`], [`FileMetadata`], [`Conflict`], [`Sharing`]
//! - Transaction names multiplexed over a client connection
//! - Request, response and notification messages for each transaction
//! - CBOR encoding/decoding through [`rootsync_codec::Encode`] and
//!   [`rootsync_codec::Decode`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Implements [`Encode`] and [`Decode`] for serde records.
macro_rules! cbor_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl rootsync_codec::Encode for $ty {
                fn encode(&self) -> rootsync_codec::CodecResult<Vec<u8>> {
                    rootsync_codec::to_cbor(self)
                }
            }

            impl rootsync_codec::Decode for $ty {
                fn decode(bytes: &[u8]) -> rootsync_codec::CodecResult<Self> {
                    rootsync_codec::from_cbor(bytes)
                }
            }
        )+
    };
}

mod messages;
pub mod transaction;
mod types;

pub use messages::{
    ClientRegisterRequest, ClientRegisterResponse, FileHistoryRequest, FileHistoryResponse,
    NotificationKind, PushFileRequest, PushFileResponse, PushOutcome, Resolution,
    ResolveConflictRequest, ResolveConflictResponse, RootDirJoinRequest, RootDirRegisterRequest,
    RootDirResponse, ShareRequest, ShareResponse, StopSharingRequest, StopSharingResponse,
    SyncNotification,
};
pub use types::{Client, Conflict, File, FileHistory, FileMetadata, RootDirectory, Sharing};

pub use rootsync_codec::{CodecError, CodecResult, Decode, Encode};
