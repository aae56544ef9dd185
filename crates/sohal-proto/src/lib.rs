//! # sohal-proto
//!
//! JSON-RPC 2.0 wire envelope for talking to the SoHal hardware service.
//!
//! This crate is a pure transform layer: it encodes outgoing requests and
//! decodes inbound frames into a success response, an error response, or a
//! server-pushed notification, discriminated by the presence of the `id`
//! and `result`/`error` fields. It holds no connection state; the transport
//! lives in `sohal-client`.

#![deny(unsafe_code)]

pub mod codes;
pub mod message;

pub use message::{
    decode, Message, Notification, ProtoError, RemoteErrorBody, Request, PROTOCOL_VERSION,
};
