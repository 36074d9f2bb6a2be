//! # nettables-protocol
//!
//! Wire codec for the nettables table-sync protocol.
//!
//! This crate provides:
//! - The tag byte layout shared by both peers
//! - Variable-width id encoding, strings, big-endian numerics
//! - Run-length Confirmation/Denial bytes
//! - A streaming decoder that yields whole messages from socket bytes

pub mod codec;
pub mod error;
pub mod tag;
pub mod wire;

pub use codec::Decoder;
pub use error::ProtocolError;
pub use wire::{WireMessage, WireValue};

/// Default port a server listens on.
pub const DEFAULT_PORT: u16 = 1735;
