//! This crate implements an incremental token codec for the [MessagePack]
//! binary serialization format.
//!
//! # Overview
//!
//! MessagePack documents are streams of *tokens*: scalar values, container
//! headers announcing a number of children, and string/binary/ext headers
//! announcing a number of payload bytes. This crate converts between byte
//! slices and such token streams without ever allocating, copying payload
//! data, or requiring the whole document to be in memory at once.
//!
//! The two central types are [`Reader`] and [`Writer`]. Both are driven with
//! buffers of any size, including one byte at a time: when the buffer runs
//! out in the middle of a token, they record just enough state (at most
//! [`MAX_TOKEN`] bytes) to complete that token on the next call. Payloads of
//! strings, binaries and ext values are never buffered; the reader hands
//! them back as [`Unit::Chunk`] slices borrowing directly from the input.
//!
//! Integers and floats are carried as two 32-bit halves in network order
//! (see [`Value`]), and all wire arithmetic operates on those halves, so the
//! codec behaves identically on any host regardless of endianness.
//!
//! Higher layers (an object walker and a MessagePack-RPC session) live in
//! the `streampack` crate; this crate is the self-contained wire engine.
//!
//! # `#![no_std]` support
//!
//! The crate is unconditionally `no_std` and performs no heap allocation.
//!
//! # Example
//!
//! The following code decodes the document `[255, "hi"]` from a buffer that
//! arrives split in two arbitrary places.
//!
//! ```
//! use msgpack_tokens::{Reader, Token, Unit, Value};
//!
//! let bytes = [0x92, 0xcc, 0xff, 0xa2, b'h', b'i'];
//! let mut reader = Reader::new();
//!
//! // The first slice ends in the middle of the fixstr header payload.
//! let mut input = &bytes[..4];
//! assert_eq!(
//! 	reader.read(&mut input)?,
//! 	Some(Unit::Token(Token::Array { len: 2 }))
//! );
//! assert_eq!(
//! 	reader.read(&mut input)?,
//! 	Some(Unit::Token(Token::UInt {
//! 		value: Value { lo: 0xff, hi: 0 },
//! 		width: 1
//! 	}))
//! );
//! assert_eq!(
//! 	reader.read(&mut input)?,
//! 	Some(Unit::Token(Token::Str { len: 2 }))
//! );
//! assert!(input.is_empty());
//!
//! // The rest of the buffer arrives later; the string payload is borrowed
//! // from it without copying.
//! let mut input = &bytes[4..];
//! assert_eq!(reader.read(&mut input)?, Some(Unit::Chunk(b"hi")));
//! # Ok::<(), msgpack_tokens::DecodeError>(())
//! ```
//!
//! [MessagePack]: https://github.com/msgpack/msgpack/blob/master/spec.md

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

use core::error::Error;
use core::fmt::{self, Display, Formatter};

pub use reader::Reader;
pub use token::{Token, Unit, Value};
pub use writer::Writer;

mod reader;
mod token;
mod writer;


/// The largest number of bytes a single token header can occupy on the wire:
/// a type code, up to 8 bytes of value or length, and an optional ext type
/// byte, rounded up to leave slack in the resumption scratch buffers.
pub const MAX_TOKEN: usize = 12;

/// Outcome of a single encoding step.
///
/// A [`Partial`](Self::Partial) outcome is a suspension, not a failure: the
/// operation holds enough internal state to continue exactly where it
/// stopped when called again with a fresh buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum Progress {
	/// The operation ran to completion.
	Complete,
	/// The buffer was exhausted mid-operation; call again with more room.
	Partial
}

impl Progress {
	/// Returns `true` for [`Progress::Complete`].
	pub const fn is_complete(self) -> bool {
		matches!(self, Self::Complete)
	}
}

/// Hard decode failure: the input contained the reserved wire code 0xc1, or
/// the reader state no longer describes a valid token boundary.
///
/// This error is not recoverable. The offending [`Reader`] must be
/// reinitialised before being used again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodeError(());

impl DecodeError {
	pub(crate) const fn new() -> Self {
		Self(())
	}
}

impl Display for DecodeError {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str("invalid MessagePack data")
	}
}

impl Error for DecodeError {}

/// Hard encode failure: the token cannot be represented on the wire, for
/// example an ext type outside [0, 127] or a float of a width other than 4
/// or 8, or a resumption call that does not match the pending item.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EncodeError(());

impl EncodeError {
	pub(crate) const fn new() -> Self {
		Self(())
	}
}

impl Display for EncodeError {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str("token cannot be encoded")
	}
}

impl Error for EncodeError {}
