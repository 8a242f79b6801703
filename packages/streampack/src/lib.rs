//! StreamPack is a streaming codec for the [MessagePack] serialization
//! format with a [MessagePack-RPC] session layer on top, built for
//! transports that deliver bytes in arbitrary pieces.
//!
//! # Layering
//!
//! The stack has three layers, each usable on its own:
//!
//! - The **token engine** ([`Reader`], [`Writer`], re-exported from the
//!   [`msgpack_tokens`] crate) converts between byte slices and typed
//!   [`Token`]s. It is allocation-free and resumable at any buffer
//!   granularity, and it forwards string/binary/ext payloads as zero-copy
//!   chunks instead of buffering them.
//! - The **object walker** ([`Parser`] and [`Unparser`], in [`walk`])
//!   lifts the flat token stream into a depth-first enter/exit traversal
//!   of the implicit object tree, over an inline stack of const-generic
//!   capacity. No recursion, no allocation; untrusted input cannot nest
//!   its way into stack exhaustion, and a walk that does hit the depth
//!   bound can be copied into a deeper walker and resumed mid-document.
//! - The **RPC session** ([`Session`], in [`rpc`]) parses and emits the
//!   three-token MessagePack-RPC message headers, allocates request ids,
//!   and carries a caller data word from each request to its response.
//!
//! Everything suspends rather than blocks: operations return
//! [`Progress::Partial`] (or `None`) when a buffer runs out and continue
//! exactly where they stopped when called again. The caller owns all
//! buffers and the event loop; this crate performs no I/O.
//!
//! # Example
//!
//! Decoding `[1, "hi"]` delivered one byte at a time:
//!
//! ```
//! use streampack::{Parser, Progress, Token};
//!
//! let bytes = [0x92, 0x01, 0xa2, b'h', b'i'];
//! let mut parser: Parser = Parser::new();
//! let mut seen = Vec::new();
//!
//! for byte in bytes {
//! 	let mut input = &[byte][..];
//! 	let progress = parser.parse(
//! 		&mut input,
//! 		|_context, enter| match enter.node.token {
//! 			Token::Chunk { .. } => {
//! 				seen.push(String::from_utf8_lossy(enter.bytes.unwrap()).into_owned());
//! 			}
//! 			Token::UInt { .. } => seen.push("uint".to_owned()),
//! 			Token::Array { len } => seen.push(format!("array[{len}]")),
//! 			Token::Str { len } => seen.push(format!("str[{len}]")),
//! 			_ => {}
//! 		},
//! 		|_context, _exit| {}
//! 	)?;
//! 	if progress == Progress::Complete {
//! 		break;
//! 	}
//! }
//!
//! assert_eq!(seen, ["array[2]", "uint", "str[2]", "h", "i"]);
//! # Ok::<(), streampack::WalkError>(())
//! ```
//!
//! # Logging
//!
//! This crate uses the [`log`](https://crates.io/crates/log) crate to
//! report session and walker milestones to any interested consumers;
//! executables choose the logger and the verbosity. Nothing is logged on
//! per-byte paths.
//!
//! [MessagePack]: https://github.com/msgpack/msgpack/blob/master/spec.md
//! [MessagePack-RPC]: https://github.com/msgpack-rpc/msgpack-rpc/blob/master/spec.md

#![forbid(unsafe_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
#![deny(non_ascii_idents)]
#![deny(clippy::print_stdout)]
#![deny(clippy::unimplemented)]
#![warn(explicit_outlives_requirements)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]
#![warn(clippy::empty_enum)]
#![warn(clippy::enum_glob_use)]
#![warn(clippy::use_self)]
#![warn(clippy::used_underscore_binding)]

pub use msgpack_tokens::{
	self, DecodeError, EncodeError, MAX_TOKEN, Progress, Reader, Token, Unit, Value, Writer
};
#[doc(inline)]
pub use rpc::{MAX_REQUESTS, Message, RpcError, Session};
#[doc(inline)]
pub use walk::{
	Emit, Enter, Exit, MAX_DEPTH, Node, Parser, Unparser, WalkContext, WalkError
};

pub mod rpc;
pub mod walk;
