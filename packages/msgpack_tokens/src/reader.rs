//! The incremental decoder: byte slices in, token/chunk units out.

use crate::token::{Token, Unit, Value};
use crate::{DecodeError, MAX_TOKEN};

/// An incremental MessagePack decoder.
///
/// `Reader` turns byte slices into [`Unit`]s one call at a time. It may be
/// fed buffers of any size: when the input ends in the middle of a token
/// header, the consumed prefix is copied into an internal scratch area (at
/// most [`MAX_TOKEN`] bytes) and the next call completes the same token.
/// Announced str/bin/ext payloads are never buffered; they are forwarded as
/// [`Unit::Chunk`] slices borrowing directly from the caller's input.
///
/// After a [`DecodeError`] the reader is in an indeterminate state and must
/// be reinitialised with [`Reader::reset`] before reuse.
#[derive(Clone, Debug, Default)]
pub struct Reader {
	scratch: [u8; MAX_TOKEN],
	/// Bytes of a split header buffered in `scratch` so far.
	have: usize,
	/// Total bytes the split header requires; zero when no header is
	/// pending.
	need: usize,
	/// Announced payload bytes still owed as chunk units.
	passthrough: u32
}

impl Reader {
	/// Creates a reader at the start of a token boundary.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the reader to its initial state, discarding any buffered
	/// header prefix and any pending payload passthrough.
	pub fn reset(&mut self) {
		*self = Self::new();
	}

	/// Decodes one unit from the front of `input`, advancing the slice past
	/// the consumed bytes.
	///
	/// Returns `Ok(None)` when the input was insufficient to complete a
	/// unit; the consumed prefix is retained internally and a later call,
	/// given more input, finishes the same token. Chunk units borrow from
	/// `input` and must be used before the buffer is recycled.
	pub fn read<'buf>(
		&mut self,
		input: &mut &'buf [u8]
	) -> Result<Option<Unit<'buf>>, DecodeError> {
		let buf: &'buf [u8] = input;
		if buf.is_empty() {
			return Ok(None);
		}

		if self.passthrough > 0 {
			let take = (self.passthrough as usize).min(buf.len());
			let (bytes, rest) = buf.split_at(take);
			self.passthrough -= take as u32;
			*input = rest;
			return Ok(Some(Unit::Chunk(bytes)));
		}

		if self.need > 0 {
			let take = (self.need - self.have).min(buf.len());
			self.scratch[self.have..self.have + take].copy_from_slice(&buf[..take]);
			self.have += take;
			*input = &buf[take..];
			if self.have < self.need {
				return Ok(None);
			}
			let token = match decode_header(&self.scratch[..self.need])? {
				Header::Complete { token, .. } => token,
				// The recorded requirement must complete the header
				Header::Incomplete { .. } => return Err(DecodeError::new())
			};
			self.have = 0;
			self.need = 0;
			return Ok(Some(self.announce(token)));
		}

		match decode_header(buf)? {
			Header::Complete { token, consumed } => {
				*input = &buf[consumed..];
				Ok(Some(self.announce(token)))
			}
			Header::Incomplete { need } => {
				self.scratch[..buf.len()].copy_from_slice(buf);
				self.have = buf.len();
				self.need = need;
				*input = &[];
				Ok(None)
			}
		}
	}

	/// Records the passthrough owed by a payload-bearing header and wraps
	/// the token as a unit.
	fn announce(&mut self, token: Token) -> Unit<'static> {
		if let Token::Str { len } | Token::Bin { len } | Token::Ext { len, .. } = token {
			self.passthrough = len;
		}
		Unit::Token(token)
	}
}

/// Outcome of scanning a token header at the front of a byte slice.
enum Header {
	/// A full header was present.
	Complete { token: Token, consumed: usize },
	/// The header requires `need` bytes in total (including the leading
	/// type code) before it can be decoded.
	Incomplete { need: usize }
}

/// Scans one token header. `bytes` must be nonempty; the first byte is the
/// wire type code, which alone determines how many further bytes the header
/// needs.
fn decode_header(bytes: &[u8]) -> Result<Header, DecodeError> {
	let code = bytes[0];
	Ok(match code {
		// Positive fixint
		0x00..=0x7f => complete(
			Token::UInt {
				value: Value {
					lo: code.into(),
					hi: 0
				},
				width: 1
			},
			1
		),
		// Fixmap; map lengths count slots, two per pair
		0x80..=0x8f => complete(
			Token::Map {
				len: u32::from(code & 0x0f) * 2
			},
			1
		),
		// Fixarray
		0x90..=0x9f => complete(
			Token::Array {
				len: (code & 0x0f).into()
			},
			1
		),
		// Fixstr
		0xa0..=0xbf => complete(
			Token::Str {
				len: (code & 0x1f).into()
			},
			1
		),
		0xc0 => complete(Token::Nil, 1),
		// 0xc1 is reserved by the MessagePack specification
		0xc1 => return Err(DecodeError::new()),
		0xc2 => complete(Token::Boolean(false), 1),
		0xc3 => complete(Token::Boolean(true), 1),
		// bin 8/16/32
		0xc4..=0xc6 => length_header(bytes, 1 << (code - 0xc4), |len| Token::Bin { len }),
		// ext 8/16/32, with a trailing type byte
		0xc7..=0xc9 => ext_header(bytes, 1 << (code - 0xc7)),
		// float 32/64
		0xca | 0xcb => value_header(bytes, 4 << (code - 0xca), |value, width| {
			Token::Float { value, width }
		}),
		// uint 8/16/32/64
		0xcc..=0xcf => value_header(bytes, 1 << (code - 0xcc), |value, width| {
			Token::UInt { value, width }
		}),
		// int 8/16/32/64
		0xd0..=0xd3 => value_header(bytes, 1 << (code - 0xd0), sint_token),
		// fixext 1/2/4/8/16; only the type byte follows the code
		0xd4..=0xd8 => {
			if bytes.len() < 2 {
				Header::Incomplete { need: 2 }
			} else {
				complete(
					Token::Ext {
						len: 1 << (code - 0xd4),
						tag: bytes[1] as i8
					},
					2
				)
			}
		}
		// str 8/16/32
		0xd9..=0xdb => length_header(bytes, 1 << (code - 0xd9), |len| Token::Str { len }),
		// array 16/32
		0xdc | 0xdd => length_header(bytes, 2 << (code - 0xdc), |len| Token::Array { len }),
		// map 16/32; the wire counts pairs, downstream sees slots
		0xde | 0xdf => length_header(bytes, 2 << (code - 0xde), |len| Token::Map {
			len: len.wrapping_mul(2)
		}),
		// Negative fixint, widened to the full two's complement
		0xe0..=0xff => complete(
			Token::SInt {
				value: Value {
					lo: 0xffff_ff00 | u32::from(code),
					hi: u32::MAX
				},
				width: 1
			},
			1
		)
	})
}

fn complete(token: Token, consumed: usize) -> Header {
	Header::Complete { token, consumed }
}

/// Scans a header whose code is followed by `width` big-endian value bytes.
fn value_header(bytes: &[u8], width: usize, make: fn(Value, u8) -> Token) -> Header {
	let need = 1 + width;
	if bytes.len() < need {
		return Header::Incomplete { need };
	}
	complete(make(accumulate(&bytes[1..need]), width as u8), need)
}

/// Scans a str/bin/array/map header whose code is followed by a `width`-byte
/// big-endian length field.
fn length_header(bytes: &[u8], width: usize, make: fn(u32) -> Token) -> Header {
	let need = 1 + width;
	if bytes.len() < need {
		return Header::Incomplete { need };
	}
	complete(make(accumulate(&bytes[1..need]).lo), need)
}

/// Scans an ext 8/16/32 header: a `width`-byte length field followed by the
/// ext type byte.
fn ext_header(bytes: &[u8], width: usize) -> Header {
	let need = 1 + width + 1;
	if bytes.len() < need {
		return Header::Incomplete { need };
	}
	complete(
		Token::Ext {
			len: accumulate(&bytes[1..1 + width]).lo,
			tag: bytes[need - 1] as i8
		},
		need
	)
}

/// Accumulates up to eight big-endian bytes into split halves. Bytes are
/// placed by their distance from the end, filling `lo` first and shifting
/// the accumulated word to `hi` when four bytes remain, so each byte lands
/// in its correct bit position independent of host endianness.
fn accumulate(bytes: &[u8]) -> Value {
	let mut value = Value { lo: 0, hi: 0 };
	let mut remaining = bytes.len();
	for &byte in bytes {
		remaining -= 1;
		value.lo |= u32::from(byte) << ((remaining % 4) * 8);
		if remaining == 4 {
			value.hi = value.lo;
			value.lo = 0;
		}
	}
	value
}

/// Finishes an int 8/16/32/64 header: a cleared most-significant wire bit
/// reinterprets the token as unsigned, otherwise the halves are widened to
/// the full 64-bit two's complement.
fn sint_token(value: Value, width: u8) -> Token {
	let negative = match width {
		8 => value.hi >> 31,
		4 => value.lo >> 31,
		2 => value.lo >> 15,
		_ => value.lo >> 7
	} != 0;
	if !negative {
		return Token::UInt { value, width };
	}
	let value = match width {
		1 => Value {
			lo: value.lo | 0xffff_ff00,
			hi: u32::MAX
		},
		2 => Value {
			lo: value.lo | 0xffff_0000,
			hi: u32::MAX
		},
		4 => Value {
			lo: value.lo,
			hi: u32::MAX
		},
		_ => value
	};
	Token::SInt { value, width }
}
