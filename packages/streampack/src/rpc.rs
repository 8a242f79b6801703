//! The MessagePack-RPC session layer: request/response correlation over the
//! token stream.
//!
//! A [`Session`] handles only the message *headers*: the outer array, the
//! message type, and the request id. Payload objects (`method`/`args` or
//! `error`/`result`) are the caller's to read or write with the walker or
//! the raw token engine once the header has been exchanged. The session
//! allocates request ids, remembers a caller data word per outstanding
//! request, and hands that word back when the matching response arrives.

use log::{debug, trace};
use msgpack_tokens::{DecodeError, EncodeError, Progress, Reader, Token, Unit, Writer};
use thiserror::Error;

#[cfg(test)]
mod test;

/// The default number of outstanding-request slots.
pub const MAX_REQUESTS: usize = 32;

/// Wire values of the message type field.
const TYPE_REQUEST: u64 = 0;
const TYPE_RESPONSE: u64 = 1;
const TYPE_NOTIFICATION: u64 = 2;

/// An error produced while exchanging RPC headers.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum RpcError {
	/// The message does not start with an array header.
	#[error("message is not an array")]
	NotAnArray,
	/// The message array does not have 3 or 4 elements.
	#[error("message array length is not 3 or 4")]
	BadArrayLength,
	/// The message type is not request, response or notification.
	#[error("unknown message type")]
	BadType,
	/// The message id is not an unsigned integer fitting 32 bits.
	#[error("message id is not a 32-bit unsigned integer")]
	BadId,
	/// A response or reply names an id with no outstanding request.
	#[error("id does not match an outstanding request")]
	UnknownResponse,
	/// Every request slot is in use.
	#[error("all request slots are in use")]
	SlotsFull,
	/// The underlying byte stream is not valid MessagePack.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// A header token could not be encoded.
	#[error(transparent)]
	Encode(#[from] EncodeError)
}

/// A received message header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Message {
	/// A request from the peer. The id is recorded so [`Session::reply`]
	/// can validate against it; the payload (`method`, `args`) follows on
	/// the wire.
	Request {
		/// The peer-allocated request id.
		id: u32
	},
	/// A response to a request this session sent. The payload (`error`,
	/// `result`) follows on the wire.
	Response {
		/// The id of the request being answered.
		id: u32,
		/// The data word passed to [`Session::request`] when the request
		/// was sent.
		data: u64
	},
	/// A notification; no id, no reply expected. The payload (`method`,
	/// `args`) follows on the wire.
	Notification
}

/// One entry of the outstanding-request table.
#[derive(Clone, Copy, Debug, Default)]
struct Slot {
	used: bool,
	id: u32,
	data: u64
}

/// Progress of the receive-side header scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum RecvStage {
	/// Expecting the outer array header.
	#[default]
	ArrayHeader,
	/// Expecting the message type.
	TypeCode,
	/// Expecting the message id of a request or response.
	MessageId {
		/// Whether the message is a request (else a response).
		request: bool
	}
}

/// An outgoing header being flushed through the writer.
#[derive(Clone, Copy, Debug)]
struct SendHeader {
	tokens: [Token; 3],
	count: u8,
	index: u8
}

/// A MessagePack-RPC session.
///
/// The const parameter fixes the outstanding-request capacity. Sessions of
/// different capacities coexist; [`copy_to`](Self::copy_to) moves the slot
/// table and id allocator into a larger instance between messages.
///
/// After any [`RpcError`] other than [`RpcError::SlotsFull`] the header
/// scan state is indeterminate and the session must be replaced before
/// further traffic is exchanged.
#[derive(Clone, Debug)]
pub struct Session<const SLOTS: usize = MAX_REQUESTS> {
	reader: Reader,
	writer: Writer,
	recv: RecvStage,
	send: Option<SendHeader>,
	next_id: u32,
	slots: [Slot; SLOTS]
}

impl<const SLOTS: usize> Default for Session<SLOTS> {
	fn default() -> Self {
		Self::new()
	}
}

impl<const SLOTS: usize> Session<SLOTS> {
	/// Creates a session whose id allocator starts at zero.
	pub fn new() -> Self {
		Self::with_seed(0)
	}

	/// Creates a session whose id allocator starts at `seed`. Allocation
	/// increments by one per request and wraps through 2³², skipping ids
	/// still outstanding.
	pub fn with_seed(seed: u32) -> Self {
		Self {
			reader: Reader::new(),
			writer: Writer::new(),
			recv: RecvStage::default(),
			send: None,
			next_id: seed,
			slots: [Slot::default(); SLOTS]
		}
	}

	/// Consumes one message header from `input`, advancing the cursor.
	///
	/// Returns `Ok(None)` when the input ran out mid-header; the scan
	/// resumes on the next call. On `Ok(Some(..))` the header has been
	/// consumed in full and the cursor stands at the first payload token,
	/// which the caller reads with its own walker.
	pub fn receive(&mut self, input: &mut &[u8]) -> Result<Option<Message>, RpcError> {
		loop {
			let Some(unit) = self.reader.read(input)? else {
				return Ok(None);
			};
			let Unit::Token(token) = unit else {
				return Err(RpcError::NotAnArray);
			};
			match self.recv {
				RecvStage::ArrayHeader => match token {
					Token::Array { len: 3 | 4 } => self.recv = RecvStage::TypeCode,
					Token::Array { .. } => return Err(RpcError::BadArrayLength),
					_ => return Err(RpcError::NotAnArray)
				},
				RecvStage::TypeCode => match token.as_u64() {
					Some(TYPE_REQUEST) => self.recv = RecvStage::MessageId { request: true },
					Some(TYPE_RESPONSE) => self.recv = RecvStage::MessageId { request: false },
					Some(TYPE_NOTIFICATION) => {
						self.recv = RecvStage::ArrayHeader;
						trace!("received notification header");
						return Ok(Some(Message::Notification));
					}
					_ => return Err(RpcError::BadType)
				},
				RecvStage::MessageId { request } => {
					let id = match token {
						Token::UInt { value, .. } if value.hi == 0 => value.lo,
						_ => return Err(RpcError::BadId)
					};
					self.recv = RecvStage::ArrayHeader;
					if request {
						self.store(id, 0)?;
						debug!("received request {id}");
						return Ok(Some(Message::Request { id }));
					}
					let data = self.release(id).ok_or(RpcError::UnknownResponse)?;
					debug!("received response {id}");
					return Ok(Some(Message::Response { id, data }));
				}
			}
		}
	}

	/// Starts a request: allocates an id, remembers `data` for it, and
	/// writes the `[type, id, ..]` header prefix into `output`. The caller
	/// writes the `method` and `args` payload objects next.
	///
	/// On [`Progress::Partial`] the output filled mid-header; call again
	/// with more room (the id is allocated once, on the first call).
	pub fn request(&mut self, output: &mut &mut [u8], data: u64) -> Result<Progress, RpcError> {
		if self.send.is_none() {
			let id = self.allocate(data)?;
			debug!("sending request {id}");
			self.send = Some(SendHeader {
				tokens: [
					Token::Array { len: 4 },
					Token::uint(TYPE_REQUEST),
					Token::uint(u64::from(id))
				],
				count: 3,
				index: 0
			});
		}
		self.flush(output)
	}

	/// Starts a reply to a received request: validates that `id` is
	/// outstanding, frees its slot, and writes the header prefix into
	/// `output`. The caller writes the `error` and `result` payload objects
	/// next.
	///
	/// Fails with [`RpcError::UnknownResponse`], emitting nothing, when
	/// `id` was never received or has already been answered.
	pub fn reply(&mut self, output: &mut &mut [u8], id: u32) -> Result<Progress, RpcError> {
		if self.send.is_none() {
			self.release(id).ok_or(RpcError::UnknownResponse)?;
			debug!("sending reply {id}");
			self.send = Some(SendHeader {
				tokens: [
					Token::Array { len: 4 },
					Token::uint(TYPE_RESPONSE),
					Token::uint(u64::from(id))
				],
				count: 3,
				index: 0
			});
		}
		self.flush(output)
	}

	/// Starts a notification: writes the `[type, ..]` header prefix into
	/// `output`. The caller writes the `method` and `args` payload objects
	/// next.
	pub fn notify(&mut self, output: &mut &mut [u8]) -> Result<Progress, RpcError> {
		if self.send.is_none() {
			trace!("sending notification header");
			self.send = Some(SendHeader {
				tokens: [
					Token::Array { len: 3 },
					Token::uint(TYPE_NOTIFICATION),
					Token::Nil
				],
				count: 2,
				index: 0
			});
		}
		self.flush(output)
	}

	/// The number of outstanding requests in the slot table.
	pub fn outstanding(&self) -> usize {
		self.slots.iter().filter(|slot| slot.used).count()
	}

	/// Copies the slot table and the id allocator into a fresh session with
	/// more capacity, between messages. Header scan state and pending
	/// writes are not carried over.
	///
	/// # Panics
	///
	/// Panics if the target capacity is smaller.
	pub fn copy_to<const TARGET: usize>(&self, target: &mut Session<TARGET>) {
		assert!(
			SLOTS <= TARGET,
			"target session capacity {TARGET} is smaller than {SLOTS}"
		);
		target.next_id = self.next_id;
		target.slots[..SLOTS].copy_from_slice(&self.slots);
	}

	/// Emits the pending header tokens until done or out of room.
	fn flush(&mut self, output: &mut &mut [u8]) -> Result<Progress, RpcError> {
		let Some(header) = &mut self.send else {
			return Ok(Progress::Complete);
		};
		while header.index < header.count {
			match self.writer.write(output, header.tokens[usize::from(header.index)])? {
				Progress::Partial => return Ok(Progress::Partial),
				Progress::Complete => header.index += 1
			}
		}
		self.send = None;
		Ok(Progress::Complete)
	}

	fn lookup(&self, id: u32) -> Option<usize> {
		self.slots.iter().position(|slot| slot.used && slot.id == id)
	}

	/// Allocates the next free id at or after the counter and records it
	/// with `data`.
	fn allocate(&mut self, data: u64) -> Result<u32, RpcError> {
		let free = self
			.slots
			.iter()
			.position(|slot| !slot.used)
			.ok_or(RpcError::SlotsFull)?;
		let mut id = self.next_id;
		while self.lookup(id).is_some() {
			id = id.wrapping_add(1);
		}
		self.next_id = id.wrapping_add(1);
		self.slots[free] = Slot {
			used: true,
			id,
			data
		};
		Ok(id)
	}

	/// Records an id observed in an incoming request. An id already present
	/// keeps its slot untouched.
	fn store(&mut self, id: u32, data: u64) -> Result<(), RpcError> {
		if self.lookup(id).is_some() {
			return Ok(());
		}
		let free = self
			.slots
			.iter()
			.position(|slot| !slot.used)
			.ok_or(RpcError::SlotsFull)?;
		self.slots[free] = Slot {
			used: true,
			id,
			data
		};
		Ok(())
	}

	/// Frees the slot for `id`, returning its data word.
	fn release(&mut self, id: u32) -> Option<u64> {
		let index = self.lookup(id)?;
		self.slots[index].used = false;
		Some(self.slots[index].data)
	}
}
