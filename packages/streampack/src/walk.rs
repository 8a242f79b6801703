//! The object walker: a bounded-depth, resumable depth-first traversal over
//! the flat token stream.
//!
//! [`Parser`] lifts decoded tokens into enter/exit events over the implicit
//! object tree; [`Unparser`] is its dual, asking callbacks to choose tokens
//! and emitting their wire form. Both are explicitly iterative over an
//! inline stack of [`Node`]s: input may end mid-structure, so host recursion
//! is unusable, and the bounded stack caps how deep untrusted input can
//! nest before the walk fails with [`WalkError::Depth`] instead of
//! exhausting the call stack.

use log::trace;
use msgpack_tokens::{DecodeError, EncodeError, Progress, Reader, Token, Unit, Writer};
use thiserror::Error;


/// The default walker stack capacity, in nodes.
pub const MAX_DEPTH: usize = 32;

/// An error produced while walking a token stream.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum WalkError {
	/// The object nests deeper than the walker stack. Recoverable: copy the
	/// walker into one with a larger capacity and drive it again with the
	/// same cursor.
	#[error("object nesting exceeds the walker depth")]
	Depth,
	/// A callback aborted the walk through [`WalkContext::throw`]. The
	/// walker is poisoned until [reset](Parser::reset).
	#[error("walk aborted by a callback")]
	Thrown,
	/// An unparse callback chose a chunk step without supplying the payload
	/// bytes for it.
	#[error("chunk step without payload bytes")]
	MissingChunk,
	/// The underlying byte stream is not valid MessagePack.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// A callback chose a token with no valid wire form.
	#[error(transparent)]
	Encode(#[from] EncodeError)
}

/// One frame of a walker stack: an object on the path from the root to the
/// traversal cursor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Node {
	/// The token that opened this object.
	pub token: Token,
	/// Children already processed for arrays and maps, payload bytes
	/// already processed for str/bin/ext.
	pub pos: u64,
	/// On a map node: whether the key of the pair currently being walked
	/// has already been delivered. Lets a callback tell keys from values
	/// when both have the same token type.
	pub key_visited: bool,
	/// One word for the caller; the walker never interprets it.
	pub data: u64
}

impl Node {
	/// Whether this node still expects children or payload bytes.
	fn is_open(&self) -> bool {
		match self.token {
			Token::Array { len }
			| Token::Map { len }
			| Token::Str { len }
			| Token::Bin { len }
			| Token::Ext { len, .. } => self.pos < u64::from(len),
			_ => false
		}
	}

	/// How much this node advances its parent's cursor when it exits.
	fn advance(&self) -> u64 {
		match self.token {
			Token::Chunk { len } => u64::from(len),
			_ => 1
		}
	}
}

/// The walker state visible to callbacks: one word of caller data and the
/// throw flag.
#[derive(Clone, Copy, Debug, Default)]
pub struct WalkContext {
	/// One word for the caller; the walker never interprets it.
	pub data: u64,
	thrown: bool
}

impl WalkContext {
	/// Aborts the walk. No further callbacks run; the driving call returns
	/// [`WalkError::Thrown`] and the walker stays poisoned until reset.
	///
	/// This is the only error channel callbacks have: they return nothing,
	/// because the walker interleaves several callback invocations per
	/// outer call and a smuggled result would be ambiguous.
	pub fn throw(&mut self) {
		self.thrown = true;
	}

	/// Whether the walk has been aborted.
	pub const fn thrown(&self) -> bool {
		self.thrown
	}
}

/// The frame handed to a parse enter callback.
#[derive(Debug)]
pub struct Enter<'a, 'buf> {
	/// The node just entered. Its token is filled in; `data` is the
	/// callback's to set.
	pub node: &'a mut Node,
	/// The enclosing node, absent for the root.
	pub parent: Option<&'a Node>,
	/// The payload bytes when the entered node is a chunk, borrowing from
	/// the current input buffer.
	pub bytes: Option<&'buf [u8]>
}

/// The frame handed to an exit callback.
#[derive(Debug)]
pub struct Exit<'a> {
	/// The node about to pop.
	pub node: &'a mut Node,
	/// The enclosing node, absent for the root.
	pub parent: Option<&'a Node>
}

/// The frame handed to an unparse enter callback, which must choose the
/// token for the step.
#[derive(Debug)]
pub struct Emit<'a, 'tree> {
	/// The node just pushed. The callback fills its token (it defaults to
	/// nil) or calls [`Emit::supply_chunk`].
	pub node: &'a mut Node,
	/// The enclosing node, absent for the root.
	pub parent: Option<&'a Node>,
	chunk: &'a mut Option<&'tree [u8]>
}

impl<'tree> Emit<'_, 'tree> {
	/// Makes this step a payload chunk carrying `bytes`, borrowed from the
	/// tree being encoded.
	pub fn supply_chunk(&mut self, bytes: &'tree [u8]) {
		self.node.token = Token::Chunk {
			len: bytes.len() as u32
		};
		*self.chunk = Some(bytes);
	}
}

/// Pops every node that has no more children or payload pending, invoking
/// the exit callback and rolling each node's advance into its parent.
/// Returns `true` once the stack empties, i.e. a complete root object has
/// been walked.
fn unwind<X>(
	nodes: &mut [Node],
	depth: &mut usize,
	context: &mut WalkContext,
	exit: &mut X
) -> Result<bool, WalkError>
where
	X: FnMut(&mut WalkContext, Exit<'_>)
{
	loop {
		if nodes[*depth - 1].is_open() {
			return Ok(false);
		}
		let (below, top) = nodes.split_at_mut(*depth - 1);
		exit(
			context,
			Exit {
				node: &mut top[0],
				parent: below.last().map(|parent| &*parent)
			}
		);
		if context.thrown {
			trace!("walk aborted by an exit callback");
			return Err(WalkError::Thrown);
		}
		let advance = top[0].advance();
		*depth -= 1;
		if *depth == 0 {
			return Ok(true);
		}
		nodes[*depth - 1].pos += advance;
	}
}

/// Pushes a fresh node holding `token`, maintaining the parent's
/// key-visited flag, and returns the split borrow used to invoke the enter
/// callback.
fn push<'n>(
	nodes: &'n mut [Node],
	depth: &mut usize,
	token: Token
) -> (&'n mut Node, Option<&'n Node>) {
	nodes[*depth] = Node {
		token,
		..Node::default()
	};
	*depth += 1;
	let (below, top) = nodes.split_at_mut(*depth - 1);
	if let Some(parent) = below.last_mut() {
		if matches!(parent.token, Token::Map { .. }) {
			parent.key_visited = parent.pos % 2 == 1;
		}
	}
	(&mut top[0], below.last().map(|parent| &*parent))
}

/// A depth-bounded decoder of object trees.
///
/// `Parser` owns a [`Reader`] and drives enter/exit callbacks over the
/// decoded token stream. It is resumable at any input granularity: a
/// [`Progress::Partial`] return means the input ran out (possibly
/// mid-token) and the next [`parse`](Self::parse) call continues exactly
/// where the walk stopped. The const parameter fixes the stack capacity;
/// walkers of different capacities coexist freely and
/// [`copy_to`](Self::copy_to) moves an in-progress walk into a deeper one.
#[derive(Clone, Debug)]
pub struct Parser<const DEPTH: usize = MAX_DEPTH> {
	reader: Reader,
	context: WalkContext,
	depth: usize,
	nodes: [Node; DEPTH]
}

impl<const DEPTH: usize> Default for Parser<DEPTH> {
	fn default() -> Self {
		Self::new()
	}
}

impl<const DEPTH: usize> Parser<DEPTH> {
	/// Creates a parser with an empty stack.
	pub fn new() -> Self {
		Self {
			reader: Reader::new(),
			context: WalkContext::default(),
			depth: 0,
			nodes: [Node::default(); DEPTH]
		}
	}

	/// Parses tokens from `input` until one complete root object has been
	/// walked ([`Progress::Complete`]), the input runs out
	/// ([`Progress::Partial`]), or the walk fails. The cursor advances past
	/// every consumed byte in all cases, so a failed walk can be retried
	/// from the exact failure point after recovery (see
	/// [`WalkError::Depth`]).
	///
	/// `enter` runs preorder, once per object, including once per payload
	/// chunk; `exit` runs postorder. Keys of a map are delivered before the
	/// values they index.
	pub fn parse<'buf, E, X>(
		&mut self,
		input: &mut &'buf [u8],
		mut enter: E,
		mut exit: X
	) -> Result<Progress, WalkError>
	where
		E: FnMut(&mut WalkContext, Enter<'_, 'buf>),
		X: FnMut(&mut WalkContext, Exit<'_>)
	{
		if self.context.thrown {
			return Err(WalkError::Thrown);
		}
		loop {
			if input.is_empty() {
				return Ok(Progress::Partial);
			}
			if self.depth == DEPTH {
				trace!("parser stack of {DEPTH} exhausted");
				return Err(WalkError::Depth);
			}
			let Some(unit) = self.reader.read(input)? else {
				return Ok(Progress::Partial);
			};
			let bytes = match unit {
				Unit::Chunk(bytes) => Some(bytes),
				Unit::Token(_) => None
			};
			let (node, parent) = push(&mut self.nodes, &mut self.depth, unit.token());
			enter(&mut self.context, Enter { node, parent, bytes });
			if self.context.thrown {
				trace!("walk aborted by an enter callback");
				return Err(WalkError::Thrown);
			}
			if unwind(&mut self.nodes, &mut self.depth, &mut self.context, &mut exit)? {
				return Ok(Progress::Complete);
			}
		}
	}

	/// The number of stack frames currently in use.
	pub const fn depth(&self) -> usize {
		self.depth
	}

	/// The callback-visible context.
	pub const fn context(&self) -> &WalkContext {
		&self.context
	}

	/// The callback-visible context, mutably.
	pub fn context_mut(&mut self) -> &mut WalkContext {
		&mut self.context
	}

	/// Returns the parser to its initial state, clearing the stack, the
	/// reader scratch, and any throw poisoning.
	pub fn reset(&mut self) {
		*self = Self::new();
	}

	/// Copies this walk, including the partially decoded token held by the
	/// reader, into a parser of a different capacity. The target continues
	/// from the same input cursor as if it had performed the walk itself.
	///
	/// # Panics
	///
	/// Panics if the walk in progress is deeper than the target's capacity.
	pub fn copy_to<const TARGET: usize>(&self, target: &mut Parser<TARGET>) {
		assert!(
			self.depth <= TARGET,
			"target parser capacity {TARGET} is shallower than the walk"
		);
		target.reader = self.reader.clone();
		target.context = self.context;
		target.depth = self.depth;
		target.nodes[..self.depth].copy_from_slice(&self.nodes[..self.depth]);
	}
}

/// The unparse stage the walker resumes into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
	/// Ask the enter callback for the next token.
	Enter,
	/// Emit the chosen token through the writer.
	Visit
}

/// A depth-bounded encoder of object trees, the dual of [`Parser`].
///
/// The enter callback chooses each token in preorder (guided by the node
/// and parent frames plus whatever state it captures); the walker emits the
/// token and calls the exit callback postorder once the object and all its
/// children are written. `'tree` is the lifetime of the data being encoded:
/// payload chunks borrow from it, which is what lets an interrupted chunk
/// write resume on the next call without re-running any callback.
#[derive(Clone, Debug)]
pub struct Unparser<'tree, const DEPTH: usize = MAX_DEPTH> {
	writer: Writer,
	context: WalkContext,
	stage: Stage,
	depth: usize,
	nodes: [Node; DEPTH],
	chunk: Option<&'tree [u8]>
}

impl<const DEPTH: usize> Default for Unparser<'_, DEPTH> {
	fn default() -> Self {
		Self::new()
	}
}

impl<'tree, const DEPTH: usize> Unparser<'tree, DEPTH> {
	/// Creates an unparser with an empty stack.
	pub fn new() -> Self {
		Self {
			writer: Writer::new(),
			context: WalkContext::default(),
			stage: Stage::Enter,
			depth: 0,
			nodes: [Node::default(); DEPTH],
			chunk: None
		}
	}

	/// Encodes one root object chosen by the callbacks into `output`,
	/// advancing the cursor past every emitted byte.
	///
	/// Returns [`Progress::Partial`] when the output fills; call again with
	/// more room, and the interrupted token resumes without its enter
	/// callback running a second time. Returns [`Progress::Complete`] once
	/// the root object and all its children have been emitted.
	pub fn unparse<E, X>(
		&mut self,
		output: &mut &mut [u8],
		mut enter: E,
		mut exit: X
	) -> Result<Progress, WalkError>
	where
		E: FnMut(&mut WalkContext, Emit<'_, 'tree>),
		X: FnMut(&mut WalkContext, Exit<'_>)
	{
		if self.context.thrown {
			return Err(WalkError::Thrown);
		}
		loop {
			match self.stage {
				Stage::Enter => {
					if output.is_empty() {
						return Ok(Progress::Partial);
					}
					if self.depth == DEPTH {
						trace!("unparser stack of {DEPTH} exhausted");
						return Err(WalkError::Depth);
					}
					self.chunk = None;
					let (node, parent) = push(&mut self.nodes, &mut self.depth, Token::Nil);
					enter(
						&mut self.context,
						Emit {
							node,
							parent,
							chunk: &mut self.chunk
						}
					);
					if self.context.thrown {
						trace!("walk aborted by an enter callback");
						return Err(WalkError::Thrown);
					}
					self.stage = Stage::Visit;
				}
				Stage::Visit => {
					let token = self.nodes[self.depth - 1].token;
					let progress = match token {
						Token::Chunk { .. } => {
							let Some(bytes) = self.chunk else {
								return Err(WalkError::MissingChunk);
							};
							self.writer.write_chunk(output, bytes)?
						}
						token => self.writer.write(output, token)?
					};
					if progress == Progress::Partial {
						return Ok(Progress::Partial);
					}
					self.chunk = None;
					self.stage = Stage::Enter;
					if unwind(&mut self.nodes, &mut self.depth, &mut self.context, &mut exit)? {
						return Ok(Progress::Complete);
					}
				}
			}
		}
	}

	/// The number of stack frames currently in use.
	pub const fn depth(&self) -> usize {
		self.depth
	}

	/// The callback-visible context.
	pub const fn context(&self) -> &WalkContext {
		&self.context
	}

	/// The callback-visible context, mutably.
	pub fn context_mut(&mut self) -> &mut WalkContext {
		&mut self.context
	}

	/// Returns the unparser to its initial state, clearing the stack, any
	/// pending token held by the writer, and any throw poisoning.
	pub fn reset(&mut self) {
		*self = Self::new();
	}

	/// Copies this walk, including any partially written token, into an
	/// unparser of a different capacity. The target continues with the same
	/// output cursor as if it had performed the walk itself.
	///
	/// # Panics
	///
	/// Panics if the walk in progress is deeper than the target's capacity.
	pub fn copy_to<const TARGET: usize>(&self, target: &mut Unparser<'tree, TARGET>) {
		assert!(
			self.depth <= TARGET,
			"target unparser capacity {TARGET} is shallower than the walk"
		);
		target.writer = self.writer.clone();
		target.context = self.context;
		target.stage = self.stage;
		target.depth = self.depth;
		target.nodes[..self.depth].copy_from_slice(&self.nodes[..self.depth]);
		target.chunk = self.chunk;
	}
}
