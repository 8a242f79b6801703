use std::borrow::Cow;
use std::cell::RefCell;
use std::env;
use std::fs::File;
use std::io::{Read, Write, stdin, stdout};
use std::process::exit;

use getopts::{Options, ParsingStyle};
use log::info;
use stderrlog::ColorChoice;

use streampack::{Enter, Exit, Parser, Progress, Token, WalkError};

fn main() {
	exit(match run() {
		Ok(_) => 0,
		Err(err) => {
			eprintln!("{}", err);
			1
		}
	})
}

fn run() -> Result<(), Cow<'static, str>> {
	let mut options = Options::new();

	options
		.optflag(
			"h",
			"help",
			"Prints information about the accepted command line arguments and exits."
		)
		.optflag(
			"",
			"version",
			"Prints version and copyright information, then exits."
		)
		.optflag(
			"q",
			"quiet",
			"When enabled, the program will only print error messages, unless -h is specified."
		)
		.optflagmulti(
			"v",
			"verbose",
			"Increases the verbosity of the messages. Can be repeated several times."
		)
		.optopt(
			"d",
			"max-depth",
			"The maximum object nesting depth to accept, rounded up to the next \
			internal walker size. The walker starts small and grows on demand up \
			to this bound. The default value is 16384.",
			"DEPTH"
		)
		.parsing_style(ParsingStyle::StopAtFirstFree);

	match options.parse(env::args().skip(1)) {
		Ok(matches) => {
			if matches.opt_present("h") {
				print_header();
				println!();
				println!("Usage:");
				print!(
					"    {} [OPTION]... <input file or ->",
					env!("CARGO_BIN_NAME")
				);
				println!("{}", options.usage(""));
			} else if matches.opt_present("version") {
				print_header();
			} else {
				let quiet_mode = matches.opt_present("q");

				if matches.free.len() != 1 {
					return Err(format!(
						"Too many or few file arguments specified. Run {} -h to see command line argument help",
						env!("CARGO_BIN_NAME")
					))?;
				}

				let max_depth = matches
					.opt_get_default("max-depth", 16384usize)
					.map_err(|err| format!("Invalid value for the max-depth option: {}", err))?;

				init_logging(&matches, quiet_mode);

				let input_file_name = &*matches.free[0];
				let mut bytes = Vec::new();
				match input_file_name {
					"-" => stdin()
						.lock()
						.read_to_end(&mut bytes)
						.map_err(|err| format!("Could not read standard input: {}", err))?,
					file_path => File::open(file_path)
						.and_then(|mut file| file.read_to_end(&mut bytes))
						.map_err(|err| format!("Could not read input file: {}", err))?
				};

				dump(&bytes, max_depth)?;

				info!("{} bytes rendered. Have a nice day!", bytes.len());
			}

			Ok(())
		}
		Err(parse_err) => Err(format!(
			"{}\nRun {} -h to see command line argument help",
			parse_err,
			env!("CARGO_BIN_NAME")
		))?
	}
}

/// Renders every MessagePack document in `bytes` to standard output, one
/// line of JSON text per document, growing the walker on demand up to
/// `max_depth`.
fn dump(bytes: &[u8], max_depth: usize) -> Result<(), Cow<'static, str>> {
	let sink = RefCell::new(JsonSink::new());
	let mut parser = GrowingParser::new();
	let mut input = bytes;
	let mut documents = 0usize;

	while !input.is_empty() {
		match parser.parse(&mut input, &sink) {
			Ok(Progress::Complete) => {
				documents += 1;
				let mut document = sink.borrow_mut().take();
				document.push(b'\n');
				stdout()
					.lock()
					.write_all(&document)
					.map_err(|err| format!("Could not write to standard output: {}", err))?;
			}
			Ok(Progress::Partial) => {
				return Err("The input ended in the middle of a document".into());
			}
			Err(WalkError::Depth) => {
				if parser.capacity() >= max_depth || !parser.grow() {
					return Err(format!(
						"The document nests deeper than the permitted depth of {}",
						parser.capacity()
					))?;
				}
				info!("Growing the walker stack to {} frames", parser.capacity());
			}
			Err(err) => return Err(format!("Could not decode the input: {}", err))?
		}
	}

	if documents == 0 {
		return Err("The input contains no MessagePack document".into());
	}
	info!("Rendered {} document(s)", documents);
	Ok(())
}

/// A parser that starts with a small inline stack and moves in-progress
/// walks into progressively deeper ones when a document needs them.
enum GrowingParser {
	Small(Box<Parser<32>>),
	Medium(Box<Parser<256>>),
	Large(Box<Parser<2048>>),
	Huge(Box<Parser<16384>>)
}

impl GrowingParser {
	fn new() -> Self {
		Self::Small(Box::new(Parser::new()))
	}

	fn capacity(&self) -> usize {
		match self {
			Self::Small(_) => 32,
			Self::Medium(_) => 256,
			Self::Large(_) => 2048,
			Self::Huge(_) => 16384
		}
	}

	fn parse(
		&mut self,
		input: &mut &[u8],
		sink: &RefCell<JsonSink>
	) -> Result<Progress, WalkError> {
		match self {
			Self::Small(parser) => parse_with(parser, input, sink),
			Self::Medium(parser) => parse_with(parser, input, sink),
			Self::Large(parser) => parse_with(parser, input, sink),
			Self::Huge(parser) => parse_with(parser, input, sink)
		}
	}

	/// Moves the walk into the next deeper tier. Returns `false` at the
	/// deepest one.
	fn grow(&mut self) -> bool {
		match self {
			Self::Small(parser) => {
				let mut next = Box::new(Parser::new());
				parser.copy_to(&mut next);
				*self = Self::Medium(next);
			}
			Self::Medium(parser) => {
				let mut next = Box::new(Parser::new());
				parser.copy_to(&mut next);
				*self = Self::Large(next);
			}
			Self::Large(parser) => {
				let mut next = Box::new(Parser::new());
				parser.copy_to(&mut next);
				*self = Self::Huge(next);
			}
			Self::Huge(_) => return false
		}
		true
	}
}

fn parse_with<const DEPTH: usize>(
	parser: &mut Parser<DEPTH>,
	input: &mut &[u8],
	sink: &RefCell<JsonSink>
) -> Result<Progress, WalkError> {
	parser.parse(
		input,
		|_context, enter| sink.borrow_mut().enter(&enter),
		|_context, exit| sink.borrow_mut().exit(&exit)
	)
}

/// Accumulates the JSON-ish rendition of one document. Strings become
/// escaped JSON strings, binaries become arrays of byte values, and ext
/// values become `{"ext": <type>, "data": [<bytes>]}` objects.
struct JsonSink {
	out: Vec<u8>
}

impl JsonSink {
	fn new() -> Self {
		Self { out: Vec::new() }
	}

	fn take(&mut self) -> Vec<u8> {
		std::mem::take(&mut self.out)
	}

	fn enter(&mut self, enter: &Enter<'_, '_>) {
		if let Some(parent) = enter.parent {
			match parent.token {
				Token::Array { .. } if parent.pos > 0 => self.out.push(b','),
				Token::Map { .. } if parent.pos > 0 => {
					self.out.push(if parent.pos % 2 == 1 { b':' } else { b',' });
				}
				_ => {}
			}
		}

		let token = enter.node.token;
		match token {
			Token::Nil => self.out.extend_from_slice(b"null"),
			Token::Boolean(v) => {
				self.out.extend_from_slice(if v { b"true" } else { b"false" });
			}
			Token::UInt { .. } => {
				let _ = write!(self.out, "{}", token.as_u64().unwrap_or_default());
			}
			Token::SInt { .. } => {
				let _ = write!(self.out, "{}", token.as_i64().unwrap_or_default());
			}
			Token::Float { .. } => {
				let _ = write!(self.out, "{:?}", token.as_f64().unwrap_or_default());
			}
			Token::Str { .. } => self.out.push(b'"'),
			Token::Bin { .. } => self.out.push(b'['),
			Token::Ext { tag, .. } => {
				let _ = write!(self.out, "{{\"ext\":{},\"data\":[", tag);
			}
			Token::Array { .. } => self.out.push(b'['),
			Token::Map { .. } => self.out.push(b'{'),
			Token::Chunk { .. } => {
				// The parent tells payload bytes apart: string text is
				// escaped, bin/ext bytes are rendered as numbers
				let bytes = enter.bytes.unwrap_or_default();
				let parent = enter.parent.map(|parent| parent.token);
				if let Some(Token::Str { .. }) = parent {
					self.escape(bytes);
				} else {
					let done = enter.parent.map_or(0, |parent| parent.pos);
					for (index, byte) in bytes.iter().enumerate() {
						if done > 0 || index > 0 {
							self.out.push(b',');
						}
						let _ = write!(self.out, "{}", byte);
					}
				}
			}
		}
	}

	fn exit(&mut self, exit: &Exit<'_>) {
		match exit.node.token {
			Token::Str { .. } => self.out.push(b'"'),
			Token::Bin { .. } | Token::Array { .. } => self.out.push(b']'),
			Token::Ext { .. } => self.out.extend_from_slice(b"]}"),
			Token::Map { .. } => self.out.push(b'}'),
			_ => {}
		}
	}

	/// Escapes string payload for a JSON string literal. Bytes outside the
	/// escape set pass through unchanged, which preserves any UTF-8 text.
	fn escape(&mut self, bytes: &[u8]) {
		for &byte in bytes {
			match byte {
				b'"' => self.out.extend_from_slice(b"\\\""),
				b'\\' => self.out.extend_from_slice(b"\\\\"),
				0x08 => self.out.extend_from_slice(b"\\b"),
				0x0c => self.out.extend_from_slice(b"\\f"),
				b'\n' => self.out.extend_from_slice(b"\\n"),
				b'\r' => self.out.extend_from_slice(b"\\r"),
				b'\t' => self.out.extend_from_slice(b"\\t"),
				0x00..=0x1f => {
					let _ = write!(self.out, "\\u{:04x}", byte);
				}
				_ => self.out.push(byte)
			}
		}
	}
}

fn init_logging(option_matches: &getopts::Matches, quiet_mode: bool) {
	let verbosity_level = option_matches.opt_count("v");

	stderrlog::new()
		.module("streampack")
		.verbosity(2 + verbosity_level)
		.show_level(false)
		.quiet(quiet_mode)
		.color(ColorChoice::Never)
		.init()
		.unwrap();
}

fn print_header() {
	println!(
		"{} {}",
		env!("CARGO_BIN_NAME"),
		env!("CARGO_PKG_VERSION")
	);
	println!("{}", env!("CARGO_PKG_DESCRIPTION"));
	println!("Copyright (C) {}", env!("CARGO_PKG_AUTHORS"));
}
