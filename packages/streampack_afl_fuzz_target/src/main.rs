use streampack::{Parser, Progress};

fn main() {
	afl::fuzz!(|data: &[u8]| {
		// Each fuzz run has to be pretty fast. Just check that no crashes
		// happen; depth and decode errors are expected outcomes on
		// arbitrary input
		let mut parser: Parser = Parser::new();
		let mut input = data;
		loop {
			match parser.parse(&mut input, |_, _| {}, |_, _| {}) {
				Ok(Progress::Complete) if !input.is_empty() => {}
				_ => break
			}
		}
	})
}
