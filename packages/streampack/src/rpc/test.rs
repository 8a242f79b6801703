use test_log::test;

use super::*;

/// Drives one send operation to completion through output windows of
/// `window` bytes, collecting everything it emits.
fn drain<const SLOTS: usize>(
	session: &mut Session<SLOTS>,
	window: usize,
	mut op: impl FnMut(&mut Session<SLOTS>, &mut &mut [u8]) -> Result<Progress, RpcError>
) -> Vec<u8> {
	let mut out = Vec::new();
	let mut buf = vec![0u8; window];
	loop {
		let mut cursor = &mut buf[..];
		let progress = op(session, &mut cursor).expect("header must encode");
		let written = window - cursor.len();
		out.extend_from_slice(&buf[..written]);
		if progress.is_complete() {
			return out;
		}
	}
}

#[test]
fn request_headers_encode_and_resume() {
	for window in [1, 2, 16] {
		let mut session: Session = Session::new();
		assert_eq!(
			drain(&mut session, window, |s, out| s.request(out, 10)),
			[0x94, 0x00, 0x00],
			"window {window}"
		);
		assert_eq!(
			drain(&mut session, window, |s, out| s.request(out, 11)),
			[0x94, 0x00, 0x01],
			"window {window}"
		);
		assert_eq!(session.outstanding(), 2);
	}
}

#[test]
fn notification_headers_have_no_id() {
	let mut session: Session = Session::new();
	assert_eq!(
		drain(&mut session, 1, |s, out| s.notify(out)),
		[0x93, 0x02]
	);
	assert_eq!(session.outstanding(), 0);
}

#[test]
fn responses_carry_the_request_data_word() {
	let mut session: Session = Session::new();
	drain(&mut session, 16, |s, out| s.request(out, 0xdead_beef));

	// The wire-level response [1, 0, nil, nil]
	let wire = [0x94, 0x01, 0x00, 0xc0, 0xc0];
	let mut input = &wire[..];
	let message = session
		.receive(&mut input)
		.expect("valid header")
		.expect("complete header");
	assert_eq!(
		message,
		Message::Response {
			id: 0,
			data: 0xdead_beef
		}
	);
	// Only the header is consumed; the payload is the caller's
	assert_eq!(input, &[0xc0, 0xc0][..]);
	assert_eq!(session.outstanding(), 0);
}

#[test]
fn receive_resumes_across_input_boundaries() {
	let mut session: Session = Session::new();
	drain(&mut session, 16, |s, out| s.request(out, 7));

	let wire = [0x94, 0x01, 0x00];
	for index in 0..2 {
		let mut input = &wire[index..index + 1];
		assert_eq!(session.receive(&mut input).expect("valid prefix"), None);
		assert!(input.is_empty());
	}
	let mut input = &wire[2..];
	assert_eq!(
		session.receive(&mut input).expect("valid header"),
		Some(Message::Response { id: 0, data: 7 })
	);
}

#[test]
fn request_ids_wrap_and_skip_outstanding_ones() {
	let mut session: Session = Session::new();
	// id 0 is allocated and stays outstanding
	assert_eq!(
		drain(&mut session, 16, |s, out| s.request(out, 10)),
		[0x94, 0x00, 0x00]
	);

	// Pin the counter to the top of the id space
	session.next_id = 0xffff_ffff;
	assert_eq!(
		drain(&mut session, 16, |s, out| s.request(out, 11)),
		[0x94, 0x00, 0xce, 0xff, 0xff, 0xff, 0xff]
	);
	// The counter wraps to 0, which is still in use, so 1 is allocated
	assert_eq!(
		drain(&mut session, 16, |s, out| s.request(out, 12)),
		[0x94, 0x00, 0x01]
	);

	// Each outstanding id matches back to its own data word
	for (id_token, data) in [
		(&[0xce, 0xff, 0xff, 0xff, 0xff][..], 11),
		(&[0x01][..], 12),
		(&[0x00][..], 10)
	] {
		let mut wire = vec![0x94, 0x01];
		wire.extend_from_slice(id_token);
		let mut input = &wire[..];
		let Some(Message::Response { data: matched, .. }) =
			session.receive(&mut input).expect("valid header")
		else {
			panic!("expected a response");
		};
		assert_eq!(matched, data);
	}
	assert_eq!(session.outstanding(), 0);
}

#[test]
fn replies_validate_against_received_requests() {
	let mut session: Session = Session::new();
	let mut buf = [0u8; 8];

	// Nothing received yet, so there is nothing to reply to
	let mut cursor = &mut buf[..];
	assert_eq!(session.reply(&mut cursor, 7), Err(RpcError::UnknownResponse));
	assert_eq!(cursor.len(), buf.len(), "a failed reply must emit nothing");

	let wire = [0x94, 0x00, 0x07];
	let mut input = &wire[..];
	assert_eq!(
		session.receive(&mut input).expect("valid header"),
		Some(Message::Request { id: 7 })
	);
	assert_eq!(session.outstanding(), 1);

	assert_eq!(
		drain(&mut session, 1, |s, out| s.reply(out, 7)),
		[0x94, 0x01, 0x07]
	);
	assert_eq!(session.outstanding(), 0);

	// A request is answered once
	let mut cursor = &mut buf[..];
	assert_eq!(session.reply(&mut cursor, 7), Err(RpcError::UnknownResponse));
}

#[test]
fn malformed_headers_are_rejected() {
	let cases: [(&[u8], RpcError); 8] = [
		(&[0x81], RpcError::NotAnArray),
		(&[0xc0], RpcError::NotAnArray),
		(&[0x92], RpcError::BadArrayLength),
		(&[0x95], RpcError::BadArrayLength),
		(&[0x94, 0xc0], RpcError::BadType),
		(&[0x94, 0x03], RpcError::BadType),
		(&[0x94, 0x00, 0xc0], RpcError::BadId),
		(
			// An id of 2^32 does not fit the id space
			&[0x94, 0x01, 0xcf, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
			RpcError::BadId
		)
	];
	for (wire, error) in cases {
		let mut session: Session = Session::new();
		let mut input = wire;
		assert_eq!(session.receive(&mut input), Err(error), "wire {wire:?}");
	}
}

#[test]
fn unmatched_responses_are_rejected() {
	let mut session: Session = Session::new();
	let wire = [0x94, 0x01, 0x05];
	let mut input = &wire[..];
	assert_eq!(
		session.receive(&mut input),
		Err(RpcError::UnknownResponse)
	);
}

#[test]
fn exhausted_slot_tables_report_nomem() {
	let mut session: Session<2> = Session::new();
	drain(&mut session, 16, |s, out| s.request(out, 1));
	drain(&mut session, 16, |s, out| s.request(out, 2));

	let mut buf = [0u8; 8];
	let mut cursor = &mut buf[..];
	assert_eq!(session.request(&mut cursor, 3), Err(RpcError::SlotsFull));
	assert_eq!(cursor.len(), buf.len(), "a failed request must emit nothing");

	// An incoming request also needs a slot for reply tracking
	let wire = [0x94, 0x00, 0x63];
	let mut input = &wire[..];
	assert_eq!(session.receive(&mut input), Err(RpcError::SlotsFull));
}

#[test]
fn sessions_grow_by_copy() {
	let mut small: Session<2> = Session::new();
	drain(&mut small, 16, |s, out| s.request(out, 10));
	drain(&mut small, 16, |s, out| s.request(out, 11));

	let mut big: Session<4> = Session::new();
	small.copy_to(&mut big);
	assert_eq!(big.outstanding(), 2);

	// The id allocator carries over
	assert_eq!(
		drain(&mut big, 16, |s, out| s.request(out, 12)),
		[0x94, 0x00, 0x02]
	);

	// Requests sent before the copy still match their responses
	let wire = [0x94, 0x01, 0x00];
	let mut input = &wire[..];
	assert_eq!(
		big.receive(&mut input).expect("valid header"),
		Some(Message::Response { id: 0, data: 10 })
	);
}

#[test]
fn notifications_are_received_without_an_id() {
	let mut session: Session = Session::new();
	let wire = [0x93, 0x02, 0xa1, b'x', 0x90];
	let mut input = &wire[..];
	assert_eq!(
		session.receive(&mut input).expect("valid header"),
		Some(Message::Notification)
	);
	// The method and args payload stays in the cursor
	assert_eq!(input, &[0xa1, b'x', 0x90][..]);
}

#[test]
fn seeded_sessions_start_at_the_seed() {
	let mut session: Session = Session::with_seed(41);
	assert_eq!(
		drain(&mut session, 16, |s, out| s.request(out, 0)),
		[0x94, 0x00, 0x29]
	);
}
