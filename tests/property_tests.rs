//! Property tests for the frame codec and stream parser.

use chatwire::protocol::{encode_frame, encode_frame_into, Frame, Phase, StreamParser, HEADER_SIZE};
use chatwire::CommandQueue;
use proptest::prelude::*;

/// Split `data` at the given cut points into non-empty chunks.
fn split_at_cuts(data: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts
        .iter()
        .map(|c| c % data.len().max(1))
        .filter(|&c| c > 0)
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(data[start..point].to_vec());
        start = point;
    }
    chunks.push(data[start..].to_vec());
    chunks
}

// ── Codec round trip ──────────────────────────────────────────

proptest! {
    /// Any type byte and payload decode back to exactly what was encoded.
    #[test]
    fn roundtrip_any_type_and_payload(
        msg_type in 0u8..=255u8,
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        let bytes = encode_frame(msg_type, &payload).unwrap();
        prop_assert_eq!(bytes.len(), HEADER_SIZE + payload.len());

        let frames = StreamParser::new().push(&bytes).unwrap();
        prop_assert_eq!(frames, vec![Frame::from_parts(msg_type, &payload)]);
    }

    /// The buffer encoder fails cleanly for every short buffer.
    #[test]
    fn short_buffer_never_partially_written(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        shortfall in 1usize..8,
    ) {
        let size = (HEADER_SIZE + payload.len()).saturating_sub(shortfall);
        let mut out = vec![0xAAu8; size];
        prop_assert!(encode_frame_into(3u8, &payload, &mut out).is_err());
        prop_assert!(out.iter().all(|&b| b == 0xAA));
    }
}

// ── Fragmentation invariance ──────────────────────────────────

proptest! {
    /// However a frame is chunked, exactly one identical frame comes out.
    #[test]
    fn fragmentation_invariance(
        msg_type in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        cuts in proptest::collection::vec(any::<usize>(), 0..16),
    ) {
        let bytes = encode_frame(msg_type, &payload).unwrap();
        let whole = StreamParser::new().push(&bytes).unwrap();

        let mut parser = StreamParser::new();
        let mut pieces = Vec::new();
        for chunk in split_at_cuts(&bytes, &cuts) {
            prop_assert!(!chunk.is_empty());
            pieces.extend(parser.push(&chunk).unwrap());
        }

        prop_assert_eq!(pieces.len(), 1);
        prop_assert_eq!(pieces, whole);
        prop_assert_eq!(parser.phase(), Phase::WantHeader);
        prop_assert_eq!(parser.buffered(), 0);
    }

    /// A stream of frames cut anywhere yields every frame in order.
    #[test]
    fn batched_frames_survive_any_chunking(
        frames in proptest::collection::vec(
            (any::<u8>(), proptest::collection::vec(any::<u8>(), 0..256)),
            1..12,
        ),
        cuts in proptest::collection::vec(any::<usize>(), 0..32),
    ) {
        let mut wire = Vec::new();
        for (msg_type, payload) in &frames {
            wire.extend_from_slice(&encode_frame(*msg_type, payload).unwrap());
        }

        let mut parser = StreamParser::new();
        let mut decoded = Vec::new();
        for chunk in split_at_cuts(&wire, &cuts) {
            decoded.extend(parser.push(&chunk).unwrap());
        }

        let expected: Vec<Frame> = frames
            .iter()
            .map(|(t, p)| Frame::from_parts(*t, p))
            .collect();
        prop_assert_eq!(decoded, expected);
    }

    /// Two frames fed in one call produce two events in order.
    #[test]
    fn two_frames_one_call(
        a in proptest::collection::vec(any::<u8>(), 0..128),
        b in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        let mut wire = encode_frame(1u8, &a).unwrap().to_vec();
        wire.extend_from_slice(&encode_frame(2u8, &b).unwrap());

        let mut parser = StreamParser::new();
        let mut count = 0;
        let mut seen = Vec::new();
        let emitted = parser.feed(&wire, |frame| {
            count += 1;
            seen.push(frame);
        }).unwrap();

        prop_assert_eq!(emitted, 2);
        prop_assert_eq!(count, 2);
        prop_assert_eq!(seen[0].msg_type, 1);
        prop_assert_eq!(seen[0].payload(), &a[..]);
        prop_assert_eq!(seen[1].msg_type, 2);
        prop_assert_eq!(seen[1].payload(), &b[..]);
    }
}

// ── Queue order ───────────────────────────────────────────────

proptest! {
    /// Pops return pushes in order for any interleaving of push and pop.
    #[test]
    fn queue_matches_model(ops in proptest::collection::vec(any::<Option<u16>>(), 0..200)) {
        let queue = CommandQueue::new();
        let mut model = std::collections::VecDeque::new();

        for op in ops {
            match op {
                Some(v) => {
                    queue.push(v);
                    model.push_back(v);
                }
                None => prop_assert_eq!(queue.pop(), model.pop_front()),
            }
            prop_assert_eq!(queue.is_empty(), model.is_empty());
        }
    }
}
