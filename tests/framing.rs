use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::thread_rng;

use asterix::framing::{fragment, fragment_count, FrameMode, Fragment, Reassembler};
use asterix::record::{decode_message, encode_message, Record, Value};
use asterix::uap::{CategoryRegistry, CategorySpec, FieldKind, FieldSpec};

fn registry() -> CategoryRegistry {
    CategoryRegistry::from_specs([CategorySpec::new(
        48,
        vec![
            FieldSpec::new("010", FieldKind::Fixed { len: 2 }),
            FieldSpec::new("140", FieldKind::Fixed { len: 3 }),
            FieldSpec::new(
                "250",
                FieldKind::Repetitive {
                    item: Box::new(FieldSpec::new("250/mb", FieldKind::Fixed { len: 8 })),
                },
            ),
        ],
    )])
}

fn sample_records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::new(48)
                .with_field("010", Value::Bytes(vec![0x19, i as u8]))
                .with_field("140", Value::Bytes(vec![0x3a, 0x85, i as u8]))
                .with_field(
                    "250",
                    Value::Items(vec![Value::Bytes(vec![i as u8; 8])]),
                )
        })
        .collect()
}

/// Push fragments through the byte-level frame codec, as a bus would see
/// them, then into the reassembler.
fn over_the_wire(reassembler: &Reassembler, fragments: &[Fragment]) -> Option<Vec<u8>> {
    let mut rebuilt = None;
    for frag in fragments {
        let frame = frag.encode();
        let received = Fragment::decode(frag.group, &frame).unwrap();
        if let Some(message) = reassembler.push(received).unwrap() {
            rebuilt = Some(message);
        }
    }
    rebuilt
}

#[test]
fn classic_frames_carry_a_whole_message() {
    let registry = registry();
    let records = sample_records(3);
    let encoded = encode_message(&registry, &records).unwrap();
    assert_eq!(
        fragment_count(encoded.len(), FrameMode::Classic.max_payload()),
        encoded.len().div_ceil(7)
    );

    let fragments = fragment(1, &encoded, FrameMode::Classic.max_payload()).unwrap();
    let reassembler = Reassembler::new();
    let rebuilt = over_the_wire(&reassembler, &fragments).expect("message did not complete");

    let message = decode_message(&registry, &rebuilt);
    assert!(message.error.is_none());
    assert_eq!(message.records, records);
}

#[test]
fn fd_frames_span_far_fewer_frames() {
    let encoded = vec![0x55; 100];
    let classic = fragment(1, &encoded, FrameMode::Classic.max_payload()).unwrap();
    let fd = fragment(1, &encoded, FrameMode::Fd.max_payload()).unwrap();
    assert_eq!(classic.len(), 15);
    assert_eq!(fd.len(), 2);

    let reassembler = Reassembler::new();
    assert_eq!(over_the_wire(&reassembler, &fd), Some(encoded));
}

#[test]
fn shuffled_delivery_still_completes() {
    let registry = registry();
    let encoded = encode_message(&registry, &sample_records(5)).unwrap();
    let mut fragments = fragment(7, &encoded, FrameMode::Classic.max_payload()).unwrap();
    fragments.shuffle(&mut thread_rng());

    let reassembler = Reassembler::new();
    let mut completions = 0;
    let mut rebuilt = None;
    for frag in fragments {
        if let Some(message) = reassembler.push(frag).unwrap() {
            completions += 1;
            rebuilt = Some(message);
        }
    }
    assert_eq!(completions, 1, "group must complete exactly once");
    assert_eq!(rebuilt, Some(encoded));
    assert!(reassembler.is_empty());
}

#[test]
fn interleaved_groups_complete_independently() {
    let registry = registry();
    let first = encode_message(&registry, &sample_records(2)).unwrap();
    let second = encode_message(&registry, &sample_records(4)).unwrap();

    let frags_a = fragment(10, &first, FrameMode::Classic.max_payload()).unwrap();
    let frags_b = fragment(11, &second, FrameMode::Classic.max_payload()).unwrap();

    // round-robin delivery across the two groups
    let reassembler = Reassembler::new();
    let mut done = Vec::new();
    let mut a = frags_a.into_iter();
    let mut b = frags_b.into_iter();
    loop {
        let mut any = false;
        for frag in [a.next(), b.next()].into_iter().flatten() {
            any = true;
            if let Some(message) = reassembler.push(frag).unwrap() {
                done.push(message);
            }
        }
        if !any {
            break;
        }
    }
    assert_eq!(done.len(), 2);
    // the shorter message finishes first
    assert_eq!(done[0], first);
    assert_eq!(done[1], second);
    assert!(reassembler.is_empty());
}

#[test]
fn lost_fragment_times_out_and_a_resend_succeeds() {
    let registry = registry();
    let encoded = encode_message(&registry, &sample_records(2)).unwrap();
    let fragments = fragment(3, &encoded, FrameMode::Classic.max_payload()).unwrap();
    assert!(fragments.len() > 2);

    let reassembler = Reassembler::new().with_timeout(Duration::from_millis(20));
    // first attempt loses fragment 1
    for frag in &fragments {
        if frag.index == 1 {
            continue;
        }
        assert_eq!(reassembler.push(frag.clone()).unwrap(), None);
    }
    assert_eq!(reassembler.len(), 1, "incomplete group must linger");

    thread::sleep(Duration::from_millis(40));

    // complete resend under the same group id
    let rebuilt = over_the_wire(&reassembler, &fragments);
    assert_eq!(rebuilt, Some(encoded));
    assert!(reassembler.is_empty());
}

#[test]
fn concurrent_senders_with_a_background_sweeper() {
    let reassembler = Arc::new(Reassembler::new().with_timeout(Duration::from_millis(50)));
    let sweeper = asterix::framing::spawn_sweeper(
        Arc::clone(&reassembler),
        Duration::from_millis(10),
    );

    let mut handles = Vec::new();
    for group in 0u32..4 {
        let reassembler = Arc::clone(&reassembler);
        handles.push(thread::spawn(move || {
            let message = vec![group as u8; 200];
            let mut fragments = fragment(group, &message, 7).unwrap();
            fragments.shuffle(&mut thread_rng());
            let mut rebuilt = None;
            for frag in fragments {
                rebuilt = reassembler.push(frag).unwrap().or(rebuilt);
            }
            assert_eq!(rebuilt, Some(message));
        }));
    }
    // one group that never completes and must be swept
    assert_eq!(
        reassembler
            .push(Fragment {
                group: 99,
                index: 0,
                last: false,
                payload: vec![0xff; 7],
            })
            .unwrap(),
        None
    );

    for handle in handles {
        handle.join().unwrap();
    }
    thread::sleep(Duration::from_millis(120));
    assert!(reassembler.is_empty(), "sweeper should have reclaimed group 99");
    sweeper.stop();
}
