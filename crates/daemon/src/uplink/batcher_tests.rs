// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::Batcher;
use crate::uplink::MessageClass;

fn payload(tag: &str, n: usize) -> Vec<u8> {
    format!("{tag}-{n}").into_bytes()
}

#[test]
fn drains_control_before_progress_before_stream() {
    let batcher = Batcher::new();
    batcher.enqueue(payload("stream", 0), MessageClass::Stream);
    batcher.enqueue(payload("control", 0), MessageClass::Control);
    batcher.enqueue(payload("progress", 0), MessageClass::Progress);

    let drained: Vec<String> = batcher
        .drain()
        .into_iter()
        .map(|(_, p)| String::from_utf8(p).unwrap())
        .collect();
    assert_eq!(drained, vec!["control-0", "progress-0", "stream-0"]);
    assert!(batcher.is_empty());
}

#[test]
fn order_within_a_tier_is_preserved() {
    let batcher = Batcher::new();
    for n in 0..5 {
        batcher.enqueue(payload("stream", n), MessageClass::Stream);
    }
    let drained: Vec<String> =
        batcher.drain().into_iter().map(|(_, p)| String::from_utf8(p).unwrap()).collect();
    assert_eq!(drained, vec!["stream-0", "stream-1", "stream-2", "stream-3", "stream-4"]);
}

#[test]
fn stream_overflow_drops_oldest_stream_only() {
    let batcher = Batcher::new();
    for n in 0..300 {
        batcher.enqueue(payload("stream", n), MessageClass::Stream);
    }
    batcher.enqueue(payload("control", 0), MessageClass::Control);

    let (dropped_stream, dropped_progress) = batcher.dropped();
    assert_eq!(dropped_stream, 300 - 256);
    assert_eq!(dropped_progress, 0);

    let drained = batcher.drain();
    // Control survived; the oldest stream entries did not.
    assert!(drained.iter().any(|(c, _)| *c == MessageClass::Control));
    let first_stream = drained
        .iter()
        .find(|(c, _)| *c == MessageClass::Stream)
        .map(|(_, p)| String::from_utf8_lossy(p).to_string())
        .unwrap();
    assert_eq!(first_stream, "stream-44");
}

#[test]
fn control_overflow_sheds_stream_not_control() {
    let batcher = Batcher::new();
    for n in 0..10 {
        batcher.enqueue(payload("stream", n), MessageClass::Stream);
    }
    for n in 0..1025 {
        batcher.enqueue(payload("control", n), MessageClass::Control);
    }
    let drained = batcher.drain();
    let control_count = drained.iter().filter(|(c, _)| *c == MessageClass::Control).count();
    let stream_count = drained.iter().filter(|(c, _)| *c == MessageClass::Stream).count();
    assert_eq!(control_count, 1025);
    assert_eq!(stream_count, 0, "stream should be shed when control overflows");
}

#[test]
fn requeue_front_retries_in_original_order() {
    let batcher = Batcher::new();
    batcher.enqueue(payload("control", 0), MessageClass::Control);
    batcher.enqueue(payload("control", 1), MessageClass::Control);
    let batch = batcher.drain();
    assert!(batcher.is_empty());

    batcher.requeue_front(batch);
    batcher.enqueue(payload("control", 2), MessageClass::Control);

    let drained: Vec<String> =
        batcher.drain().into_iter().map(|(_, p)| String::from_utf8(p).unwrap()).collect();
    assert_eq!(drained, vec!["control-0", "control-1", "control-2"]);
}
