// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound message batching with three priority tiers. Stream messages are
//! shed first under backpressure, then progress; control is never dropped.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::MessageClass;

/// Maximum queued items per droppable tier.
const PROGRESS_BOUND: usize = 512;
const STREAM_BOUND: usize = 256;
/// Nominal control bound; crossing it sheds the droppable tiers instead of
/// refusing the control message.
const CONTROL_BOUND: usize = 1024;
/// Queued-byte threshold that triggers an early flush.
pub const FLUSH_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct Tiers {
    control: VecDeque<Vec<u8>>,
    progress: VecDeque<Vec<u8>>,
    stream: VecDeque<Vec<u8>>,
    bytes: usize,
    dropped_progress: u64,
    dropped_stream: u64,
}

/// Bounded three-tier queue shared between domain senders and the flusher.
pub struct Batcher {
    tiers: Mutex<Tiers>,
    /// Wakes the flusher when queued bytes cross [`FLUSH_BYTES`].
    pub(crate) wake: Notify,
}

impl Batcher {
    pub fn new() -> Self {
        Self { tiers: Mutex::new(Tiers::default()), wake: Notify::new() }
    }

    /// Enqueue one serialized message. Never blocks.
    pub fn enqueue(&self, payload: Vec<u8>, class: MessageClass) {
        let over_threshold = {
            let mut tiers = self.tiers.lock();
            tiers.bytes += payload.len();
            match class {
                MessageClass::Stream => {
                    if tiers.stream.len() >= STREAM_BOUND {
                        if let Some(old) = tiers.stream.pop_front() {
                            tiers.bytes -= old.len();
                            tiers.dropped_stream += 1;
                        }
                    }
                    tiers.stream.push_back(payload);
                }
                MessageClass::Progress => {
                    if tiers.progress.len() >= PROGRESS_BOUND {
                        if let Some(old) = tiers.progress.pop_front() {
                            tiers.bytes -= old.len();
                            tiers.dropped_progress += 1;
                        }
                    }
                    tiers.progress.push_back(payload);
                }
                MessageClass::Control => {
                    if tiers.control.len() >= CONTROL_BOUND {
                        // Shed the droppable tiers to keep memory bounded;
                        // the control message itself is always accepted.
                        tiers.dropped_stream += tiers.stream.len() as u64;
                        let shed: usize = tiers.stream.iter().map(Vec::len).sum();
                        tiers.bytes -= shed;
                        tiers.stream.clear();
                        if tiers.control.len() >= CONTROL_BOUND + PROGRESS_BOUND {
                            tiers.dropped_progress += tiers.progress.len() as u64;
                            let shed: usize = tiers.progress.iter().map(Vec::len).sum();
                            tiers.bytes -= shed;
                            tiers.progress.clear();
                        }
                    }
                    tiers.control.push_back(payload);
                }
            }
            tiers.bytes >= FLUSH_BYTES
        };

        if over_threshold {
            self.wake.notify_one();
        }
    }

    /// Drain everything, control tier first, preserving order within tiers.
    pub fn drain(&self) -> Vec<(MessageClass, Vec<u8>)> {
        let mut tiers = self.tiers.lock();
        let mut out =
            Vec::with_capacity(tiers.control.len() + tiers.progress.len() + tiers.stream.len());
        out.extend(tiers.control.drain(..).map(|p| (MessageClass::Control, p)));
        out.extend(tiers.progress.drain(..).map(|p| (MessageClass::Progress, p)));
        out.extend(tiers.stream.drain(..).map(|p| (MessageClass::Stream, p)));
        tiers.bytes = 0;
        out
    }

    /// Put a failed batch back at the head of its queues, preserving order,
    /// so the next flush retries it.
    pub fn requeue_front(&self, batch: Vec<(MessageClass, Vec<u8>)>) {
        let mut tiers = self.tiers.lock();
        for (class, payload) in batch.into_iter().rev() {
            tiers.bytes += payload.len();
            match class {
                MessageClass::Control => tiers.control.push_front(payload),
                MessageClass::Progress => tiers.progress.push_front(payload),
                MessageClass::Stream => tiers.stream.push_front(payload),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        let tiers = self.tiers.lock();
        tiers.control.is_empty() && tiers.progress.is_empty() && tiers.stream.is_empty()
    }

    /// (stream, progress) messages shed so far.
    pub fn dropped(&self) -> (u64, u64) {
        let tiers = self.tiers.lock();
        (tiers.dropped_stream, tiers.dropped_progress)
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "batcher_tests.rs"]
mod tests;
