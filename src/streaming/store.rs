//! In-memory registry of live segments.
//!
//! Single writer (the encoder supervisor), many readers (HTTP handlers).
//! Publishing swaps the segment window and manifest under one short write
//! lock, then wakes anyone waiting on that sequence number. Waiters are
//! tracked per sequence, so a wait on one segment never blocks requests for
//! another.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::manifest::Manifest;
use crate::{Error, Result};

/// How far past the newest segment a request may wait for.
pub const MAX_LOOKAHEAD: u64 = 16;

/// One finalized media segment.
#[derive(Debug, Clone)]
pub struct Segment {
    pub sequence: u64,
    pub duration_secs: f64,
    pub data: Bytes,
    pub created_at: DateTime<Utc>,
}

/// Result of a non-blocking lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(Arc<Segment>),
    /// Produced, then evicted from the window.
    Evicted,
    /// Not produced yet, but close enough to wait for.
    Pending,
    /// Too far ahead of the encoder to ever be waited on.
    Unknown,
    /// Not produced, and the store no longer accepts waits.
    Closed,
}

struct Inner {
    segments: VecDeque<Arc<Segment>>,
    next_sequence: u64,
    manifest: Arc<Manifest>,
    closed: bool,
}

pub struct SegmentStore {
    inner: RwLock<Inner>,
    waiters: DashMap<u64, Arc<Notify>>,
    retain: usize,
}

impl SegmentStore {
    pub fn new(retain: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                segments: VecDeque::with_capacity(retain + 1),
                next_sequence: 0,
                manifest: Arc::new(Manifest::empty(0)),
                closed: false,
            }),
            waiters: DashMap::new(),
            retain: retain.max(1),
        }
    }

    /// Register a finalized segment under the next sequence number.
    ///
    /// Segments beyond the retention window are evicted oldest first.
    pub fn publish(&self, duration_secs: f64, data: Bytes) -> Arc<Segment> {
        let (segment, evicted) = {
            let mut inner = self.inner.write();
            let segment = Arc::new(Segment {
                sequence: inner.next_sequence,
                duration_secs,
                data,
                created_at: Utc::now(),
            });
            inner.next_sequence += 1;
            inner.segments.push_back(segment.clone());

            let mut evicted = Vec::new();
            while inner.segments.len() > self.retain {
                if let Some(old) = inner.segments.pop_front() {
                    evicted.push(old.sequence);
                }
            }

            let manifest = Manifest::from_segments(
                inner.segments.iter().map(|s| s.as_ref()),
                inner.next_sequence,
            );
            inner.manifest = Arc::new(manifest);
            (segment, evicted)
        };

        tracing::debug!(
            sequence = segment.sequence,
            bytes = segment.data.len(),
            duration = segment.duration_secs,
            "Published segment"
        );
        for sequence in evicted {
            tracing::trace!(sequence, "Evicted segment");
        }

        if let Some((_, notify)) = self.waiters.remove(&segment.sequence) {
            notify.notify_waiters();
        }
        segment
    }

    /// Current manifest snapshot.
    pub fn manifest(&self) -> Arc<Manifest> {
        self.inner.read().manifest.clone()
    }

    pub fn next_sequence(&self) -> u64 {
        self.inner.read().next_sequence
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.inner.read().segments.front().map(|s| s.sequence)
    }

    pub fn newest_sequence(&self) -> Option<u64> {
        self.inner.read().segments.back().map(|s| s.sequence)
    }

    /// Number of retained segments.
    pub fn len(&self) -> usize {
        self.inner.read().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, sequence: u64) -> Lookup {
        let inner = self.inner.read();

        if sequence >= inner.next_sequence {
            return if inner.closed {
                Lookup::Closed
            } else if sequence - inner.next_sequence >= MAX_LOOKAHEAD {
                Lookup::Unknown
            } else {
                Lookup::Pending
            };
        }

        match inner.segments.front() {
            Some(front) if sequence >= front.sequence => {
                let index = (sequence - front.sequence) as usize;
                match inner.segments.get(index) {
                    Some(segment) => Lookup::Ready(segment.clone()),
                    None => Lookup::Evicted,
                }
            }
            _ => Lookup::Evicted,
        }
    }

    /// Return segment `sequence`, waiting up to `timeout` for it to be
    /// published.
    ///
    /// Fails with [`Error::SegmentEvicted`] for a segment that has left the
    /// window, [`Error::SegmentNotFound`] when it never appeared in time, and
    /// [`Error::ShuttingDown`] once [`close`](Self::close) was called.
    pub async fn wait_for(&self, sequence: u64, timeout: Duration) -> Result<Arc<Segment>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notify = self
                .waiters
                .entry(sequence)
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a publish in between is not missed.
            notified.as_mut().enable();

            match self.lookup(sequence) {
                Lookup::Ready(segment) => return Ok(segment),
                Lookup::Evicted => return Err(Error::SegmentEvicted { sequence }),
                Lookup::Unknown => return Err(Error::SegmentNotFound { sequence }),
                Lookup::Closed => return Err(Error::ShuttingDown),
                Lookup::Pending => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::debug!(sequence, "Timed out waiting for segment");
                return Err(Error::SegmentNotFound { sequence });
            }
        }
    }

    /// Stop accepting waits and wake everyone currently waiting.
    ///
    /// Published segments stay readable.
    pub fn close(&self) {
        self.inner.write().closed = true;

        let pending: Vec<u64> = self.waiters.iter().map(|e| *e.key()).collect();
        for sequence in pending {
            if let Some((_, notify)) = self.waiters.remove(&sequence) {
                notify.notify_waiters();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}
