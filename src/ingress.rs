//! Producer side of the packet queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde_json::{Map, Value};

use crate::packet::PacketRecord;

/// Cloneable handle producers use to hand packets to the monitor loop.
///
/// Enqueueing never blocks and never fails. Records from one producer stay
/// in order; there is no ordering across producers. With a capacity, a full
/// queue makes room by dropping its oldest record and counting the drop.
#[derive(Clone)]
pub struct PacketIngress {
    tx: Sender<PacketRecord>,
    // kept so a bounded queue can evict from the front
    rx: Receiver<PacketRecord>,
    capacity: Option<usize>,
    accepted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl PacketIngress {
    pub fn unbounded() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self::from_channel(tx, rx, None)
    }

    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self::from_channel(tx, rx, Some(capacity))
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    fn from_channel(tx: Sender<PacketRecord>, rx: Receiver<PacketRecord>, capacity: Option<usize>) -> Self {
        PacketIngress {
            tx,
            rx,
            capacity,
            accepted: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Accepts an untyped field mapping, as received from an HTTP handler.
    pub fn enqueue(&self, fields: &Map<String, Value>) {
        self.enqueue_record(PacketRecord::from_fields(fields));
    }

    pub fn enqueue_record(&self, record: PacketRecord) {
        let mut pending = record;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => {
                    self.accepted.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(record)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::SeqCst);
                    }
                    pending = record;
                }
                // unreachable while this handle holds a receiver
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub(crate) fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    pub(crate) fn receiver(&self) -> Receiver<PacketRecord> {
        self.rx.clone()
    }
}

impl Default for PacketIngress {
    fn default() -> Self {
        Self::unbounded()
    }
}
