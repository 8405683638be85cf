//! Filesystem telemetry events.
//!
//! The codecs report every corrected or detected corruption, and the facade
//! reports completed transfers. Events flow into an optional process-wide
//! [`EventSink`]; when none is registered, recording is a no-op. Fault
//! injectors layered on top of a [`crate::storage::Storage`] use the same
//! vocabulary to report the flips they introduce.

use conquer_once::spin::OnceCell;

use alloc::vec::Vec;

/// A single telemetry event emitted by the filesystem stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsEvent {
    /// A codec repaired a corrupted raw block in place.
    ErrorCorrection {
        /// Name of the codec that performed the repair.
        codec: &'static str,
        /// Raw block index of the repaired block.
        block: u32,
    },

    /// A codec detected corruption it cannot repair.
    ErrorDetection {
        /// Name of the codec that detected the corruption.
        codec: &'static str,
        /// Raw block index of the corrupted block.
        block: u32,
    },

    /// A facade-level read completed.
    Read {
        /// Payload bytes returned to the caller.
        size: usize,
    },

    /// A facade-level write completed.
    Write {
        /// Payload bytes accepted from the caller.
        size: usize,
    },

    /// A fault injector flipped a bit of the underlying medium.
    BitFlip {
        /// Byte offset of the flipped bit.
        byte_index: u64,
    },
}

/// Receiver for [`FsEvent`]s.
pub trait EventSink: Sync {
    /// Records one event. Must not call back into the filesystem.
    fn record(&self, event: FsEvent);
}

static SINK: OnceCell<&'static dyn EventSink> = OnceCell::uninit();

/// Registers the process-wide event sink.
///
/// Only the first registration takes effect; later calls are ignored.
pub fn set_sink(sink: &'static dyn EventSink) {
    let _ = SINK.try_init_once(|| sink);
}

/// Records an event through the registered sink, if any.
pub fn record(event: FsEvent) {
    if let Ok(sink) = SINK.try_get() {
        sink.record(event);
    }
}

/// An [`EventSink`] buffering events in memory.
///
/// Intended for tests and simulators that assert on the event stream.
#[derive(Default)]
pub struct MemorySink {
    events: spin::RwLock<Vec<FsEvent>>,
}

impl MemorySink {
    pub const fn new() -> Self {
        Self {
            events: spin::RwLock::new(Vec::new()),
        }
    }

    /// Returns a copy of every event recorded so far.
    pub fn events(&self) -> Vec<FsEvent> {
        self.events.read().clone()
    }

    /// Counts recorded events matching `filter`.
    pub fn count(&self, filter: impl Fn(&FsEvent) -> bool) -> usize {
        self.events.read().iter().filter(|e| filter(e)).count()
    }

    /// Drops every recorded event.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: FsEvent) {
        self.events.write().push(event);
    }
}
