use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregator::SampleAggregator;
use crate::callstack::{CallStack, CallstackEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    CoreActivity,
    GpuActivity,
    FunctionCall,
}

/// A span the host lays out on a timeline track.
///
/// `depth` selects the lane within the track. For core-activity timers the
/// depth equals the core number, so per-core swimlanes fall out of the
/// ordinary lane layout. `user_data` carries kind-specific payload: for GPU
/// timers `[stage_name_hash, timeline_name_hash]`, for function calls
/// `[return_value, 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub start: u64,
    pub end: u64,
    pub pid: i32,
    pub tid: i32,
    pub processor: i8,
    pub depth: u8,
    pub kind: TimerKind,
    pub function_address: u64,
    pub user_data: [u64; 2],
}

/// Fully resolved address metadata, after any interned strings have been
/// looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub absolute_address: u64,
    pub map_name: String,
    pub function_name: String,
    pub offset_in_function: u64,
}

/// What the capture core tells its host.
///
/// `on_callstack` and `on_key_and_string` fire at most once per unique hash
/// per capture; everything else mirrors the event stream. None of these carry
/// an error channel: the core never surfaces failures to the host, it logs
/// and recovers.
pub trait CaptureListener: Send {
    fn on_timer(&mut self, timer: Timer);

    /// First sight of a call stack with this content hash.
    fn on_callstack(&mut self, callstack: CallStack);

    fn on_callstack_event(&mut self, event: CallstackEvent);

    /// First sight of a string with this hash.
    fn on_key_and_string(&mut self, key: u64, value: &str);

    fn on_thread_name(&mut self, tid: i32, name: &str);

    fn on_address_info(&mut self, address_info: AddressInfo);
}

/// The standard wiring between the event consumer and a [`SampleAggregator`]:
/// call stacks, their occurrence events and address metadata are stored for
/// aggregation, and every callback is forwarded to the inner listener.
pub struct AggregatingListener<L> {
    aggregator: Arc<SampleAggregator>,
    inner: L,
}

impl<L> AggregatingListener<L> {
    pub fn new(aggregator: Arc<SampleAggregator>, inner: L) -> Self {
        Self { aggregator, inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: CaptureListener> CaptureListener for AggregatingListener<L> {
    fn on_timer(&mut self, timer: Timer) {
        self.inner.on_timer(timer);
    }

    fn on_callstack(&mut self, callstack: CallStack) {
        self.aggregator.add_unique_callstack(callstack.clone());
        self.inner.on_callstack(callstack);
    }

    fn on_callstack_event(&mut self, event: CallstackEvent) {
        self.aggregator.add_hashed(event);
        self.inner.on_callstack_event(event);
    }

    fn on_key_and_string(&mut self, key: u64, value: &str) {
        self.inner.on_key_and_string(key, value);
    }

    fn on_thread_name(&mut self, tid: i32, name: &str) {
        self.inner.on_thread_name(tid, name);
    }

    fn on_address_info(&mut self, address_info: AddressInfo) {
        self.aggregator.add_address_info(address_info.clone());
        self.inner.on_address_info(address_info);
    }
}
