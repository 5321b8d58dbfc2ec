//! The typed wire model shared with the capture agent.
//!
//! A capture is one bidirectional exchange: the client sends a single
//! [`CaptureRequest`], then the agent streams [`CaptureResponse`] frames,
//! each carrying a batch of [`CaptureEvent`]s, until the client signals that
//! it is done writing and the agent drains.
//!
//! Repeatedly transmitted values (call stacks, strings) are interned by the
//! agent: the first occurrence is sent in full as an `Interned*` event and
//! later events reference it by key. The `*OrKey` enums model that choice.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub options: CaptureOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub trace_context_switches: bool,
    pub pid: i32,
    pub sampling_rate: u16,
    pub unwinding_method: UnwindingMethod,
    pub trace_gpu_driver: bool,
    pub instrumented_functions: Vec<InstrumentedFunction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnwindingMethod {
    #[default]
    Undefined,
    FramePointers,
    Dwarf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentedFunction {
    pub file_path: String,
    pub file_offset: u64,
    pub absolute_address: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub capture_events: Vec<CaptureEvent>,
}

/// One event frame. The payload is optional for the same reason it is on the
/// wire: a peer built against a newer schema may send a variant this build
/// does not know, which decodes as an empty frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub event: Option<EventPayload>,
}

impl From<EventPayload> for CaptureEvent {
    fn from(event: EventPayload) -> Self {
        Self { event: Some(event) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    SchedulingSlice(SchedulingSlice),
    InternedCallstack(InternedCallstack),
    CallstackSample(CallstackSample),
    FunctionCall(FunctionCall),
    InternedString(InternedString),
    GpuJob(GpuJob),
    ThreadName(ThreadName),
    AddressInfo(AddressInfoEvent),
}

/// A span during which a thread occupied a core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingSlice {
    pub in_timestamp_ns: u64,
    pub out_timestamp_ns: u64,
    pub pid: i32,
    pub tid: i32,
    pub core: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternedCallstack {
    pub key: u64,
    pub pcs: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallstackSample {
    pub timestamp_ns: u64,
    pub tid: i32,
    pub callstack: CallstackOrKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallstackOrKey {
    Inline(Vec<u64>),
    Key(u64),
}

/// Entry and exit of one dynamically instrumented function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub tid: i32,
    pub begin_timestamp_ns: u64,
    pub end_timestamp_ns: u64,
    pub depth: u32,
    pub absolute_address: u64,
    pub return_value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternedString {
    pub key: u64,
    pub value: String,
}

/// One GPU job's trip through the driver, from submission ioctl to fence
/// signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuJob {
    pub tid: i32,
    pub depth: u32,
    pub cs_ioctl_time_ns: u64,
    pub sched_run_job_time_ns: u64,
    pub hardware_start_time_ns: u64,
    pub dma_fence_signaled_time_ns: u64,
    pub timeline: StringOrKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringOrKey {
    Inline(String),
    Key(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadName {
    pub tid: i32,
    pub name: String,
}

/// What the agent knew about one sampled address at unwind time, from the
/// process's memory maps. Fills the gap until real symbols are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInfoEvent {
    pub absolute_address: u64,
    pub map_name: StringOrKey,
    pub function_name: StringOrKey,
    pub offset_in_function: u64,
}
