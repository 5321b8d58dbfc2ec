use std::sync::Arc;

use spyglass_symbols::hashing::{hash_string, FastHashMap, FastHashSet};
use spyglass_symbols::Function;

use crate::aggregator::SampleAggregator;
use crate::callstack::{CallStack, CallstackEvent};
use crate::config::CaptureConfig;
use crate::events::{
    AddressInfoEvent, CallstackOrKey, CallstackSample, CaptureEvent, CaptureRequest,
    EventPayload, FunctionCall, GpuJob, InternedCallstack, InternedString, SchedulingSlice,
    StringOrKey, ThreadName,
};
use crate::listener::{AddressInfo, CaptureListener, Timer, TimerKind};
use crate::transport::{CaptureTransport, TransportError};

const GPU_SW_QUEUE: &str = "sw queue";
const GPU_HW_QUEUE: &str = "hw queue";
const GPU_HW_EXECUTION: &str = "hw execution";

/// Builds the request that opens a capture: the configured options plus one
/// instrumentation entry per selected function.
pub fn build_capture_request(
    config: &CaptureConfig,
    selected_functions: &[&Function],
) -> CaptureRequest {
    let mut request = CaptureRequest::default();
    request.options.trace_context_switches = config.trace_context_switches;
    request.options.pid = config.pid;
    request.options.sampling_rate = config.sampling_rate;
    request.options.unwinding_method = config.unwinding_method();
    request.options.trace_gpu_driver = config.trace_gpu_driver;
    for function in selected_functions {
        request
            .options
            .instrumented_functions
            .push(crate::events::InstrumentedFunction {
                file_path: function.module_path().to_string(),
                file_offset: function.file_offset(),
                absolute_address: function.absolute_address(),
            });
    }
    request
}

/// The event consumer: reads the agent's stream and dispatches each event.
///
/// The client owns the interning pools for call stacks and strings, plus the
/// seen-sets that guarantee each unique hash reaches the listener at most
/// once per capture. Dispatch is strictly sequential, so stream order is
/// preserved.
///
/// An attached [`SampleAggregator`] lets the client return the session to
/// `Idle` when the stream fails to start.
pub struct CaptureClient<L: CaptureListener> {
    listener: L,
    aggregator: Option<Arc<SampleAggregator>>,
    callstack_intern_pool: FastHashMap<u64, Vec<u64>>,
    string_intern_pool: FastHashMap<u64, String>,
    callstack_hashes_seen: FastHashSet<u64>,
    string_hashes_seen: FastHashSet<u64>,
}

impl<L: CaptureListener> CaptureClient<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            aggregator: None,
            callstack_intern_pool: FastHashMap::default(),
            string_intern_pool: FastHashMap::default(),
            callstack_hashes_seen: FastHashSet::default(),
            string_hashes_seen: FastHashSet::default(),
        }
    }

    /// A client that also drives the aggregator's session state on stream
    /// failures.
    pub fn with_aggregator(listener: L, aggregator: Arc<SampleAggregator>) -> Self {
        Self {
            aggregator: Some(aggregator),
            ..Self::new(listener)
        }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    /// Runs one capture to completion: sends the request, then reads and
    /// dispatches events until the agent closes its side of the stream.
    ///
    /// A failed request write is logged, tears the stream down without
    /// reading anything, returns the attached aggregator's session to `Idle`
    /// (processing is never entered), and reports the error to the caller.
    pub fn capture<T: CaptureTransport>(
        &mut self,
        transport: &mut T,
        config: &CaptureConfig,
        selected_functions: &[&Function],
    ) -> Result<(), TransportError> {
        self.callstack_intern_pool.clear();
        self.string_intern_pool.clear();
        self.callstack_hashes_seen.clear();
        self.string_hashes_seen.clear();

        let request = build_capture_request(config, selected_functions);
        if let Err(error) = transport.write_request(&request) {
            log::error!("Sending capture request on the capture stream: {error}");
            let _ = transport.writes_done();
            self.finish_capture(transport);
            if let Some(aggregator) = &self.aggregator {
                aggregator.abort_capture();
            }
            return Err(error);
        }
        log::info!("Sent capture request: asking to start capturing");

        while let Some(response) = transport.read_response() {
            for event in response.capture_events {
                self.dispatch_event(event);
            }
        }
        log::info!("Finished reading from the capture stream: all capture data has been received");
        self.finish_capture(transport);
        Ok(())
    }

    /// Asks the agent to stop capturing. The read loop keeps draining until
    /// the agent has flushed its remaining events.
    pub fn stop_capture<T: CaptureTransport>(&mut self, transport: &mut T) {
        if let Err(error) = transport.writes_done() {
            log::error!("Finishing writes on the capture stream: {error}");
            self.finish_capture(transport);
            return;
        }
        log::info!("Finished writing on the capture stream: asking to stop capturing");
    }

    fn finish_capture<T: CaptureTransport>(&mut self, transport: &mut T) {
        if let Err(error) = transport.finish() {
            log::error!("Finishing the capture stream: {error}");
        }
    }

    fn dispatch_event(&mut self, event: CaptureEvent) {
        match event.event {
            Some(EventPayload::SchedulingSlice(slice)) => self.handle_scheduling_slice(slice),
            Some(EventPayload::InternedCallstack(interned)) => {
                self.handle_interned_callstack(interned)
            }
            Some(EventPayload::CallstackSample(sample)) => self.handle_callstack_sample(sample),
            Some(EventPayload::FunctionCall(call)) => self.handle_function_call(call),
            Some(EventPayload::InternedString(interned)) => self.handle_interned_string(interned),
            Some(EventPayload::GpuJob(job)) => self.handle_gpu_job(job),
            Some(EventPayload::ThreadName(thread_name)) => self.handle_thread_name(thread_name),
            Some(EventPayload::AddressInfo(address_info)) => {
                self.handle_address_info(address_info)
            }
            None => log::error!("Capture event without payload read from the capture stream"),
        }
    }

    fn handle_scheduling_slice(&mut self, slice: SchedulingSlice) {
        // depth == core, so the host's lane layout yields per-core swimlanes.
        self.listener.on_timer(Timer {
            start: slice.in_timestamp_ns,
            end: slice.out_timestamp_ns,
            pid: slice.pid,
            tid: slice.tid,
            processor: slice.core as i8,
            depth: slice.core as u8,
            kind: TimerKind::CoreActivity,
            function_address: 0,
            user_data: [0, 0],
        });
    }

    fn handle_interned_callstack(&mut self, interned: InternedCallstack) {
        if self
            .callstack_intern_pool
            .insert(interned.key, interned.pcs)
            .is_some()
        {
            log::error!("Overwriting interned callstack with key {}", interned.key);
        }
    }

    fn handle_callstack_sample(&mut self, sample: CallstackSample) {
        let pcs = match sample.callstack {
            CallstackOrKey::Inline(pcs) => pcs,
            CallstackOrKey::Key(key) => match self.callstack_intern_pool.get(&key) {
                Some(pcs) => pcs.clone(),
                None => {
                    log::error!("Dropping callstack sample with unknown key {key}");
                    return;
                }
            },
        };

        let callstack = CallStack::new(sample.tid, pcs);
        let hash = self.callstack_hash_notifying(callstack);
        self.listener.on_callstack_event(CallstackEvent {
            timestamp_ns: sample.timestamp_ns,
            callstack_hash: hash,
            thread_id: sample.tid,
        });
    }

    fn handle_function_call(&mut self, call: FunctionCall) {
        self.listener.on_timer(Timer {
            start: call.begin_timestamp_ns,
            end: call.end_timestamp_ns,
            pid: 0,
            tid: call.tid,
            processor: -1,
            depth: call.depth as u8,
            kind: TimerKind::FunctionCall,
            function_address: call.absolute_address,
            user_data: [call.return_value, 0],
        });
    }

    fn handle_interned_string(&mut self, interned: InternedString) {
        if self
            .string_intern_pool
            .insert(interned.key, interned.value)
            .is_some()
        {
            log::error!("Overwriting interned string with key {}", interned.key);
        }
    }

    fn handle_gpu_job(&mut self, job: GpuJob) {
        let timeline = self.resolve_string(job.timeline);
        let timeline_hash = self.string_hash_notifying(&timeline);

        let stages = [
            (GPU_SW_QUEUE, job.cs_ioctl_time_ns, job.sched_run_job_time_ns),
            (
                GPU_HW_QUEUE,
                job.sched_run_job_time_ns,
                job.hardware_start_time_ns,
            ),
            (
                GPU_HW_EXECUTION,
                job.hardware_start_time_ns,
                job.dma_fence_signaled_time_ns,
            ),
        ];
        for (stage, start, end) in stages {
            let stage_hash = self.string_hash_notifying(stage);
            self.listener.on_timer(Timer {
                start,
                end,
                pid: 0,
                tid: job.tid,
                processor: -1,
                depth: job.depth as u8,
                kind: TimerKind::GpuActivity,
                function_address: 0,
                user_data: [stage_hash, timeline_hash],
            });
        }
    }

    fn handle_thread_name(&mut self, thread_name: ThreadName) {
        self.listener
            .on_thread_name(thread_name.tid, &thread_name.name);
    }

    fn handle_address_info(&mut self, address_info: AddressInfoEvent) {
        let map_name = self.resolve_string(address_info.map_name);
        let function_name = self.resolve_string(address_info.function_name);
        self.listener.on_address_info(AddressInfo {
            absolute_address: address_info.absolute_address,
            map_name,
            function_name,
            offset_in_function: address_info.offset_in_function,
        });
    }

    fn resolve_string(&mut self, string_or_key: StringOrKey) -> String {
        match string_or_key {
            StringOrKey::Inline(value) => value,
            StringOrKey::Key(key) => match self.string_intern_pool.get(&key) {
                Some(value) => value.clone(),
                None => {
                    log::error!("Unknown interned string key {key}");
                    String::new()
                }
            },
        }
    }

    fn callstack_hash_notifying(&mut self, callstack: CallStack) -> u64 {
        let hash = callstack.content_hash();
        if self.callstack_hashes_seen.insert(hash) {
            self.listener.on_callstack(callstack);
        }
        hash
    }

    fn string_hash_notifying(&mut self, value: &str) -> u64 {
        let hash = hash_string(value);
        if self.string_hashes_seen.insert(hash) {
            self.listener.on_key_and_string(hash, value);
        }
        hash
    }
}
