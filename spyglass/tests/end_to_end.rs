//! Full client flow against an in-process agent: request out, events in,
//! interning, aggregation, reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use spyglass::events::{
    AddressInfoEvent, CallstackOrKey, CallstackSample, CaptureResponse, EventPayload,
    InternedCallstack, InternedString, SchedulingSlice, StringOrKey, ThreadName,
    UnwindingMethod,
};
use spyglass::{
    AddressInfo, AggregatingListener, CallStack, CallstackEvent, CaptureClient, CaptureConfig,
    CaptureListener, ChannelTransport, SampleAggregator, SamplingState, Timer, TransportError,
};
use spyglass_symbols::{Module, ModuleSymbols, Process, SymbolInfo};

#[derive(Default)]
struct RecordingListener {
    timers: Vec<Timer>,
    callstacks: Vec<CallStack>,
    callstack_events: Vec<CallstackEvent>,
    thread_names: Vec<(i32, String)>,
    address_infos: Vec<AddressInfo>,
}

impl CaptureListener for RecordingListener {
    fn on_timer(&mut self, timer: Timer) {
        self.timers.push(timer);
    }

    fn on_callstack(&mut self, callstack: CallStack) {
        self.callstacks.push(callstack);
    }

    fn on_callstack_event(&mut self, event: CallstackEvent) {
        self.callstack_events.push(event);
    }

    fn on_key_and_string(&mut self, _key: u64, _value: &str) {}

    fn on_thread_name(&mut self, tid: i32, name: &str) {
        self.thread_names.push((tid, name.to_string()));
    }

    fn on_address_info(&mut self, address_info: AddressInfo) {
        self.address_infos.push(address_info);
    }
}

fn symbolicated_process() -> Arc<Mutex<Process>> {
    let mut process = Process::new(1234);
    process.add_module(Module::new("/bin/demo", 0x10000, 0x20000));
    process.load_module_symbols(
        0x10000,
        ModuleSymbols {
            load_bias: 0,
            symbols_file_path: String::new(),
            symbols: vec![SymbolInfo {
                name: "_Z4workv".to_string(),
                demangled_name: "work".to_string(),
                address: 0x1500,
                size: 0x100,
                source_file: "work.cc".to_string(),
                source_line: 12,
            }],
        },
    );
    Arc::new(Mutex::new(process))
}

#[test]
fn capture_roundtrip_produces_a_report() {
    let process = symbolicated_process();
    let aggregator = Arc::new(SampleAggregator::new(process, true, 30.0));

    let done = Arc::new(AtomicBool::new(false));
    let done_flag = done.clone();
    aggregator.register_done_processing_callback(Box::new(move || {
        done_flag.store(true, Ordering::SeqCst);
    }));

    let (mut transport, agent) = ChannelTransport::new_pair();
    let agent_thread = std::thread::spawn(move || {
        let request = agent.requests.recv().expect("no capture request");
        assert_eq!(request.options.pid, 1234);
        assert_eq!(request.options.unwinding_method, UnwindingMethod::Dwarf);

        let events = vec![
            EventPayload::ThreadName(ThreadName {
                tid: 7,
                name: "Worker".to_string(),
            })
            .into(),
            EventPayload::InternedString(InternedString {
                key: 1,
                value: "/bin/demo".to_string(),
            })
            .into(),
            EventPayload::InternedCallstack(InternedCallstack {
                key: 2,
                pcs: vec![0x11520, 0x11560],
            })
            .into(),
            EventPayload::CallstackSample(CallstackSample {
                timestamp_ns: 1000,
                tid: 7,
                callstack: CallstackOrKey::Key(2),
            })
            .into(),
            EventPayload::CallstackSample(CallstackSample {
                timestamp_ns: 2000,
                tid: 7,
                callstack: CallstackOrKey::Key(2),
            })
            .into(),
            EventPayload::AddressInfo(AddressInfoEvent {
                absolute_address: 0x11520,
                map_name: StringOrKey::Key(1),
                function_name: StringOrKey::Inline(String::new()),
                offset_in_function: 0x20,
            })
            .into(),
            EventPayload::SchedulingSlice(SchedulingSlice {
                in_timestamp_ns: 500,
                out_timestamp_ns: 2500,
                pid: 1234,
                tid: 7,
                core: 0,
            })
            .into(),
        ];
        agent
            .responses
            .send(CaptureResponse {
                capture_events: events,
            })
            .unwrap();
        // Closing the response channel ends the client's read loop.
    });

    aggregator.start_capture();
    assert_eq!(aggregator.state(), SamplingState::Sampling);

    let config = CaptureConfig {
        pid: 1234,
        ..Default::default()
    };
    let listener = AggregatingListener::new(aggregator.clone(), RecordingListener::default());
    let mut client = CaptureClient::with_aggregator(listener, aggregator.clone());
    client
        .capture(&mut transport, &config, &[])
        .expect("capture stream failed");
    agent_thread.join().unwrap();

    aggregator.stop_capture();
    aggregator.process_samples();
    assert_eq!(aggregator.state(), SamplingState::DoneProcessing);
    assert!(done.load(Ordering::SeqCst));

    // Both keyed samples share one interned stack.
    let recording = client.listener();
    assert_eq!(recording.inner().callstacks.len(), 1);
    assert_eq!(recording.inner().callstack_events.len(), 2);
    assert_eq!(recording.inner().thread_names, vec![(7, "Worker".to_string())]);
    assert_eq!(recording.inner().address_infos[0].map_name, "/bin/demo");
    assert_eq!(recording.inner().timers.len(), 1);

    // The samples resolved against the symbol table.
    let thread = aggregator.thread_data(7).unwrap();
    assert_eq!(thread.num_samples, 2);
    assert_eq!(thread.sample_report.len(), 1);
    assert_eq!(thread.sample_report[0].name, "work");
    assert_eq!(thread.sample_report[0].module, "demo");
    assert_eq!(thread.sample_report[0].address, 0x1500);
    assert_eq!(thread.sample_report[0].inclusive_percent, 100.0);

    let all = aggregator.thread_data(spyglass::ALL_THREADS_TID).unwrap();
    assert_eq!(all.num_samples, 2);
}

#[test]
fn failed_request_write_returns_session_to_idle() {
    let process = symbolicated_process();
    let aggregator = Arc::new(SampleAggregator::new(process, false, 30.0));

    let (mut transport, agent) = ChannelTransport::new_pair();
    drop(agent);

    aggregator.start_capture();
    assert_eq!(aggregator.state(), SamplingState::Sampling);

    let listener = AggregatingListener::new(aggregator.clone(), RecordingListener::default());
    let mut client = CaptureClient::with_aggregator(listener, aggregator.clone());
    let result = client.capture(&mut transport, &CaptureConfig::default(), &[]);
    assert!(matches!(result, Err(TransportError::Disconnected)));

    // The stream is gone, nothing was read or stored, and the session went
    // back to Idle without ever entering processing.
    assert_eq!(aggregator.state(), SamplingState::Idle);
    assert_eq!(aggregator.raw_event_count(), 0);
    assert!(client.listener().inner().callstack_events.is_empty());
}

#[test]
fn stop_capture_closes_the_write_side() {
    let (mut transport, agent) = ChannelTransport::new_pair();
    let mut client = CaptureClient::new(RecordingListener::default());
    client.stop_capture(&mut transport);

    // The agent observes the closed request channel as its stop signal.
    assert!(agent.requests.recv().is_err());
}

#[test]
fn stop_capture_after_writes_done_tears_down_quietly() {
    let (mut transport, _agent) = ChannelTransport::new_pair();
    let mut client = CaptureClient::new(RecordingListener::default());
    client.stop_capture(&mut transport);
    // The second stop hits the writes-done error path, which logs and
    // finishes the stream instead of panicking.
    client.stop_capture(&mut transport);
}
