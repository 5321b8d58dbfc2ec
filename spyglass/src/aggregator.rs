use std::sync::{Arc, Mutex};

use spyglass_symbols::hashing::{FastHashMap, FastHashSet};
use spyglass_symbols::Process;

use crate::callstack::{CallStack, CallstackEvent};
use crate::listener::AddressInfo;
use crate::report::{fill_sample_report, sorted_tids, CallstackCount, SortedCallstackReport, ThreadSortMode};
use crate::session::{SamplingState, Session};
use crate::thread_data::{ThreadSampleData, ALL_THREADS_TID};

type DoneProcessingCallback = Box<dyn Fn() + Send>;

/// Collects raw callstack events during a capture and turns them into
/// per-thread sample statistics on demand.
///
/// Ingestion (`add_callstack`, `add_hashed`, `add_address_info`,
/// `add_thread_usage`) is cheap and thread-safe; each insertion briefly takes
/// the aggregator's mutex. `process_samples` is the one-shot batch step: it
/// rebuilds every derived structure from the retained raw event list, holding
/// the aggregator's mutex throughout and the process's data lock across the
/// whole resolution and report pass so symbol loads cannot race it.
///
/// The raw event list survives processing, so `process_samples` can run again
/// after more symbols arrive and previously unresolved program counters snap
/// to their functions without losing any data.
pub struct SampleAggregator {
    process: Arc<Mutex<Process>>,
    generate_summary: bool,
    data: Mutex<AggregatorData>,
    session: Mutex<Session>,
    callbacks: Mutex<Vec<DoneProcessingCallback>>,
}

#[derive(Default)]
struct AggregatorData {
    /// The raw event list. Retained across processing passes.
    callstacks: Vec<CallstackEvent>,
    /// Interned raw stacks, keyed by content hash.
    unique_callstacks: FastHashMap<u64, CallStack>,
    /// Stacks with every program counter replaced by its owning function's
    /// start address (where resolvable), keyed by content hash.
    unique_resolved_callstacks: FastHashMap<u64, CallStack>,
    raw_to_resolved: FastHashMap<u64, u64>,
    /// Which raw stacks pass through a resolved function address.
    function_to_callstacks: FastHashMap<u64, FastHashSet<u64>>,
    /// Cache of sampled program counter to function start address.
    exact_address_to_function_address: FastHashMap<u64, u64>,
    /// Agent-supplied address metadata, keyed by absolute address.
    address_infos: FastHashMap<u64, AddressInfo>,
    /// Raw per-thread CPU usage feed. Retained across processing passes.
    thread_usage: FastHashMap<i32, Vec<f32>>,
    thread_sample_data: FastHashMap<i32, ThreadSampleData>,
    sorted_thread_ids: Vec<i32>,
    num_samples: usize,
}

impl SampleAggregator {
    pub fn new(
        process: Arc<Mutex<Process>>,
        generate_summary: bool,
        sample_time_seconds: f64,
    ) -> Self {
        Self {
            process,
            generate_summary,
            data: Mutex::new(AggregatorData::default()),
            session: Mutex::new(Session::new(sample_time_seconds)),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn process(&self) -> &Arc<Mutex<Process>> {
        &self.process
    }

    // --- lifecycle ---

    pub fn state(&self) -> SamplingState {
        self.session.lock().unwrap().state()
    }

    pub fn start_capture(&self) {
        self.session.lock().unwrap().start_capture();
    }

    pub fn stop_capture(&self) {
        self.session.lock().unwrap().request_stop();
    }

    /// Returns the session straight to `Idle` after a capture failed to
    /// start; the processing states are never entered. Previously captured
    /// data is left alone.
    pub fn abort_capture(&self) {
        self.session.lock().unwrap().reset();
    }

    /// Whether the sampling timer has exceeded the configured duration and
    /// the capture should be stopped.
    pub fn should_stop(&self) -> bool {
        self.session.lock().unwrap().should_stop()
    }

    /// Seconds spent sampling so far; 0 outside of the sampling state.
    pub fn sample_time(&self) -> f64 {
        self.session.lock().unwrap().sample_time()
    }

    pub fn sample_time_seconds(&self) -> f64 {
        self.session.lock().unwrap().sample_time_seconds()
    }

    pub fn set_sample_time_seconds(&self, seconds: f64) {
        self.session.lock().unwrap().set_sample_time_seconds(seconds);
    }

    /// True once per usage-sampling period while sampling; the host feeds
    /// `add_thread_usage` on each tick.
    pub fn thread_usage_due(&self) -> bool {
        self.session.lock().unwrap().thread_usage_tick()
    }

    /// Back to `Idle`, dropping all capture data.
    pub fn reset(&self) {
        self.session.lock().unwrap().reset();
        *self.data.lock().unwrap() = AggregatorData::default();
    }

    pub fn register_done_processing_callback(&self, callback: DoneProcessingCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    // --- ingestion ---

    /// Interns a stack without recording an occurrence.
    pub fn add_unique_callstack(&self, callstack: CallStack) {
        let mut data = self.data.lock().unwrap();
        data.unique_callstacks
            .entry(callstack.content_hash())
            .or_insert(callstack);
    }

    /// Interns the stack if it is new and records one occurrence for its
    /// thread.
    pub fn add_callstack(&self, callstack: CallStack) {
        let hash = callstack.content_hash();
        let thread_id = callstack.thread_id;
        let mut data = self.data.lock().unwrap();
        data.unique_callstacks.entry(hash).or_insert(callstack);
        data.callstacks.push(CallstackEvent {
            timestamp_ns: 0,
            callstack_hash: hash,
            thread_id,
        });
    }

    /// Records an occurrence of an already-interned stack. An event whose
    /// hash was never interned is dropped: every entry of the raw list must
    /// have a matching stack.
    pub fn add_hashed(&self, event: CallstackEvent) {
        let mut data = self.data.lock().unwrap();
        if !data.unique_callstacks.contains_key(&event.callstack_hash) {
            log::error!(
                "Dropping callstack event with unknown hash {:#x}",
                event.callstack_hash
            );
            return;
        }
        data.callstacks.push(event);
    }

    pub fn has_callstack(&self, hash: u64) -> bool {
        self.data.lock().unwrap().unique_callstacks.contains_key(&hash)
    }

    pub fn add_address_info(&self, address_info: AddressInfo) {
        let mut data = self.data.lock().unwrap();
        data.address_infos
            .insert(address_info.absolute_address, address_info);
    }

    /// Records one CPU usage sample (in percent) for a thread. The feed is
    /// retained across processing passes, like the raw event list.
    pub fn add_thread_usage(&self, tid: i32, usage_percent: f32) {
        let mut data = self.data.lock().unwrap();
        data.thread_usage.entry(tid).or_default().push(usage_percent);
    }

    // --- processing ---

    /// Rebuilds all per-thread statistics from the raw event list.
    pub fn process_samples(&self) {
        self.session.lock().unwrap().begin_processing();
        self.process_samples_locked();

        // The data mutex is released before the callbacks run, so they are
        // free to query the aggregator.
        self.session.lock().unwrap().finish_processing();
        for callback in self.callbacks.lock().unwrap().iter() {
            callback();
        }
    }

    fn process_samples_locked(&self) {
        let mut data = self.data.lock().unwrap();
        let data = &mut *data;

        // Clear the results of any previous pass.
        data.thread_sample_data.clear();
        data.unique_resolved_callstacks.clear();
        data.raw_to_resolved.clear();
        data.function_to_callstacks.clear();
        data.exact_address_to_function_address.clear();
        data.sorted_thread_ids.clear();

        // Count occurrences per thread.
        for event in &data.callstacks {
            if !data.unique_callstacks.contains_key(&event.callstack_hash) {
                log::error!("Processed unknown callstack {:#x}", event.callstack_hash);
                continue;
            }

            let thread_data = data
                .thread_sample_data
                .entry(event.thread_id)
                .or_insert_with(|| ThreadSampleData::new(event.thread_id));
            thread_data.num_samples += 1;
            *thread_data
                .callstack_count
                .entry(event.callstack_hash)
                .or_insert(0) += 1;

            if self.generate_summary {
                let all = data
                    .thread_sample_data
                    .entry(ALL_THREADS_TID)
                    .or_insert_with(|| ThreadSampleData::new(ALL_THREADS_TID));
                all.num_samples += 1;
                *all.callstack_count.entry(event.callstack_hash).or_insert(0) += 1;
            }
        }

        {
            // Keep the process locked across resolution and report filling so
            // a concurrent symbol load cannot mutate function tables under us.
            let mut process = self.process.lock().unwrap();

            let AggregatorData {
                unique_callstacks,
                unique_resolved_callstacks,
                raw_to_resolved,
                function_to_callstacks,
                exact_address_to_function_address,
                address_infos,
                thread_usage,
                thread_sample_data,
                sorted_thread_ids,
                ..
            } = &mut *data;

            resolve_callstacks(
                unique_callstacks,
                unique_resolved_callstacks,
                raw_to_resolved,
                function_to_callstacks,
                exact_address_to_function_address,
                address_infos,
                &mut process,
            );

            for (tid, thread_data) in thread_sample_data.iter_mut() {
                if let Some(usages) = thread_usage.get(tid) {
                    thread_data.thread_usage = usages.clone();
                }

                accumulate_address_counts(
                    thread_data,
                    raw_to_resolved,
                    unique_resolved_callstacks,
                );

                thread_data.compute_average_thread_usage();
            }

            // The synthetic "All" row always exists and always reads 100%.
            let all = thread_sample_data
                .entry(ALL_THREADS_TID)
                .or_insert_with(|| ThreadSampleData::new(ALL_THREADS_TID));
            all.average_thread_usage = 100.0;

            *sorted_thread_ids =
                sorted_tids(thread_sample_data.values(), ThreadSortMode::ByUsage);

            for thread_data in thread_sample_data.values_mut() {
                fill_sample_report(thread_data, &process);
            }
        }

        // The raw event list is kept so that processing can run again, e.g.
        // after a module's symbols have been loaded.
        data.num_samples = data.callstacks.len();
    }

    // --- queries ---

    pub fn num_samples(&self) -> usize {
        self.data.lock().unwrap().num_samples
    }

    pub fn raw_event_count(&self) -> usize {
        self.data.lock().unwrap().callstacks.len()
    }

    pub fn unique_callstack_count(&self) -> usize {
        self.data.lock().unwrap().unique_callstacks.len()
    }

    pub fn resolved_callstack_count(&self) -> usize {
        self.data.lock().unwrap().unique_resolved_callstacks.len()
    }

    pub fn callstack(&self, hash: u64) -> Option<CallStack> {
        self.data.lock().unwrap().unique_callstacks.get(&hash).cloned()
    }

    pub fn resolved_callstack(&self, hash: u64) -> Option<CallStack> {
        self.data
            .lock()
            .unwrap()
            .unique_resolved_callstacks
            .get(&hash)
            .cloned()
    }

    pub fn resolved_hash_for(&self, raw_hash: u64) -> Option<u64> {
        self.data.lock().unwrap().raw_to_resolved.get(&raw_hash).copied()
    }

    pub fn thread_data(&self, tid: i32) -> Option<ThreadSampleData> {
        self.data.lock().unwrap().thread_sample_data.get(&tid).cloned()
    }

    pub fn thread_ids(&self) -> Vec<i32> {
        self.data
            .lock()
            .unwrap()
            .thread_sample_data
            .keys()
            .copied()
            .collect()
    }

    /// Thread data in the order produced by the last processing pass
    /// (descending average usage).
    pub fn sorted_thread_data(&self) -> Vec<ThreadSampleData> {
        let data = self.data.lock().unwrap();
        data.sorted_thread_ids
            .iter()
            .filter_map(|tid| data.thread_sample_data.get(tid).cloned())
            .collect()
    }

    /// Thread data re-sorted on the fly; does not mutate aggregator state.
    pub fn sorted_thread_data_by(&self, mode: ThreadSortMode) -> Vec<ThreadSampleData> {
        let data = self.data.lock().unwrap();
        sorted_tids(data.thread_sample_data.values(), mode)
            .into_iter()
            .filter_map(|tid| data.thread_sample_data.get(&tid).cloned())
            .collect()
    }

    /// The stacks passing through `function_address` that `tid` observed, as
    /// ascending `(count, callstack_id)` pairs plus the total number of
    /// occurrences.
    pub fn callstacks_from_address(
        &self,
        function_address: u64,
        tid: i32,
    ) -> (Vec<(u32, u64)>, u32) {
        let data = self.data.lock().unwrap();
        let Some(ids) = data.function_to_callstacks.get(&function_address) else {
            return (Vec::new(), 0);
        };
        let Some(thread_data) = data.thread_sample_data.get(&tid) else {
            return (Vec::new(), 0);
        };
        thread_data.sort_callstacks(ids)
    }

    /// Same query, packaged most-frequent-first for the UI.
    pub fn sorted_callstack_report(
        &self,
        function_address: u64,
        tid: i32,
    ) -> SortedCallstackReport {
        let (sorted, total_callstack_count) = self.callstacks_from_address(function_address, tid);
        SortedCallstackReport {
            total_callstack_count,
            callstacks: sorted
                .into_iter()
                .rev()
                .map(|(count, callstack_id)| CallstackCount {
                    count,
                    callstack_id,
                })
                .collect(),
        }
    }
}

fn resolve_callstacks(
    unique_callstacks: &FastHashMap<u64, CallStack>,
    unique_resolved_callstacks: &mut FastHashMap<u64, CallStack>,
    raw_to_resolved: &mut FastHashMap<u64, u64>,
    function_to_callstacks: &mut FastHashMap<u64, FastHashSet<u64>>,
    exact_address_to_function_address: &mut FastHashMap<u64, u64>,
    address_infos: &mut FastHashMap<u64, AddressInfo>,
    process: &mut Process,
) {
    for (&raw_hash, raw_callstack) in unique_callstacks {
        let mut resolved = raw_callstack.clone();

        for i in 0..resolved.pcs.len() {
            let address = raw_callstack.pcs[i];

            if !exact_address_to_function_address.contains_key(&address) {
                update_address_info(
                    address,
                    exact_address_to_function_address,
                    address_infos,
                    process,
                );
            }

            if let Some(&function_address) = exact_address_to_function_address.get(&address) {
                resolved.pcs[i] = function_address;
                function_to_callstacks
                    .entry(function_address)
                    .or_default()
                    .insert(raw_hash);
            }
        }

        let resolved_hash = resolved.content_hash();
        unique_resolved_callstacks
            .entry(resolved_hash)
            .or_insert(resolved);
        raw_to_resolved.insert(raw_hash, resolved_hash);
    }
}

/// Associates one sampled program counter with the start address of the
/// function it falls inside.
///
/// The process's symbol tables take precedence; when the owning module has no
/// symbols yet, the agent-supplied address metadata stands in; failing both,
/// the address maps to itself, so every unresolvable counter counts as its
/// own function. Without this association each sampled address would be
/// reported as a distinct function.
fn update_address_info(
    address: u64,
    exact_address_to_function_address: &mut FastHashMap<u64, u64>,
    address_infos: &mut FastHashMap<u64, AddressInfo>,
    process: &mut Process,
) {
    let function_info = process.module_for_address(address).and_then(|module| {
        let module_name = module.name().to_string();
        module.function_containing(address).map(|function| {
            (
                function.virtual_address(),
                function.pretty_name().to_string(),
                module_name,
            )
        })
    });

    let (function_address, function_name) = match &function_info {
        Some((virtual_address, pretty_name, _)) => (*virtual_address, pretty_name.clone()),
        None => match address_infos.get(&address) {
            Some(info) => {
                let name = if info.function_name.is_empty() {
                    "???".to_string()
                } else {
                    info.function_name.clone()
                };
                (address.wrapping_sub(info.offset_in_function), name)
            }
            None => (address, "???".to_string()),
        },
    };

    // A freshly resolved symbol supersedes what the agent knew at unwind
    // time.
    if let Some((_, pretty_name, _)) = &function_info {
        if let Some(info) = address_infos.get_mut(&address) {
            info.function_name = pretty_name.clone();
        }
    }

    exact_address_to_function_address.insert(address, function_address);
    process.set_function_name(address, function_name.clone());
    process.set_function_name(function_address, function_name);
    if let Some((_, _, module_name)) = function_info {
        // The entry point is a symbol-table-space value; a later range
        // lookup cannot recover the module, so record it here.
        process.set_module_name(address, module_name.clone());
        process.set_module_name(function_address, module_name);
    }
}

fn accumulate_address_counts(
    thread_data: &mut ThreadSampleData,
    raw_to_resolved: &FastHashMap<u64, u64>,
    unique_resolved_callstacks: &FastHashMap<u64, CallStack>,
) {
    let ThreadSampleData {
        callstack_count,
        address_count,
        exclusive_count,
        address_count_sorted,
        ..
    } = &mut *thread_data;

    for (&raw_hash, &count) in callstack_count.iter() {
        let resolved = raw_to_resolved
            .get(&raw_hash)
            .and_then(|resolved_hash| unique_resolved_callstacks.get(resolved_hash));
        let Some(resolved) = resolved else {
            log::error!("No resolved callstack for raw hash {raw_hash:#x}");
            continue;
        };

        if let Some(&leaf) = resolved.pcs.first() {
            *exclusive_count.entry(leaf).or_insert(0) += count;
        }

        // A set, not a bag: a function that appears multiple times in one
        // stack (recursion) still counts each sample once.
        let unique_addresses: FastHashSet<u64> = resolved.pcs.iter().copied().collect();
        for address in unique_addresses {
            *address_count.entry(address).or_insert(0) += count;
        }
    }

    *address_count_sorted = address_count.iter().map(|(&a, &c)| (c, a)).collect();
    address_count_sorted.sort_unstable();
}
