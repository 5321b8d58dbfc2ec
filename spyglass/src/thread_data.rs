use spyglass_symbols::hashing::{FastHashMap, FastHashSet};

use crate::report::SampledFunction;

/// Thread id of the synthetic "All" thread that aggregates every real
/// thread's samples when summary generation is enabled. No real thread may
/// use this id.
pub const ALL_THREADS_TID: i32 = 0;

/// Everything aggregation derives for one thread. Rebuilt from scratch on
/// every processing pass.
#[derive(Debug, Clone, Default)]
pub struct ThreadSampleData {
    pub tid: i32,
    pub num_samples: u32,
    /// Occurrences per raw callstack hash.
    pub callstack_count: FastHashMap<u64, u32>,
    /// Inclusive occurrences per resolved address: samples whose stack
    /// contains the address anywhere.
    pub address_count: FastHashMap<u64, u32>,
    /// Exclusive occurrences per resolved address: samples whose leaf is the
    /// address.
    pub exclusive_count: FastHashMap<u64, u32>,
    /// `(count, address)` in ascending order; reports iterate it in reverse.
    pub address_count_sorted: Vec<(u32, u64)>,
    /// Periodic CPU usage samples, in percent.
    pub thread_usage: Vec<f32>,
    pub average_thread_usage: f32,
    pub sample_report: Vec<SampledFunction>,
}

impl ThreadSampleData {
    pub fn new(tid: i32) -> Self {
        Self {
            tid,
            ..Default::default()
        }
    }

    pub fn compute_average_thread_usage(&mut self) {
        self.average_thread_usage = if self.thread_usage.is_empty() {
            0.0
        } else {
            self.thread_usage.iter().sum::<f32>() / self.thread_usage.len() as f32
        };
    }

    /// Restricts a set of callstack ids to the ones this thread observed,
    /// returning `(count, id)` pairs in ascending count order plus the total
    /// number of occurrences across them.
    pub fn sort_callstacks(&self, callstack_ids: &FastHashSet<u64>) -> (Vec<(u32, u64)>, u32) {
        let mut sorted: Vec<(u32, u64)> = Vec::new();
        let mut total = 0;
        for &id in callstack_ids {
            if let Some(&count) = self.callstack_count.get(&id) {
                sorted.push((count, id));
                total += count;
            }
        }
        sorted.sort_unstable();
        (sorted, total)
    }
}
