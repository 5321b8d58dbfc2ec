use serde::{Deserialize, Serialize};
use spyglass_symbols::Process;

use crate::thread_data::ThreadSampleData;

/// One row of a thread's sample report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampledFunction {
    pub name: String,
    pub module: String,
    pub file: String,
    pub line: u32,
    pub address: u64,
    pub inclusive_percent: f32,
    pub exclusive_percent: f32,
}

/// How the per-thread report list is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadSortMode {
    /// Descending average CPU usage; the synthetic "All" thread sorts first.
    #[default]
    ByUsage,
    /// Descending thread id.
    ByThreadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallstackCount {
    pub count: u32,
    pub callstack_id: u64,
}

/// All call stacks passing through one function on one thread, most frequent
/// first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortedCallstackReport {
    pub total_callstack_count: u32,
    pub callstacks: Vec<CallstackCount>,
}

pub(crate) fn sorted_tids<'a>(
    threads: impl Iterator<Item = &'a ThreadSampleData>,
    mode: ThreadSortMode,
) -> Vec<i32> {
    let mut keyed: Vec<(f32, i32)> = threads
        .map(|data| (data.average_thread_usage, data.tid))
        .collect();
    match mode {
        ThreadSortMode::ByUsage => {
            keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        }
        ThreadSortMode::ByThreadId => {
            keyed.sort_by(|a, b| b.1.cmp(&a.1));
        }
    }
    keyed.into_iter().map(|(_, tid)| tid).collect()
}

/// Rebuilds one thread's report rows from its sorted address histogram,
/// highest count first. Function names come from the process-wide name
/// directory. Module names come from the module whose range contains the
/// address or, for entry points resolved into symbol-table space, from the
/// module-name directory published at resolution time; either falls back to
/// `"???"`.
pub(crate) fn fill_sample_report(data: &mut ThreadSampleData, process: &Process) {
    data.sample_report.clear();
    if data.num_samples == 0 {
        return;
    }

    for &(count, address) in data.address_count_sorted.iter().rev() {
        let inclusive_percent = 100.0 * count as f32 / data.num_samples as f32;
        let exclusive_percent = data
            .exclusive_count
            .get(&address)
            .map_or(0.0, |&exclusive| {
                100.0 * exclusive as f32 / data.num_samples as f32
            });

        let name = process
            .function_name_for_address(address)
            .unwrap_or("???")
            .to_string();
        let module = process
            .module_for_address(address)
            .map(|m| m.name().to_string())
            .or_else(|| process.module_name_for_address(address).map(str::to_string))
            .unwrap_or_else(|| "???".to_string());

        data.sample_report.push(SampledFunction {
            name,
            module,
            file: String::new(),
            line: 0,
            address,
            inclusive_percent,
            exclusive_percent,
        });
    }
}
