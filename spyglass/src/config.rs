use serde::{Deserialize, Serialize};

use crate::events::UnwindingMethod;

/// Everything the host decides before a capture starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// The process to capture.
    pub pid: i32,
    /// Samples per second. Zero disables sampling entirely.
    pub sampling_rate: u16,
    /// Unwind with frame pointers instead of DWARF CFI when sampling is
    /// enabled.
    pub frame_pointer_unwinding: bool,
    pub trace_context_switches: bool,
    pub trace_gpu_driver: bool,
    /// Automatic stop bound for the sampling timer, in seconds.
    pub sample_time_seconds: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pid: 0,
            sampling_rate: 1000,
            frame_pointer_unwinding: false,
            trace_context_switches: true,
            trace_gpu_driver: true,
            sample_time_seconds: 30.0,
        }
    }
}

impl CaptureConfig {
    pub fn unwinding_method(&self) -> UnwindingMethod {
        if self.sampling_rate == 0 {
            UnwindingMethod::Undefined
        } else if self.frame_pointer_unwinding {
            UnwindingMethod::FramePointers
        } else {
            UnwindingMethod::Dwarf
        }
    }
}
