use std::time::Instant;

/// How often the host is expected to feed per-thread CPU usage samples.
pub const THREAD_USAGE_SAMPLE_PERIOD_MS: f64 = 200.0;

/// Lifecycle of one capture. Transitions only move forward, except for the
/// explicit reset back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingState {
    #[default]
    Idle,
    Sampling,
    PendingStop,
    Processing,
    DoneProcessing,
}

#[derive(Debug)]
pub(crate) struct Session {
    state: SamplingState,
    sampling_timer: Option<Instant>,
    thread_usage_timer: Option<Instant>,
    sample_time_seconds: f64,
}

impl Session {
    pub(crate) fn new(sample_time_seconds: f64) -> Self {
        Self {
            state: SamplingState::Idle,
            sampling_timer: None,
            thread_usage_timer: None,
            sample_time_seconds,
        }
    }

    pub(crate) fn state(&self) -> SamplingState {
        self.state
    }

    pub(crate) fn sample_time_seconds(&self) -> f64 {
        self.sample_time_seconds
    }

    pub(crate) fn set_sample_time_seconds(&mut self, seconds: f64) {
        self.sample_time_seconds = seconds;
    }

    pub(crate) fn start_capture(&mut self) {
        let now = Instant::now();
        self.sampling_timer = Some(now);
        self.thread_usage_timer = Some(now);
        self.state = SamplingState::Sampling;
    }

    pub(crate) fn request_stop(&mut self) {
        self.state = SamplingState::PendingStop;
    }

    pub(crate) fn begin_processing(&mut self) {
        self.state = SamplingState::Processing;
    }

    pub(crate) fn finish_processing(&mut self) {
        self.state = SamplingState::DoneProcessing;
    }

    pub(crate) fn reset(&mut self) {
        self.state = SamplingState::Idle;
        self.sampling_timer = None;
        self.thread_usage_timer = None;
    }

    /// Seconds spent sampling so far; 0 outside of `Sampling`.
    pub(crate) fn sample_time(&self) -> f64 {
        match (self.state, self.sampling_timer) {
            (SamplingState::Sampling, Some(started)) => started.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Whether the sampling timer has exceeded the configured capture
    /// duration.
    pub(crate) fn should_stop(&self) -> bool {
        match (self.state, self.sampling_timer) {
            (SamplingState::Sampling, Some(started)) => {
                started.elapsed().as_secs_f64() > self.sample_time_seconds
            }
            _ => false,
        }
    }

    /// True once per usage-sampling period while sampling; restarts the
    /// period timer when it fires.
    pub(crate) fn thread_usage_tick(&mut self) -> bool {
        if self.state != SamplingState::Sampling {
            return false;
        }
        match self.thread_usage_timer {
            Some(started)
                if started.elapsed().as_secs_f64() * 1000.0 >= THREAD_USAGE_SAMPLE_PERIOD_MS =>
            {
                self.thread_usage_timer = Some(Instant::now());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn states_advance_forward() {
        let mut session = Session::new(30.0);
        assert_eq!(session.state(), SamplingState::Idle);
        session.start_capture();
        assert_eq!(session.state(), SamplingState::Sampling);
        session.request_stop();
        assert_eq!(session.state(), SamplingState::PendingStop);
        session.begin_processing();
        assert_eq!(session.state(), SamplingState::Processing);
        session.finish_processing();
        assert_eq!(session.state(), SamplingState::DoneProcessing);
        session.reset();
        assert_eq!(session.state(), SamplingState::Idle);
    }

    #[test]
    fn sample_time_is_zero_outside_sampling() {
        let mut session = Session::new(30.0);
        assert_eq!(session.sample_time(), 0.0);
        session.start_capture();
        session.request_stop();
        assert_eq!(session.sample_time(), 0.0);
    }

    #[test]
    fn should_stop_after_configured_duration() {
        let mut session = Session::new(0.0);
        assert!(!session.should_stop());
        session.start_capture();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(session.should_stop());
        session.request_stop();
        assert!(!session.should_stop());
    }
}
