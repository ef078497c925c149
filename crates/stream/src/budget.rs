use std::time::Duration;

/// Statistics of the last streaming pass, for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Entities within streaming range (or considered, when persistent).
    pub candidates: usize,
    /// Entities chosen to be live, pinned ones included.
    pub selected: usize,
    /// Live entities held in place by a non-zero reference count.
    pub pinned: usize,
    pub materialized: usize,
    pub dematerialized: usize,
    /// Materialization requests the backend refused this pass.
    pub failed: usize,
    pub respawns_queued: usize,
    pub respawns_drained: usize,
    /// Live entities after the pass.
    pub live: usize,
    pub pass_time: Duration,
}

/// Tick time tracker for instrumentation.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn recorded(&self) -> &[Duration] {
        let count = if self.filled { self.capacity } else { self.index };
        &self.history[..count]
    }

    pub fn average(&self) -> Duration {
        let recorded = self.recorded();
        if recorded.is_empty() {
            return Duration::ZERO;
        }
        recorded.iter().sum::<Duration>() / recorded.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.recorded().len()
    }
}
