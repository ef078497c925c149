//! Periodic driver for all streamers.
//!
//! The host calls [`Scheduler::poll`] from its frame or timer callback with
//! the current monotonic time; the scheduler decides whether a tick is due.
//! Everything runs on the host thread.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::budget::FrameTimer;
use crate::error::StreamError;

/// Something the scheduler can tick.
pub trait Streamer {
    fn name(&self) -> &str;

    /// Whether there is anything to stream. Empty streamers are skipped.
    fn has_entities(&self) -> bool;

    /// Run one streaming pass at `now`.
    fn tick(&mut self, now: Duration) -> Result<(), StreamError>;
}

pub type SharedStreamer = Rc<RefCell<dyn Streamer>>;

/// Shared cancellation flag. Once disposed it stays disposed.
#[derive(Debug, Clone, Default)]
pub struct DisposeToken(Rc<Cell<bool>>);

impl DisposeToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        self.0.set(true);
    }

    pub fn is_disposed(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler has been disposed")]
    Disposed,
}

/// Ticks every registered streamer on a fixed interval.
///
/// `Idle -> Running -> Disposed`. Tick 0 runs on [`Scheduler::start`]; after
/// that a tick runs whenever [`Scheduler::poll`] observes that the next due
/// time has passed. Intervals missed by a stalled host are coalesced into a
/// single tick.
pub struct Scheduler {
    interval: Duration,
    state: SchedulerState,
    streamers: Vec<SharedStreamer>,
    tick_count: u64,
    next_due: Option<Duration>,
    token: DisposeToken,
    timer: FrameTimer,
    failures: u64,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        assert!(!interval.is_zero(), "tick interval must be positive");
        Self {
            interval,
            state: SchedulerState::Idle,
            streamers: Vec::new(),
            tick_count: 0,
            next_due: None,
            token: DisposeToken::new(),
            timer: FrameTimer::new(64),
            failures: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of ticks run so far, tick 0 included.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Number of streamer passes that returned an error.
    pub fn failure_count(&self) -> u64 {
        self.failures
    }

    pub fn streamer_count(&self) -> usize {
        self.streamers.len()
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.next_due
    }

    pub fn frame_timer(&self) -> &FrameTimer {
        &self.timer
    }

    /// Token that disposes this scheduler when triggered, usable from inside
    /// a streamer pass.
    pub fn dispose_token(&self) -> DisposeToken {
        self.token.clone()
    }

    pub fn add_streamer(&mut self, streamer: SharedStreamer) -> Result<(), SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::Disposed);
        }
        self.streamers.push(streamer);
        Ok(())
    }

    /// Start ticking. Runs tick 0 immediately.
    pub fn start(&mut self, now: Duration) -> Result<(), SchedulerError> {
        match self.state {
            SchedulerState::Idle if !self.token.is_disposed() => {}
            SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
            _ => return Err(SchedulerError::Disposed),
        }
        self.state = SchedulerState::Running;
        self.next_due = Some(now.saturating_add(self.interval));
        tracing::info!(interval = ?self.interval, streamers = self.streamers.len(), "scheduler started");
        self.run_tick(now);
        Ok(())
    }

    /// Run a tick if one is due at `now`. Returns whether a tick ran.
    pub fn poll(&mut self, now: Duration) -> bool {
        if self.is_disposed() || self.state != SchedulerState::Running {
            return false;
        }
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }

        let interval = self.interval.as_nanos();
        let missed = (now - due).as_nanos() / interval;
        if missed > 0 {
            let missed = u64::try_from(missed).unwrap_or(u64::MAX);
            tracing::debug!(missed, "coalescing missed ticks");
        }
        let next = due.as_nanos().saturating_add(interval.saturating_mul(missed + 1));
        self.next_due = Some(duration_from_nanos(next));
        self.run_tick(now);
        true
    }

    /// Stop for good. Later polls never tick, even if a tick was already due.
    pub fn dispose(&mut self) {
        self.token.dispose();
        self.settle_disposal();
    }

    fn is_disposed(&mut self) -> bool {
        if self.token.is_disposed() {
            self.settle_disposal();
        }
        self.state == SchedulerState::Disposed
    }

    fn settle_disposal(&mut self) {
        if self.state != SchedulerState::Disposed {
            tracing::info!(ticks = self.tick_count, "scheduler disposed");
        }
        self.state = SchedulerState::Disposed;
        self.next_due = None;
    }

    fn run_tick(&mut self, now: Duration) {
        let _span = tracing::info_span!("scheduler_tick", tick = self.tick_count).entered();
        let started = Instant::now();
        self.tick_count += 1;

        for streamer in &self.streamers {
            if self.token.is_disposed() {
                break;
            }
            let Ok(mut streamer) = streamer.try_borrow_mut() else {
                tracing::warn!("streamer is busy, skipping this tick");
                continue;
            };
            if !streamer.has_entities() {
                continue;
            }
            if let Err(error) = streamer.tick(now) {
                self.failures += 1;
                tracing::error!(streamer = streamer.name(), %error, "streamer pass failed");
            }
        }

        self.timer.record(started.elapsed());
        if self.token.is_disposed() {
            self.settle_disposal();
        }
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridstream_common::EntityId;

    #[derive(Default)]
    struct CountingStreamer {
        entities: usize,
        calls: u64,
        fail: bool,
        dispose_on_tick: Option<DisposeToken>,
    }

    impl Streamer for CountingStreamer {
        fn name(&self) -> &str {
            "counting"
        }

        fn has_entities(&self) -> bool {
            self.entities > 0
        }

        fn tick(&mut self, _now: Duration) -> Result<(), StreamError> {
            self.calls += 1;
            if let Some(token) = &self.dispose_on_tick {
                token.dispose();
            }
            if self.fail {
                return Err(StreamError::NotLive(EntityId::new(0, 0)));
            }
            Ok(())
        }
    }

    const INTERVAL: Duration = Duration::from_secs(1);

    fn counting(entities: usize) -> Rc<RefCell<CountingStreamer>> {
        Rc::new(RefCell::new(CountingStreamer {
            entities,
            ..CountingStreamer::default()
        }))
    }

    #[test]
    fn empty_streamers_are_skipped_while_ticks_advance() {
        let mut scheduler = Scheduler::new(INTERVAL);
        let streamer = counting(0);
        scheduler.add_streamer(streamer.clone()).unwrap();

        let mut now = Duration::ZERO;
        scheduler.start(now).unwrap();
        for _ in 0..10 {
            now += INTERVAL;
            assert!(scheduler.poll(now));
        }
        assert_eq!(scheduler.tick_count(), 11);
        assert_eq!(streamer.borrow().calls, 0);
    }

    #[test]
    fn streamers_with_entities_tick_every_interval() {
        let mut scheduler = Scheduler::new(INTERVAL);
        let busy = counting(3);
        let idle = counting(0);
        scheduler.add_streamer(busy.clone()).unwrap();
        scheduler.add_streamer(idle.clone()).unwrap();

        scheduler.start(Duration::ZERO).unwrap();
        assert!(!scheduler.poll(Duration::from_millis(999)));
        assert!(scheduler.poll(Duration::from_secs(1)));
        assert!(!scheduler.poll(Duration::from_millis(1500)));
        assert_eq!(busy.borrow().calls, 2);
        assert_eq!(idle.borrow().calls, 0);
        assert_eq!(scheduler.frame_timer().count(), 2);
    }

    #[test]
    fn missed_intervals_coalesce() {
        let mut scheduler = Scheduler::new(INTERVAL);
        scheduler.start(Duration::ZERO).unwrap();
        assert!(scheduler.poll(Duration::from_millis(5500)));
        assert_eq!(scheduler.tick_count(), 2);
        assert_eq!(scheduler.next_due(), Some(Duration::from_secs(6)));
        assert!(!scheduler.poll(Duration::from_millis(5900)));
        assert!(scheduler.poll(Duration::from_secs(6)));
    }

    #[test]
    fn long_stall_coalesces_in_one_step() {
        let interval = Duration::from_micros(1);
        let mut scheduler = Scheduler::new(interval);
        scheduler.start(Duration::ZERO).unwrap();

        let started = Instant::now();
        assert!(scheduler.poll(Duration::from_secs(3600)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(scheduler.tick_count(), 2);
        assert_eq!(
            scheduler.next_due(),
            Some(Duration::from_secs(3600) + interval)
        );
    }

    #[test]
    fn due_time_saturates_at_the_end_of_the_clock() {
        let mut scheduler = Scheduler::new(INTERVAL);
        scheduler.start(Duration::MAX - Duration::from_millis(500)).unwrap();
        assert_eq!(scheduler.next_due(), Some(Duration::MAX));
        assert!(scheduler.poll(Duration::MAX));
        assert_eq!(scheduler.next_due(), Some(Duration::MAX));
        assert_eq!(scheduler.tick_count(), 2);
    }

    #[test]
    fn failing_streamer_does_not_stop_others() {
        let mut scheduler = Scheduler::new(INTERVAL);
        let failing = Rc::new(RefCell::new(CountingStreamer {
            entities: 1,
            fail: true,
            ..CountingStreamer::default()
        }));
        let healthy = counting(1);
        scheduler.add_streamer(failing.clone()).unwrap();
        scheduler.add_streamer(healthy.clone()).unwrap();

        scheduler.start(Duration::ZERO).unwrap();
        scheduler.poll(INTERVAL);
        assert_eq!(failing.borrow().calls, 2);
        assert_eq!(healthy.borrow().calls, 2);
        assert_eq!(scheduler.failure_count(), 2);
    }

    #[test]
    fn busy_streamer_is_skipped() {
        let mut scheduler = Scheduler::new(INTERVAL);
        let streamer = counting(1);
        scheduler.add_streamer(streamer.clone()).unwrap();
        let _held = streamer.borrow_mut();
        scheduler.start(Duration::ZERO).unwrap();
        assert_eq!(scheduler.tick_count(), 1);
    }

    #[test]
    fn dispose_stops_ticking_for_good() {
        let mut scheduler = Scheduler::new(INTERVAL);
        let streamer = counting(1);
        scheduler.add_streamer(streamer.clone()).unwrap();
        scheduler.start(Duration::ZERO).unwrap();
        scheduler.dispose();

        for secs in 1..20 {
            assert!(!scheduler.poll(Duration::from_secs(secs)));
        }
        assert_eq!(scheduler.tick_count(), 1);
        assert_eq!(streamer.borrow().calls, 1);
        assert_eq!(scheduler.state(), SchedulerState::Disposed);
        assert_eq!(scheduler.start(Duration::ZERO), Err(SchedulerError::Disposed));
        assert_eq!(
            scheduler.add_streamer(counting(1)),
            Err(SchedulerError::Disposed)
        );
    }

    #[test]
    fn dispose_during_tick_skips_remaining_streamers() {
        let mut scheduler = Scheduler::new(INTERVAL);
        let first = Rc::new(RefCell::new(CountingStreamer {
            entities: 1,
            dispose_on_tick: Some(scheduler.dispose_token()),
            ..CountingStreamer::default()
        }));
        let second = counting(1);
        scheduler.add_streamer(first.clone()).unwrap();
        scheduler.add_streamer(second.clone()).unwrap();

        scheduler.start(Duration::ZERO).unwrap();
        assert_eq!(first.borrow().calls, 1);
        assert_eq!(second.borrow().calls, 0);
        assert_eq!(scheduler.state(), SchedulerState::Disposed);
        assert!(!scheduler.poll(INTERVAL));
    }

    #[test]
    fn token_disposal_closes_already_due_tick() {
        let mut scheduler = Scheduler::new(INTERVAL);
        scheduler.start(Duration::ZERO).unwrap();
        let token = scheduler.dispose_token();
        token.dispose();
        assert!(!scheduler.poll(Duration::from_secs(5)));
        assert_eq!(scheduler.tick_count(), 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut scheduler = Scheduler::new(INTERVAL);
        scheduler.start(Duration::ZERO).unwrap();
        assert_eq!(
            scheduler.start(Duration::ZERO),
            Err(SchedulerError::AlreadyRunning)
        );
        assert_eq!(scheduler.state(), SchedulerState::Running);
    }
}
