//! The decision engine: the per-tick state machine that decides whether to
//! suspend the host, ported from the original daemon's `Processor` class.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::checks::{Activity, CheckError, Wakeup};
use crate::clock::Clock;
use crate::command;

/// Consults the OS session manager for outstanding sleep-blocking inhibitor
/// locks. Not a probe: it has no configured name and never appears in the
/// registry, since it is an engine-level concern (§4.7), not a check.
pub trait InhibitLock: Send + Sync {
    fn is_locked(&self) -> bool;
}

/// Used when no inhibit-lock source is configured (e.g. non-systemd hosts).
pub struct NoInhibitLock;

impl InhibitLock for NoInhibitLock {
    fn is_locked(&self) -> bool {
        false
    }
}

pub struct EngineConfig {
    pub idle_threshold: Duration,
    pub min_sleep_duration: Duration,
    pub wakeup_safety_margin: Duration,
    pub evaluate_all: bool,
    pub suspend_cmd: String,
    pub wakeup_cmd: Option<String>,
    pub notify_cmd_wakeup: Option<String>,
    pub notify_cmd_no_wakeup: Option<String>,
}

/// Outcome of a single tick, surfaced mainly for tests and scheduler logging.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// An activity probe reported the system busy.
    Active,
    /// The system is idle but not (yet) eligible for suspension.
    Idle,
    /// The engine decided to suspend, with an informational wake-up instant.
    Suspended { wakeup_at: Option<DateTime<Utc>> },
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    activities: Vec<Box<dyn Activity>>,
    wakeups: Vec<Box<dyn Wakeup>>,
    inhibit: Box<dyn InhibitLock>,
    config: EngineConfig,
    idle_since: Option<DateTime<Utc>>,
    last_scheduled_wakeup: Option<DateTime<Utc>>,
}

impl Engine {
    pub fn new(
        clock: Arc<dyn Clock>,
        activities: Vec<Box<dyn Activity>>,
        wakeups: Vec<Box<dyn Wakeup>>,
        inhibit: Box<dyn InhibitLock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            clock,
            activities,
            wakeups,
            inhibit,
            config,
            idle_since: None,
            last_scheduled_wakeup: None,
        }
    }

    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        self.idle_since
    }

    /// §4.2 — iterates activity probes in order, short-circuiting unless
    /// `evaluate_all` is set. Temporary failures abstain; permanent
    /// failures are logged and also abstain for this tick.
    fn evaluate_activity(&self) -> (bool, Vec<String>) {
        let mut active = false;
        let mut reasons = Vec::new();
        for probe in &self.activities {
            match probe.evaluate() {
                Ok(Some(reason)) => {
                    active = true;
                    reasons.push(reason);
                    if !self.config.evaluate_all {
                        break;
                    }
                }
                Ok(None) => {}
                Err(CheckError::Temporary(detail)) => {
                    warn!(probe = probe.name(), detail = %detail, "check failed temporarily, treating as idle");
                }
                Err(CheckError::Permanent(detail)) => {
                    warn!(probe = probe.name(), detail = %detail, "check failed permanently, treating as idle for this tick");
                }
            }
        }
        (active, reasons)
    }

    /// §4.3 — reduces wake-up probes to the earliest strictly-future instant.
    fn evaluate_wakeups(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut earliest = None;
        for probe in &self.wakeups {
            match probe.next_wakeup(now) {
                Ok(Some(at)) if at > now => {
                    earliest = Some(match earliest {
                        Some(current) if current <= at => current,
                        _ => at,
                    });
                }
                Ok(Some(at)) => {
                    warn!(probe = probe.name(), %at, %now, "wakeup not in the future, discarding");
                }
                Ok(None) => {}
                Err(CheckError::Temporary(detail)) => {
                    warn!(probe = probe.name(), detail = %detail, "wakeup check failed temporarily, ignoring");
                }
                Err(CheckError::Permanent(detail)) => {
                    warn!(probe = probe.name(), detail = %detail, "wakeup check failed permanently, ignoring");
                }
            }
        }
        earliest
    }

    /// §4.4 — one full tick at the given timestamp.
    pub fn iteration(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let (active, reasons) = self.evaluate_activity();
        if active {
            self.idle_since = None;
            info!(?reasons, "system active, resetting idle timer");
            return TickOutcome::Active;
        }

        self.idle_since = Some(match self.idle_since {
            Some(since) => since.min(now),
            None => now,
        });
        let idle_since = self.idle_since.expect("just set above");
        let idle_for = now - idle_since;
        if idle_for <= self.config.idle_threshold {
            return TickOutcome::Idle;
        }

        if self.inhibit.is_locked() {
            info!("inhibit lock present, declining to suspend");
            return TickOutcome::Idle;
        }

        let raw_wakeup = self.evaluate_wakeups(now);
        let wakeup_at = match raw_wakeup {
            Some(w) => {
                let w_prime = w - self.config.wakeup_safety_margin;
                if w_prime - now < self.config.min_sleep_duration {
                    return TickOutcome::Idle;
                }
                Some(w_prime)
            }
            None => None,
        };

        self.idle_since = None;
        command::notify_suspend(
            self.config.notify_cmd_wakeup.as_deref(),
            self.config.notify_cmd_no_wakeup.as_deref(),
            wakeup_at,
        );
        command::execute_suspend(&self.config.suspend_cmd, wakeup_at);
        TickOutcome::Suspended { wakeup_at }
    }

    /// Runs one tick using the engine's own clock. Convenience for the scheduler.
    pub fn tick_now(&mut self) -> TickOutcome {
        let now = self.clock.now();
        self.iteration(now)
    }

    /// §4.6 — invoked from the "preparing to sleep" sleep-lifecycle callback,
    /// regardless of who initiated the suspend. Schedules a wake-up if one is
    /// due, deduplicating within a single sleep event via `last_scheduled_wakeup`.
    pub fn before_sleep(&mut self, now: DateTime<Utc>) {
        let Some(raw) = self.evaluate_wakeups(now) else {
            return;
        };
        let at = raw - self.config.wakeup_safety_margin;
        if self.last_scheduled_wakeup == Some(at) {
            return;
        }
        let Some(template) = &self.config.wakeup_cmd else {
            return;
        };
        match command::schedule_wakeup(template, at) {
            Ok(()) => self.last_scheduled_wakeup = Some(at),
            Err(e) => warn!(error = %e, "wakeup scheduling command could not be found"),
        }
    }

    /// §4.6 — invoked from the "resumed" sleep-lifecycle callback.
    pub fn on_resume(&mut self) {
        self.idle_since = None;
        self.last_scheduled_wakeup = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    struct AlwaysActive;
    impl Activity for AlwaysActive {
        fn name(&self) -> &str {
            "always_active"
        }
        fn evaluate(&self) -> Result<Option<String>, CheckError> {
            Ok(Some("busy".to_string()))
        }
    }

    struct NeverActive;
    impl Activity for NeverActive {
        fn name(&self) -> &str {
            "never_active"
        }
        fn evaluate(&self) -> Result<Option<String>, CheckError> {
            Ok(None)
        }
    }

    struct FixedWakeup(DateTime<Utc>);
    impl Wakeup for FixedWakeup {
        fn name(&self) -> &str {
            "fixed"
        }
        fn next_wakeup(&self, _now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CheckError> {
            Ok(Some(self.0))
        }
    }

    struct LockedInhibit;
    impl InhibitLock for LockedInhibit {
        fn is_locked(&self) -> bool {
            true
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            idle_threshold: Duration::seconds(2),
            min_sleep_duration: Duration::seconds(600),
            wakeup_safety_margin: Duration::seconds(30),
            evaluate_all: false,
            suspend_cmd: "true".to_string(),
            wakeup_cmd: Some("true {timestamp}".to_string()),
            notify_cmd_wakeup: None,
            notify_cmd_no_wakeup: None,
        }
    }

    fn start() -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn never_idle_never_suspends() {
        let clock = Arc::new(FixedClock::new(start()));
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(AlwaysActive)],
            vec![],
            Box::new(NoInhibitLock),
            config(),
        );
        for _ in 0..100 {
            let outcome = engine.tick_now();
            assert_eq!(outcome, TickOutcome::Active);
            assert!(engine.idle_since().is_none());
            clock.advance(Duration::seconds(1));
        }
    }

    #[test]
    fn plain_suspend_after_idle_threshold() {
        let clock = Arc::new(FixedClock::new(start()));
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![],
            Box::new(NoInhibitLock),
            config(),
        );
        let mut outcomes = Vec::new();
        for i in 0..5 {
            outcomes.push(engine.tick_now());
            if i == 3 {
                assert!(engine.idle_since().is_none());
            }
            clock.advance(Duration::seconds(1));
        }
        assert_eq!(outcomes[0], TickOutcome::Idle);
        assert_eq!(outcomes[1], TickOutcome::Idle);
        assert_eq!(
            outcomes[3],
            TickOutcome::Suspended { wakeup_at: None }
        );
    }

    #[test]
    fn suspend_with_wakeup_applies_safety_margin() {
        let clock = Arc::new(FixedClock::new(start()));
        let now = clock.now();
        let mut cfg = config();
        cfg.min_sleep_duration = Duration::seconds(600);
        let engine_wakeup = now + Duration::seconds(3600);
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![Box::new(FixedWakeup(engine_wakeup))],
            Box::new(NoInhibitLock),
            cfg,
        );
        let mut last = TickOutcome::Idle;
        for _ in 0..4 {
            last = engine.tick_now();
            clock.advance(Duration::seconds(1));
        }
        assert_eq!(
            last,
            TickOutcome::Suspended {
                wakeup_at: Some(engine_wakeup - Duration::seconds(30))
            }
        );
    }

    #[test]
    fn wakeup_too_soon_blocks_suspension() {
        let clock = Arc::new(FixedClock::new(start()));
        let now = clock.now();
        let mut cfg = config();
        cfg.min_sleep_duration = Duration::seconds(600);
        let engine_wakeup = now + Duration::seconds(120);
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![Box::new(FixedWakeup(engine_wakeup))],
            Box::new(NoInhibitLock),
            cfg,
        );
        for _ in 0..10 {
            let outcome = engine.tick_now();
            assert_ne!(outcome, TickOutcome::Suspended { wakeup_at: Some(engine_wakeup) });
            assert!(!matches!(outcome, TickOutcome::Suspended { .. }));
            clock.advance(Duration::seconds(1));
        }
    }

    #[test]
    fn inhibit_lock_blocks_suspension_and_preserves_idle_since() {
        let clock = Arc::new(FixedClock::new(start()));
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![],
            Box::new(LockedInhibit),
            config(),
        );
        for _ in 0..5 {
            let outcome = engine.tick_now();
            assert_eq!(outcome, TickOutcome::Idle);
            clock.advance(Duration::seconds(1));
        }
        assert!(engine.idle_since().is_some());
    }

    #[test]
    fn external_suspend_still_schedules_wakeup_via_before_sleep() {
        let clock = Arc::new(FixedClock::new(start()));
        let now = clock.now();
        let engine_wakeup = now + Duration::seconds(3600);
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![Box::new(FixedWakeup(engine_wakeup))],
            Box::new(NoInhibitLock),
            config(),
        );
        engine.before_sleep(now);
        assert_eq!(
            engine.last_scheduled_wakeup,
            Some(engine_wakeup - config().wakeup_safety_margin)
        );
    }

    #[test]
    fn on_resume_clears_idle_since() {
        let clock = Arc::new(FixedClock::new(start()));
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![],
            Box::new(NoInhibitLock),
            config(),
        );
        engine.tick_now();
        assert!(engine.idle_since().is_some());
        engine.on_resume();
        assert!(engine.idle_since().is_none());
    }

    #[test]
    fn before_sleep_does_not_duplicate_within_same_sleep_event() {
        let clock = Arc::new(FixedClock::new(start()));
        let now = clock.now();
        let engine_wakeup = now + Duration::seconds(3600);
        let mut engine = Engine::new(
            clock.clone(),
            vec![Box::new(NeverActive)],
            vec![Box::new(FixedWakeup(engine_wakeup))],
            Box::new(NoInhibitLock),
            config(),
        );
        engine.before_sleep(now);
        let scheduled_once = engine.last_scheduled_wakeup;
        engine.before_sleep(now);
        assert_eq!(engine.last_scheduled_wakeup, scheduled_once);
    }

    #[test]
    fn evaluate_all_collects_every_reason() {
        let clock = Arc::new(FixedClock::new(start()));
        let mut cfg = config();
        cfg.evaluate_all = true;
        let mut engine = Engine::new(
            clock,
            vec![Box::new(AlwaysActive), Box::new(AlwaysActive)],
            vec![],
            Box::new(NoInhibitLock),
            cfg,
        );
        assert_eq!(engine.tick_now(), TickOutcome::Active);
    }
}
