use std::time::Duration;

/// Whether the device is considered in use. Flips only on screen events
/// (or on a sleeping-mode poll that notices the screen came back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceMode {
    Active,
    Sleeping,
}

/// What a sleeping-mode tick is allowed to do. The agent defaults to
/// SkipReports: a dark screen produces no report traffic, only a cheap
/// power poll to catch a wake the event stream missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPolicy {
    SkipReports,
    ReportSlowly,
}

#[derive(Debug, Clone)]
pub struct CadenceConfig {
    /// Tick interval while the screen is on.
    pub active_every: Duration,
    /// Tick interval while the screen is off.
    pub sleeping_every: Duration,
    pub sleep_policy: SleepPolicy,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            active_every: Duration::from_secs(120),
            sleeping_every: Duration::from_secs(300),
            sleep_policy: SleepPolicy::SkipReports,
        }
    }
}

impl CadenceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.active_every.is_zero() {
            return Err("active interval must be greater than 0".to_string());
        }
        if self.sleeping_every.is_zero() {
            return Err("sleeping interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// What the run loop should do on a due tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Dispatch a cadence report job.
    Report,
    /// Sleeping: just poll the power state for a missed wake.
    PollOnly,
}

/// Pure cadence state machine. Works in elapsed time since start so it can
/// be driven and tested without a runtime; the run loop owns the clock.
#[derive(Debug, Clone)]
pub struct ReportCadence {
    config: CadenceConfig,
    mode: PresenceMode,
    next_due: Duration,
}

impl ReportCadence {
    /// Starts in `Active` with the first tick due immediately.
    pub fn new(config: CadenceConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            config,
            mode: PresenceMode::Active,
            next_due: Duration::ZERO,
        })
    }

    pub fn mode(&self) -> PresenceMode {
        self.mode
    }

    pub fn is_due(&self, elapsed: Duration) -> bool {
        elapsed >= self.next_due
    }

    pub fn time_until_due(&self, elapsed: Duration) -> Duration {
        self.next_due.saturating_sub(elapsed)
    }

    fn interval(&self) -> Duration {
        match self.mode {
            PresenceMode::Active => self.config.active_every,
            PresenceMode::Sleeping => self.config.sleeping_every,
        }
    }

    /// Consume a due tick: schedules the next one and says what this one
    /// should do.
    pub fn on_tick(&mut self, elapsed: Duration) -> TickAction {
        self.next_due = elapsed.saturating_add(self.interval());
        match (self.mode, self.config.sleep_policy) {
            (PresenceMode::Active, _) => TickAction::Report,
            (PresenceMode::Sleeping, SleepPolicy::ReportSlowly) => TickAction::Report,
            (PresenceMode::Sleeping, SleepPolicy::SkipReports) => TickAction::PollOnly,
        }
    }

    /// Apply a screen-state transition. Returns true when an expedited
    /// report should be dispatched right now: every "became interactive"
    /// event earns one, even a redundant toggle; the job layer's
    /// keep-if-running policy collapses the excess.
    pub fn on_screen_event(&mut self, interactive: bool, elapsed: Duration) -> bool {
        let new_mode = if interactive {
            PresenceMode::Active
        } else {
            PresenceMode::Sleeping
        };
        if new_mode != self.mode {
            self.mode = new_mode;
            // Restart the cadence from now; the expedited report covers the
            // transition itself.
            self.next_due = elapsed.saturating_add(self.interval());
        }
        interactive
    }
}

#[cfg(test)]
mod tests {
    use super::{CadenceConfig, PresenceMode, ReportCadence, SleepPolicy, TickAction};
    use std::time::Duration;

    fn config() -> CadenceConfig {
        CadenceConfig {
            active_every: Duration::from_secs(120),
            sleeping_every: Duration::from_secs(300),
            sleep_policy: SleepPolicy::SkipReports,
        }
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut bad = config();
        bad.active_every = Duration::ZERO;
        assert!(ReportCadence::new(bad).is_err());

        let mut bad = config();
        bad.sleeping_every = Duration::ZERO;
        assert!(ReportCadence::new(bad).is_err());
    }

    #[test]
    fn starts_active_with_immediate_first_tick() {
        let cadence = ReportCadence::new(config()).expect("valid cadence");
        assert_eq!(cadence.mode(), PresenceMode::Active);
        assert!(cadence.is_due(Duration::ZERO));
    }

    #[test]
    fn active_ticks_report_on_the_short_interval() {
        let mut cadence = ReportCadence::new(config()).expect("valid cadence");
        assert_eq!(cadence.on_tick(Duration::ZERO), TickAction::Report);
        assert!(!cadence.is_due(Duration::from_secs(119)));
        assert!(cadence.is_due(Duration::from_secs(120)));
    }

    #[test]
    fn sleeping_ticks_only_poll_by_default() {
        let mut cadence = ReportCadence::new(config()).expect("valid cadence");
        assert!(!cadence.on_screen_event(false, Duration::from_secs(10)));
        assert_eq!(cadence.mode(), PresenceMode::Sleeping);

        // Long interval measured from the transition point.
        assert!(!cadence.is_due(Duration::from_secs(309)));
        assert!(cadence.is_due(Duration::from_secs(310)));
        assert_eq!(
            cadence.on_tick(Duration::from_secs(310)),
            TickAction::PollOnly
        );
    }

    #[test]
    fn report_slowly_policy_still_reports_while_sleeping() {
        let mut config = config();
        config.sleep_policy = SleepPolicy::ReportSlowly;
        let mut cadence = ReportCadence::new(config).expect("valid cadence");

        cadence.on_screen_event(false, Duration::ZERO);
        assert_eq!(
            cadence.on_tick(Duration::from_secs(300)),
            TickAction::Report
        );
    }

    #[test]
    fn wake_flips_to_active_and_expedites() {
        let mut cadence = ReportCadence::new(config()).expect("valid cadence");
        cadence.on_screen_event(false, Duration::from_secs(10));

        assert!(cadence.on_screen_event(true, Duration::from_secs(50)));
        assert_eq!(cadence.mode(), PresenceMode::Active);
        // Next cadence tick a full active interval after the wake.
        assert_eq!(
            cadence.time_until_due(Duration::from_secs(50)),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn redundant_interactive_event_still_expedites_without_rescheduling() {
        let mut cadence = ReportCadence::new(config()).expect("valid cadence");
        cadence.on_tick(Duration::ZERO);
        let due_before = cadence.time_until_due(Duration::from_secs(30));

        assert!(cadence.on_screen_event(true, Duration::from_secs(30)));
        assert_eq!(cadence.mode(), PresenceMode::Active);
        assert_eq!(cadence.time_until_due(Duration::from_secs(30)), due_before);
    }

    #[test]
    fn mode_always_matches_most_recent_event() {
        let sequences: &[&[bool]] = &[
            &[],
            &[true],
            &[false],
            &[false, false, true],
            &[true, false, true, false],
            &[false, true, true, false, false],
        ];

        for events in sequences {
            let mut cadence = ReportCadence::new(config()).expect("valid cadence");
            let mut at = Duration::ZERO;
            for &interactive in *events {
                at += Duration::from_secs(1);
                cadence.on_screen_event(interactive, at);
            }
            let expected = match events.last() {
                None | Some(true) => PresenceMode::Active,
                Some(false) => PresenceMode::Sleeping,
            };
            assert_eq!(cadence.mode(), expected, "sequence {events:?}");
        }
    }
}
