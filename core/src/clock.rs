//! Simulation clock: per-campaign speed, pause and error state.
//!
//! RULE: every state change goes through [`ClockState::transition`].
//! Callers never assign `state` directly.

use crate::{
    error::{SimError, SimResult},
    types::{CampaignId, Tick, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SimSpeed {
    #[serde(rename = "1x")]
    X1,
    #[serde(rename = "5x")]
    X5,
    #[serde(rename = "100x")]
    X100,
    #[serde(rename = "1000x")]
    X1000,
}

impl SimSpeed {
    pub fn multiplier(&self) -> u32 {
        match self {
            Self::X1    => 1,
            Self::X5    => 5,
            Self::X100  => 100,
            Self::X1000 => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X1    => "1x",
            Self::X5    => "5x",
            Self::X100  => "100x",
            Self::X1000 => "1000x",
        }
    }

    /// Wall-clock time between ticks: the 1x interval divided by the multiplier.
    /// None when the base interval is negative, not finite or too large.
    pub fn interval(&self, base_interval_secs: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(base_interval_secs / self.multiplier() as f64).ok()
    }
}

/// What a caller asks the clock to do: pause, or run at a speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedSetting {
    Pause,
    Run(SimSpeed),
}

impl SpeedSetting {
    pub fn parse(s: &str) -> SimResult<Self> {
        match s.trim() {
            "pause" => Ok(Self::Pause),
            "1x"    => Ok(Self::Run(SimSpeed::X1)),
            "5x"    => Ok(Self::Run(SimSpeed::X5)),
            "100x"  => Ok(Self::Run(SimSpeed::X100)),
            "1000x" => Ok(Self::Run(SimSpeed::X1000)),
            other   => Err(SimError::InvalidSpeed(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause      => "pause",
            Self::Run(speed) => speed.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "speed", rename_all = "snake_case")]
pub enum ClockState {
    Paused,
    Running(SimSpeed),
    ErrorPaused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    SetSpeed(SpeedSetting),
    TickFailed,
    Resume,
}

impl ClockEvent {
    fn label(&self) -> String {
        match self {
            Self::SetSpeed(s) => format!("set_speed({})", s.as_str()),
            Self::TickFailed  => "tick_failed".into(),
            Self::Resume      => "resume".into(),
        }
    }
}

impl ClockState {
    /// The one authoritative transition function.
    ///
    /// | from        | SetSpeed(pause) | SetSpeed(run s) | TickFailed  | Resume  |
    /// |-------------|-----------------|-----------------|-------------|---------|
    /// | Paused      | Paused          | Running(s)      | ErrorPaused | reject  |
    /// | Running(_)  | Paused          | Running(s)      | ErrorPaused | reject  |
    /// | ErrorPaused | reject          | reject          | ErrorPaused | Paused  |
    pub fn transition(self, campaign_id: CampaignId, event: ClockEvent) -> SimResult<ClockState> {
        use ClockEvent::*;
        use ClockState::*;
        let next = match (self, event) {
            (_, TickFailed) => ErrorPaused,
            (ErrorPaused, Resume) => Paused,
            (Paused | Running(_), SetSpeed(SpeedSetting::Pause)) => Paused,
            (Paused | Running(_), SetSpeed(SpeedSetting::Run(speed))) => Running(speed),
            (ErrorPaused, SetSpeed(_)) | (Paused | Running(_), Resume) => {
                return Err(SimError::InvalidTransition {
                    campaign_id,
                    state: self.label().to_string(),
                    event: event.label(),
                });
            }
        };
        Ok(next)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Paused      => "paused",
            Self::Running(_)  => "running",
            Self::ErrorPaused => "error_paused",
        }
    }

    /// "pause", "1x", ... The speed a status page shows.
    pub fn speed_label(&self) -> &'static str {
        match self {
            Self::Running(speed) => speed.as_str(),
            Self::Paused | Self::ErrorPaused => "pause",
        }
    }
}

/// Rolling tick timings. Observability only; never gates a tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub ticks_measured:  u64,
    pub last_tick_ms:    u64,
    pub max_tick_ms:     u64,
    pub avg_tick_ms:     f64,
    pub budget_overruns: u64,
}

impl PerformanceMetrics {
    /// Fold in one tick's duration. Returns true when it overran the budget.
    pub fn record(&mut self, duration_ms: u64, budget_ms: u64) -> bool {
        self.ticks_measured += 1;
        self.last_tick_ms = duration_ms;
        self.max_tick_ms = self.max_tick_ms.max(duration_ms);
        let n = self.ticks_measured as f64;
        self.avg_tick_ms += (duration_ms as f64 - self.avg_tick_ms) / n;
        let overran = budget_ms > 0 && duration_ms > budget_ms;
        if overran {
            self.budget_overruns += 1;
        }
        overran
    }
}

/// The persisted clock of one campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub campaign_id:     CampaignId,
    pub state:           ClockState,
    pub current_tick:    Tick,
    pub last_tick_time:  Timestamp,
    pub performance:     PerformanceMetrics,
    pub last_error:      Option<String>,
    pub last_error_time: Option<Timestamp>,
}

impl SimClock {
    /// A fresh clock: paused at tick 0.
    pub fn new(campaign_id: CampaignId, now: Timestamp) -> Self {
        Self {
            campaign_id,
            state: ClockState::Paused,
            current_tick: 0,
            last_tick_time: now,
            performance: PerformanceMetrics::default(),
            last_error: None,
            last_error_time: None,
        }
    }

    /// Pure: is a scheduled tick due at `now`?
    pub fn should_tick(&self, now: Timestamp, base_interval_secs: f64) -> bool {
        let ClockState::Running(speed) = self.state else {
            return false;
        };
        let Some(interval) = speed
            .interval(base_interval_secs)
            .and_then(|d| chrono::Duration::from_std(d).ok())
        else {
            return false;
        };
        now - self.last_tick_time >= interval
    }

    pub fn apply(&mut self, event: ClockEvent) -> SimResult<ClockState> {
        let from = self.state;
        self.state = from.transition(self.campaign_id, event)?;
        Ok(from)
    }

    /// Record a committed tick. Tick and time never move backwards.
    pub fn advance(&mut self, now: Timestamp) -> Tick {
        self.current_tick += 1;
        if now > self.last_tick_time {
            self.last_tick_time = now;
        }
        self.current_tick
    }

    /// Move to ErrorPaused and remember why. Returns the previous state.
    pub fn record_failure(&mut self, message: String, now: Timestamp) -> SimResult<ClockState> {
        let from = self.apply(ClockEvent::TickFailed)?;
        self.last_error = Some(message);
        self.last_error_time = Some(now);
        Ok(from)
    }

    /// Leave ErrorPaused for Paused, clearing the recorded error.
    pub fn resume(&mut self) -> SimResult<ClockState> {
        let from = self.apply(ClockEvent::Resume)?;
        self.last_error = None;
        self.last_error_time = None;
        Ok(from)
    }
}

/// Batch lengths for `run_time_period`, in ticks (one tick = one hour).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl TimePeriod {
    pub fn parse(s: &str) -> SimResult<Self> {
        match s.trim() {
            "hour"  => Ok(Self::Hour),
            "day"   => Ok(Self::Day),
            "week"  => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other   => Err(SimError::InvalidPeriod(other.to_string())),
        }
    }

    pub fn ticks(&self) -> u64 {
        match self {
            Self::Hour  => 1,
            Self::Day   => 24,
            Self::Week  => 168,
            Self::Month => 720,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour  => "hour",
            Self::Day   => "day",
            Self::Week  => "week",
            Self::Month => "month",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const BASE: f64 = 60.0;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    fn run(speed: SimSpeed) -> ClockEvent {
        ClockEvent::SetSpeed(SpeedSetting::Run(speed))
    }

    #[test]
    fn paused_transitions() {
        let s = ClockState::Paused;
        assert_eq!(s.transition(1, run(SimSpeed::X5)).unwrap(), ClockState::Running(SimSpeed::X5));
        assert_eq!(s.transition(1, ClockEvent::SetSpeed(SpeedSetting::Pause)).unwrap(), ClockState::Paused);
        assert_eq!(s.transition(1, ClockEvent::TickFailed).unwrap(), ClockState::ErrorPaused);
        assert!(s.transition(1, ClockEvent::Resume).is_err());
    }

    #[test]
    fn running_transitions() {
        let s = ClockState::Running(SimSpeed::X1);
        assert_eq!(s.transition(1, run(SimSpeed::X1000)).unwrap(), ClockState::Running(SimSpeed::X1000));
        assert_eq!(s.transition(1, ClockEvent::SetSpeed(SpeedSetting::Pause)).unwrap(), ClockState::Paused);
        assert_eq!(s.transition(1, ClockEvent::TickFailed).unwrap(), ClockState::ErrorPaused);
        assert!(s.transition(1, ClockEvent::Resume).is_err());
    }

    #[test]
    fn error_paused_only_leaves_via_resume() {
        let s = ClockState::ErrorPaused;
        assert!(matches!(
            s.transition(7, run(SimSpeed::X1)),
            Err(SimError::InvalidTransition { campaign_id: 7, .. })
        ));
        assert!(s.transition(7, ClockEvent::SetSpeed(SpeedSetting::Pause)).is_err());
        assert_eq!(s.transition(7, ClockEvent::TickFailed).unwrap(), ClockState::ErrorPaused);
        assert_eq!(s.transition(7, ClockEvent::Resume).unwrap(), ClockState::Paused);
    }

    #[test]
    fn intervals_strictly_decrease_with_speed() {
        let speeds = [SimSpeed::X1, SimSpeed::X5, SimSpeed::X100, SimSpeed::X1000];
        for pair in speeds.windows(2) {
            assert!(pair[0].interval(BASE) > pair[1].interval(BASE));
        }
        assert_eq!(SimSpeed::X1.interval(BASE), Some(Duration::from_secs(60)));
        assert_eq!(SimSpeed::X100.interval(BASE), Some(Duration::from_millis(600)));
    }

    #[test]
    fn unusable_base_interval_is_never_due() {
        let mut clock = SimClock::new(1, t0());
        clock.apply(run(SimSpeed::X1)).unwrap();
        let much_later = t0() + chrono::Duration::days(3650);
        for base in [1e300, -5.0, f64::NAN, f64::INFINITY] {
            assert_eq!(SimSpeed::X1.interval(base), None, "base={base}");
            assert!(!clock.should_tick(much_later, base), "base={base}");
        }
    }

    #[test]
    fn paused_clock_never_due() {
        let mut clock = SimClock::new(1, t0());
        clock.apply(run(SimSpeed::X1000)).unwrap();
        clock.apply(ClockEvent::SetSpeed(SpeedSetting::Pause)).unwrap();
        for years in [0i64, 1, 100] {
            let later = t0() + chrono::Duration::days(365 * years);
            assert!(!clock.should_tick(later, BASE));
        }
    }

    #[test]
    fn running_clock_due_after_interval() {
        let mut clock = SimClock::new(1, t0());
        clock.apply(run(SimSpeed::X1)).unwrap();
        assert!(!clock.should_tick(t0() + chrono::Duration::seconds(59), BASE));
        assert!(clock.should_tick(t0() + chrono::Duration::seconds(60), BASE));
    }

    #[test]
    fn advance_never_moves_time_backwards() {
        let mut clock = SimClock::new(1, t0());
        assert_eq!(clock.advance(t0() - chrono::Duration::hours(1)), 1);
        assert_eq!(clock.last_tick_time, t0());
        assert_eq!(clock.advance(t0() + chrono::Duration::hours(1)), 2);
        assert_eq!(clock.last_tick_time, t0() + chrono::Duration::hours(1));
    }

    #[test]
    fn failure_then_resume_clears_error() {
        let mut clock = SimClock::new(1, t0());
        clock.apply(run(SimSpeed::X5)).unwrap();
        let from = clock.record_failure("disk full".into(), t0()).unwrap();
        assert_eq!(from, ClockState::Running(SimSpeed::X5));
        assert_eq!(clock.state, ClockState::ErrorPaused);
        assert_eq!(clock.last_error.as_deref(), Some("disk full"));

        assert_eq!(clock.resume().unwrap(), ClockState::ErrorPaused);
        assert_eq!(clock.state, ClockState::Paused);
        assert!(clock.last_error.is_none() && clock.last_error_time.is_none());
        assert!(clock.resume().is_err());
    }

    #[test]
    fn speed_and_period_parsing() {
        assert_eq!(SpeedSetting::parse("100x").unwrap(), SpeedSetting::Run(SimSpeed::X100));
        assert_eq!(SpeedSetting::parse("pause").unwrap(), SpeedSetting::Pause);
        assert!(matches!(SpeedSetting::parse("10x"), Err(SimError::InvalidSpeed(_))));
        assert_eq!(TimePeriod::parse("week").unwrap().ticks(), 168);
        assert_eq!(TimePeriod::parse("month").unwrap().ticks(), 720);
        assert!(matches!(TimePeriod::parse("year"), Err(SimError::InvalidPeriod(_))));
    }

    #[test]
    fn metrics_track_budget_overruns() {
        let mut m = PerformanceMetrics::default();
        assert!(!m.record(10, 100));
        assert!(m.record(300, 100));
        assert_eq!(m.ticks_measured, 2);
        assert_eq!(m.max_tick_ms, 300);
        assert_eq!(m.budget_overruns, 1);
        assert!((m.avg_tick_ms - 155.0).abs() < 1e-9);
    }
}
