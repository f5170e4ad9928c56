//! Debounced power-state confirmation.
//!
//! A noisy stream of "is the device online" readings, one per poll, is turned
//! into a confirmed state that only changes after the new reading has been
//! seen `threshold` times in a row and has then held for `confirmation_delay`.
//!
//! ```text
//!  observe(x != confirmed)   streak >= threshold     elapsed >= delay
//!  Stable ─────────────────► Counting ─────────────► Pending ─────────► Confirmed (notify)
//!    ▲                          │                       │
//!    │    observe(confirmed)    │   observe(confirmed)  │
//!    └──────────────────────────┴───────────────────────┘
//! ```
//!
//! The first confirmation after a fresh start only establishes a baseline and
//! never asks for a notification.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_derive::{Deserialize, Serialize};

/// Unix timestamp in seconds.
pub type Timestamp = f64;

/// Source of wall-clock time for [`transition`].
pub trait Clock {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default()
    }
}

/// Tri-state power reading. Stored as `null`, `true` or `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Presence {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl Presence {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Presence::Unknown => None,
            Presence::Online => Some(true),
            Presence::Offline => Some(false),
        }
    }
}

impl From<bool> for Presence {
    fn from(online: bool) -> Self {
        if online {
            Presence::Online
        } else {
            Presence::Offline
        }
    }
}

impl From<Option<bool>> for Presence {
    fn from(value: Option<bool>) -> Self {
        value.map(Presence::from).unwrap_or_default()
    }
}

impl From<Presence> for Option<bool> {
    fn from(presence: Presence) -> Self {
        presence.as_bool()
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Presence::Unknown => "UNKNOWN",
            Presence::Online => "ON",
            Presence::Offline => "OFF",
        };
        f.write_str(label)
    }
}

/// Persisted debounce state. Each call to [`transition`] produces a new value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceState {
    /// Last state committed to (and, after the baseline, announced).
    pub last_confirmed_online: Presence,
    /// Most recent raw reading.
    pub last_observed_online: Presence,
    /// Consecutive readings equal to `last_observed_online`, capped at threshold + 1.
    pub streak: u32,
    pub last_change_ts: Option<Timestamp>,
    pub last_message_ts: Option<Timestamp>,
    /// Set while a candidate change waits out the confirmation delay.
    pub pending_change_since: Option<Timestamp>,
    /// When the current observation streak began.
    pub first_observed_change_ts: Option<Timestamp>,
}

impl DebounceState {
    pub fn summary(&self) -> String {
        format!(
            "Confirmed: {}, Observed: {}, Streak: {}",
            self.last_confirmed_online, self.last_observed_online, self.streak
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Consecutive matching readings before a change becomes a candidate. Must be >= 1.
    pub threshold: u32,
    /// Extra wait after the threshold is reached before the change is confirmed.
    pub confirmation_delay: Duration,
}

/// Outcome of a single [`transition`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: DebounceState,
    pub notify: bool,
}

/// Feed one reading into the state machine.
///
/// Returns the replacement state and whether a confirmed change should be
/// announced. `clock` is read exactly once.
pub fn transition(
    prev: &DebounceState,
    observed_online: bool,
    config: &DebounceConfig,
    clock: &impl Clock,
) -> Transition {
    let now = clock.now();
    let observed = Presence::from(observed_online);
    let mut next = *prev;

    if observed == prev.last_observed_online {
        next.streak = prev
            .streak
            .saturating_add(1)
            .min(config.threshold.saturating_add(1));
    } else {
        next.last_observed_online = observed;
        next.streak = 1;
        next.first_observed_change_ts = Some(now);
        // Reverting while a change is pending cancels it outright.
        next.pending_change_since = None;
    }

    let threshold_reached = next.streak >= config.threshold;

    match next.last_confirmed_online {
        Presence::Unknown => {
            if threshold_reached {
                next.last_confirmed_online = next.last_observed_online;
                next.last_change_ts = Some(now);
            }
            Transition {
                state: next,
                notify: false,
            }
        }
        confirmed if confirmed != next.last_observed_online && threshold_reached => {
            let since = *next.pending_change_since.get_or_insert(now);
            if now - since < config.confirmation_delay.as_secs_f64() {
                return Transition {
                    state: next,
                    notify: false,
                };
            }

            next.last_confirmed_online = next.last_observed_online;
            next.last_change_ts = Some(now);
            next.last_message_ts = Some(now);
            next.pending_change_since = None;
            Transition {
                state: next,
                notify: true,
            }
        }
        _ => Transition {
            state: next,
            notify: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct ManualClock(Cell<Timestamp>);

    impl ManualClock {
        fn at(t: Timestamp) -> Self {
            ManualClock(Cell::new(t))
        }

        fn set(&self, t: Timestamp) {
            self.0.set(t);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            self.0.get()
        }
    }

    fn config(threshold: u32, delay_secs: u64) -> DebounceConfig {
        DebounceConfig {
            threshold,
            confirmation_delay: Duration::from_secs(delay_secs),
        }
    }

    fn confirmed(online: bool, streak: u32) -> DebounceState {
        DebounceState {
            last_confirmed_online: online.into(),
            last_observed_online: online.into(),
            streak,
            ..Default::default()
        }
    }

    #[test]
    fn baseline_is_established_without_notifying() {
        let clock = ManualClock::at(100.0);
        let cfg = config(2, 0);

        let first = transition(&DebounceState::default(), true, &cfg, &clock);
        assert_eq!(first.state.last_observed_online, Presence::Online);
        assert_eq!(first.state.streak, 1);
        assert_eq!(first.state.last_confirmed_online, Presence::Unknown);
        assert!(!first.notify);

        clock.set(160.0);
        let second = transition(&first.state, true, &cfg, &clock);
        assert_eq!(second.state.streak, 2);
        assert_eq!(second.state.last_confirmed_online, Presence::Online);
        assert_eq!(second.state.last_change_ts, Some(160.0));
        assert_eq!(second.state.last_message_ts, None);
        assert!(!second.notify);
    }

    #[test]
    fn baseline_ignores_confirmation_delay() {
        let clock = ManualClock::at(0.0);
        let cfg = config(1, 600);

        let step = transition(&DebounceState::default(), false, &cfg, &clock);
        assert_eq!(step.state.last_confirmed_online, Presence::Offline);
        assert_eq!(step.state.pending_change_since, None);
        assert!(!step.notify);
    }

    #[test]
    fn change_requires_consecutive_readings() {
        let clock = ManualClock::at(0.0);
        let cfg = config(2, 0);

        let step = transition(&confirmed(true, 2), false, &cfg, &clock);
        assert_eq!(step.state.streak, 1);
        assert_eq!(step.state.last_confirmed_online, Presence::Online);
        assert!(!step.notify);

        clock.set(60.0);
        let step = transition(&step.state, false, &cfg, &clock);
        assert_eq!(step.state.streak, 2);
        assert_eq!(step.state.last_confirmed_online, Presence::Offline);
        assert_eq!(step.state.last_change_ts, Some(60.0));
        assert_eq!(step.state.last_message_ts, Some(60.0));
        assert_eq!(step.state.pending_change_since, None);
        assert!(step.notify);
    }

    #[test]
    fn offline_to_online_notifies() {
        let clock = ManualClock::at(0.0);
        let cfg = config(2, 0);

        let step = transition(&confirmed(false, 2), true, &cfg, &clock);
        assert!(!step.notify);
        let step = transition(&step.state, true, &cfg, &clock);
        assert!(step.notify);
        assert_eq!(step.state.last_confirmed_online, Presence::Online);
    }

    #[test]
    fn single_glitch_is_rejected() {
        let clock = ManualClock::at(0.0);
        let cfg = config(2, 0);

        let step = transition(&confirmed(true, 2), false, &cfg, &clock);
        assert_eq!(step.state.streak, 1);
        assert!(!step.notify);

        let step = transition(&step.state, true, &cfg, &clock);
        assert_eq!(step.state.last_observed_online, Presence::Online);
        assert_eq!(step.state.streak, 1);
        assert_eq!(step.state.last_confirmed_online, Presence::Online);
        assert!(!step.notify);

        let step = transition(&step.state, true, &cfg, &clock);
        assert_eq!(step.state.streak, 2);
        assert_eq!(step.state.last_confirmed_online, Presence::Online);
        assert!(!step.notify);
    }

    #[test]
    fn short_runs_never_confirm_at_any_delay() {
        for delay in [0, 30, 600] {
            let clock = ManualClock::at(0.0);
            let cfg = config(4, delay);
            let mut state = confirmed(true, 4);

            for t in 0..3_u32 {
                clock.set(f64::from(t) * 1000.0);
                let step = transition(&state, false, &cfg, &clock);
                assert!(!step.notify);
                state = step.state;
            }
            let step = transition(&state, true, &cfg, &clock);
            assert!(!step.notify);
            assert_eq!(step.state.last_confirmed_online, Presence::Online);
            assert_eq!(step.state.pending_change_since, None);
        }
    }

    #[test]
    fn streak_is_capped() {
        let clock = ManualClock::at(0.0);
        let cfg = config(2, 0);

        let step = transition(&confirmed(true, 2), true, &cfg, &clock);
        assert_eq!(step.state.streak, 3);
        let step = transition(&step.state, true, &cfg, &clock);
        assert_eq!(step.state.streak, 3);

        let mut state = DebounceState::default();
        for i in 0..50 {
            let online = (i / 7) % 2 == 0;
            state = transition(&state, online, &config(3, 0), &clock).state;
            assert!(state.streak <= 4);
        }
    }

    #[test]
    fn streak_resets_on_new_reading() {
        let clock = ManualClock::at(42.0);
        let step = transition(&confirmed(true, 5), false, &config(2, 0), &clock);
        assert_eq!(step.state.last_observed_online, Presence::Offline);
        assert_eq!(step.state.streak, 1);
        assert_eq!(step.state.first_observed_change_ts, Some(42.0));
        assert!(!step.notify);
    }

    #[test]
    fn higher_threshold_confirms_on_exact_reading() {
        let clock = ManualClock::at(0.0);
        let cfg = config(3, 0);
        let mut state = confirmed(true, 2);

        for expected_streak in 1..=2 {
            let step = transition(&state, false, &cfg, &clock);
            assert!(!step.notify);
            assert_eq!(step.state.streak, expected_streak);
            state = step.state;
        }
        let step = transition(&state, false, &cfg, &clock);
        assert!(step.notify);
        assert_eq!(step.state.streak, 3);
        assert_eq!(step.state.last_confirmed_online, Presence::Offline);
    }

    #[test]
    fn stable_readings_after_confirmation_do_not_renotify() {
        let clock = ManualClock::at(0.0);
        let cfg = config(2, 0);
        let mut state = confirmed(true, 2);

        let mut notifications = 0;
        for _ in 0..10 {
            let step = transition(&state, false, &cfg, &clock);
            notifications += usize::from(step.notify);
            state = step.state;
        }
        assert_eq!(notifications, 1);
    }

    #[test]
    fn confirmation_waits_for_delay() {
        let clock = ManualClock::at(0.0);
        let cfg = config(3, 60);
        let mut state = confirmed(true, 3);

        for t in 0..3_u32 {
            clock.set(f64::from(t));
            let step = transition(&state, false, &cfg, &clock);
            assert!(!step.notify);
            state = step.state;
        }
        assert_eq!(state.pending_change_since, Some(2.0));
        assert_eq!(state.last_confirmed_online, Presence::Online);

        clock.set(61.0);
        let step = transition(&state, false, &cfg, &clock);
        assert!(!step.notify);
        assert_eq!(step.state.pending_change_since, Some(2.0));

        clock.set(62.0);
        let step = transition(&step.state, false, &cfg, &clock);
        assert!(step.notify);
        assert_eq!(step.state.last_confirmed_online, Presence::Offline);
        assert_eq!(step.state.pending_change_since, None);
        assert_eq!(step.state.last_message_ts, Some(62.0));
    }

    #[test]
    fn reversion_cancels_pending_change() {
        let clock = ManualClock::at(0.0);
        let cfg = config(2, 300);
        let mut state = confirmed(true, 2);

        for t in [0.0, 60.0] {
            clock.set(t);
            state = transition(&state, false, &cfg, &clock).state;
        }
        assert_eq!(state.pending_change_since, Some(60.0));

        clock.set(120.0);
        let step = transition(&state, true, &cfg, &clock);
        assert!(!step.notify);
        assert_eq!(step.state.pending_change_since, None);
        assert_eq!(step.state.last_confirmed_online, Presence::Online);

        // A new outage has to re-accumulate the full streak and delay.
        clock.set(180.0);
        let step = transition(&step.state, false, &cfg, &clock);
        assert_eq!(step.state.pending_change_since, None);
        clock.set(240.0);
        let step = transition(&step.state, false, &cfg, &clock);
        assert_eq!(step.state.pending_change_since, Some(240.0));
        assert!(!step.notify);
    }

    #[test]
    fn summary_labels_every_state() {
        assert_eq!(
            DebounceState::default().summary(),
            "Confirmed: UNKNOWN, Observed: UNKNOWN, Streak: 0"
        );
        let state = DebounceState {
            last_confirmed_online: Presence::Online,
            last_observed_online: Presence::Offline,
            streak: 1,
            ..Default::default()
        };
        assert_eq!(state.summary(), "Confirmed: ON, Observed: OFF, Streak: 1");
    }

    #[test]
    fn state_serializes_as_flat_blob() {
        let state = DebounceState {
            last_confirmed_online: Presence::Online,
            last_observed_online: Presence::Offline,
            streak: 1,
            last_change_ts: Some(1234567890.0),
            last_message_ts: Some(1234567890.0),
            ..Default::default()
        };
        let value = serde_json::to_value(state).unwrap();
        assert_eq!(value["last_confirmed_online"], serde_json::json!(true));
        assert_eq!(value["last_observed_online"], serde_json::json!(false));
        assert_eq!(value["streak"], serde_json::json!(1));
        assert_eq!(value["last_change_ts"], serde_json::json!(1234567890.0));
        assert!(value["pending_change_since"].is_null());

        let partial: DebounceState =
            serde_json::from_str(r#"{"last_confirmed_online": null, "streak": 0}"#).unwrap();
        assert_eq!(partial, DebounceState::default());
    }
}
