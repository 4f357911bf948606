//! Per-signal debounce tracker
//!
//! One tracker instance per (session, signal type). Each tracker converts a
//! threshold condition over time into confirmed flag intervals:
//!
//! ```text
//! Idle -> Candidate { onset } -> Confirmed { onset, flag } -> Idle
//! ```
//!
//! A run begins when the weakest configured tier's predicate first holds and
//! ends when it stops holding. Confirmation requires the predicate to hold
//! continuously for the tier's `min_duration`, measured against the sample's
//! `session_time` (no fixed-tick assumption). A run that never confirms is
//! discarded silently, which is the debounce guarantee. While confirmed, a
//! stronger tier escalates the open flag in place, onset preserved.
//!
//! Samples older than the newest consumed time are history corrections: an
//! open run's onset may move backward (never forward), while a correction
//! that would touch an already-closed flag is logged and ignored.

use log::{debug, warn};

use crate::emitter::FlagEmitter;
use crate::policy::{condition_magnitude, SignalPolicy};
use crate::types::{Flag, Severity, SignalType, SignalValue};

#[derive(Debug)]
enum TrackerState {
    Idle,
    Candidate { onset: f64 },
    Confirmed { onset: f64, flag: Flag },
}

/// What a single sample did to the tracker
#[derive(Debug, Default)]
pub struct SampleOutcome {
    /// A flag was opened by this sample
    pub opened: bool,
    /// A flag was closed by this sample
    pub closed: Option<Flag>,
    /// The sample was a late correction against closed history, ignored
    pub stale_correction: bool,
}

/// Debounce state machine for one (session, signal type) pair
#[derive(Debug)]
pub struct SignalTracker {
    session_id: String,
    signal_type: SignalType,
    policy: SignalPolicy,
    state: TrackerState,
    /// Newest `session_time` consumed; anything older is a correction
    last_value_time: Option<f64>,
    /// Time of the last sample that satisfied the run predicate
    last_true_time: f64,
    /// Time of the sample that closed the most recent run, if any; late
    /// active samples older than this would have changed a closed flag
    last_closed_at: Option<f64>,
}

impl SignalTracker {
    pub fn new(session_id: impl Into<String>, signal_type: SignalType, policy: SignalPolicy) -> Self {
        SignalTracker {
            session_id: session_id.into(),
            signal_type,
            policy,
            state: TrackerState::Idle,
            last_value_time: None,
            last_true_time: 0.0,
            last_closed_at: None,
        }
    }

    /// Feed one time-ordered (or late) sample through the state machine
    pub fn observe(
        &mut self,
        t: f64,
        value: &SignalValue,
        duration_so_far: f64,
        emitter: &FlagEmitter,
    ) -> SampleOutcome {
        let magnitude = condition_magnitude(self.signal_type, value);
        let active = magnitude >= self.policy.weakest().threshold;

        if let Some(last) = self.last_value_time {
            if t < last {
                return self.correct_history(t, value, magnitude, active, duration_so_far, emitter);
            }
        }
        self.last_value_time = Some(t);

        let mut outcome = SampleOutcome::default();
        let state = std::mem::replace(&mut self.state, TrackerState::Idle);

        self.state = match state {
            TrackerState::Idle => {
                if active {
                    self.last_true_time = t;
                    TrackerState::Candidate { onset: t }
                } else {
                    TrackerState::Idle
                }
            }

            TrackerState::Candidate { onset } => {
                if !active {
                    // Sub-threshold excursion: the run never confirmed, drop it
                    TrackerState::Idle
                } else {
                    self.last_true_time = t;
                    match self.eligible_severity(magnitude, t - onset) {
                        Some(severity) => {
                            let flag = emitter.open(
                                &self.session_id,
                                self.signal_type,
                                severity,
                                value,
                                onset,
                                t,
                                duration_so_far,
                            );
                            outcome.opened = true;
                            TrackerState::Confirmed { onset, flag }
                        }
                        None => TrackerState::Candidate { onset },
                    }
                }
            }

            TrackerState::Confirmed { onset, mut flag } => {
                if !active {
                    // t_end stays at the last true sample's time
                    emitter.close(&mut flag, duration_so_far);
                    self.last_closed_at = Some(t);
                    outcome.closed = Some(flag);
                    TrackerState::Idle
                } else {
                    self.last_true_time = t;
                    if let Some(severity) = self.eligible_severity(magnitude, t - onset) {
                        emitter.escalate(&mut flag, severity, value);
                    }
                    emitter.extend(&mut flag, t, duration_so_far);
                    TrackerState::Confirmed { onset, flag }
                }
            }
        };

        outcome
    }

    /// Apply a sample that arrived out of order relative to consumed history
    fn correct_history(
        &mut self,
        t: f64,
        value: &SignalValue,
        magnitude: f64,
        active: bool,
        duration_so_far: f64,
        emitter: &FlagEmitter,
    ) -> SampleOutcome {
        let mut outcome = SampleOutcome::default();
        let state = std::mem::replace(&mut self.state, TrackerState::Idle);

        self.state = match state {
            // No open run to correct: a late active sample is only a stale
            // correction if a run actually closed after it, since reopening
            // closed history is unsafe. Anything else is a plain no-op.
            TrackerState::Idle => {
                let behind_closed_run =
                    self.last_closed_at.map_or(false, |closed_at| t < closed_at);
                if active && behind_closed_run {
                    warn!(
                        "stale correction ignored: {} sample at t={:.3} arrived after run closure",
                        self.signal_type.as_str(),
                        t
                    );
                    outcome.stale_correction = true;
                } else {
                    debug!(
                        "late {} sample at t={:.3} outside any closed run, ignored",
                        self.signal_type.as_str(),
                        t
                    );
                }
                TrackerState::Idle
            }

            TrackerState::Candidate { onset } => {
                if active && t < onset {
                    // The condition held earlier than first observed; the
                    // corrected span may already satisfy a tier
                    match self.eligible_severity(magnitude, self.last_true_time - t) {
                        Some(severity) => {
                            let flag = emitter.open(
                                &self.session_id,
                                self.signal_type,
                                severity,
                                value,
                                t,
                                self.last_true_time,
                                duration_so_far,
                            );
                            outcome.opened = true;
                            TrackerState::Confirmed { onset: t, flag }
                        }
                        None => TrackerState::Candidate { onset: t },
                    }
                } else {
                    TrackerState::Candidate { onset }
                }
            }

            TrackerState::Confirmed { onset, mut flag } => {
                if active && t < onset {
                    emitter.rewind_onset(&mut flag, t);
                    if let Some(severity) =
                        self.eligible_severity(magnitude, self.last_true_time - t)
                    {
                        emitter.escalate(&mut flag, severity, value);
                    }
                    TrackerState::Confirmed { onset: t, flag }
                } else {
                    TrackerState::Confirmed { onset, flag }
                }
            }
        };

        outcome
    }

    /// Strongest tier whose predicate holds at this sample and whose
    /// duration requirement is met by the run so far
    fn eligible_severity(&self, magnitude: f64, elapsed: f64) -> Option<Severity> {
        self.policy
            .tiers_strongest_first()
            .find(|(_, rule)| magnitude >= rule.threshold && elapsed >= rule.min_duration)
            .map(|(severity, _)| severity)
    }

    /// Snapshot of the still-open flag, if any
    pub fn open_flag(&self) -> Option<&Flag> {
        match &self.state {
            TrackerState::Confirmed { flag, .. } => Some(flag),
            _ => None,
        }
    }

    /// Close out the tracker at session end; a confirmed run closes at its
    /// last true sample, a candidate run is discarded
    pub fn finish(&mut self, duration_so_far: f64, emitter: &FlagEmitter) -> Option<Flag> {
        let state = std::mem::replace(&mut self.state, TrackerState::Idle);
        match state {
            TrackerState::Confirmed { mut flag, .. } => {
                emitter.close(&mut flag, duration_so_far);
                self.last_closed_at = Some(duration_so_far);
                Some(flag)
            }
            _ => None,
        }
    }
}
