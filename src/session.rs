//! Per-session processing state
//!
//! Owns everything scoped to one proctoring session: the dedup history, the
//! per-signal trackers, the running session extent, the flag aggregator,
//! and the external policy-breach marker. Batches must be applied strictly
//! sequentially per session (the engine's per-session lock guarantees it);
//! trackers within a session own disjoint state.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::aggregator::SessionAggregator;
use crate::emitter::FlagEmitter;
use crate::error::EngineError;
use crate::evaluator::RecommendationEvaluator;
use crate::normalizer::{Normalizer, SeenSamples};
use crate::policy::EnginePolicy;
use crate::tracker::SignalTracker;
use crate::types::{BatchReport, Flag, SessionReport, SessionSummary, SignalType, TelemetryEvent};

/// All mutable state for one session
pub struct SessionState {
    session_id: String,
    policy: Arc<EnginePolicy>,
    emitter: FlagEmitter,
    trackers: HashMap<SignalType, SignalTracker>,
    seen: SeenSamples,
    /// Largest session_time observed across all signals
    duration_so_far: f64,
    aggregator: SessionAggregator,
    policy_breach: bool,
    /// Set at teardown; a handle fetched before teardown must not mutate
    /// state behind the final report
    finished: bool,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, policy: Arc<EnginePolicy>) -> Self {
        let emitter = FlagEmitter::new(&policy);
        SessionState {
            session_id: session_id.into(),
            policy,
            emitter,
            trackers: HashMap::new(),
            seen: SeenSamples::new(),
            duration_so_far: 0.0,
            aggregator: SessionAggregator::new(),
            policy_breach: false,
            finished: false,
        }
    }

    /// Normalize a batch and dispatch it to the per-signal trackers
    pub fn apply(&mut self, events: Vec<TelemetryEvent>) -> Result<BatchReport, EngineError> {
        if self.finished {
            return Err(EngineError::UnknownSession(self.session_id.clone()));
        }

        let normalized = Normalizer::normalize(events, &mut self.seen);

        let mut report = BatchReport {
            accepted: normalized.events.len(),
            duplicates: normalized.duplicates,
            rejected: normalized.rejected,
            ..Default::default()
        };

        for event in normalized.events {
            self.duration_so_far = self.duration_so_far.max(event.session_time);

            let tracker = self.trackers.entry(event.signal_type).or_insert_with(|| {
                SignalTracker::new(
                    self.session_id.clone(),
                    event.signal_type,
                    *self.policy.signal(event.signal_type),
                )
            });

            let outcome = tracker.observe(
                event.session_time,
                &event.value,
                self.duration_so_far,
                &self.emitter,
            );

            if outcome.opened {
                report.flags_opened += 1;
            }
            if outcome.stale_correction {
                report.stale_corrections += 1;
            }
            if let Some(flag) = outcome.closed {
                report.flags_closed += 1;
                self.aggregator.add(flag);
            }
        }

        Ok(report)
    }

    /// All flags so far, ordered by `t_start`; open runs appear as snapshots
    pub fn list_flags(&self) -> Vec<Flag> {
        let open = self.trackers.values().filter_map(|t| t.open_flag().cloned());
        self.aggregator.list(open)
    }

    /// Record the external policy-breach signal
    pub fn mark_policy_breach(&mut self) {
        self.policy_breach = true;
    }

    /// Recompute the summary from the current flag set; never cached
    pub fn summary(&self, final_score: Option<f64>) -> SessionSummary {
        let flags = self.list_flags();
        let counts = SessionAggregator::counts(&flags);
        let recommendation = RecommendationEvaluator::evaluate(
            &self.policy.recommendation,
            final_score,
            self.policy_breach,
            &counts,
        );

        SessionSummary {
            session_id: self.session_id.clone(),
            final_score,
            counts,
            recommendation,
            computed_at: Utc::now(),
        }
    }

    /// Session teardown: close open confirmed runs at the last observed
    /// sample, discard candidates, and produce the final report
    pub fn finish(&mut self, final_score: Option<f64>) -> SessionReport {
        self.finished = true;
        let duration = self.duration_so_far;
        let emitter = self.emitter;
        let closed: Vec<Flag> = self
            .trackers
            .values_mut()
            .filter_map(|t| t.finish(duration, &emitter))
            .collect();
        for flag in closed {
            self.aggregator.add(flag);
        }
        SessionReport {
            session_id: self.session_id.clone(),
            flags: self.list_flags(),
            summary: self.summary(final_score),
        }
    }

    pub fn duration_so_far(&self) -> f64 {
        self.duration_so_far
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Recommendation, Severity, SignalValue};
    use pretty_assertions::assert_eq;

    fn session() -> SessionState {
        SessionState::new("s1", Arc::new(EnginePolicy::default()))
    }

    fn yaw(t: f64, degrees: f64) -> TelemetryEvent {
        TelemetryEvent::new("s1", SignalType::HeadYaw, t, degrees)
    }

    fn sustained_turn() -> Vec<TelemetryEvent> {
        vec![
            yaw(0.0, 40.0),
            yaw(1.0, 40.0),
            yaw(2.0, 40.0),
            yaw(2.5, 40.0),
            yaw(5.0, 5.0),
        ]
    }

    #[test]
    fn test_sustained_turn_produces_one_moderate_flag() {
        let mut session = session();
        let report = session.apply(sustained_turn()).unwrap();

        assert_eq!(report.accepted, 5);
        assert_eq!(report.flags_opened, 1);
        assert_eq!(report.flags_closed, 1);

        let flags = session.list_flags();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].severity, Severity::Moderate);
        assert_eq!(flags[0].t_start, 0.0);
        assert_eq!(flags[0].t_end, 2.5);
        assert_eq!(flags[0].clip_start, 0.0);
        assert_eq!(flags[0].clip_end, 4.5);
    }

    #[test]
    fn test_identical_batch_twice_is_idempotent() {
        let mut session = session();
        session.apply(sustained_turn()).unwrap();
        let before = session.list_flags();

        let report = session.apply(sustained_turn()).unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.duplicates, 5);
        assert_eq!(report.flags_opened, 0);

        let after = session.list_flags();
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].id, after[0].id);
        assert_eq!(before[0].t_end, after[0].t_end);
        assert_eq!(before[0].severity, after[0].severity);
    }

    #[test]
    fn test_signals_track_independently() {
        let mut session = session();
        let mut events = sustained_turn();
        events.extend([
            TelemetryEvent::new("s1", SignalType::SpeakerCount, 0.5, 2.0),
            TelemetryEvent::new("s1", SignalType::SpeakerCount, 3.0, 2.0),
            TelemetryEvent::new("s1", SignalType::SpeakerCount, 4.0, 1.0),
        ]);
        session.apply(events).unwrap();

        let flags = session.list_flags();
        assert_eq!(flags.len(), 2);
        let types: Vec<SignalType> = flags.iter().map(|f| f.flag_type).collect();
        assert!(types.contains(&SignalType::HeadYaw));
        assert!(types.contains(&SignalType::SpeakerCount));
    }

    #[test]
    fn test_open_flag_visible_before_closure() {
        let mut session = session();
        session.apply(vec![yaw(0.0, 40.0), yaw(1.0, 40.0), yaw(2.2, 40.0)]).unwrap();

        let flags = session.list_flags();
        assert_eq!(flags.len(), 1);
        assert!(!flags[0].closed);
        assert_eq!(flags[0].t_end, 2.2);
    }

    #[test]
    fn test_stale_correction_counted_in_report() {
        let mut session = session();
        session.apply(vec![yaw(0.0, 40.0), yaw(1.0, 40.0), yaw(2.0, 40.0), yaw(3.0, 5.0)]).unwrap();

        // Late sample that would have extended the now-closed run
        let report = session.apply(vec![yaw(1.5, 46.0)]).unwrap();
        assert_eq!(report.stale_corrections, 1);

        let flags = session.list_flags();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].t_end, 2.0);
    }

    #[test]
    fn test_summary_recomputes_fresh() {
        let mut session = session();
        session.apply(sustained_turn()).unwrap();

        let summary = session.summary(Some(8.0));
        assert_eq!(summary.counts.moderate, 1);
        assert_eq!(summary.recommendation, Recommendation::Pass);

        // Rescoring changes the recommendation with no cached state
        let summary = session.summary(None);
        assert_eq!(summary.recommendation, Recommendation::Review);
    }

    #[test]
    fn test_finish_closes_open_runs() {
        let mut session = session();
        session.apply(vec![yaw(0.0, 40.0), yaw(1.0, 40.0), yaw(2.5, 40.0)]).unwrap();
        assert!(!session.list_flags()[0].closed);

        let report = session.finish(Some(8.0));
        assert_eq!(report.summary.counts.total, 1);
        assert!(report.flags[0].closed);
        assert_eq!(report.flags[0].t_end, 2.5);
    }

    #[test]
    fn test_batches_after_finish_are_rejected() {
        let mut session = session();
        session.apply(sustained_turn()).unwrap();
        session.finish(Some(8.0));

        assert!(matches!(
            session.apply(vec![yaw(30.0, 40.0)]),
            Err(EngineError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_policy_breach_forces_fail() {
        let mut session = session();
        session.mark_policy_breach();
        let summary = session.summary(Some(10.0));
        assert_eq!(summary.recommendation, Recommendation::Fail);
    }

    #[test]
    fn test_bad_events_degrade_to_ignored_samples() {
        let mut session = session();
        let report = session
            .apply(vec![
                TelemetryEvent::new("s1", SignalType::PhoneConfidence, 0.0, 2.0), // invalid
                yaw(0.0, 40.0),
            ])
            .unwrap();

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.accepted, 1);
    }

    #[test]
    fn test_clip_bounds_always_bracket_interval() {
        let mut session = session();
        let mut events = sustained_turn();
        events.extend([
            TelemetryEvent::new("s1", SignalType::FaceCount, 6.0, 2.0),
            TelemetryEvent::new("s1", SignalType::FaceCount, 6.7, 2.0),
            TelemetryEvent::new("s1", SignalType::FaceCount, 7.0, 1.0),
        ]);
        session.apply(events).unwrap();

        for flag in session.list_flags() {
            assert!(flag.clip_start <= flag.t_start);
            assert!(flag.t_start <= flag.t_end);
            assert!(flag.t_end <= flag.clip_end);
            assert!(flag.clip_start >= 0.0);
            assert!(flag.clip_end <= session.duration_so_far());
        }
    }
}
