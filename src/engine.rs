//! Top-level engine API
//!
//! `FlagEngine` owns the policy and a registry of live sessions. The
//! registry lock is held only long enough to fetch or insert a session
//! handle; all per-session work happens under that session's own lock, so
//! batches for unrelated sessions never contend. Two batches for the same
//! session serialize on the session lock, which is what gives per-session
//! sequential semantics.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::EngineError;
use crate::policy::EnginePolicy;
use crate::session::SessionState;
use crate::types::{BatchReport, Flag, SessionReport, SessionSummary, TelemetryEvent};

type SessionHandle = Arc<Mutex<SessionState>>;

/// Multi-session flag engine
pub struct FlagEngine {
    policy: Arc<EnginePolicy>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl Default for FlagEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagEngine {
    pub fn new() -> Self {
        FlagEngine {
            policy: Arc::new(EnginePolicy::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Build an engine over a caller-supplied policy; incomplete or
    /// inconsistent tier tables are rejected up front rather than at the
    /// first event for the uncovered signal
    pub fn with_policy(policy: EnginePolicy) -> Result<Self, EngineError> {
        policy.validate()?;
        Ok(FlagEngine {
            policy: Arc::new(policy),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<String, SessionHandle>>, EngineError> {
        self.sessions.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Fetch the session handle, creating the session on first sight
    fn session_handle(&self, session_id: &str) -> Result<SessionHandle, EngineError> {
        let mut registry = self.registry()?;
        if let Some(handle) = registry.get(session_id) {
            return Ok(Arc::clone(handle));
        }
        info!("starting session {}", session_id);
        let handle = Arc::new(Mutex::new(SessionState::new(
            session_id,
            Arc::clone(&self.policy),
        )));
        registry.insert(session_id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Fetch the handle for a session that must already exist
    fn existing_handle(&self, session_id: &str) -> Result<SessionHandle, EngineError> {
        self.registry()?
            .get(session_id)
            .map(Arc::clone)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
    }

    /// Process one batch of telemetry for one session
    pub fn submit_batch(
        &self,
        session_id: &str,
        events: Vec<TelemetryEvent>,
    ) -> Result<BatchReport, EngineError> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle.lock().map_err(|_| EngineError::LockPoisoned)?;
        // A handle fetched before a concurrent end_session removed it points
        // at finished state; apply rejects the batch instead of silently
        // mutating state behind the final report
        let report = session.apply(events)?;
        debug!(
            "session {}: batch accepted={} dup={} rejected={} opened={} closed={}",
            session_id,
            report.accepted,
            report.duplicates,
            report.rejected.len(),
            report.flags_opened,
            report.flags_closed
        );
        Ok(report)
    }

    /// All flags for a session so far, open runs included, ordered by onset
    pub fn list_flags(&self, session_id: &str) -> Result<Vec<Flag>, EngineError> {
        let handle = self.existing_handle(session_id)?;
        let session = handle.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(session.list_flags())
    }

    /// Current summary for a live session; recomputed on every call
    pub fn get_summary(
        &self,
        session_id: &str,
        final_score: Option<f64>,
    ) -> Result<SessionSummary, EngineError> {
        let handle = self.existing_handle(session_id)?;
        let session = handle.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(session.summary(final_score))
    }

    /// Record an out-of-band policy breach (e.g. a manual proctor ruling)
    pub fn mark_policy_breach(&self, session_id: &str) -> Result<(), EngineError> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle.lock().map_err(|_| EngineError::LockPoisoned)?;
        session.mark_policy_breach();
        Ok(())
    }

    /// End a session: close open runs and return the final report.
    ///
    /// The handle is removed from the registry before locking it, so a
    /// batch already in flight finishes first and nothing new can start.
    pub fn end_session(
        &self,
        session_id: &str,
        final_score: Option<f64>,
    ) -> Result<SessionReport, EngineError> {
        let handle = self
            .registry()?
            .remove(session_id)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        let mut session = handle.lock().map_err(|_| EngineError::LockPoisoned)?;
        let report = session.finish(final_score);
        info!(
            "ended session {}: {} flags, recommendation {:?}",
            session_id, report.summary.counts.total, report.summary.recommendation
        );
        Ok(report)
    }

    pub fn active_sessions(&self) -> Result<Vec<String>, EngineError> {
        let registry = self.registry()?;
        let mut ids: Vec<String> = registry.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Recommendation, SignalType};
    use pretty_assertions::assert_eq;
    use std::thread;

    fn yaw(session: &str, t: f64, degrees: f64) -> TelemetryEvent {
        TelemetryEvent::new(session, SignalType::HeadYaw, t, degrees)
    }

    fn turn_batch(session: &str) -> Vec<TelemetryEvent> {
        vec![
            yaw(session, 0.0, 40.0),
            yaw(session, 1.0, 40.0),
            yaw(session, 2.5, 40.0),
            yaw(session, 5.0, 5.0),
        ]
    }

    #[test]
    fn test_sessions_are_independent() {
        let engine = FlagEngine::new();
        engine.submit_batch("a", turn_batch("a")).unwrap();
        engine.submit_batch("b", vec![yaw("b", 0.0, 5.0)]).unwrap();

        assert_eq!(engine.list_flags("a").unwrap().len(), 1);
        assert_eq!(engine.list_flags("b").unwrap().len(), 0);
    }

    #[test]
    fn test_unknown_session_queries_error() {
        let engine = FlagEngine::new();
        assert!(matches!(
            engine.list_flags("missing"),
            Err(EngineError::UnknownSession(_))
        ));
        assert!(matches!(
            engine.get_summary("missing", None),
            Err(EngineError::UnknownSession(_))
        ));
        assert!(matches!(
            engine.end_session("missing", None),
            Err(EngineError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_end_session_closes_open_flags_and_removes() {
        let engine = FlagEngine::new();
        engine
            .submit_batch("a", vec![yaw("a", 0.0, 40.0), yaw("a", 2.5, 40.0)])
            .unwrap();

        let report = engine.end_session("a", Some(9.0)).unwrap();
        assert_eq!(report.summary.counts.total, 1);
        assert_eq!(report.summary.recommendation, Recommendation::Pass);
        assert!(report.flags[0].closed);
        assert!(engine.list_flags("a").is_err());
        assert!(engine.active_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_policy_breach_fails_regardless_of_score() {
        let engine = FlagEngine::new();
        engine.submit_batch("a", vec![yaw("a", 0.0, 5.0)]).unwrap();
        engine.mark_policy_breach("a").unwrap();

        let summary = engine.get_summary("a", Some(10.0)).unwrap();
        assert_eq!(summary.recommendation, Recommendation::Fail);
    }

    #[test]
    fn test_concurrent_sessions_do_not_interfere() {
        let engine = Arc::new(FlagEngine::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                let id = format!("s{}", i);
                engine.submit_batch(&id, turn_batch(&id)).unwrap();
                engine.submit_batch(&id, turn_batch(&id)).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.active_sessions().unwrap().len(), 8);
        for i in 0..8 {
            let flags = engine.list_flags(&format!("s{}", i)).unwrap();
            assert_eq!(flags.len(), 1, "session s{} flag count", i);
        }
    }

    #[test]
    fn test_end_session_report_includes_worker_thread_batches() {
        let engine = Arc::new(FlagEngine::new());

        // Two disjoint yaw runs submitted from separate worker threads, in
        // session-time order; the final report must account for both
        let early = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.submit_batch("a", turn_batch("a")).unwrap();
            })
        };
        early.join().unwrap();

        let late = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine
                    .submit_batch(
                        "a",
                        vec![
                            yaw("a", 10.0, 40.0),
                            yaw("a", 11.0, 40.0),
                            yaw("a", 12.5, 40.0),
                            yaw("a", 15.0, 5.0),
                        ],
                    )
                    .unwrap();
            })
        };
        late.join().unwrap();

        let report = engine.end_session("a", Some(8.0)).unwrap();
        assert_eq!(report.flags.len(), 2);
        assert_eq!(report.summary.counts.moderate, 2);
        assert!(report.flags.iter().all(|f| f.closed));
    }

    #[test]
    fn test_with_policy_rejects_incomplete_tier_table() {
        let mut policy = EnginePolicy::default();
        policy.tiers.remove(&SignalType::HeadYaw);

        assert!(matches!(
            FlagEngine::with_policy(policy),
            Err(EngineError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_summary_not_cached_across_calls() {
        let engine = FlagEngine::new();
        engine.submit_batch("a", turn_batch("a")).unwrap();

        let first = engine.get_summary("a", Some(8.0)).unwrap();
        assert_eq!(first.recommendation, Recommendation::Pass);

        engine
            .submit_batch(
                "a",
                vec![
                    yaw("a", 6.0, 50.0),
                    yaw("a", 9.5, 50.0),
                    yaw("a", 10.0, 50.0),
                    yaw("a", 10.5, 5.0),
                    yaw("a", 11.0, 50.0),
                    yaw("a", 14.5, 50.0),
                    yaw("a", 15.0, 5.0),
                ],
            )
            .unwrap();

        let second = engine.get_summary("a", Some(8.0)).unwrap();
        assert_eq!(second.counts.high, 2);
        assert_eq!(second.recommendation, Recommendation::Fail);
    }
}
