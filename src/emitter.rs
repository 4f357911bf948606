//! Flag materialization
//!
//! The emitter turns confirmed detections into `Flag` records and mutates
//! them on behalf of trackers while their run is still open: extending the
//! confirmed interval, escalating severity, rewinding the onset after a
//! history correction, and finally sealing the record. Clip bounds are kept
//! padded by `clip_pad_secs` and clamped to `[0, session_duration_so_far]`.

use uuid::Uuid;

use crate::policy::EnginePolicy;
use crate::types::{Flag, Severity, SignalType, SignalValue};

/// Builds and updates flags according to the engine policy
#[derive(Debug, Clone, Copy)]
pub struct FlagEmitter {
    clip_pad_secs: f64,
    fixed_confidence: f64,
}

impl FlagEmitter {
    pub fn new(policy: &EnginePolicy) -> Self {
        FlagEmitter {
            clip_pad_secs: policy.clip_pad_secs,
            fixed_confidence: policy.fixed_confidence,
        }
    }

    /// Confidence for a detection: the raw model confidence for
    /// probability-bearing signals, a fixed policy constant otherwise
    pub fn confidence_for(&self, signal_type: SignalType, value: &SignalValue) -> f64 {
        match signal_type {
            SignalType::PhoneConfidence => value.as_f64().unwrap_or(self.fixed_confidence),
            _ => self.fixed_confidence,
        }
    }

    /// Open a flag for a freshly confirmed run
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        session_id: &str,
        flag_type: SignalType,
        severity: Severity,
        value: &SignalValue,
        t_start: f64,
        t_end: f64,
        duration_so_far: f64,
    ) -> Flag {
        Flag {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            flag_type,
            severity,
            confidence: self.confidence_for(flag_type, value),
            t_start,
            t_end,
            clip_start: (t_start - self.clip_pad_secs).max(0.0),
            clip_end: (t_end + self.clip_pad_secs).min(duration_so_far),
            closed: false,
        }
    }

    /// Advance an open flag's confirmed interval to a new true sample
    pub fn extend(&self, flag: &mut Flag, t_end: f64, duration_so_far: f64) {
        flag.t_end = t_end;
        flag.clip_end = (t_end + self.clip_pad_secs).min(duration_so_far);
    }

    /// Upgrade an open flag to a stronger tier, recalculating confidence
    /// from the escalating sample; severity never downgrades
    pub fn escalate(&self, flag: &mut Flag, severity: Severity, value: &SignalValue) {
        if severity > flag.severity {
            flag.severity = severity;
            flag.confidence = self.confidence_for(flag.flag_type, value);
        }
    }

    /// Move an open flag's onset backward after a history correction
    pub fn rewind_onset(&self, flag: &mut Flag, t_start: f64) {
        if t_start < flag.t_start {
            flag.t_start = t_start;
            flag.clip_start = (t_start - self.clip_pad_secs).max(0.0);
        }
    }

    /// Seal a flag; its fields are immutable from here on
    pub fn close(&self, flag: &mut Flag, duration_so_far: f64) {
        flag.clip_end = (flag.t_end + self.clip_pad_secs).min(duration_so_far);
        flag.closed = true;
    }
}
