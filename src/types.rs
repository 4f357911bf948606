//! Core types for the Invigil flag engine
//!
//! This module defines the data that flows through the engine: inbound
//! telemetry events, emitted violation flags, aggregate counts, and the
//! per-session summary handed to review surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::EngineError;

/// Behavioral signal types produced by the capture layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Absolute head yaw in degrees
    HeadYaw,
    /// Whether a face is visible in frame
    FacePresence,
    /// Number of faces visible in frame
    FaceCount,
    /// Phone-detection model confidence (0-1)
    PhoneConfidence,
    /// Number of concurrent speakers on the audio channel
    SpeakerCount,
    /// Whether the exam tab is the visible tab
    TabVisible,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::HeadYaw => "head_yaw",
            SignalType::FacePresence => "face_presence",
            SignalType::FaceCount => "face_count",
            SignalType::PhoneConfidence => "phone_confidence",
            SignalType::SpeakerCount => "speaker_count",
            SignalType::TabVisible => "tab_visible",
        }
    }

    /// All signal types, in dispatch order
    pub fn all() -> [SignalType; 6] {
        [
            SignalType::HeadYaw,
            SignalType::FacePresence,
            SignalType::FaceCount,
            SignalType::PhoneConfidence,
            SignalType::SpeakerCount,
            SignalType::TabVisible,
        ]
    }

    /// Whether the signal carries a boolean payload (vs numeric)
    pub fn is_boolean(&self) -> bool {
        matches!(self, SignalType::FacePresence | SignalType::TabVisible)
    }
}

/// Telemetry payload value (numeric or boolean depending on the signal)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Number(f64),
}

impl SignalValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Number(n) => Some(*n),
            SignalValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(b) => Some(*b),
            SignalValue::Number(_) => None,
        }
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Number(v)
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

/// A single behavioral telemetry sample for one session
///
/// `session_time` is seconds elapsed since session start on the *client*
/// clock; `received_at` is server arrival time, used only for ordering
/// tie-breaks. Events may arrive out of `session_time` order and may be
/// retransmitted (duplicates share `signal_type` + `session_time`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub session_id: String,
    pub signal_type: SignalType,
    pub session_time: f64,
    pub value: SignalValue,
    pub received_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(
        session_id: impl Into<String>,
        signal_type: SignalType,
        session_time: f64,
        value: impl Into<SignalValue>,
    ) -> Self {
        TelemetryEvent {
            session_id: session_id.into(),
            signal_type,
            session_time,
            value: value.into(),
            received_at: Utc::now(),
        }
    }

    /// Validate payload shape and ranges for this event's signal type
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.session_time.is_finite() || self.session_time < 0.0 {
            return Err(EngineError::InvalidEvent(format!(
                "session_time {} out of range for {}",
                self.session_time,
                self.signal_type.as_str()
            )));
        }

        if self.signal_type.is_boolean() {
            if self.value.as_bool().is_none() {
                return Err(EngineError::InvalidEvent(format!(
                    "{} expects a boolean payload",
                    self.signal_type.as_str()
                )));
            }
            return Ok(());
        }

        let n = self.value.as_f64().ok_or_else(|| {
            EngineError::InvalidEvent(format!(
                "{} expects a numeric payload",
                self.signal_type.as_str()
            ))
        })?;

        if !n.is_finite() {
            return Err(EngineError::InvalidEvent(format!(
                "non-finite value for {}",
                self.signal_type.as_str()
            )));
        }

        match self.signal_type {
            SignalType::PhoneConfidence if !(0.0..=1.0).contains(&n) => {
                Err(EngineError::InvalidEvent(format!(
                    "phone_confidence {} outside [0,1]",
                    n
                )))
            }
            SignalType::FaceCount | SignalType::SpeakerCount if n < 0.0 => {
                Err(EngineError::InvalidEvent(format!(
                    "negative count {} for {}",
                    n,
                    self.signal_type.as_str()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Severity tier of a confirmed violation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Moderate,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Moderate => "moderate",
            Severity::High => "high",
        }
    }
}

/// A confirmed, time-bounded violation record
///
/// `t_start..t_end` is the condition-confirmed interval; `clip_start..clip_end`
/// is the padded window handed to evidence-clip rendering. While the
/// underlying condition is still active the flag is open and `t_end` /
/// `clip_end` advance with each sample; once closed the record is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: Uuid,
    pub session_id: String,
    pub flag_type: SignalType,
    pub severity: Severity,
    /// Detection confidence (0-1)
    pub confidence: f64,
    pub t_start: f64,
    pub t_end: f64,
    pub clip_start: f64,
    pub clip_end: f64,
    pub closed: bool,
}

/// Flag counts for a session, by severity and by type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCounts {
    pub total: u32,
    pub moderate: u32,
    pub high: u32,
    pub by_type: HashMap<SignalType, u32>,
}

impl FlagCounts {
    pub fn tally(flags: &[Flag]) -> Self {
        let mut counts = FlagCounts::default();
        for flag in flags {
            counts.total += 1;
            match flag.severity {
                Severity::Moderate => counts.moderate += 1,
                Severity::High => counts.high += 1,
            }
            *counts.by_type.entry(flag.flag_type).or_insert(0) += 1;
        }
        counts
    }
}

/// Outcome of the recommendation policy for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Pass,
    Review,
    Fail,
}

/// Session-level rollup, always recomputed from (final_score, flag set)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    /// Interview score supplied by the scoring layer; `None` until available
    pub final_score: Option<f64>,
    pub counts: FlagCounts,
    pub recommendation: Recommendation,
    pub computed_at: DateTime<Utc>,
}

/// Terminal artifact of a finished session: the closed flag set plus the
/// summary computed from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub flags: Vec<Flag>,
    pub summary: SessionSummary,
}

/// A single event rejected during batch validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedEvent {
    /// Index of the event within the submitted batch
    pub index: usize,
    pub signal_type: SignalType,
    pub reason: String,
}

/// Per-batch ingestion report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Events applied to trackers
    pub accepted: usize,
    /// Exact retransmits dropped as no-ops
    pub duplicates: usize,
    /// Late events that would have reopened a closed flag (ignored)
    pub stale_corrections: usize,
    pub rejected: Vec<RejectedEvent>,
    pub flags_opened: usize,
    pub flags_closed: usize,
}
