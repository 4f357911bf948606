//! Flagging policy configuration
//!
//! All thresholds the engine applies live here: the per-signal tier table
//! (threshold + minimum sustained duration per severity), the clip padding,
//! the confidence assigned to non-probabilistic detections, and the
//! pass/review/fail recommendation policy. Defaults carry the governing
//! policy values; everything is serializable for external configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::types::{Severity, SignalType, SignalValue};

/// Seconds of context padded onto each side of a flag's clip window
pub const DEFAULT_CLIP_PAD_SECS: f64 = 2.0;

/// Confidence assigned to flags from non-probabilistic signals
pub const DEFAULT_FIXED_CONFIDENCE: f64 = 0.9;

/// One severity tier: condition magnitude threshold + debounce duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    /// Minimum condition magnitude for the tier's predicate to hold
    pub threshold: f64,
    /// Seconds the predicate must hold continuously before confirming
    pub min_duration: f64,
}

/// Tier table for one signal type
///
/// Signals without a moderate tier (multi-face) confirm directly at high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderate: Option<TierRule>,
    pub high: TierRule,
}

impl SignalPolicy {
    /// The weakest configured tier; its predicate defines run continuity
    pub fn weakest(&self) -> &TierRule {
        self.moderate.as_ref().unwrap_or(&self.high)
    }

    /// Tiers from strongest to weakest
    pub fn tiers_strongest_first(&self) -> impl Iterator<Item = (Severity, &TierRule)> {
        std::iter::once((Severity::High, &self.high)).chain(
            self.moderate
                .as_ref()
                .map(|rule| (Severity::Moderate, rule)),
        )
    }

}

/// Recommendation thresholds applied by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendationPolicy {
    /// High-severity flag count at which the session fails outright
    pub fail_high_count: u32,
    /// Minimum final score required to pass
    pub pass_min_score: f64,
    /// Maximum moderate flags tolerated for a pass
    pub pass_max_moderate: u32,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        RecommendationPolicy {
            fail_high_count: 2,
            pass_min_score: 7.0,
            pass_max_moderate: 2,
        }
    }
}

/// Complete engine policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnginePolicy {
    /// Tier table per signal type
    pub tiers: HashMap<SignalType, SignalPolicy>,
    pub clip_pad_secs: f64,
    pub fixed_confidence: f64,
    pub recommendation: RecommendationPolicy,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        let mut tiers = HashMap::new();

        // Head yaw: absolute degrees
        tiers.insert(
            SignalType::HeadYaw,
            SignalPolicy {
                moderate: Some(TierRule {
                    threshold: 35.0,
                    min_duration: 2.0,
                }),
                high: TierRule {
                    threshold: 45.0,
                    min_duration: 3.0,
                },
            },
        );

        // Face absent: same predicate at both tiers, duration alone escalates
        tiers.insert(
            SignalType::FacePresence,
            SignalPolicy {
                moderate: Some(TierRule {
                    threshold: 1.0,
                    min_duration: 3.0,
                }),
                high: TierRule {
                    threshold: 1.0,
                    min_duration: 8.0,
                },
            },
        );

        // Multiple faces: no moderate tier
        tiers.insert(
            SignalType::FaceCount,
            SignalPolicy {
                moderate: None,
                high: TierRule {
                    threshold: 2.0,
                    min_duration: 0.5,
                },
            },
        );

        tiers.insert(
            SignalType::PhoneConfidence,
            SignalPolicy {
                moderate: Some(TierRule {
                    threshold: 0.60,
                    min_duration: 1.0,
                }),
                high: TierRule {
                    threshold: 0.75,
                    min_duration: 2.0,
                },
            },
        );

        tiers.insert(
            SignalType::SpeakerCount,
            SignalPolicy {
                moderate: Some(TierRule {
                    threshold: 2.0,
                    min_duration: 2.0,
                }),
                high: TierRule {
                    threshold: 2.0,
                    min_duration: 5.0,
                },
            },
        );

        // Tab hidden: durations mirror speaker_count
        tiers.insert(
            SignalType::TabVisible,
            SignalPolicy {
                moderate: Some(TierRule {
                    threshold: 1.0,
                    min_duration: 2.0,
                }),
                high: TierRule {
                    threshold: 1.0,
                    min_duration: 5.0,
                },
            },
        );

        EnginePolicy {
            tiers,
            clip_pad_secs: DEFAULT_CLIP_PAD_SECS,
            fixed_confidence: DEFAULT_FIXED_CONFIDENCE,
            recommendation: RecommendationPolicy::default(),
        }
    }
}

impl EnginePolicy {
    /// Tier table for a signal; every signal is covered by a valid policy
    pub fn signal(&self, signal_type: SignalType) -> &SignalPolicy {
        // from_json and FlagEngine::with_policy both run validate(), so
        // every policy inside an engine covers every signal
        &self.tiers[&signal_type]
    }

    /// Check completeness and internal consistency
    pub fn validate(&self) -> Result<(), EngineError> {
        for signal_type in SignalType::all() {
            let policy = self.tiers.get(&signal_type).ok_or_else(|| {
                EngineError::InvalidPolicy(format!(
                    "missing tier table for {}",
                    signal_type.as_str()
                ))
            })?;

            if policy.high.min_duration <= 0.0 {
                return Err(EngineError::InvalidPolicy(format!(
                    "non-positive high min_duration for {}",
                    signal_type.as_str()
                )));
            }

            if let Some(moderate) = &policy.moderate {
                if moderate.min_duration <= 0.0 {
                    return Err(EngineError::InvalidPolicy(format!(
                        "non-positive moderate min_duration for {}",
                        signal_type.as_str()
                    )));
                }
                if moderate.min_duration > policy.high.min_duration
                    && moderate.threshold >= policy.high.threshold
                {
                    return Err(EngineError::InvalidPolicy(format!(
                        "moderate tier dominates high tier for {}",
                        signal_type.as_str()
                    )));
                }
            }
        }

        if self.clip_pad_secs < 0.0 {
            return Err(EngineError::InvalidPolicy(
                "negative clip_pad_secs".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fixed_confidence) {
            return Err(EngineError::InvalidPolicy(
                "fixed_confidence outside [0,1]".to_string(),
            ));
        }

        Ok(())
    }

    /// Load a policy from JSON, rejecting incomplete tables
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let policy: EnginePolicy = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Map a validated payload to the magnitude the tier thresholds apply to
///
/// Boolean violation conditions (face absent, tab hidden) map to 1.0 when
/// the condition is present so they compare against a threshold of 1.0.
pub fn condition_magnitude(signal_type: SignalType, value: &SignalValue) -> f64 {
    match signal_type {
        SignalType::HeadYaw => value.as_f64().map(f64::abs).unwrap_or(0.0),
        SignalType::FacePresence => match value.as_bool() {
            Some(false) => 1.0, // face absent
            _ => 0.0,
        },
        SignalType::TabVisible => match value.as_bool() {
            Some(false) => 1.0, // tab hidden
            _ => 0.0,
        },
        SignalType::FaceCount | SignalType::PhoneConfidence | SignalType::SpeakerCount => {
            value.as_f64().unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = EnginePolicy::default();
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_default_tier_table_matches_governing_policy() {
        let policy = EnginePolicy::default();

        let yaw = policy.signal(SignalType::HeadYaw);
        assert_eq!(yaw.moderate.unwrap().threshold, 35.0);
        assert_eq!(yaw.moderate.unwrap().min_duration, 2.0);
        assert_eq!(yaw.high.threshold, 45.0);
        assert_eq!(yaw.high.min_duration, 3.0);

        let faces = policy.signal(SignalType::FaceCount);
        assert!(faces.moderate.is_none());
        assert_eq!(faces.high.min_duration, 0.5);

        let phone = policy.signal(SignalType::PhoneConfidence);
        assert_eq!(phone.moderate.unwrap().threshold, 0.60);
        assert_eq!(phone.high.threshold, 0.75);
    }

    #[test]
    fn test_weakest_tier() {
        let policy = EnginePolicy::default();
        assert_eq!(policy.signal(SignalType::HeadYaw).weakest().threshold, 35.0);
        // Single-tier signals fall through to high
        assert_eq!(
            policy.signal(SignalType::FaceCount).weakest().threshold,
            2.0
        );
    }

    #[test]
    fn test_condition_magnitude_boolean_signals() {
        assert_eq!(
            condition_magnitude(SignalType::FacePresence, &SignalValue::Bool(false)),
            1.0
        );
        assert_eq!(
            condition_magnitude(SignalType::FacePresence, &SignalValue::Bool(true)),
            0.0
        );
        assert_eq!(
            condition_magnitude(SignalType::TabVisible, &SignalValue::Bool(false)),
            1.0
        );
    }

    #[test]
    fn test_condition_magnitude_yaw_is_absolute() {
        assert_eq!(
            condition_magnitude(SignalType::HeadYaw, &SignalValue::Number(-40.0)),
            40.0
        );
    }

    #[test]
    fn test_json_round_trip() {
        let policy = EnginePolicy::default();
        let json = policy.to_json().unwrap();
        let loaded = EnginePolicy::from_json(&json).unwrap();
        assert_eq!(policy, loaded);
    }

    #[test]
    fn test_from_json_rejects_missing_signal() {
        let mut policy = EnginePolicy::default();
        policy.tiers.remove(&SignalType::TabVisible);
        let json = serde_json::to_string(&policy).unwrap();
        assert!(EnginePolicy::from_json(&json).is_err());
    }
}
