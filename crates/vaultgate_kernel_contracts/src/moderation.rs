#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_unit_score;
use crate::policy::DenialReason;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationCategory {
    Hate,
    Harassment,
    SelfHarm,
    Sexual,
    SexualMinors,
    Violence,
    Illicit,
    Spam,
    Other(String),
}

impl ModerationCategory {
    /// Maps classifier labels such as `harassment/threatening` or `self-harm`
    /// onto the coarse categories the block-list is written against.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_ascii_lowercase();
        let head = lower.split('/').next().unwrap_or_default();
        match head {
            "hate" => ModerationCategory::Hate,
            "harassment" => ModerationCategory::Harassment,
            "self-harm" | "self_harm" | "selfharm" => ModerationCategory::SelfHarm,
            "sexual" if lower.contains("minors") => ModerationCategory::SexualMinors,
            "sexual" => ModerationCategory::Sexual,
            "violence" => ModerationCategory::Violence,
            "illicit" => ModerationCategory::Illicit,
            "spam" | "scam" => ModerationCategory::Spam,
            _ => ModerationCategory::Other(lower),
        }
    }

    pub fn as_label(&self) -> &str {
        match self {
            ModerationCategory::Hate => "hate",
            ModerationCategory::Harassment => "harassment",
            ModerationCategory::SelfHarm => "self-harm",
            ModerationCategory::Sexual => "sexual",
            ModerationCategory::SexualMinors => "sexual/minors",
            ModerationCategory::Violence => "violence",
            ModerationCategory::Illicit => "illicit",
            ModerationCategory::Spam => "spam",
            ModerationCategory::Other(label) => label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: ModerationCategory,
    pub score: f32,
}

/// Raw classifier output before policy interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub scores: Vec<CategoryScore>,
}

impl Classification {
    pub fn confidence(&self) -> f32 {
        self.scores.iter().map(|s| s.score).fold(0.0, f32::max)
    }
}

impl Validate for Classification {
    fn validate(&self) -> Result<(), ContractViolation> {
        for s in &self.scores {
            validate_unit_score("classification.scores.score", s.score)?;
        }
        Ok(())
    }
}

/// Behaviour when the classifier cannot be reached or answers garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutageMode {
    FailClosed,
    FailOpen,
}

impl OutageMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail_closed" => Some(OutageMode::FailClosed),
            "open" | "fail_open" => Some(OutageMode::FailOpen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub detail: Option<String>,
    /// Blocked categories that crossed the threshold; empty when allowed.
    pub categories: Vec<ModerationCategory>,
    pub confidence: f32,
    pub classifier_available: bool,
}

impl Validate for ModerationVerdict {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_unit_score("moderation_verdict.confidence", self.confidence)?;
        if self.allowed && self.reason.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "moderation_verdict.reason",
                reason: "must be absent when allowed=true",
            });
        }
        if !self.allowed && self.reason != Some(DenialReason::ModerationBlocked) {
            return Err(ContractViolation::InvalidValue {
                field: "moderation_verdict.reason",
                reason: "must be MODERATION_BLOCKED when allowed=false",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_mod_contract_01_labels_map_to_coarse_categories() {
        assert_eq!(
            ModerationCategory::from_label("harassment/threatening"),
            ModerationCategory::Harassment
        );
        assert_eq!(
            ModerationCategory::from_label("sexual/minors"),
            ModerationCategory::SexualMinors
        );
        assert_eq!(
            ModerationCategory::from_label("self-harm/intent"),
            ModerationCategory::SelfHarm
        );
        assert_eq!(
            ModerationCategory::from_label("Crypto-Shill"),
            ModerationCategory::Other("crypto-shill".to_string())
        );
    }

    #[test]
    fn at_mod_contract_02_nan_scores_fail_validation() {
        let c = Classification {
            scores: vec![CategoryScore {
                category: ModerationCategory::Hate,
                score: f32::NAN,
            }],
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn at_mod_contract_03_confidence_is_max_score() {
        let c = Classification {
            scores: vec![
                CategoryScore {
                    category: ModerationCategory::Hate,
                    score: 0.2,
                },
                CategoryScore {
                    category: ModerationCategory::Spam,
                    score: 0.7,
                },
            ],
        };
        assert_eq!(c.confidence(), 0.7);
    }
}
