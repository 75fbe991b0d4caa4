#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;
use url::Url;
use vaultgate_kernel_contracts::moderation::{
    CategoryScore, Classification, ModerationCategory, ModerationVerdict, OutageMode,
};
use vaultgate_kernel_contracts::policy::DenialReason;
use vaultgate_kernel_contracts::{ContractViolation, Validate};

pub mod reason_codes {
    use vaultgate_kernel_contracts::ReasonCodeId;

    pub const MOD_BLOCKED_CATEGORY: ReasonCodeId = ReasonCodeId(0x4D44_0001);
    pub const MOD_BLOCKED_TOO_LONG: ReasonCodeId = ReasonCodeId(0x4D44_0002);
    pub const MOD_OUTAGE_FAIL_CLOSED: ReasonCodeId = ReasonCodeId(0x4D44_0003);
    pub const MOD_OUTAGE_FAIL_OPEN: ReasonCodeId = ReasonCodeId(0x4D44_0004);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(&'static str),
    #[error("classifier http status {0}")]
    HttpStatus(u16),
    #[error("classifier response malformed: {0}")]
    Malformed(&'static str),
    #[error("classifier misconfigured: {0}")]
    Config(&'static str),
}

/// Text classification capability. The gate owns the policy; implementations
/// only report per-category scores.
pub trait TextClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationConfig {
    pub threshold: f32,
    pub blocked_categories: BTreeSet<ModerationCategory>,
    pub outage_mode: OutageMode,
    pub max_text_chars: usize,
}

impl ModerationConfig {
    pub fn mvp_v1() -> Self {
        Self {
            threshold: 0.8,
            blocked_categories: [
                ModerationCategory::Hate,
                ModerationCategory::Harassment,
                ModerationCategory::SelfHarm,
                ModerationCategory::Sexual,
                ModerationCategory::SexualMinors,
                ModerationCategory::Violence,
                ModerationCategory::Illicit,
                ModerationCategory::Spam,
            ]
            .into_iter()
            .collect(),
            outage_mode: OutageMode::FailClosed,
            max_text_chars: 4_000,
        }
    }

    /// Parses a comma list such as `hate,harassment,self-harm`.
    pub fn parse_categories(raw: &str) -> BTreeSet<ModerationCategory> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ModerationCategory::from_label)
            .collect()
    }
}

impl Validate for ModerationConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.threshold.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "moderation_config.threshold",
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ContractViolation::InvalidRange {
                field: "moderation_config.threshold",
                min: 0.0,
                max: 1.0,
                got: f64::from(self.threshold),
            });
        }
        if self.max_text_chars == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "moderation_config.max_text_chars",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

pub struct ModerationGate {
    config: ModerationConfig,
    classifier: Box<dyn TextClassifier>,
}

impl std::fmt::Debug for ModerationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModerationGate {
    pub fn new(
        config: ModerationConfig,
        classifier: Box<dyn TextClassifier>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    pub fn moderate(&self, text: &str) -> ModerationVerdict {
        let normalized: String = text.nfkc().collect();
        let fingerprint = text_fingerprint(&normalized);
        if normalized.trim().is_empty() {
            return allowed(0.0, true);
        }
        if normalized.chars().count() > self.config.max_text_chars {
            info!(
                text_fp = %fingerprint,
                reason_code = reason_codes::MOD_BLOCKED_TOO_LONG.0,
                "message blocked: too long"
            );
            return blocked("message too long", Vec::new(), 1.0, true);
        }

        let classification = match self.classifier.classify(&normalized) {
            Ok(c) => match c.validate() {
                Ok(()) => c,
                Err(_) => return self.outage(&fingerprint, "classifier returned invalid scores"),
            },
            Err(e) => {
                warn!(text_fp = %fingerprint, error = %e, "classifier call failed");
                return self.outage(&fingerprint, "classifier unavailable");
            }
        };

        let flagged: BTreeSet<ModerationCategory> = classification
            .scores
            .iter()
            .filter(|s| {
                s.score >= self.config.threshold
                    && self.config.blocked_categories.contains(&s.category)
            })
            .map(|s| s.category.clone())
            .collect();
        if flagged.is_empty() {
            return allowed(classification.confidence(), true);
        }
        let confidence = classification
            .scores
            .iter()
            .filter(|s| flagged.contains(&s.category))
            .map(|s| s.score)
            .fold(0.0, f32::max);
        let categories: Vec<ModerationCategory> = flagged.into_iter().collect();
        let labels: Vec<&str> = categories.iter().map(ModerationCategory::as_label).collect();
        info!(
            text_fp = %fingerprint,
            categories = %labels.join(","),
            confidence,
            reason_code = reason_codes::MOD_BLOCKED_CATEGORY.0,
            "message blocked by moderation"
        );
        blocked("flagged content", categories, confidence, true)
    }

    fn outage(&self, fingerprint: &str, detail: &'static str) -> ModerationVerdict {
        match self.config.outage_mode {
            OutageMode::FailClosed => {
                warn!(
                    text_fp = %fingerprint,
                    reason_code = reason_codes::MOD_OUTAGE_FAIL_CLOSED.0,
                    "{detail}; failing closed"
                );
                blocked(detail, Vec::new(), 0.0, false)
            }
            OutageMode::FailOpen => {
                warn!(
                    text_fp = %fingerprint,
                    reason_code = reason_codes::MOD_OUTAGE_FAIL_OPEN.0,
                    "{detail}; failing open"
                );
                allowed(0.0, false)
            }
        }
    }
}

fn allowed(confidence: f32, classifier_available: bool) -> ModerationVerdict {
    ModerationVerdict {
        allowed: true,
        reason: None,
        detail: None,
        categories: Vec::new(),
        confidence,
        classifier_available,
    }
}

fn blocked(
    detail: &str,
    categories: Vec<ModerationCategory>,
    confidence: f32,
    classifier_available: bool,
) -> ModerationVerdict {
    ModerationVerdict {
        allowed: false,
        reason: Some(DenialReason::ModerationBlocked),
        detail: Some(detail.to_string()),
        categories,
        confidence,
        classifier_available,
    }
}

/// Short SHA-256 prefix so logs can correlate messages without holding text.
pub fn text_fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}

/// OpenAI-compatible `/v1/moderations` client.
#[derive(Debug, Clone)]
pub struct HttpModerationClassifier {
    endpoint: Url,
    api_key: String,
    model: Option<String>,
    timeout: Duration,
}

impl HttpModerationClassifier {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| ClassifierError::Config("endpoint url"))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ClassifierError::Config("endpoint scheme"));
        }
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClassifierError::Config("api key"));
        }
        if timeout.is_zero() {
            return Err(ClassifierError::Config("timeout"));
        }
        Ok(Self {
            endpoint,
            api_key,
            model,
            timeout,
        })
    }
}

impl TextClassifier for HttpModerationClassifier {
    fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(self.timeout)
            .timeout_connect(self.timeout)
            .timeout_read(self.timeout)
            .timeout_write(self.timeout)
            .build();
        let mut payload = json!({ "input": text });
        if let Some(model) = &self.model {
            payload["model"] = Value::String(model.clone());
        }
        let response = agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Accept", "application/json")
            .send_json(payload)
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => ClassifierError::HttpStatus(status),
                ureq::Error::Transport(t) => {
                    let lower = format!("{:?} {}", t.kind(), t).to_ascii_lowercase();
                    if lower.contains("timeout") || lower.contains("timed out") {
                        ClassifierError::Unavailable("timeout")
                    } else {
                        ClassifierError::Unavailable("transport")
                    }
                }
            })?;
        let body: Value = serde_json::from_reader(response.into_reader())
            .map_err(|_| ClassifierError::Malformed("json_parse"))?;
        parse_moderation_body(&body)
    }
}

fn parse_moderation_body(body: &Value) -> Result<Classification, ClassifierError> {
    let scores = body
        .pointer("/results/0/category_scores")
        .and_then(Value::as_object)
        .ok_or(ClassifierError::Malformed("category_scores missing"))?;
    let mut merged: Vec<CategoryScore> = Vec::new();
    for (label, v) in scores {
        let score = v
            .as_f64()
            .ok_or(ClassifierError::Malformed("score not a number"))? as f32;
        let category = ModerationCategory::from_label(label);
        match merged.iter_mut().find(|s| s.category == category) {
            Some(existing) => existing.score = existing.score.max(score),
            None => merged.push(CategoryScore { category, score }),
        }
    }
    Ok(Classification { scores: merged })
}
