use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SynthError;

/// Monotonically increasing job identifier, unique within one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Model inference knobs forwarded untouched to the computation handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    #[serde(default = "default_speaker")]
    pub speaker: String,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_noise_w")]
    pub noise_w: f32,
    #[serde(default = "default_stop_threshold")]
    pub stop_threshold: f32,
    #[serde(default = "default_max_decoder_steps")]
    pub max_decoder_steps: u32,
}

fn default_speaker() -> String { "default".to_string() }
fn default_length_scale() -> f32 { 1.0 }
fn default_noise_scale() -> f32 { 0.667 }
fn default_noise_w() -> f32 { 0.8 }
fn default_stop_threshold() -> f32 { 0.5 }
fn default_max_decoder_steps() -> u32 { 2000 }

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            speaker: default_speaker(),
            length_scale: default_length_scale(),
            noise_scale: default_noise_scale(),
            noise_w: default_noise_w(),
            stop_threshold: default_stop_threshold(),
            max_decoder_steps: default_max_decoder_steps(),
        }
    }
}

/// What a transport caller hands to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default)]
    pub params: SynthesisParams,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: SynthesisParams::default(),
        }
    }

    pub fn with_params(mut self, params: SynthesisParams) -> Self {
        self.params = params;
        self
    }
}

/// A request that has been accepted for dispatch. Enqueued at most once.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub text: String,
    pub params: SynthesisParams,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Instant,
}

/// Upper bound on any deadline; longer timeouts saturate to it.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + timeout`, saturating instead of overflowing `Instant`.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(now)
}

impl Job {
    pub fn new(id: JobId, request: SynthesisRequest, timeout: Duration) -> Self {
        Self::with_deadline(id, request, Utc::now(), deadline_after(timeout))
    }

    /// Build a job from timing computed up front, e.g. outside a lock.
    pub fn with_deadline(
        id: JobId,
        request: SynthesisRequest,
        submitted_at: DateTime<Utc>,
        deadline: Instant,
    ) -> Self {
        Self {
            id,
            text: request.text,
            params: request.params,
            submitted_at,
            deadline,
        }
    }

    /// Whether the caller has already stopped waiting for this job.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Short human-readable preview of the input, safe to put in status output.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}…")
        } else {
            head
        }
    }
}

/// Encoded audio returned by a computation handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audio {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub format: String,
}

/// Successful synthesis result delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub job_id: JobId,
    pub worker_id: usize,
    pub text: String,
    pub speaker: String,
    pub audio: Audio,
    pub inference_time: Duration,
}

/// Reject empty, whitespace-only, or over-long input text.
///
/// Length is measured in Unicode scalar values, not bytes.
pub fn validate_text(text: &str, max_length: usize) -> Result<(), SynthError> {
    if text.trim().is_empty() {
        return Err(SynthError::InvalidInput("text must not be empty".to_string()));
    }
    let len = text.chars().count();
    if len > max_length {
        return Err(SynthError::InvalidInput(format!(
            "text length {len} exceeds maximum of {max_length}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_fill_missing_fields() {
        let params: SynthesisParams = serde_json::from_str(r#"{"speaker":"p225"}"#).unwrap();
        assert_eq!(params.speaker, "p225");
        assert_eq!(params.length_scale, 1.0);
        assert_eq!(params.max_decoder_steps, 2000);
    }

    #[test]
    fn request_without_params() {
        let req: SynthesisRequest = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(req.text, "hello");
        assert_eq!(req.params, SynthesisParams::default());
    }

    #[test]
    fn validate_rejects_blank() {
        assert!(matches!(validate_text("", 10), Err(SynthError::InvalidInput(_))));
        assert!(matches!(validate_text("   \n", 10), Err(SynthError::InvalidInput(_))));
    }

    #[test]
    fn validate_counts_chars_not_bytes() {
        // 5 CJK chars = 15 bytes
        assert!(validate_text("你好世界啊", 5).is_ok());
        assert!(validate_text("你好世界啊呀", 5).is_err());
    }

    #[test]
    fn validate_length_boundary() {
        let at_limit = "a".repeat(500);
        let over = "a".repeat(600);
        assert!(validate_text(&at_limit, 500).is_ok());
        let err = validate_text(&over, 500).unwrap_err();
        assert!(err.to_string().contains("600"));
    }

    #[test]
    fn preview_truncates() {
        let job = Job::new(
            JobId(7),
            SynthesisRequest::new("abcdefghij"),
            Duration::from_secs(1),
        );
        assert_eq!(job.preview(4), "abcd…");
        assert_eq!(job.preview(20), "abcdefghij");
        assert_eq!(job.id.to_string(), "job-7");
    }

    #[test]
    fn job_expires_at_deadline() {
        let job = Job::new(JobId(1), SynthesisRequest::new("x"), Duration::ZERO);
        assert!(job.is_expired());
        let job = Job::new(JobId(2), SynthesisRequest::new("x"), Duration::from_secs(60));
        assert!(!job.is_expired());
    }

    #[test]
    fn huge_timeout_saturates_deadline() {
        let job = Job::new(JobId(3), SynthesisRequest::new("x"), Duration::MAX);
        assert!(!job.is_expired());
        assert!(deadline_after(Duration::MAX) > Instant::now() + Duration::from_secs(3600));
        assert!(deadline_after(Duration::from_secs(u64::MAX)) > Instant::now());
    }
}
