//! Engine tuning knobs.

use std::time::Duration;

/// Runtime settings for the lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base of every certificate verification URL.
    pub public_base_url: String,

    /// UPI handle payments are made out to.
    pub upi_id: String,

    /// Longest a single render attempt may take.
    pub render_timeout: Duration,

    /// Failed render attempts before an artifact is marked failed.
    pub render_max_attempts: u32,

    /// Pause between automatic render attempts for the same certificate.
    pub render_retry_backoff: Duration,

    pub sweep_interval: Duration,

    /// Attempts per command when writers keep conflicting.
    pub command_retry_limit: u32,
}

impl EngineConfig {
    pub fn verification_url(&self, certificate_id: &str) -> String {
        format!(
            "{}/verify-certificate/{certificate_id}",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:5173".to_string(),
            upi_id: "elearning@upi".to_string(),
            render_timeout: Duration::from_secs(10),
            render_max_attempts: 5,
            render_retry_backoff: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
            command_retry_limit: 8,
        }
    }
}
