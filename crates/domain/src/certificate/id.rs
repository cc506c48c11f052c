use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREFIX: &str = "CERT-";

/// Public, guess-resistant certificate identifier, e.g. `CERT-0192F3...`.
///
/// The suffix is a time-ordered UUID, so ids sort by issue time while still
/// carrying 74 random bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    pub fn generate() -> Self {
        let suffix = Uuid::now_v7().simple().to_string().to_uppercase();
        Self(format!("{PREFIX}{suffix}"))
    }

    /// Wraps an id received from a caller. Returns None if it is not
    /// shaped like a certificate id.
    pub fn parse(value: &str) -> Option<Self> {
        let suffix = value.strip_prefix(PREFIX)?;
        let well_formed = !suffix.is_empty()
            && suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        well_formed.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CertificateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CertificateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
