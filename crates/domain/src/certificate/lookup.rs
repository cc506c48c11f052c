use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};

use super::{CertificateError, CertificateId};

/// Maps a public certificate id to the certificate stream it names.
///
/// Written in the same batch as the certificate itself, so every
/// resolvable id points at an issued certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateLookup {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    certificate_id: Option<CertificateId>,
    certificate_stream: Option<AggregateId>,
    registered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CertificateLookupEvent {
    CertificateRegistered(CertificateRegisteredData),
}

impl DomainEvent for CertificateLookupEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CertificateLookupEvent::CertificateRegistered(_) => "CertificateRegistered",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRegisteredData {
    pub certificate_id: CertificateId,
    pub certificate_stream: AggregateId,
    pub registered_at: DateTime<Utc>,
}

impl Aggregate for CertificateLookup {
    type Event = CertificateLookupEvent;
    type Error = CertificateError;

    fn aggregate_type() -> &'static str {
        "CertificateLookup"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CertificateLookupEvent::CertificateRegistered(data) => {
                self.id = Some(Self::stream_id(&data.certificate_id));
                self.certificate_id = Some(data.certificate_id);
                self.certificate_stream = Some(data.certificate_stream);
                self.registered_at = Some(data.registered_at);
            }
        }
    }
}

impl CertificateLookup {
    pub fn stream_id(certificate_id: &CertificateId) -> AggregateId {
        AggregateId::derived_from_key("certificate-id", certificate_id.as_str())
    }

    pub fn certificate_stream(&self) -> Option<AggregateId> {
        self.certificate_stream
    }

    pub fn register(
        &self,
        certificate_id: &CertificateId,
        certificate_stream: AggregateId,
    ) -> Result<Vec<CertificateLookupEvent>, CertificateError> {
        if self.id.is_some() {
            return Err(CertificateError::AlreadyRegistered);
        }

        Ok(vec![CertificateLookupEvent::CertificateRegistered(
            CertificateRegisteredData {
                certificate_id: certificate_id.clone(),
                certificate_stream,
                registered_at: Utc::now(),
            },
        )])
    }
}
