use crate::AggregateId;

/// Filter over the global event log.
///
/// Results come back in log order. Every filter that is set must match.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<AggregateId>,

    pub aggregate_type: Option<String>,

    /// Match any of these event types.
    pub event_types: Option<Vec<String>>,

    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific aggregate.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Adds an event type to the set of accepted types.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types
            .get_or_insert_with(Vec::new)
            .push(event_type.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if an event with these coordinates passes every filter.
    pub fn matches(&self, aggregate_id: AggregateId, aggregate_type: &str, event_type: &str) -> bool {
        if let Some(id) = self.aggregate_id
            && id != aggregate_id
        {
            return false;
        }
        if let Some(ref wanted) = self.aggregate_type
            && wanted != aggregate_type
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.iter().any(|t| t == event_type)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_accumulates() {
        let query = EventQuery::new()
            .event_type("EnrollmentCompleted")
            .event_type("EnrollmentCancelled");

        assert_eq!(
            query.event_types,
            Some(vec![
                "EnrollmentCompleted".to_string(),
                "EnrollmentCancelled".to_string()
            ])
        );
    }

    #[test]
    fn matches_applies_every_filter() {
        let id = AggregateId::new();
        let query = EventQuery::for_aggregate(id)
            .aggregate_type("Certificate")
            .event_type("CertificateIssued");

        assert!(query.matches(id, "Certificate", "CertificateIssued"));
        assert!(!query.matches(AggregateId::new(), "Certificate", "CertificateIssued"));
        assert!(!query.matches(id, "Enrollment", "CertificateIssued"));
        assert!(!query.matches(id, "Certificate", "CertificateRevoked"));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(EventQuery::new().matches(AggregateId::new(), "Enrollment", "LessonCompleted"));
    }
}
