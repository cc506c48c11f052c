use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-based stream identifiers.
const STREAM_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_4e7a_8c51_d2f0_3a9b_7e64);

/// Unique identifier for an aggregate instance (an event stream).
///
/// Random ids are time-ordered (UUID v7). Streams that must be unique per
/// natural key use [`AggregateId::derived`], so two writers racing to create
/// "the same" stream collide on its first version instead of creating two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new time-ordered aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Derives a stable stream ID from a stream kind and the ids that key it.
    pub fn derived(kind: &str, parts: &[Uuid]) -> Self {
        let mut name = Vec::with_capacity(kind.len() + parts.len() * 16);
        name.extend_from_slice(kind.as_bytes());
        for part in parts {
            name.extend_from_slice(part.as_bytes());
        }
        Self(Uuid::new_v5(&STREAM_NAMESPACE, &name))
    }

    /// Derives a stable stream ID from a stream kind and a string key.
    pub fn derived_from_key(kind: &str, key: &str) -> Self {
        let name = format!("{kind}/{key}");
        Self(Uuid::new_v5(&STREAM_NAMESPACE, name.as_bytes()))
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AggregateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a student, as issued by the authentication service.
    StudentId
);

entity_id!(
    /// Identifier of a course in the catalog.
    CourseId
);

entity_id!(
    /// Identifier of a lesson within a course.
    LessonId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_new_creates_unique_ids() {
        let id1 = AggregateId::new();
        let id2 = AggregateId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn new_aggregate_ids_are_time_ordered() {
        let id = AggregateId::new();
        assert_eq!(id.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn derived_ids_are_stable_per_key() {
        let student = StudentId::new();
        let course = CourseId::new();

        let a = AggregateId::derived("enrollment", &[student.as_uuid(), course.as_uuid()]);
        let b = AggregateId::derived("enrollment", &[student.as_uuid(), course.as_uuid()]);
        assert_eq!(a, b);
    }

    #[test]
    fn derived_ids_differ_by_kind_and_order() {
        let student = StudentId::new();
        let course = CourseId::new();

        let enrollment = AggregateId::derived("enrollment", &[student.as_uuid(), course.as_uuid()]);
        let certificate =
            AggregateId::derived("certificate", &[student.as_uuid(), course.as_uuid()]);
        let swapped = AggregateId::derived("enrollment", &[course.as_uuid(), student.as_uuid()]);

        assert_ne!(enrollment, certificate);
        assert_ne!(enrollment, swapped);
    }

    #[test]
    fn derived_from_key_is_stable() {
        let a = AggregateId::derived_from_key("certificate-id", "CERT-ABC");
        let b = AggregateId::derived_from_key("certificate-id", "CERT-ABC");
        let c = AggregateId::derived_from_key("certificate-id", "CERT-ABD");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn aggregate_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = AggregateId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn entity_ids_parse_from_strings() {
        let id = LessonId::new();
        let parsed: LessonId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<CourseId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let id = StudentId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let back: StudentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
