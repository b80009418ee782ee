use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Token linking a request to its eventual reply.
///
/// Generated ids are UUID v4 strings; ids read off the wire are accepted verbatim.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_uuids() {
        let id = CorrelationId::generate();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_ne!(id, CorrelationId::generate());
    }

    #[test]
    fn test_wire_ids_round_trip_verbatim() {
        let id = CorrelationId::from("not-a-uuid");
        assert_eq!(id.as_str(), "not-a-uuid");
        assert_eq!(id.to_string(), "not-a-uuid");
        assert_eq!(format!("{id:?}"), "CorrelationId(not-a-uuid)");
    }
}
