use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};
use uuid::Uuid;

/// Identifier of a conversation record in the primary store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct RecordId(String);

/// Vector-store point key derived from a [`RecordId`].
///
/// Vector stores only accept unsigned integers or UUIDs as keys, so every
/// record id is normalized into one of these shapes before it reaches the
/// index client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

/// How a [`RecordId`] was mapped onto a [`PointId`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedId {
    /// All-digit id, used as a numeric key.
    Numeric(u64),
    /// Id that already is a UUID.
    Uuid(Uuid),
    /// Opaque id (e.g. a 24-hex document id), mapped to a name-based UUID.
    Derived(Uuid),
}

impl NormalizedId {
    pub fn point_id(&self) -> PointId {
        match self {
            NormalizedId::Numeric(n) => PointId::Num(*n),
            NormalizedId::Uuid(u) | NormalizedId::Derived(u) => {
                PointId::Uuid(u.hyphenated().to_string())
            }
        }
    }
}

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Map the raw id onto a point key. Only the canonical spelling of a
    /// number or a UUID keeps its natural key, so two distinct record ids
    /// never share a point.
    pub fn normalize(&self) -> NormalizedId {
        let raw = self.0.as_str();

        if let Ok(n) = raw.parse::<u64>() {
            if n.to_string() == raw {
                return NormalizedId::Numeric(n);
            }
        }

        if let Ok(uuid) = Uuid::parse_str(raw) {
            if uuid.hyphenated().to_string() == raw {
                return NormalizedId::Uuid(uuid);
            }
        }

        NormalizedId::Derived(Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes()))
    }

    pub fn point_id(&self) -> PointId {
        self.normalize().point_id()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{n}"),
            PointId::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl FromStr for RecordId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RecordId(s.to_string()))
    }
}

impl Deref for RecordId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(fr: &str) -> Self {
        RecordId(fr.to_string())
    }
}

impl From<String> for RecordId {
    fn from(fr: String) -> Self {
        RecordId(fr)
    }
}

impl From<RecordId> for String {
    fn from(fr: RecordId) -> Self {
        fr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id() {
        let id = RecordId::from("42");
        assert_eq!(id.normalize(), NormalizedId::Numeric(42));
        assert_eq!(id.point_id(), PointId::Num(42));
    }

    #[test]
    fn test_uuid_id_kept() {
        let raw = "6f1c1f2e-3b4a-4c5d-8e9f-0a1b2c3d4e5f";
        let id = RecordId::from(raw);
        assert!(matches!(id.normalize(), NormalizedId::Uuid(_)));
        assert_eq!(id.point_id(), PointId::Uuid(raw.to_string()));
    }

    #[test]
    fn test_opaque_id_derived_deterministically() {
        let id = RecordId::from("65a1b2c3d4e5f6a7b8c9d0e1");
        let first = id.point_id();
        let second = RecordId::from("65a1b2c3d4e5f6a7b8c9d0e1").point_id();

        assert!(matches!(id.normalize(), NormalizedId::Derived(_)));
        assert_eq!(first, second);
        assert_ne!(first, RecordId::from("65a1b2c3d4e5f6a7b8c9d0e2").point_id());
    }

    #[test]
    fn test_overflowing_digits_are_derived() {
        let id = RecordId::from("99999999999999999999999");
        assert!(matches!(id.normalize(), NormalizedId::Derived(_)));
    }

    #[test]
    fn test_non_canonical_numbers_get_their_own_point() {
        let canonical = RecordId::from("7").point_id();
        for raw in ["07", "007", "+7", " 7", "7 "] {
            let id = RecordId::from(raw);
            assert!(matches!(id.normalize(), NormalizedId::Derived(_)), "{raw:?}");
            assert_ne!(id.point_id(), canonical, "{raw:?}");
        }
        assert_ne!(
            RecordId::from("07").point_id(),
            RecordId::from("007").point_id()
        );
    }

    #[test]
    fn test_whitespace_is_significant() {
        assert_ne!(
            RecordId::from(" abc").point_id(),
            RecordId::from("abc").point_id()
        );
    }

    #[test]
    fn test_uuid_spellings_get_their_own_point() {
        let hyphenated = "6f1c1f2e-3b4a-4c5d-8e9f-0a1b2c3d4e5f";
        let canonical = RecordId::from(hyphenated).point_id();

        for raw in [
            "6f1c1f2e3b4a4c5d8e9f0a1b2c3d4e5f",
            "{6f1c1f2e-3b4a-4c5d-8e9f-0a1b2c3d4e5f}",
            "urn:uuid:6f1c1f2e-3b4a-4c5d-8e9f-0a1b2c3d4e5f",
            "6F1C1F2E-3B4A-4C5D-8E9F-0A1B2C3D4E5F",
        ] {
            let id = RecordId::from(raw);
            assert!(matches!(id.normalize(), NormalizedId::Derived(_)), "{raw}");
            assert_ne!(id.point_id(), canonical, "{raw}");
        }
    }

    #[test]
    fn test_point_id_serde_shape() {
        assert_eq!(serde_json::to_string(&PointId::Num(7)).unwrap(), "7");
        let parsed: PointId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed, PointId::Uuid("abc".to_string()));
    }
}
