//! Document id types and deterministic id derivation
//!
//! Every persisted document carries an opaque string id unique within its
//! collection. Ids for feed-derived documents are computed from the parent
//! id plus the feed-native external id with a one-way hash, so the same
//! external key always maps to the same internal id within the same parent
//! scope. A rename on the feed side therefore allocates a fresh id; ids are
//! never reused for a different parent.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a derived document id in hex characters.
///
/// 17 hex chars (68 bits) keeps ids short enough to read in logs while
/// making collisions within one installation implausible.
const DERIVED_ID_LEN: usize = 17;

/// Derive a deterministic document id from a parent scope and an external id.
pub fn derive_doc_id(parent: &str, external_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update(b"_");
    hasher.update(external_id.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(DERIVED_ID_LEN);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
        if hex.len() >= DERIVED_ID_LEN {
            break;
        }
    }
    hex.truncate(DERIVED_ID_LEN);
    hex
}

macro_rules! doc_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

doc_id!(
    /// Id of a Rundown document
    RundownId
);
doc_id!(
    /// Id of a Segment document
    SegmentId
);
doc_id!(
    /// Id of a Part document
    PartId
);
doc_id!(
    /// Id of a Piece document
    PieceId
);
doc_id!(
    /// Id of a PartInstance document
    PartInstanceId
);
doc_id!(
    /// Id of a RundownPlaylist document
    PlaylistId
);
doc_id!(
    /// Activation epoch of a playlist; non-null while on-air
    ActivationId
);
doc_id!(
    /// Id of an ingest data cache row
    IngestRowId
);

impl RundownId {
    /// Rundowns are roots of an ingest scope: derived from the external id alone.
    pub fn from_external(external_id: &str) -> Self {
        Self(derive_doc_id("rundown", external_id))
    }
}

impl PlaylistId {
    pub fn from_external(external_id: &str) -> Self {
        Self(derive_doc_id("playlist", external_id))
    }
}

impl SegmentId {
    pub fn derive(rundown_id: &RundownId, external_id: &str) -> Self {
        Self(derive_doc_id(rundown_id.as_str(), external_id))
    }
}

impl PartId {
    pub fn derive(rundown_id: &RundownId, external_id: &str) -> Self {
        Self(derive_doc_id(rundown_id.as_str(), external_id))
    }
}

impl PieceId {
    pub fn derive(part_id: &PartId, external_id: &str) -> Self {
        Self(derive_doc_id(part_id.as_str(), external_id))
    }
}

impl PartInstanceId {
    /// Instances are scoped per activation epoch so re-activating a playlist
    /// never resurrects ids from a previous show.
    pub fn derive(activation_id: &ActivationId, part_id: &PartId) -> Self {
        Self(derive_doc_id(activation_id.as_str(), part_id.as_str()))
    }
}

impl IngestRowId {
    pub fn derive(rundown_id: &RundownId, scope: &str) -> Self {
        Self(derive_doc_id(rundown_id.as_str(), scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_doc_id_deterministic() {
        let a = derive_doc_id("parent", "story_1");
        let b = derive_doc_id("parent", "story_1");
        assert_eq!(a, b);
        assert_eq!(a.len(), DERIVED_ID_LEN);
    }

    #[test]
    fn test_derive_doc_id_scoped_by_parent() {
        let a = derive_doc_id("rundown_a", "story_1");
        let b = derive_doc_id("rundown_b", "story_1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_doc_id_distinct_external_ids() {
        let a = derive_doc_id("parent", "story_1");
        let b = derive_doc_id("parent", "story_2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_segment_id_stable_across_calls() {
        let rundown = RundownId::from_external("RO1");
        assert_eq!(
            SegmentId::derive(&rundown, "SEG-A"),
            SegmentId::derive(&rundown, "SEG-A")
        );
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = PartId::new("abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");
        let back: PartId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
