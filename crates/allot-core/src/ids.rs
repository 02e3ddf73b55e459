//! Branded ID newtypes.
//!
//! Module ids, context window type ids, session ids and content handles are
//! all strings on the wire. Wrapping each in its own newtype keeps a module id
//! from being passed where a type id is expected.
//!
//! Module ids are stable names (`system_prompt`, `tool_definitions`, ...).
//! Type ids are chosen by whoever authors the type. Session ids are UUID v7
//! (time-ordered) when generated locally.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Name of a content module (`system_prompt`, `conversation_history`, ...).
    ModuleId
}

branded_id! {
    /// Unique identifier for a Context Window Type record.
    WindowTypeId
}

branded_id! {
    /// Unique identifier for a conversation session.
    SessionId
}

branded_id! {
    /// Opaque reference to a module's content, handed to the condenser.
    ContentHandle
}

impl SessionId {
    /// Create a new random session ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_new_is_uuid_v7() {
        let id = SessionId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(SessionId::default(), SessionId::default());
    }

    #[test]
    fn module_id_from_str_ref() {
        let id = ModuleId::from("tool_definitions");
        assert_eq!(id.as_str(), "tool_definitions");
        assert_eq!(format!("{id}"), "tool_definitions");
    }

    #[test]
    fn module_ids_order_by_name() {
        let mut ids = vec![
            ModuleId::from("tool_definitions"),
            ModuleId::from("conversation_history"),
            ModuleId::from("system_prompt"),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(ModuleId::as_str).collect();
        assert_eq!(
            names,
            ["conversation_history", "system_prompt", "tool_definitions"]
        );
    }

    #[test]
    fn deref_to_str() {
        let id = ContentHandle::from("doc://42");
        let s: &str = &id;
        assert!(s.starts_with("doc://"));
    }

    #[test]
    fn serde_is_transparent() {
        let id = ModuleId::from("rag_cases");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"rag_cases\"");
        let back: ModuleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn into_string_and_inner() {
        let id = WindowTypeId::from("balanced");
        let s: String = id.clone().into();
        assert_eq!(s, "balanced");
        assert_eq!(id.into_inner(), "balanced");
    }
}
