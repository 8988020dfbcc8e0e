//! Subject identity
//!
//! The engine keys each incoming stream by a `$`-prefixed identifier string
//! followed by a display name. The identifier is persistent for the lifetime
//! of a subject; idle and pre-encoding states share it.

use std::fmt;

/// Persistent subject identifier
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    /// Fresh random identifier
    pub fn generate() -> Self {
        SubjectId::new(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identifier, adding the `$` prefix if missing
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.starts_with('$') {
            SubjectId(id)
        } else {
            SubjectId(format!("${id}"))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subject({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subject identity: persistent id plus display name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
}

impl Subject {
    pub fn new(id: SubjectId, name: impl Into<String>) -> Self {
        Subject {
            id,
            name: name.into(),
        }
    }
}
