//! Stable identities for columns, rows and events
//!
//! Identities are UUIDs rendered as strings. They are opaque to callers: the
//! row-dict and columnar boundaries only ever expose names.
//!
//! Ids minted while an event executes are v5 UUIDs derived from the event's
//! id, its version and a running counter, so replaying a log reproduces every
//! id the live store handed out. Ids minted outside an event are random.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
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

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identity of a column's backing data, independent of its display name
    ColumnId
);

opaque_id!(
    /// Identity of a row, independent of its position
    RowId
);

/// Namespace for ids derived from events
const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6c0f_5a1e_93d4_4b7e_8f21_0c5d_7e3a_b942);

/// Source of new column and row ids
#[derive(Debug, Clone, Default)]
pub struct IdMinter {
    scope: Option<String>,
    counter: u64,
}

impl IdMinter {
    /// Minter whose ids are a pure function of the event and draw order
    pub fn for_event(event_id: &str, version: u64) -> Self {
        Self {
            scope: Some(format!("{event_id}/{version}")),
            counter: 0,
        }
    }

    pub fn column_id(&mut self) -> ColumnId {
        ColumnId(self.next())
    }

    pub fn row_id(&mut self) -> RowId {
        RowId(self.next())
    }

    pub fn row_ids(&mut self, n: usize) -> Vec<RowId> {
        (0..n).map(|_| self.row_id()).collect()
    }

    fn next(&mut self) -> String {
        match &self.scope {
            Some(scope) => {
                let name = format!("{scope}/{}", self.counter);
                self.counter += 1;
                Uuid::new_v5(&EVENT_NAMESPACE, name.as_bytes()).to_string()
            }
            None => Uuid::new_v4().to_string(),
        }
    }
}

/// Fresh id for an event record
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<RowId> = IdMinter::default().row_ids(1000).into_iter().collect();
        assert_eq!(ids.len(), 1000);
        let mut minter = IdMinter::default();
        assert_ne!(minter.column_id(), minter.column_id());
    }

    #[test]
    fn test_event_scoped_ids_are_reproducible() {
        let mut first = IdMinter::for_event("e-1", 3);
        let mut second = IdMinter::for_event("e-1", 3);
        assert_eq!(first.column_id(), second.column_id());
        assert_eq!(first.row_ids(50), second.row_ids(50));

        let ids: HashSet<RowId> = IdMinter::for_event("e-1", 3).row_ids(1000).into_iter().collect();
        assert_eq!(ids.len(), 1000);
        assert_ne!(
            IdMinter::for_event("e-1", 3).row_id(),
            IdMinter::for_event("e-1", 4).row_id()
        );
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = ColumnId::from("c-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-1\"");
        let back: ColumnId = serde_json::from_str("\"c-1\"").unwrap();
        assert_eq!(back, id);
    }
}
