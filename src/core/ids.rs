// File: src/core/ids.rs

//! Identifier types for conversations, messages and users.
//!
//! Ids are opaque strings on the wire: callers may supply their own message
//! ids, and user ids come from the session layer. Ids generated by this crate
//! are UUIDs rendered in hyphenated form.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: generated ids use `UUIDv7` for better insert locality.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Generate a fresh id string.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn generate_uuid() -> String {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7().to_string()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4().to_string()
    }
}

/// Declare a string-backed id newtype with a consistent API.
macro_rules! define_text_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a new identifier.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(generate_uuid())
            }

            /// Borrow the id as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Extract the underlying string.
            #[inline]
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }

            /// Whether the id is empty or whitespace-only.
            #[inline]
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                String::column_result(value).map(Self)
            }
        }
    };
}

define_text_id!(
    /// Stable user identifier handed over by the session layer.
    UserId
);

define_text_id!(
    /// Conversation identifier. A new conversation takes the id of its first answer.
    ConversationId
);

define_text_id!(
    /// Message node identifier, immutable once stored.
    MessageId
);

impl From<MessageId> for ConversationId {
    fn from(value: MessageId) -> Self {
        Self(value.0)
    }
}

/// Deserialize an optional id, treating `""` and whitespace as absent.
///
/// # Errors
/// Returns an error if the value is neither a string nor null.
pub fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|raw| !raw.trim().is_empty())
        .map(T::from))
}
