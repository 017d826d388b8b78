//! Strongly typed identifiers.
//!
//! Every reference between records goes through one of these newtypes. Cart
//! lines and order lines reference items by [`ItemId`], never by display name,
//! so renaming an item in the catalog cannot detach it from existing carts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an identifier from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0:?}")]
pub struct ParseIdError(String);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a trusted identifier without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the inner string value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError(s.to_string()));
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Stable, opaque identifier of a catalog item.
    ItemId
);

string_id!(
    /// Identifier of an order. Also used as the idempotency key of a commit.
    OrderId
);

string_id!(
    /// Identifier of a signed-in user, as issued by the identity provider.
    UserId
);
