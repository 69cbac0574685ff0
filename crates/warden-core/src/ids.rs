// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opaque 64-bit identifier newtypes.
//!
//! Every id the gateway hands us is an opaque u64. The newtypes keep tenants,
//! users, channels, and messages from being confused at compile time; all are
//! serde-transparent so records round-trip as plain integers.

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_newtype!(
    /// A logically isolated chat-server instance; the unit of configuration
    /// and event ordering.
    TenantId
);
id_newtype!(
    /// A user account as reported by the gateway.
    UserId
);
id_newtype!(
    /// A channel within a tenant.
    ChannelId
);
id_newtype!(
    /// A message within a channel.
    MessageId
);
id_newtype!(
    /// A role within a tenant, ordered by hierarchy rank upstream.
    RoleId
);
id_newtype!(
    /// A custom emoji registered with a tenant.
    EmojiId
);

/// A `(channel, message)` pair, enough to address a message upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: MessageId,
}

/// The target entity a rate-counter observation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectId {
    User(UserId),
    Channel(ChannelId),
    Tenant,
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectId::User(u) => write!(f, "user:{u}"),
            SubjectId::Channel(c) => write!(f, "channel:{c}"),
            SubjectId::Tenant => write!(f, "tenant"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_serde_transparent() {
        let tenant = TenantId(42);
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "42");
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tenant);
    }

    #[test]
    fn distinct_id_types_do_not_compare() {
        // Compile-time property: TenantId(1) == UserId(1) must not typecheck.
        // Runtime check that the inner values still round-trip.
        assert_eq!(TenantId::from(7).0, 7);
        assert_eq!(UserId::from(7).0, 7);
    }

    #[test]
    fn subject_display_forms() {
        assert_eq!(SubjectId::User(UserId(5)).to_string(), "user:5");
        assert_eq!(SubjectId::Channel(ChannelId(9)).to_string(), "channel:9");
        assert_eq!(SubjectId::Tenant.to_string(), "tenant");
    }
}
