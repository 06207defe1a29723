//! Guildlink Types - shared identifier and permission vocabulary
//!
//! Every other guildlink crate builds on these types. Identifiers are
//! newtypes so that an account, a device, a guild, and a role can never be
//! confused at a call site.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A 128-bit account identifier, globally unique and immutable once assigned.
///
/// The all-zero (nil) value is the sentinel for "no account" and is never
/// produced by the snowflake encoding, whose marker bits are always set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// The sentinel "absent" identifier.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// An opaque platform-issued device identity (XPID).
///
/// A device binds to exactly one account at a time; an account may own many
/// devices. The canonical text form is `<platform>-<number>`, which is also
/// the serde representation so device identities can key JSON maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub platform_code: u64,
    pub number: u64,
}

impl DeviceId {
    pub fn new(platform_code: u64, number: u64) -> Self {
        Self {
            platform_code,
            number,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform_code, self.number)
    }
}

impl FromStr for DeviceId {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (platform, number) = s
            .split_once('-')
            .ok_or_else(|| LinkError::InvalidInput(format!("malformed device identity: {s}")))?;
        let platform_code = platform
            .parse::<u64>()
            .map_err(|_| LinkError::InvalidInput(format!("malformed device platform: {s}")))?;
        let number = number
            .parse::<u64>()
            .map_err(|_| LinkError::InvalidInput(format!("malformed device number: {s}")))?;
        Ok(Self {
            platform_code,
            number,
        })
    }
}

impl Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of one community/tenant scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub String);

impl GuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one role within a guild's configured vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Guild-scoped capability summary for one account, packed into a `u64`.
///
/// The bit positions are a stable contract: values are stored and
/// transmitted, so reordering the fields changes the meaning of existing
/// data. Bit 0 is `is_allowed_matchmaking`, bit 9 is `is_vpn_bypass`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPermissions {
    pub is_allowed_matchmaking: bool,
    pub is_enforcer: bool,
    pub is_auditor: bool,
    pub is_server_host: bool,
    pub is_allocator: bool,
    pub is_suspended: bool,
    pub is_limited_access: bool,
    pub is_api_access: bool,
    pub is_account_age_bypass: bool,
    pub is_vpn_bypass: bool,
}

impl GuildPermissions {
    /// Declared bit order, least significant bit first.
    fn flags(&self) -> [bool; 10] {
        [
            self.is_allowed_matchmaking,
            self.is_enforcer,
            self.is_auditor,
            self.is_server_host,
            self.is_allocator,
            self.is_suspended,
            self.is_limited_access,
            self.is_api_access,
            self.is_account_age_bypass,
            self.is_vpn_bypass,
        ]
    }

    pub fn to_bits(&self) -> u64 {
        self.flags()
            .iter()
            .enumerate()
            .fold(0u64, |bits, (i, &set)| if set { bits | 1 << i } else { bits })
    }

    pub fn from_bits(bits: u64) -> Self {
        let bit = |i: u64| bits & (1 << i) != 0;
        Self {
            is_allowed_matchmaking: bit(0),
            is_enforcer: bit(1),
            is_auditor: bit(2),
            is_server_host: bit(3),
            is_allocator: bit(4),
            is_suspended: bit(5),
            is_limited_access: bit(6),
            is_api_access: bit(7),
            is_account_age_bypass: bit(8),
            is_vpn_bypass: bit(9),
        }
    }
}

/// Workspace-wide error vocabulary.
///
/// `NotFound` and `AlreadyLinked` are caller-correctable conditions; the
/// presentation layer chooses a different message for each. `Internal`
/// covers collaborator (storage/network) failures.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Pairing code unknown, expired, or already consumed; or an account or
    /// record is absent.
    #[error("not found")]
    NotFound,

    /// The device is already bound to a different account. Never
    /// auto-resolved; the caller must disambiguate.
    #[error("device {device} is already linked to account {owner}")]
    AlreadyLinked { device: DeviceId, owner: AccountId },

    /// Malformed input (bad identifier text, wrong code length/alphabet).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Storage or network collaborator failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LinkError {
    /// Whether the caller can correct this failure themselves (as opposed
    /// to a system fault worth alerting on).
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            LinkError::NotFound | LinkError::AlreadyLinked { .. } | LinkError::InvalidInput(_)
        )
    }
}

/// Result alias for linking operations.
pub type LinkResult<T> = Result<T, LinkError>;
