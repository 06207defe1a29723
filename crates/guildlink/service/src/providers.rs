//! Collaborator seams for the linking orchestrator.
//!
//! The identity provider fronts the third-party exchange (OAuth and its
//! HTTP traffic live behind it); the account directory fronts the durable
//! device-binding and membership tables. In-memory implementations are
//! provided for tests and single-process wiring.

use async_trait::async_trait;
use guildlink_codec::encode_snowflake_str;
use guildlink_types::{AccountId, DeviceId, GuildId, LinkError, LinkResult, RoleId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// The account an external identity resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub account_id: AccountId,
    pub username: String,
    /// Whether this call created the account.
    pub created: bool,
}

/// Third-party identity exchange.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves an external identifier to its owning account, creating the
    /// account when permitted. `NotFound` when the account is absent and
    /// creation is not allowed.
    async fn resolve_or_create(
        &self,
        external_id: &str,
        allow_create: bool,
    ) -> LinkResult<ResolvedAccount>;

    /// The authoritative role list for this external identity within one
    /// guild, as currently reported by the identity source.
    async fn member_roles(&self, external_id: &str, guild_id: &GuildId) -> LinkResult<Vec<RoleId>>;
}

/// Durable device-binding and guild-membership tables.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Binds a device to an account. Re-binding to the same account is a
    /// no-op; binding a device owned by a different account fails with
    /// `AlreadyLinked` naming the existing owner.
    async fn bind_device(&self, account: AccountId, device: &DeviceId) -> LinkResult<()>;

    /// Removes a binding. `NotFound` when the device is not bound to this
    /// account.
    async fn unbind_device(&self, account: AccountId, device: &DeviceId) -> LinkResult<()>;

    async fn owner_of(&self, device: &DeviceId) -> LinkResult<Option<AccountId>>;

    async fn devices_of(&self, account: AccountId) -> LinkResult<Vec<DeviceId>>;

    /// Adds the account to the guild's member list. Idempotent.
    async fn add_guild_member(&self, guild_id: &GuildId, account: AccountId) -> LinkResult<()>;
}

/// Identity provider that derives accounts from the snowflake encoding,
/// with per-guild role lists configured up front.
#[derive(Default)]
pub struct StaticIdentityProvider {
    known: Mutex<HashSet<String>>,
    usernames: Mutex<HashMap<String, String>>,
    roles: Mutex<HashMap<(String, GuildId), Vec<RoleId>>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the role list this provider reports for an external identity in
    /// one guild.
    pub fn set_member_roles(&self, external_id: &str, guild_id: GuildId, roles: Vec<RoleId>) {
        if let Ok(mut map) = self.roles.lock() {
            map.insert((external_id.to_owned(), guild_id), roles);
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve_or_create(
        &self,
        external_id: &str,
        allow_create: bool,
    ) -> LinkResult<ResolvedAccount> {
        let account_id = encode_snowflake_str(external_id)?;

        let mut known = self
            .known
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        let exists = known.contains(external_id);
        if !exists && !allow_create {
            return Err(LinkError::NotFound);
        }
        if !exists {
            known.insert(external_id.to_owned());
        }

        let username = self
            .usernames
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?
            .entry(external_id.to_owned())
            .or_insert_with(|| format!("user-{}", external_id.trim()))
            .clone();

        Ok(ResolvedAccount {
            account_id,
            username,
            created: !exists,
        })
    }

    async fn member_roles(&self, external_id: &str, guild_id: &GuildId) -> LinkResult<Vec<RoleId>> {
        let roles = self
            .roles
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        Ok(roles
            .get(&(external_id.to_owned(), guild_id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory account directory.
#[derive(Default)]
pub struct MemoryDirectory {
    bindings: Mutex<HashMap<DeviceId, AccountId>>,
    memberships: Mutex<HashSet<(GuildId, AccountId)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_guild_member(&self, guild_id: &GuildId, account: AccountId) -> bool {
        self.memberships
            .lock()
            .map(|members| members.contains(&(guild_id.clone(), account)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl AccountDirectory for MemoryDirectory {
    async fn bind_device(&self, account: AccountId, device: &DeviceId) -> LinkResult<()> {
        let mut bindings = self
            .bindings
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        match bindings.get(device) {
            Some(owner) if *owner != account => Err(LinkError::AlreadyLinked {
                device: *device,
                owner: *owner,
            }),
            _ => {
                bindings.insert(*device, account);
                Ok(())
            }
        }
    }

    async fn unbind_device(&self, account: AccountId, device: &DeviceId) -> LinkResult<()> {
        let mut bindings = self
            .bindings
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        match bindings.get(device) {
            Some(owner) if *owner == account => {
                bindings.remove(device);
                Ok(())
            }
            _ => Err(LinkError::NotFound),
        }
    }

    async fn owner_of(&self, device: &DeviceId) -> LinkResult<Option<AccountId>> {
        let bindings = self
            .bindings
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        Ok(bindings.get(device).copied())
    }

    async fn devices_of(&self, account: AccountId) -> LinkResult<Vec<DeviceId>> {
        let bindings = self
            .bindings
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        let mut devices: Vec<DeviceId> = bindings
            .iter()
            .filter(|(_, owner)| **owner == account)
            .map(|(device, _)| *device)
            .collect();
        devices.sort();
        Ok(devices)
    }

    async fn add_guild_member(&self, guild_id: &GuildId, account: AccountId) -> LinkResult<()> {
        let mut memberships = self
            .memberships
            .lock()
            .map_err(|e| LinkError::Internal(e.to_string()))?;
        memberships.insert((guild_id.clone(), account));
        Ok(())
    }
}
