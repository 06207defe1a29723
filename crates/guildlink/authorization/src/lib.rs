//! Guildlink Authorization - per-guild membership, suspension, and permissions
//!
//! Each guild owns one `GuildAuthorization` instance holding a role -> members
//! index and a device-keyed suspension index behind a single read/write lock.
//! The indexes are reconciled incrementally from the externally supplied
//! authoritative role list; readers observe either the pre- or post-update
//! state, never a half-applied one.

#![deny(unsafe_code)]

mod config;
mod registry;

pub use config::{GuildConfig, RoleMap};
pub use registry::AuthorizationRegistry;

use guildlink_types::{AccountId, DeviceId, GuildId, GuildPermissions, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// Authorization cache failures.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// A guild's cache lock was poisoned by a panicking writer.
    #[error("authorization cache lock poisoned")]
    LockPoisoned,
}

impl From<AuthorizationError> for guildlink_types::LinkError {
    fn from(err: AuthorizationError) -> Self {
        guildlink_types::LinkError::Internal(err.to_string())
    }
}

/// Read access to one account's identity as reconciliation needs it: its
/// identifier and the device identities it currently owns.
pub trait AccountProfile {
    fn account_id(&self) -> AccountId;
    fn devices(&self) -> &[DeviceId];
}

/// A plain owned snapshot of an account's identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub devices: Vec<DeviceId>,
}

impl AccountProfile for AccountSnapshot {
    fn account_id(&self) -> AccountId {
        self.account_id
    }

    fn devices(&self) -> &[DeviceId] {
        &self.devices
    }
}

/// The mutable per-guild indexes. Guarded by the instance's lock; no empty
/// role entries are kept.
#[derive(Debug, Default)]
struct AuthState {
    role_cache: HashMap<RoleId, HashSet<AccountId>>,
    suspended_devices: HashMap<DeviceId, AccountId>,
}

impl AuthState {
    fn has_role(&self, account: &AccountId, role: &RoleId) -> bool {
        self.role_cache
            .get(role)
            .is_some_and(|members| members.contains(account))
    }
}

/// One guild's authorization cache.
pub struct GuildAuthorization {
    config: GuildConfig,
    state: RwLock<AuthState>,
}

impl GuildAuthorization {
    pub fn new(config: GuildConfig) -> Self {
        Self {
            config,
            state: RwLock::new(AuthState::default()),
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.config.guild_id
    }

    pub fn config(&self) -> &GuildConfig {
        &self.config
    }

    /// Reconciles one account's membership against the authoritative role
    /// list and re-derives its suspension entries, all under the write lock.
    ///
    /// Roles outside the guild's configured vocabulary are ignored. Returns
    /// whether any index mutation occurred, so callers can skip a
    /// persistence write when nothing changed.
    pub fn reconcile_roles(
        &self,
        profile: &dyn AccountProfile,
        roles: &[RoleId],
    ) -> Result<bool, AuthorizationError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| AuthorizationError::LockPoisoned)?;

        let account = profile.account_id();
        let mut changed = false;

        let known = self.config.role_map.as_set();
        let relevant: HashSet<&RoleId> = roles.iter().filter(|role| known.contains(role)).collect();

        for role in self.config.role_map.iter() {
            let should_have = relevant.contains(role);
            let has = state.has_role(&account, role);

            if should_have && !has {
                state
                    .role_cache
                    .entry(role.clone())
                    .or_default()
                    .insert(account);
                changed = true;
            } else if !should_have && has {
                let emptied = match state.role_cache.get_mut(role) {
                    Some(members) => {
                        if members.remove(&account) {
                            changed = true;
                            members.is_empty()
                        } else {
                            false
                        }
                    }
                    None => false,
                };
                if emptied {
                    state.role_cache.remove(role);
                }
            }
        }

        // Keep the device-keyed suspension index in lock-step with the role
        // cache for this account's devices.
        let suspended = state.has_role(&account, &self.config.role_map.suspended);
        if suspended {
            for device in profile.devices() {
                if state.suspended_devices.insert(*device, account) != Some(account) {
                    changed = true;
                }
            }
        } else {
            for device in profile.devices() {
                if state.suspended_devices.remove(device).is_some() {
                    changed = true;
                }
            }
        }

        debug!(
            guild = %self.config.guild_id,
            account = %account,
            changed,
            "guild membership reconciled"
        );

        Ok(changed)
    }

    /// Whether the account currently holds `role`. Absent roles read as
    /// false; there is no distinction between "never seen" and "removed".
    pub fn has_role(&self, account: &AccountId, role: &RoleId) -> Result<bool, AuthorizationError> {
        let state = self
            .state
            .read()
            .map_err(|_| AuthorizationError::LockPoisoned)?;
        Ok(state.has_role(account, role))
    }

    /// Whether the account is suspended in this guild.
    ///
    /// The role check is authoritative. A device listed in the suspension
    /// index whose owner no longer holds the role is a stale cache
    /// disagreement and resolves to "not suspended".
    pub fn is_suspended(
        &self,
        account: &AccountId,
        device: Option<&DeviceId>,
    ) -> Result<bool, AuthorizationError> {
        let state = self
            .state
            .read()
            .map_err(|_| AuthorizationError::LockPoisoned)?;

        if state.has_role(account, &self.config.role_map.suspended) {
            return Ok(true);
        }
        if let Some(device) = device {
            if state.suspended_devices.contains_key(device) {
                // Corroborating evidence only; the role remains authoritative.
                return Ok(state.has_role(account, &self.config.role_map.suspended));
            }
        }
        Ok(false)
    }

    /// Packs every named predicate for the account into the fixed-order
    /// permission bitset. Pure with respect to the cache: two calls without
    /// an intervening reconcile yield identical results.
    pub fn permissions(
        &self,
        account: &AccountId,
        device: Option<&DeviceId>,
    ) -> Result<GuildPermissions, AuthorizationError> {
        Ok(GuildPermissions {
            is_allowed_matchmaking: self.is_allowed_matchmaking(account)?,
            is_enforcer: self.is_enforcer(account)?,
            is_auditor: self.is_auditor(account)?,
            is_server_host: self.is_server_host(account)?,
            is_allocator: self.is_allocator(account)?,
            is_suspended: self.is_suspended(account, device)?,
            is_limited_access: self.is_limited_access(account)?,
            is_api_access: self.is_api_access(account)?,
            is_account_age_bypass: self.is_account_age_bypass(account)?,
            is_vpn_bypass: self.is_vpn_bypass(account)?,
        })
    }

    pub fn is_owner(&self, account: &AccountId) -> bool {
        self.config.owner == *account
    }

    pub fn is_member(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.member)
    }

    /// Enforcer status, overridden to false for accounts on the guild's
    /// negation list regardless of the role cache.
    pub fn is_enforcer(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        if self.config.negated_enforcer_ids.contains(account) {
            return Ok(false);
        }
        self.has_role(account, &self.config.role_map.enforcer)
    }

    /// Auditor status, subject to the same negation list as enforcers.
    pub fn is_auditor(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        if self.config.negated_enforcer_ids.contains(account) {
            return Ok(false);
        }
        self.has_role(account, &self.config.role_map.auditor)
    }

    pub fn is_server_host(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.server_host)
    }

    pub fn is_allocator(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.allocator)
    }

    pub fn is_limited_access(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.limited_access)
    }

    pub fn is_api_access(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.api_access)
    }

    pub fn is_account_age_bypass(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.account_age_bypass)
    }

    pub fn is_vpn_bypass(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        self.has_role(account, &self.config.role_map.vpn_bypass)
    }

    /// Open guilds allow everyone; members-only guilds require the member
    /// role.
    pub fn is_allowed_matchmaking(&self, account: &AccountId) -> Result<bool, AuthorizationError> {
        if !self.config.members_only_matchmaking {
            return Ok(true);
        }
        self.is_member(account)
    }
}
