//! Guildlink Service - the device-linking use case
//!
//! Sequences the full linking flow: exchange the pairing code, resolve or
//! create the owning account, bind the device, record login history, and
//! reconcile guild membership. Everything durable or remote sits behind the
//! collaborator traits in [`providers`].

#![deny(unsafe_code)]

pub mod history;
pub mod providers;

use chrono::Utc;
use guildlink_authorization::{AccountSnapshot, GuildAuthorization};
use guildlink_pairing::store::RecordStore;
use guildlink_pairing::PairingRegistry;
use guildlink_types::{AccountId, DeviceId, LinkError, LinkResult};
use std::sync::Arc;
use tracing::{info, warn};

use history::{LoginHistory, LOGIN_HISTORY_KEY};
use providers::{AccountDirectory, IdentityProvider};

/// Result of a completed (or partially completed) link.
#[derive(Clone, Debug)]
pub struct LinkOutcome {
    pub account_id: AccountId,
    pub username: String,
    pub account_created: bool,
    pub device: DeviceId,
    /// Whether guild reconciliation mutated the cache, when a guild context
    /// was present.
    pub guild_membership_changed: Option<bool>,
}

/// Sequences pairing-code exchange, account resolution, device binding,
/// login history, and guild membership.
pub struct LinkingOrchestrator {
    pairing: PairingRegistry,
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<dyn AccountDirectory>,
    store: Arc<dyn RecordStore>,
}

impl LinkingOrchestrator {
    pub fn new(
        pairing: PairingRegistry,
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<dyn AccountDirectory>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            pairing,
            identity,
            directory,
            store,
        }
    }

    /// Links the device behind a pairing code to the account owning
    /// `external_id`, creating the account if needed.
    ///
    /// This is a forward-only saga. The pairing code is consumed exactly
    /// once up front; every later step is individually idempotent
    /// (resolve-or-create returns the existing account, re-binding to the
    /// same owner is a no-op, login-history authorization converges per
    /// (device, ip), guild add and reconcile converge), so a failure
    /// partway is reported without rollback and re-running the flow with a
    /// fresh code is safe.
    pub async fn link_device(
        &self,
        external_id: &str,
        code: &str,
        guild: Option<&Arc<GuildAuthorization>>,
    ) -> LinkResult<LinkOutcome> {
        let record = self.pairing.exchange(code).await?;

        let resolved = self.identity.resolve_or_create(external_id, true).await?;
        info!(
            external_id,
            account = %resolved.account_id,
            created = resolved.created,
            "account resolved for linking"
        );

        self.directory
            .bind_device(resolved.account_id, &record.device)
            .await?;
        info!(account = %resolved.account_id, device = %record.device, "device bound");

        self.record_login(resolved.account_id, record.device, &record.client_ip)
            .await?;

        let mut guild_membership_changed = None;
        if let Some(guild) = guild {
            self.directory
                .add_guild_member(guild.guild_id(), resolved.account_id)
                .await?;

            let roles = self
                .identity
                .member_roles(external_id, guild.guild_id())
                .await?;
            let devices = self.directory.devices_of(resolved.account_id).await?;
            let snapshot = AccountSnapshot {
                account_id: resolved.account_id,
                devices,
            };
            let changed = guild.reconcile_roles(&snapshot, &roles)?;
            info!(
                guild = %guild.guild_id(),
                account = %resolved.account_id,
                changed,
                "guild membership reconciled after link"
            );
            guild_membership_changed = Some(changed);
        }

        Ok(LinkOutcome {
            account_id: resolved.account_id,
            username: resolved.username,
            account_created: resolved.created,
            device: record.device,
            guild_membership_changed,
        })
    }

    /// Unbinds a device from the account owning `external_id`. The account
    /// is resolved without creation; an unknown identity is `NotFound`.
    pub async fn unlink_device(&self, external_id: &str, device: &DeviceId) -> LinkResult<()> {
        let resolved = self.identity.resolve_or_create(external_id, false).await?;
        self.directory
            .unbind_device(resolved.account_id, device)
            .await?;
        info!(account = %resolved.account_id, device = %device, "device unlinked");
        Ok(())
    }

    /// Marks the linking client IP as authorized in the account's login
    /// history. A version conflict here is surfaced, not retried.
    async fn record_login(
        &self,
        account: AccountId,
        device: DeviceId,
        client_ip: &str,
    ) -> LinkResult<()> {
        let owner = account.to_string();
        let (mut login_history, version) = match self.store.read(&owner, LOGIN_HISTORY_KEY).await? {
            Some((value, version)) => {
                let login_history: LoginHistory = serde_json::from_value(value)
                    .map_err(|e| LinkError::Internal(format!("corrupt login history: {e}")))?;
                (login_history, Some(version))
            }
            None => (LoginHistory::default(), None),
        };

        if !login_history.authorize(device, client_ip, Utc::now()) {
            return Ok(());
        }

        let value = serde_json::to_value(&login_history)
            .map_err(|e| LinkError::Internal(format!("serialize login history: {e}")))?;
        if let Err(err) = self
            .store
            .write(&owner, LOGIN_HISTORY_KEY, value, version.as_ref())
            .await
        {
            warn!(account = %account, error = %err, "login history write failed after binding");
            return Err(err.into());
        }
        Ok(())
    }
}
