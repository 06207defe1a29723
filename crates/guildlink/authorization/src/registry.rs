//! Process-wide registry of per-guild authorization caches.
//!
//! One addressable, independently lockable cache per guild identifier;
//! operations on different guilds never contend on a shared lock.

use crate::{AuthorizationError, GuildAuthorization, GuildConfig};
use guildlink_types::GuildId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct AuthorizationRegistry {
    guilds: RwLock<HashMap<GuildId, Arc<GuildAuthorization>>>,
}

impl AuthorizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `guild_id`, if registered.
    pub fn get(&self, guild_id: &GuildId) -> Result<Option<Arc<GuildAuthorization>>, AuthorizationError> {
        let guilds = self
            .guilds
            .read()
            .map_err(|_| AuthorizationError::LockPoisoned)?;
        Ok(guilds.get(guild_id).cloned())
    }

    /// Registers (or replaces) a guild's cache instance.
    pub fn insert(&self, guild: Arc<GuildAuthorization>) -> Result<(), AuthorizationError> {
        let mut guilds = self
            .guilds
            .write()
            .map_err(|_| AuthorizationError::LockPoisoned)?;
        guilds.insert(guild.guild_id().clone(), guild);
        Ok(())
    }

    /// The existing cache for the config's guild, or a freshly registered
    /// one.
    pub fn get_or_insert(&self, config: GuildConfig) -> Result<Arc<GuildAuthorization>, AuthorizationError> {
        if let Some(existing) = self.get(&config.guild_id)? {
            return Ok(existing);
        }
        let mut guilds = self
            .guilds
            .write()
            .map_err(|_| AuthorizationError::LockPoisoned)?;
        let entry = guilds
            .entry(config.guild_id.clone())
            .or_insert_with(|| Arc::new(GuildAuthorization::new(config)));
        Ok(entry.clone())
    }

    pub fn remove(&self, guild_id: &GuildId) -> Result<Option<Arc<GuildAuthorization>>, AuthorizationError> {
        let mut guilds = self
            .guilds
            .write()
            .map_err(|_| AuthorizationError::LockPoisoned)?;
        Ok(guilds.remove(guild_id))
    }

    pub fn guild_ids(&self) -> Result<Vec<GuildId>, AuthorizationError> {
        let guilds = self
            .guilds
            .read()
            .map_err(|_| AuthorizationError::LockPoisoned)?;
        Ok(guilds.keys().cloned().collect())
    }
}
