//! Per-guild configuration - the closed role vocabulary and override lists.

use guildlink_types::{AccountId, GuildId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The roles a guild recognizes, one per named capability.
///
/// External role lists are filtered against this map before they reach the
/// reconciliation algorithm, so the cache only ever holds a closed
/// vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    pub member: RoleId,
    pub suspended: RoleId,
    pub enforcer: RoleId,
    pub auditor: RoleId,
    pub server_host: RoleId,
    pub allocator: RoleId,
    pub limited_access: RoleId,
    pub api_access: RoleId,
    pub account_age_bypass: RoleId,
    pub vpn_bypass: RoleId,
}

impl RoleMap {
    /// All configured roles, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &RoleId> {
        [
            &self.member,
            &self.suspended,
            &self.enforcer,
            &self.auditor,
            &self.server_host,
            &self.allocator,
            &self.limited_access,
            &self.api_access,
            &self.account_age_bypass,
            &self.vpn_bypass,
        ]
        .into_iter()
    }

    pub fn as_set(&self) -> HashSet<&RoleId> {
        self.iter().collect()
    }

    pub fn contains(&self, role: &RoleId) -> bool {
        self.iter().any(|r| r == role)
    }
}

/// Everything the authorization cache needs to know about one guild.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: GuildId,
    /// The guild's owning account; ownership is config, not a cached role.
    pub owner: AccountId,
    pub role_map: RoleMap,
    /// Accounts whose enforcer/auditor roles are overridden to false even
    /// when the role cache says otherwise.
    #[serde(default)]
    pub negated_enforcer_ids: Vec<AccountId>,
    /// When set, matchmaking requires the member role; otherwise everyone
    /// is allowed.
    #[serde(default)]
    pub members_only_matchmaking: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_map() -> RoleMap {
        RoleMap {
            member: RoleId::new("member"),
            suspended: RoleId::new("suspended"),
            enforcer: RoleId::new("enforcer"),
            auditor: RoleId::new("auditor"),
            server_host: RoleId::new("server-host"),
            allocator: RoleId::new("allocator"),
            limited_access: RoleId::new("limited-access"),
            api_access: RoleId::new("api-access"),
            account_age_bypass: RoleId::new("account-age-bypass"),
            vpn_bypass: RoleId::new("vpn-bypass"),
        }
    }

    #[test]
    fn test_role_map_membership() {
        let map = role_map();
        assert_eq!(map.iter().count(), 10);
        assert!(map.contains(&RoleId::new("member")));
        assert!(!map.contains(&RoleId::new("some-unrelated-role")));
    }

    #[test]
    fn test_as_set_deduplicates_shared_role_ids() {
        let mut map = role_map();
        map.auditor = map.enforcer.clone();
        assert_eq!(map.as_set().len(), 9);
    }
}
