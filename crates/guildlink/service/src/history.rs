//! Per-account login history, persisted through the record store.

use chrono::{DateTime, Utc};
use guildlink_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Storage key for an account's login history record.
pub const LOGIN_HISTORY_KEY: &str = "login_history";

/// One device's most recent authorized login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEntry {
    pub device: DeviceId,
    pub client_ip: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Login history for one account: a device-keyed entry map plus the set of
/// client IPs that completed an authorized link.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoginHistory {
    #[serde(default)]
    entries: HashMap<DeviceId, LoginEntry>,
    #[serde(default)]
    authorized_ips: HashSet<String>,
}

impl LoginHistory {
    /// Records an authorized login from `client_ip` on `device`.
    ///
    /// Idempotent per (device, ip) pair: repeating the same call only
    /// refreshes the timestamp and reports no change.
    pub fn authorize(&mut self, device: DeviceId, client_ip: &str, now: DateTime<Utc>) -> bool {
        let mut changed = self.authorized_ips.insert(client_ip.to_owned());

        match self.entries.get_mut(&device) {
            Some(entry) if entry.client_ip == client_ip => {
                entry.last_seen_at = now;
            }
            Some(entry) => {
                entry.client_ip = client_ip.to_owned();
                entry.last_seen_at = now;
                changed = true;
            }
            None => {
                self.entries.insert(
                    device,
                    LoginEntry {
                        device,
                        client_ip: client_ip.to_owned(),
                        last_seen_at: now,
                    },
                );
                changed = true;
            }
        }
        changed
    }

    pub fn is_ip_authorized(&self, client_ip: &str) -> bool {
        self.authorized_ips.contains(client_ip)
    }

    pub fn last_seen(&self, device: &DeviceId) -> Option<DateTime<Utc>> {
        self.entries.get(device).map(|entry| entry.last_seen_at)
    }

    pub fn forget_device(&mut self, device: &DeviceId) -> bool {
        self.entries.remove(device).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_is_idempotent_per_device_and_ip() {
        let mut history = LoginHistory::default();
        let device = DeviceId::new(4, 1);

        assert!(history.authorize(device, "203.0.113.7", Utc::now()));
        assert!(!history.authorize(device, "203.0.113.7", Utc::now()));
        assert!(history.is_ip_authorized("203.0.113.7"));
        assert!(!history.is_ip_authorized("198.51.100.1"));
    }

    #[test]
    fn test_new_ip_on_known_device_is_a_change() {
        let mut history = LoginHistory::default();
        let device = DeviceId::new(4, 1);

        history.authorize(device, "203.0.113.7", Utc::now());
        assert!(history.authorize(device, "198.51.100.1", Utc::now()));
        // The earlier IP stays authorized.
        assert!(history.is_ip_authorized("203.0.113.7"));
    }

    #[test]
    fn test_last_seen_and_forget() {
        let mut history = LoginHistory::default();
        let device = DeviceId::new(4, 1);
        assert!(history.last_seen(&device).is_none());

        history.authorize(device, "203.0.113.7", Utc::now());
        assert!(history.last_seen(&device).is_some());

        assert!(history.forget_device(&device));
        assert!(history.last_seen(&device).is_none());
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut history = LoginHistory::default();
        history.authorize(DeviceId::new(4, 1), "203.0.113.7", Utc::now());

        let json = serde_json::to_string(&history).unwrap();
        let back: LoginHistory = serde_json::from_str(&json).unwrap();
        assert!(back.is_ip_authorized("203.0.113.7"));
        assert!(back.last_seen(&DeviceId::new(4, 1)).is_some());
    }
}
