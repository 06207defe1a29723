//! Guildlink Pairing - short-lived pairing-code registry
//!
//! A device that begins a login attempt with no account binding is handed a
//! four-character code drawn from an alphabet without visually ambiguous
//! characters. A companion application presents the code out-of-band; the
//! exchange consumes it exactly once. Codes expire after thirty days and are
//! pruned on every mutation of the collection.

#![deny(unsafe_code)]

pub mod store;

use chrono::{DateTime, Duration, Utc};
use guildlink_types::{DeviceId, LinkError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use store::{RecordStore, StoreError, Version};

/// Length of a pairing code in characters.
pub const PAIRING_CODE_LENGTH: usize = 4;

/// Restricted alphabet; B, O, Q, V, W, Y and N are excluded as visually
/// ambiguous when read back over voice or a blurry headset display.
pub const PAIRING_CODE_ALPHABET: &[u8] = b"ACDEFGHIJKLMPRSTUXZ";

/// Retention window after which an unconsumed code is pruned.
pub const PAIRING_CODE_TTL_DAYS: i64 = 30;

/// Collision-resample bound; exceeding it means the live code space is
/// effectively saturated and the call fails rather than spinning.
const MAX_CODE_ATTEMPTS: usize = 256;

/// Re-read bound for optimistic-concurrency conflicts.
const MAX_WRITE_ATTEMPTS: usize = 4;

/// Storage owner and key for the process-wide code collection.
const SYSTEM_OWNER: &str = "00000000-0000-0000-0000-000000000000";
const TICKETS_KEY: &str = "pairing_codes";

/// Pairing registry failures.
#[derive(Debug, Error)]
pub enum PairingError {
    /// Code unknown, expired, or already consumed. User-correctable.
    #[error("pairing code not found")]
    NotFound,

    /// Code of the wrong length or alphabet.
    #[error("invalid pairing code: {0}")]
    InvalidCode(String),

    /// Collision-resample bound exhausted.
    #[error("pairing code space exhausted")]
    Exhausted,

    /// Optimistic-concurrency retries exhausted.
    #[error("pairing storage contention, retries exhausted")]
    Contended,

    /// Backend failure, distinct from not-found.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PairingError> for LinkError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::NotFound => LinkError::NotFound,
            PairingError::InvalidCode(msg) => LinkError::InvalidInput(msg),
            other => LinkError::Internal(other.to_string()),
        }
    }
}

/// One pending login attempt, keyed by its pairing code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    pub device: DeviceId,
    pub client_ip: String,
    /// Opaque login payload from the device, carried through untouched.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// The versioned code -> record collection as persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PairingTickets {
    #[serde(default)]
    tickets: HashMap<String, PairingRecord>,
}

impl PairingTickets {
    /// Removes records older than the retention window. Returns how many
    /// were dropped.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = Duration::days(PAIRING_CODE_TTL_DAYS);
        let before = self.tickets.len();
        self.tickets.retain(|_, record| now - record.created_at <= ttl);
        before - self.tickets.len()
    }

    /// The live code for a device, if one exists.
    pub fn code_for_device(&self, device: &DeviceId) -> Option<&str> {
        self.tickets
            .iter()
            .find(|(_, record)| record.device == *device)
            .map(|(code, _)| code.as_str())
    }

    /// Inserts `record` under a freshly sampled unique code.
    fn generate(&mut self, rng: &mut StdRng, record: PairingRecord) -> Result<String, PairingError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code: String = (0..PAIRING_CODE_LENGTH)
                .map(|_| PAIRING_CODE_ALPHABET[rng.gen_range(0..PAIRING_CODE_ALPHABET.len())] as char)
                .collect();
            if !self.tickets.contains_key(&code) {
                self.tickets.insert(code.clone(), record);
                return Ok(code);
            }
        }
        Err(PairingError::Exhausted)
    }

    /// Removes and returns the record under `code`.
    fn take(&mut self, code: &str) -> Option<PairingRecord> {
        self.tickets.remove(code)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

/// Normalizes user-entered code text and validates its shape.
pub fn normalize_code(raw: &str) -> Result<String, PairingError> {
    let code = raw.trim().to_uppercase();
    if code.len() != PAIRING_CODE_LENGTH {
        return Err(PairingError::InvalidCode(format!(
            "code must be exactly {PAIRING_CODE_LENGTH} characters"
        )));
    }
    if code.bytes().any(|b| !PAIRING_CODE_ALPHABET.contains(&b)) {
        return Err(PairingError::InvalidCode(format!(
            "code contains characters outside the pairing alphabet: {code}"
        )));
    }
    Ok(code)
}

/// Manages the process-wide pairing-code collection through a versioned
/// record store.
pub struct PairingRegistry {
    store: Arc<dyn RecordStore>,
}

impl PairingRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Assigns a fresh pairing code to a pending login attempt.
    ///
    /// Prunes expired records first, then samples the alphabet with an
    /// independently seeded generator until an unused code is found (bounded).
    pub async fn generate_code(
        &self,
        device: DeviceId,
        client_ip: &str,
        payload: &str,
    ) -> Result<String, PairingError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let (mut tickets, version) = self.load().await?;

            let pruned = tickets.prune_expired(Utc::now());
            if pruned > 0 {
                debug!(pruned, "expired pairing codes removed");
            }

            let mut rng = StdRng::from_entropy();
            let code = tickets.generate(
                &mut rng,
                PairingRecord {
                    device,
                    client_ip: client_ip.to_owned(),
                    payload: payload.to_owned(),
                    created_at: Utc::now(),
                },
            )?;

            match self.save(&tickets, version.as_ref()).await {
                Ok(()) => {
                    info!(device = %device, code = %code, "pairing code generated");
                    return Ok(code);
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(PairingError::Contended)
    }

    /// Consumes a pairing code exactly once and returns its record.
    ///
    /// The code is trimmed and uppercased before lookup. Removal and
    /// persistence happen under the collection's version token, so no two
    /// concurrent exchanges of the same code can both succeed.
    pub async fn exchange(&self, raw_code: &str) -> Result<PairingRecord, PairingError> {
        let code = normalize_code(raw_code)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let (mut tickets, version) = self.load().await?;

            // Expired codes are not exchangeable.
            tickets.prune_expired(Utc::now());
            let record = tickets.take(&code).ok_or(PairingError::NotFound)?;

            match self.save(&tickets, version.as_ref()).await {
                Ok(()) => {
                    info!(code = %code, device = %record.device, "pairing code exchanged");
                    return Ok(record);
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(PairingError::Contended)
    }

    /// The live (unexpired) code for a device, if one exists.
    pub async fn code_for_device(&self, device: &DeviceId) -> Result<Option<String>, PairingError> {
        let (mut tickets, _) = self.load().await?;
        tickets.prune_expired(Utc::now());
        Ok(tickets.code_for_device(device).map(str::to_owned))
    }

    async fn load(&self) -> Result<(PairingTickets, Option<Version>), PairingError> {
        match self.store.read(SYSTEM_OWNER, TICKETS_KEY).await? {
            Some((value, version)) => {
                let tickets = serde_json::from_value(value)
                    .map_err(|e| StoreError::Backend(format!("corrupt pairing collection: {e}")))?;
                Ok((tickets, Some(version)))
            }
            None => Ok((PairingTickets::default(), None)),
        }
    }

    async fn save(&self, tickets: &PairingTickets, version: Option<&Version>) -> Result<(), StoreError> {
        let value = serde_json::to_value(tickets)
            .map_err(|e| StoreError::Backend(format!("serialize pairing collection: {e}")))?;
        self.store
            .write(SYSTEM_OWNER, TICKETS_KEY, value, version)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> PairingRegistry {
        PairingRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn device(n: u64) -> DeviceId {
        DeviceId::new(4, n)
    }

    #[tokio::test]
    async fn test_generate_and_exchange() {
        let registry = registry();
        let code = registry
            .generate_code(device(1), "203.0.113.7", "{\"build\":1}")
            .await
            .unwrap();

        assert_eq!(code.len(), PAIRING_CODE_LENGTH);
        assert!(code.bytes().all(|b| PAIRING_CODE_ALPHABET.contains(&b)));

        let record = registry.exchange(&code).await.unwrap();
        assert_eq!(record.device, device(1));
        assert_eq!(record.client_ip, "203.0.113.7");
        assert_eq!(record.payload, "{\"build\":1}");
    }

    #[tokio::test]
    async fn test_exchange_is_case_insensitive_and_trims() {
        let registry = registry();
        let code = registry.generate_code(device(1), "ip", "p").await.unwrap();

        let record = registry
            .exchange(&format!("  {}  ", code.to_lowercase()))
            .await
            .unwrap();
        assert_eq!(record.device, device(1));
    }

    #[tokio::test]
    async fn test_exchange_consumes_exactly_once() {
        let registry = registry();
        let code = registry.generate_code(device(1), "ip", "p").await.unwrap();

        registry.exchange(&code).await.unwrap();
        let err = registry.exchange(&code).await.unwrap_err();
        assert!(matches!(err, PairingError::NotFound));
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_found() {
        let registry = registry();
        let err = registry.exchange("ACDE").await.unwrap_err();
        assert!(matches!(err, PairingError::NotFound));
    }

    #[tokio::test]
    async fn test_malformed_code_is_invalid_not_missing() {
        let registry = registry();
        assert!(matches!(
            registry.exchange("AB").await.unwrap_err(),
            PairingError::InvalidCode(_)
        ));
        // 'O' is excluded from the alphabet.
        assert!(matches!(
            registry.exchange("AOAO").await.unwrap_err(),
            PairingError::InvalidCode(_)
        ));
    }

    #[tokio::test]
    async fn test_live_codes_are_unique() {
        let registry = registry();
        let mut codes = std::collections::HashSet::new();
        for n in 0..50 {
            let code = registry.generate_code(device(n), "ip", "p").await.unwrap();
            assert!(codes.insert(code), "duplicate live code issued");
        }
    }

    #[tokio::test]
    async fn test_expired_code_is_pruned() {
        let store = Arc::new(MemoryStore::new());
        let registry = PairingRegistry::new(store.clone());

        let code = registry.generate_code(device(1), "ip", "p").await.unwrap();

        // Age the stored record past the retention window.
        let (value, version) = store.read(SYSTEM_OWNER, TICKETS_KEY).await.unwrap().unwrap();
        let mut tickets: PairingTickets = serde_json::from_value(value).unwrap();
        tickets.tickets.get_mut(&code).unwrap().created_at =
            Utc::now() - Duration::days(PAIRING_CODE_TTL_DAYS + 1);
        store
            .write(
                SYSTEM_OWNER,
                TICKETS_KEY,
                serde_json::to_value(&tickets).unwrap(),
                Some(&version),
            )
            .await
            .unwrap();

        let err = registry.exchange(&code).await.unwrap_err();
        assert!(matches!(err, PairingError::NotFound));
    }

    #[tokio::test]
    async fn test_code_for_device_tracks_lifecycle() {
        let registry = registry();
        assert_eq!(registry.code_for_device(&device(1)).await.unwrap(), None);

        let code = registry.generate_code(device(1), "ip", "p").await.unwrap();
        assert_eq!(
            registry.code_for_device(&device(1)).await.unwrap(),
            Some(code.clone())
        );

        registry.exchange(&code).await.unwrap();
        assert_eq!(registry.code_for_device(&device(1)).await.unwrap(), None);
    }

    #[test]
    fn test_saturated_code_space_fails_hard() {
        let fresh = PairingRecord {
            device: device(1),
            client_ip: "ip".into(),
            payload: "p".into(),
            created_at: Utc::now(),
        };

        // Occupy every code the alphabet can express so no resample can land.
        let mut tickets = PairingTickets::default();
        for &a in PAIRING_CODE_ALPHABET {
            for &b in PAIRING_CODE_ALPHABET {
                for &c in PAIRING_CODE_ALPHABET {
                    for &d in PAIRING_CODE_ALPHABET {
                        let code = String::from_utf8(vec![a, b, c, d]).unwrap();
                        tickets.tickets.insert(code, fresh.clone());
                    }
                }
            }
        }

        let mut rng = StdRng::from_entropy();
        let err = tickets.generate(&mut rng, fresh).unwrap_err();
        assert!(matches!(err, PairingError::Exhausted));
    }

    /// Store whose writes always lose the version race.
    struct ContestedStore;

    #[async_trait::async_trait]
    impl RecordStore for ContestedStore {
        async fn read(
            &self,
            _owner: &str,
            _key: &str,
        ) -> Result<Option<(serde_json::Value, Version)>, StoreError> {
            Ok(None)
        }

        async fn write(
            &self,
            owner: &str,
            key: &str,
            _value: serde_json::Value,
            _expected: Option<&Version>,
        ) -> Result<Version, StoreError> {
            Err(StoreError::VersionConflict {
                owner: owner.to_owned(),
                key: key.to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn test_persistent_write_conflict_surfaces_contended() {
        let registry = PairingRegistry::new(Arc::new(ContestedStore));
        let err = registry
            .generate_code(device(1), "ip", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::Contended));

        let err = registry.exchange("ACDE").await.unwrap_err();
        // A never-persisted collection has no codes to exchange.
        assert!(matches!(err, PairingError::NotFound));
    }

    #[test]
    fn test_prune_keeps_fresh_records() {
        let mut tickets = PairingTickets::default();
        tickets.tickets.insert(
            "ACDE".into(),
            PairingRecord {
                device: device(1),
                client_ip: "ip".into(),
                payload: "p".into(),
                created_at: Utc::now(),
            },
        );
        tickets.tickets.insert(
            "FGHX".into(),
            PairingRecord {
                device: device(2),
                client_ip: "ip".into(),
                payload: "p".into(),
                created_at: Utc::now() - Duration::days(PAIRING_CODE_TTL_DAYS + 1),
            },
        );

        assert_eq!(tickets.prune_expired(Utc::now()), 1);
        assert_eq!(tickets.len(), 1);
        assert!(tickets.code_for_device(&device(1)).is_some());
        assert!(tickets.code_for_device(&device(2)).is_none());
    }
}
