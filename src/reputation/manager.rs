//! Reputation Manager - Scoring Service
//!
//! Reads apply decay on the fly and never write back. Writes validate,
//! normalize the object and stamp `lastupdated` before persisting.
//!
//! ## Concurrency
//!
//! Violation application is a plain get-then-set with no compare-and-swap or
//! per-key locking. Two concurrent violations against the same object can both
//! read the same starting score, and the later write wins; one penalty is lost.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::error::{ReputationError, Result};
use super::key::{KeyNormalizer, TYPE_IP, validate_type};
use super::score::{DecaySettings, Reputation};
use super::violation::{Violation, ViolationCatalog, ViolationRequest};
use crate::exceptions::{ExceptionPredicate, NoExceptions};
use crate::store::ReputationStore;

/// Retention for stored entries (two weeks)
pub const STORAGE_TTL: Duration = Duration::from_secs(336 * 60 * 60);

/// Result of one request in a violation batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationOutcome {
    Applied {
        violation: String,
        object: String,
        object_type: String,
        /// Score before the penalty (after decay)
        original: i32,
        reputation: i32,
        decay_after: Option<DateTime<Utc>>,
        /// Object is on the exception list
        exception: bool,
    },
    /// Violation name not in the catalog; nothing was written
    Unknown {
        violation: String,
        object: String,
        object_type: String,
    },
}

/// Scoring service over a `ReputationStore`
pub struct ReputationManager {
    store: Arc<dyn ReputationStore>,
    catalog: ViolationCatalog,
    decay: DecaySettings,
    normalizer: KeyNormalizer,
    exceptions: Arc<dyn ExceptionPredicate>,
}

impl ReputationManager {
    pub fn new(store: Arc<dyn ReputationStore>, catalog: ViolationCatalog) -> Self {
        Self {
            store,
            catalog,
            decay: DecaySettings::default(),
            normalizer: KeyNormalizer::default(),
            exceptions: Arc::new(NoExceptions),
        }
    }

    pub fn with_decay(mut self, decay: DecaySettings) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_normalizer(mut self, normalizer: KeyNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_exceptions(mut self, exceptions: Arc<dyn ExceptionPredicate>) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn violations(&self) -> &[Violation] {
        self.catalog.violations()
    }

    pub fn decay(&self) -> &DecaySettings {
        &self.decay
    }

    pub fn normalizer(&self) -> &KeyNormalizer {
        &self.normalizer
    }

    /// Whether `value` is excepted; only meaningful for `ip`
    pub fn is_exception(&self, object_type: &str, value: &str) -> bool {
        object_type == TYPE_IP && self.exceptions.is_exception(value)
    }

    fn key_for(&self, object_type: &str, value: &str) -> Result<String> {
        if !object_type.is_empty() && !value.is_empty() {
            validate_type(object_type, value)?;
        }
        self.normalizer.derive_key(object_type, value)
    }

    /// Current reputation with decay applied at the current time
    pub async fn get(&self, object_type: &str, value: &str) -> Result<Reputation> {
        self.get_at(object_type, value, Utc::now()).await
    }

    async fn get_at(
        &self,
        object_type: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Reputation> {
        let key = self.key_for(object_type, value)?;
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(ReputationError::NotFound)?;

        let mut reputation: Reputation = serde_json::from_slice(&raw)?;
        if reputation.object_type.is_empty() {
            reputation.object_type = object_type.to_string();
        }
        reputation.apply_decay(now, &self.decay);
        Ok(reputation)
    }

    /// Like `get`, but excepted addresses are reported as not found
    pub async fn lookup(&self, object_type: &str, value: &str) -> Result<Reputation> {
        if self.is_exception(object_type, value) {
            return Err(ReputationError::NotFound);
        }
        self.get(object_type, value).await
    }

    /// Validate, normalize and persist; updates `object` and `last_updated`
    pub async fn set(&self, reputation: &mut Reputation) -> Result<()> {
        reputation.validate()?;
        let key = self.key_for(&reputation.object_type, &reputation.object)?;
        reputation.object = self
            .normalizer
            .normalize(&reputation.object_type, &reputation.object)?;
        reputation.last_updated = Utc::now();

        let bytes = serde_json::to_vec(reputation)?;
        self.store.set(&key, bytes, STORAGE_TTL).await?;
        Ok(())
    }

    /// Remove an entry; deleting a missing entry succeeds
    pub async fn delete(&self, object_type: &str, value: &str) -> Result<()> {
        let key = self.key_for(object_type, value)?;
        self.store.delete(&key).await?;
        Ok(())
    }

    /// Apply each request in order
    ///
    /// Unknown violations are reported and skipped. Any other failure stops
    /// the batch; requests before it have already been persisted.
    pub async fn apply_violations(
        &self,
        object_type: &str,
        requests: Vec<ViolationRequest>,
    ) -> Result<Vec<ViolationOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for mut request in requests {
            request.fixup(object_type);
            request.object_type = object_type.to_string();
            request.validate()?;
            outcomes.push(self.apply_violation(&request).await?);
        }
        Ok(outcomes)
    }

    async fn apply_violation(&self, request: &ViolationRequest) -> Result<ViolationOutcome> {
        let now = Utc::now();
        let mut reputation = match self.get_at(&request.object_type, &request.object, now).await {
            Ok(mut existing) => {
                if existing.object.is_empty() {
                    existing.object = request.object.clone();
                }
                existing
                    .validate()
                    .map_err(|e| ReputationError::CorruptRecord(e.to_string()))?;
                existing
            }
            Err(ReputationError::NotFound) => {
                Reputation::pristine(&request.object_type, &request.object)
            }
            Err(e) => return Err(e),
        };
        let original = reputation.reputation;

        reputation.suppress_recovery(now, request.suppress_recovery);
        if !reputation.apply_violation(&self.catalog, &request.violation) {
            return Ok(ViolationOutcome::Unknown {
                violation: request.violation.clone(),
                object: request.object.clone(),
                object_type: request.object_type.clone(),
            });
        }

        self.set(&mut reputation).await?;
        Ok(ViolationOutcome::Applied {
            violation: request.violation.clone(),
            exception: self.is_exception(&reputation.object_type, &request.object),
            object: reputation.object,
            object_type: reputation.object_type,
            original,
            reputation: reputation.reputation,
            decay_after: reputation.decay_after,
        })
    }

    /// Every stored entry as written; no decay, validation or type backfill
    pub async fn dump(&self) -> Result<Vec<Reputation>> {
        let keys = self.store.keys().await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            // expired between KEYS and GET
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            entries.push(serde_json::from_slice(&raw)?);
        }
        Ok(entries)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::{ExceptionList, parse_network};
    use crate::reputation::violation::MAX_SUPPRESS_RECOVERY_SECS;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Barrier;

    fn catalog() -> ViolationCatalog {
        ViolationCatalog::new([
            Violation::new("violation1", 5, 25),
            Violation::new("violation2", 50, 50),
            Violation::new("violation3", 0, 0),
        ])
    }

    fn manager_with(store: Arc<MemoryStore>) -> ReputationManager {
        ReputationManager::new(store, catalog())
    }

    fn manager() -> ReputationManager {
        manager_with(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let m = manager();
        let mut r = Reputation::new("ip", "192.168.0.1", 50);
        r.reviewed = true;
        m.set(&mut r).await.unwrap();

        let got = m.get("ip", "192.168.0.1").await.unwrap();
        assert_eq!(got.object, "192.168.0.1");
        assert_eq!(got.object_type, "ip");
        assert_eq!(got.reputation, 50);
        assert!(got.reviewed);
    }

    #[tokio::test]
    async fn test_set_rejects_invalid() {
        let m = manager();
        let mut r = Reputation::new("ip", "192.168.0.1", 500);
        assert!(matches!(
            m.set(&mut r).await,
            Err(ReputationError::InvalidScore(500))
        ));

        let mut r = Reputation::new("ip", "not-an-ip", 50);
        assert!(matches!(
            m.set(&mut r).await,
            Err(ReputationError::InvalidAddress(_))
        ));

        let mut r = Reputation::new("bogus", "x", 50);
        assert!(matches!(
            m.set(&mut r).await,
            Err(ReputationError::UnknownType(_))
        ));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let m = manager();
        assert!(matches!(
            m.get("ip", "10.0.0.1").await,
            Err(ReputationError::NotFound)
        ));
        assert!(matches!(
            m.get("email", "not-an-email").await,
            Err(ReputationError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_decay_applied_on_read_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        let m = manager_with(store.clone())
            .with_decay(DecaySettings::new(1, Duration::from_secs(60)));

        let mut stored = Reputation::new("ip", "10.0.0.1", 50);
        stored.last_updated = Utc::now() - ChronoDuration::minutes(10);
        store
            .set(
                "ip 10.0.0.1",
                serde_json::to_vec(&stored).unwrap(),
                STORAGE_TTL,
            )
            .await
            .unwrap();

        let got = m.get("ip", "10.0.0.1").await.unwrap();
        assert_eq!(got.reputation, 60);

        let raw = store.get("ip 10.0.0.1").await.unwrap().unwrap();
        let persisted: Reputation = serde_json::from_slice(&raw).unwrap();
        assert_eq!(persisted.reputation, 50);
    }

    #[tokio::test]
    async fn test_legacy_entry_type_backfilled() {
        let store = Arc::new(MemoryStore::new());
        let m = manager_with(store.clone());
        store
            .set(
                "ip 10.0.0.1",
                br#"{"ip":"10.0.0.1","reputation":40,"reviewed":false,"lastupdated":"2024-01-01T00:00:00Z"}"#
                    .to_vec(),
                STORAGE_TTL,
            )
            .await
            .unwrap();

        let got = m.get("ip", "10.0.0.1").await.unwrap();
        assert_eq!(got.object_type, "ip");
        assert_eq!(got.reputation, 40);
    }

    #[tokio::test]
    async fn test_unknown_violation_not_persisted() {
        let m = manager();
        let outcomes = m
            .apply_violations("ip", vec![ViolationRequest::new("nope", "ip", "10.0.0.1")])
            .await
            .unwrap();
        assert!(matches!(outcomes[0], ViolationOutcome::Unknown { .. }));
        assert!(matches!(
            m.get("ip", "10.0.0.1").await,
            Err(ReputationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_repeated_violations_reach_floor() {
        let m = manager();
        for _ in 0..5 {
            m.apply_violations(
                "ip",
                vec![ViolationRequest::new("violation1", "ip", "10.0.0.2")],
            )
            .await
            .unwrap();
        }
        assert_eq!(m.get("ip", "10.0.0.2").await.unwrap().reputation, 75);

        let batch = (0..95)
            .map(|_| ViolationRequest::new("violation1", "ip", "10.0.0.2"))
            .collect();
        m.apply_violations("ip", batch).await.unwrap();
        assert_eq!(m.get("ip", "10.0.0.2").await.unwrap().reputation, 25);
    }

    #[tokio::test]
    async fn test_batch_continues_past_unknown_and_stops_on_invalid() {
        let m = manager();
        let outcomes = m
            .apply_violations(
                "ip",
                vec![
                    ViolationRequest::new("nope", "ip", "10.0.0.3"),
                    ViolationRequest::new("violation2", "ip", "10.0.0.3"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(m.get("ip", "10.0.0.3").await.unwrap().reputation, 50);

        let err = m
            .apply_violations(
                "ip",
                vec![
                    ViolationRequest::new("violation3", "ip", "10.0.0.4"),
                    ViolationRequest::new("", "ip", "10.0.0.5"),
                    ViolationRequest::new("violation2", "ip", "10.0.0.6"),
                ],
            )
            .await;
        assert!(matches!(err, Err(ReputationError::InvalidRequest(_))));
        assert!(m.get("ip", "10.0.0.4").await.is_ok());
        assert!(m.get("ip", "10.0.0.6").await.is_err());
    }

    #[tokio::test]
    async fn test_legacy_ip_field_in_request() {
        let m = manager();
        let request = ViolationRequest {
            violation: "violation2".into(),
            ip: "10.0.0.7".into(),
            ..Default::default()
        };
        m.apply_violations("ip", vec![request]).await.unwrap();
        assert_eq!(m.get("ip", "10.0.0.7").await.unwrap().reputation, 50);
    }

    #[tokio::test]
    async fn test_suppress_recovery_holds_decay() {
        let m = manager().with_decay(DecaySettings::new(100, Duration::from_secs(1)));
        let request =
            ViolationRequest::new("violation2", "ip", "10.0.0.8").with_suppress_recovery(600);
        let outcomes = m.apply_violations("ip", vec![request]).await.unwrap();
        let ViolationOutcome::Applied { decay_after, .. } = &outcomes[0] else {
            panic!("expected applied outcome");
        };
        let first_hold = decay_after.unwrap();

        // a shorter hold leaves the longer one in place
        let request =
            ViolationRequest::new("violation3", "ip", "10.0.0.8").with_suppress_recovery(5);
        let outcomes = m.apply_violations("ip", vec![request]).await.unwrap();
        let ViolationOutcome::Applied { decay_after, .. } = &outcomes[0] else {
            panic!("expected applied outcome");
        };
        assert_eq!(*decay_after, Some(first_hold));

        let too_long = ViolationRequest::new("violation3", "ip", "10.0.0.8")
            .with_suppress_recovery(MAX_SUPPRESS_RECOVERY_SECS + 1);
        assert!(matches!(
            m.apply_violations("ip", vec![too_long]).await,
            Err(ReputationError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_hides_exceptions() {
        let list = ExceptionList::from_networks(vec![parse_network("10.0.0.0/8").unwrap()]);
        let m = manager().with_exceptions(Arc::new(list));

        let outcomes = m
            .apply_violations(
                "ip",
                vec![ViolationRequest::new("violation2", "ip", "10.1.1.1")],
            )
            .await
            .unwrap();
        assert!(matches!(
            outcomes[0],
            ViolationOutcome::Applied { exception: true, .. }
        ));

        assert!(m.get("ip", "10.1.1.1").await.is_ok());
        assert!(matches!(
            m.lookup("ip", "10.1.1.1").await,
            Err(ReputationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let m = manager();
        let mut r = Reputation::new("email", "usr@mozilla.com", 30);
        m.set(&mut r).await.unwrap();
        m.delete("email", "usr@mozilla.com").await.unwrap();
        m.delete("email", "usr@mozilla.com").await.unwrap();
        assert!(matches!(
            m.get("email", "usr@mozilla.com").await,
            Err(ReputationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_dump_returns_raw_entries() {
        let store = Arc::new(MemoryStore::new());
        let m = manager_with(store.clone())
            .with_decay(DecaySettings::new(10, Duration::from_secs(1)));

        let mut old = Reputation::new("ip", "10.0.0.9", 10);
        old.last_updated = Utc::now() - ChronoDuration::hours(1);
        store
            .set("ip 10.0.0.9", serde_json::to_vec(&old).unwrap(), STORAGE_TTL)
            .await
            .unwrap();
        let mut r = Reputation::new("email", "usr@mozilla.com", 30);
        m.set(&mut r).await.unwrap();

        let mut dumped = m.dump().await.unwrap();
        dumped.sort_by(|a, b| a.object.cmp(&b.object));
        assert_eq!(dumped.len(), 2);
        assert_eq!(dumped[0].object, "10.0.0.9");
        assert_eq!(dumped[0].reputation, 10);
        assert_eq!(dumped[1].reputation, 30);
    }

    #[tokio::test]
    async fn test_ipv6_entries_share_prefix() {
        let m = manager().with_normalizer(KeyNormalizer::new(64));
        let mut r = Reputation::new("ip", "2001:db8:a0b:12f0::1", 40);
        m.set(&mut r).await.unwrap();
        assert_eq!(r.object, "2001:db8:a0b:12f0::");

        let other = m.get("ip", "2001:db8:a0b:12f0:ffff::2").await.unwrap();
        assert_eq!(other.reputation, 40);
        assert!(matches!(
            m.get("ip", "2001:db8:a0b:12f1::1").await,
            Err(ReputationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_corrupt_entry_aborts_violation() {
        let store = Arc::new(MemoryStore::new());
        let m = manager_with(store.clone());
        store
            .set(
                "ip 10.0.0.10",
                br#"{"object":"10.0.0.10","type":"ip","reputation":500,"reviewed":false,"lastupdated":"2024-01-01T00:00:00Z"}"#
                    .to_vec(),
                STORAGE_TTL,
            )
            .await
            .unwrap();
        let result = m
            .apply_violations(
                "ip",
                vec![ViolationRequest::new("violation1", "ip", "10.0.0.10")],
            )
            .await;
        assert!(matches!(result, Err(ReputationError::CorruptRecord(_))));
    }

    /// Reads wait for each other, so concurrent writers both start from the
    /// state before either write lands
    struct LockstepStore {
        inner: MemoryStore,
        readers: Barrier,
    }

    #[async_trait]
    impl ReputationStore for LockstepStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            let value = self.inner.get(key).await?;
            self.readers.wait().await;
            Ok(value)
        }

        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn keys(&self) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.keys().await
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_violations_lose_an_update() {
        let store = Arc::new(LockstepStore {
            inner: MemoryStore::new(),
            readers: Barrier::new(2),
        });
        let m = ReputationManager::new(store.clone(), catalog());

        let (first, second) = tokio::join!(
            m.apply_violations(
                "ip",
                vec![ViolationRequest::new("violation1", "ip", "10.0.0.11")]
            ),
            m.apply_violations(
                "ip",
                vec![ViolationRequest::new("violation1", "ip", "10.0.0.11")]
            ),
        );
        for outcomes in [first.unwrap(), second.unwrap()] {
            assert!(matches!(
                outcomes[0],
                ViolationOutcome::Applied {
                    original: 100,
                    reputation: 95,
                    ..
                }
            ));
        }

        // get-then-set without CAS: the second write overwrites the first
        let raw = store.inner.get("ip 10.0.0.11").await.unwrap().unwrap();
        let stored: Reputation = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored.reputation, 95);
    }
}
