//! Reputation Records
//!
//! A score runs from 0 to 100 where 100 means no outstanding violations.
//! Violations lower the score down to a per-violation floor; decay restores
//! it over time unless recovery has been suppressed with `decayafter`.
//! Decay is computed on demand from `lastupdated` and never persisted by reads.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use super::error::{ReputationError, Result};
use super::violation::{MAX_SUPPRESS_RECOVERY_SECS, Violation, ViolationCatalog};

pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;

/// Reputation entry for a single object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    /// The object this entry is for, e.g. an IP address when type is `ip`
    #[serde(default)]
    pub object: String,

    #[serde(rename = "type", default)]
    pub object_type: String,

    pub reputation: i32,

    /// Set when the entry was manually reviewed
    #[serde(default)]
    pub reviewed: bool,

    /// Last manual set or violation; origin for decay
    #[serde(rename = "lastupdated", default)]
    pub last_updated: DateTime<Utc>,

    /// Recovery is suspended until this instant
    #[serde(
        rename = "decayafter",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "zero_time_as_none"
    )]
    pub decay_after: Option<DateTime<Utc>>,
}

// Older writers stored an unset timestamp as 0001-01-01T00:00:00Z
fn zero_time_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|t| t.year() > 1))
}

/// Recovery rate applied by `Reputation::apply_decay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecaySettings {
    /// Points recovered per whole interval
    pub points: i32,
    pub interval: Duration,
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            points: 0,
            interval: Duration::from_secs(60),
        }
    }
}

impl DecaySettings {
    pub fn new(points: i32, interval: Duration) -> Self {
        Self { points, interval }
    }

    /// Points earned between `since` and `now`; partial intervals earn nothing
    pub fn points_recovered(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        if self.points <= 0 || self.interval.is_zero() {
            return 0;
        }
        let Ok(elapsed) = (now - since).to_std() else {
            return 0;
        };
        let intervals = elapsed.as_nanos() / self.interval.as_nanos();
        i64::try_from(intervals)
            .unwrap_or(i64::MAX)
            .saturating_mul(i64::from(self.points))
    }
}

impl Reputation {
    pub fn new(
        object_type: impl Into<String>,
        object: impl Into<String>,
        reputation: i32,
    ) -> Self {
        Self {
            object: object.into(),
            object_type: object_type.into(),
            reputation,
            reviewed: false,
            last_updated: Utc::now(),
            decay_after: None,
        }
    }

    /// Fresh entry for an object with no history
    pub fn pristine(object_type: impl Into<String>, object: impl Into<String>) -> Self {
        Self::new(object_type, object, MAX_SCORE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.object.is_empty() {
            return Err(ReputationError::MissingField("object"));
        }
        if self.object_type.is_empty() {
            return Err(ReputationError::MissingField("type"));
        }
        if !(MIN_SCORE..=MAX_SCORE).contains(&self.reputation) {
            return Err(ReputationError::InvalidScore(self.reputation));
        }
        Ok(())
    }

    /// Apply the named violation; returns false when the name is unknown
    pub fn apply_violation(&mut self, catalog: &ViolationCatalog, name: &str) -> bool {
        match catalog.lookup(name) {
            Some(violation) => {
                self.apply_penalty(violation);
                true
            }
            None => false,
        }
    }

    /// Subtract the penalty without going below the violation's floor
    pub fn apply_penalty(&mut self, violation: &Violation) {
        if self.reputation <= violation.decrease_limit {
            return;
        }
        self.reputation = self
            .reputation
            .saturating_sub(violation.penalty)
            .max(violation.decrease_limit);
    }

    /// Recover points for the time elapsed since `last_updated`
    ///
    /// Does not touch `last_updated`; repeated calls recompute from the same
    /// origin.
    pub fn apply_decay(&mut self, now: DateTime<Utc>, decay: &DecaySettings) {
        if let Some(after) = self.decay_after {
            if after > now {
                return;
            }
            self.decay_after = None;
        }

        let recovered = decay.points_recovered(self.last_updated, now);
        if recovered <= 0 {
            return;
        }
        let score = i64::from(self.reputation).saturating_add(recovered);
        if score >= i64::from(MAX_SCORE) {
            self.reputation = MAX_SCORE;
            self.reviewed = false;
        } else {
            self.reputation = score as i32;
        }
    }

    /// Suspend recovery until `now + secs`, never shortening an existing hold
    ///
    /// `secs` is capped at `MAX_SUPPRESS_RECOVERY_SECS`.
    pub fn suppress_recovery(&mut self, now: DateTime<Utc>, secs: i64) {
        if secs <= 0 {
            return;
        }
        let Some(until) = chrono::Duration::try_seconds(secs.min(MAX_SUPPRESS_RECOVERY_SECS))
            .and_then(|hold| now.checked_add_signed(hold))
        else {
            return;
        };
        match self.decay_after {
            Some(existing) if existing >= until => {}
            _ => self.decay_after = Some(until),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn per_minute(points: i32) -> DecaySettings {
        DecaySettings::new(points, Duration::from_secs(60))
    }

    fn catalog() -> ViolationCatalog {
        ViolationCatalog::new([
            Violation::new("violation1", 5, 25),
            Violation::new("violation2", 50, 50),
            Violation::new("violation3", 0, 0),
        ])
    }

    #[test]
    fn test_validate() {
        assert!(Reputation::new("ip", "10.0.0.1", 50).validate().is_ok());
        assert!(Reputation::new("ip", "10.0.0.1", 0).validate().is_ok());
        assert!(Reputation::new("ip", "10.0.0.1", 100).validate().is_ok());
        assert!(matches!(
            Reputation::new("ip", "10.0.0.1", 101).validate(),
            Err(ReputationError::InvalidScore(101))
        ));
        assert!(matches!(
            Reputation::new("ip", "10.0.0.1", -1).validate(),
            Err(ReputationError::InvalidScore(-1))
        ));
        assert!(matches!(
            Reputation::new("ip", "", 50).validate(),
            Err(ReputationError::MissingField("object"))
        ));
        assert!(matches!(
            Reputation::new("", "10.0.0.1", 50).validate(),
            Err(ReputationError::MissingField("type"))
        ));
    }

    #[test]
    fn test_violation_bounds_hold_for_all_scores() {
        let c = catalog();
        for name in ["violation1", "violation2", "violation3"] {
            let v = c.lookup(name).unwrap();
            for s in MIN_SCORE..=MAX_SCORE {
                let mut r = Reputation::new("ip", "10.0.0.1", s);
                assert!(r.apply_violation(&c, name));
                let lower = v.decrease_limit.max(s - v.penalty);
                if s <= v.decrease_limit {
                    assert_eq!(r.reputation, s);
                } else {
                    assert!(r.reputation >= lower && r.reputation <= s);
                    assert_eq!(r.reputation == v.decrease_limit, s - v.penalty <= v.decrease_limit);
                }
            }
        }
    }

    #[test]
    fn test_violation_at_floor_is_noop() {
        let c = catalog();
        let mut r = Reputation::new("ip", "10.0.0.1", 20);
        assert!(r.apply_violation(&c, "violation1"));
        assert_eq!(r.reputation, 20);
    }

    #[test]
    fn test_unknown_violation_unmatched() {
        let mut r = Reputation::pristine("ip", "10.0.0.1");
        assert!(!r.apply_violation(&catalog(), "nope"));
        assert_eq!(r.reputation, 100);
    }

    #[test]
    fn test_repeated_violation_stops_at_floor() {
        let c = catalog();
        let mut r = Reputation::pristine("ip", "10.0.0.1");
        for _ in 0..5 {
            r.apply_violation(&c, "violation1");
        }
        assert_eq!(r.reputation, 75);
        for _ in 0..95 {
            r.apply_violation(&c, "violation1");
        }
        assert_eq!(r.reputation, 25);
    }

    #[test]
    fn test_decay_whole_intervals_only() {
        let now = Utc::now();
        let mut r = Reputation::new("ip", "10.0.0.1", 50);
        r.last_updated = now - ChronoDuration::seconds(150);
        r.apply_decay(now, &per_minute(3));
        assert_eq!(r.reputation, 56);

        // origin unchanged, so the same call is stable
        r.reputation = 50;
        r.apply_decay(now, &per_minute(3));
        assert_eq!(r.reputation, 56);
    }

    #[test]
    fn test_decay_never_decreases_and_caps() {
        let now = Utc::now();
        for s in MIN_SCORE..=MAX_SCORE {
            let mut r = Reputation::new("ip", "10.0.0.1", s);
            r.last_updated = now - ChronoDuration::minutes(7);
            r.apply_decay(now, &per_minute(5));
            assert!(r.reputation >= s && r.reputation <= MAX_SCORE);
        }
    }

    #[test]
    fn test_decay_ignores_future_origin() {
        let now = Utc::now();
        let mut r = Reputation::new("ip", "10.0.0.1", 40);
        r.last_updated = now + ChronoDuration::hours(1);
        r.apply_decay(now, &per_minute(5));
        assert_eq!(r.reputation, 40);
    }

    #[test]
    fn test_decay_suspended_until_decay_after() {
        let now = Utc::now();
        let mut r = Reputation::new("ip", "10.0.0.1", 40);
        r.last_updated = now - ChronoDuration::days(30);
        r.decay_after = Some(now + ChronoDuration::seconds(1));
        r.apply_decay(now, &per_minute(5));
        assert_eq!(r.reputation, 40);
        assert!(r.decay_after.is_some());
    }

    #[test]
    fn test_decay_clears_elapsed_decay_after() {
        let now = Utc::now();
        let mut r = Reputation::new("ip", "10.0.0.1", 40);
        r.last_updated = now - ChronoDuration::minutes(2);
        r.decay_after = Some(now - ChronoDuration::seconds(1));
        r.apply_decay(now, &per_minute(5));
        assert!(r.decay_after.is_none());
        assert_eq!(r.reputation, 50);
    }

    #[test]
    fn test_reviewed_cleared_only_on_recovery_to_max() {
        let now = Utc::now();
        let mut r = Reputation::new("ip", "10.0.0.1", 90);
        r.reviewed = true;
        r.last_updated = now - ChronoDuration::minutes(1);
        r.apply_decay(now, &per_minute(5));
        assert_eq!(r.reputation, 95);
        assert!(r.reviewed);

        r.last_updated = now - ChronoDuration::minutes(2);
        r.reputation = 90;
        r.apply_decay(now, &per_minute(5));
        assert_eq!(r.reputation, 100);
        assert!(!r.reviewed);

        let mut idle = Reputation::new("ip", "10.0.0.1", 100);
        idle.reviewed = true;
        idle.apply_decay(now, &DecaySettings::default());
        assert!(idle.reviewed);
    }

    #[test]
    fn test_suppress_recovery_only_extends() {
        let now = Utc::now();
        let mut r = Reputation::pristine("ip", "10.0.0.1");
        r.suppress_recovery(now, 600);
        let t1 = r.decay_after.unwrap();

        r.suppress_recovery(now, 60);
        assert_eq!(r.decay_after, Some(t1));

        r.suppress_recovery(now, 6000);
        assert_eq!(r.decay_after, Some(now + ChronoDuration::seconds(6000)));

        r.suppress_recovery(now, 0);
        assert_eq!(r.decay_after, Some(now + ChronoDuration::seconds(6000)));
    }

    #[test]
    fn test_suppress_recovery_capped() {
        let now = Utc::now();
        let mut r = Reputation::pristine("ip", "10.0.0.1");
        r.suppress_recovery(now, i64::MAX);
        assert_eq!(
            r.decay_after,
            Some(now + ChronoDuration::seconds(MAX_SUPPRESS_RECOVERY_SECS))
        );

        let mut r = Reputation::pristine("ip", "10.0.0.1");
        r.suppress_recovery(DateTime::<Utc>::MAX_UTC, 60);
        assert_eq!(r.decay_after, None);
    }

    #[test]
    fn test_json_shape() {
        let mut r = Reputation::new("ip", "10.0.0.1", 50);
        r.last_updated = "2024-01-02T03:04:05Z".parse().unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "object": "10.0.0.1",
                "type": "ip",
                "reputation": 50,
                "reviewed": false,
                "lastupdated": "2024-01-02T03:04:05Z"
            })
        );

        r.decay_after = Some("2024-02-01T00:00:00Z".parse().unwrap());
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["decayafter"], "2024-02-01T00:00:00Z");
    }

    #[test]
    fn test_legacy_shapes_deserialize() {
        let r: Reputation = serde_json::from_str(
            r#"{"ip":"10.0.0.1","reputation":40,"reviewed":false,
                "lastupdated":"2024-01-02T03:04:05Z","decayafter":"0001-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(r.object_type.is_empty());
        assert!(r.decay_after.is_none());
        assert_eq!(r.reputation, 40);
    }
}
