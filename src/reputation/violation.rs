//! Violations and Violation Requests
//!
//! Violations are configured once at startup and never change while requests
//! are served. A violation carries a penalty and a floor (`decreaselimit`)
//! below which repeated applications cannot push a score.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{ReputationError, Result};
use super::key::TYPE_IP;

/// Upper bound on recovery suppression, two weeks in seconds
pub const MAX_SUPPRESS_RECOVERY_SECS: i64 = 1_209_600;

/// A named penalty that can be applied to an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub name: String,

    /// Points subtracted per application
    pub penalty: i32,

    /// Lowest score this violation can push a reputation to
    #[serde(rename = "decreaselimit")]
    pub decrease_limit: i32,
}

impl Violation {
    pub fn new(name: impl Into<String>, penalty: i32, decrease_limit: i32) -> Self {
        Self {
            name: name.into(),
            penalty,
            decrease_limit,
        }
    }
}

/// Read-only lookup of violations by name
///
/// Keeps configured order for listing. When a name is configured more than
/// once the first entry wins.
#[derive(Debug, Clone, Default)]
pub struct ViolationCatalog {
    ordered: Vec<Violation>,
    by_name: HashMap<String, usize>,
}

impl ViolationCatalog {
    pub fn new(violations: impl IntoIterator<Item = Violation>) -> Self {
        let mut catalog = Self::default();
        for violation in violations {
            if catalog.by_name.contains_key(&violation.name) {
                continue;
            }
            catalog
                .by_name
                .insert(violation.name.clone(), catalog.ordered.len());
            catalog.ordered.push(violation);
        }
        catalog
    }

    pub fn lookup(&self, name: &str) -> Option<&Violation> {
        self.by_name.get(name).and_then(|&i| self.ordered.get(i))
    }

    /// All violations in configured order
    pub fn violations(&self) -> &[Violation] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Request to apply a violation to an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub violation: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object: String,

    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub object_type: String,

    /// Seconds before the object's reputation may begin to recover
    #[serde(default, skip_serializing_if = "is_zero")]
    pub suppress_recovery: i64,

    /// Older clients send the address here instead of `object`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl ViolationRequest {
    pub fn new(
        violation: impl Into<String>,
        object_type: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            violation: violation.into(),
            object: object.into(),
            object_type: object_type.into(),
            ..Default::default()
        }
    }

    pub fn with_suppress_recovery(mut self, secs: i64) -> Self {
        self.suppress_recovery = secs;
        self
    }

    /// Convert legacy IP-only requests; a no-op for other types
    pub fn fixup(&mut self, typestr: &str) {
        if typestr != TYPE_IP {
            return;
        }
        if self.object_type.is_empty() {
            self.object_type = typestr.to_string();
        }
        if self.object.is_empty() && !self.ip.is_empty() {
            self.object = self.ip.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.violation.is_empty() {
            return Err(ReputationError::InvalidRequest(
                "missing required field violation".into(),
            ));
        }
        if self.object.is_empty() {
            return Err(ReputationError::InvalidRequest(
                "missing required field object".into(),
            ));
        }
        if self.object_type.is_empty() {
            return Err(ReputationError::InvalidRequest(
                "missing required field type".into(),
            ));
        }
        if self.suppress_recovery > MAX_SUPPRESS_RECOVERY_SECS {
            return Err(ReputationError::InvalidRequest(format!(
                "invalid suppress recovery value {}",
                self.suppress_recovery
            )));
        }
        Ok(())
    }
}
