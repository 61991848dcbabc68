use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Module,
    Plan,
    Pricing,
    User,
    Billing,
    License,
    Payment,
    Subscription,
    Install,
    /// Short-lived claim rows used to let one of several duplicate
    /// migration requests proceed.
    MigrationClaim,
}

impl EntityType {
    pub const ALL: [Self; 10] = [
        Self::Module,
        Self::Plan,
        Self::Pricing,
        Self::User,
        Self::Billing,
        Self::License,
        Self::Payment,
        Self::Subscription,
        Self::Install,
        Self::MigrationClaim,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Plan => "plan",
            Self::Pricing => "pricing",
            Self::User => "user",
            Self::Billing => "billing",
            Self::License => "license",
            Self::Payment => "payment",
            Self::Subscription => "subscription",
            Self::Install => "install",
            Self::MigrationClaim => "migration_claim",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type `{0}`")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == normalized)
            .ok_or_else(|| UnknownEntityType(raw.to_string()))
    }
}

/// One durable local⇄remote linkage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: i64,
    pub namespace: String,
    pub entity_type: EntityType,
    pub local_id: String,
    pub remote_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an insert-if-absent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Inserted(MappingRecord),
    /// Another writer already owns the key; carries the winner's record.
    Existing(MappingRecord),
}

impl LinkOutcome {
    #[must_use]
    pub fn record(&self) -> &MappingRecord {
        match self {
            Self::Inserted(record) | Self::Existing(record) => record,
        }
    }

    #[must_use]
    pub fn into_record(self) -> MappingRecord {
        match self {
            Self::Inserted(record) | Self::Existing(record) => record,
        }
    }

    #[must_use]
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    #[must_use]
    pub fn remote_id(&self) -> u64 {
        self.record().remote_id
    }
}
