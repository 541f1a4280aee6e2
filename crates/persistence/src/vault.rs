//! Vault-pattern record construction.
//!
//! Hubs carry identity, satellites carry historized descriptive attributes,
//! and links carry relationships. Every record is keyed by a content hash from
//! [`crate::hash`], stamped with a UTC load date and a record source. Records
//! are append-only values: nothing in this module mutates a record once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HashResult;
use crate::hash::{HashDiff, HashKey, KeyPart, compute_hash_diff, compute_hash_key};

/// Default record source for records loaded by the platform itself.
pub const DEFAULT_RECORD_SOURCE: &str = "onevault_platform";

/// Load metadata shared by every record built in one load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStamp {
    /// When the load happened.
    pub load_date: DateTime<Utc>,
    /// Which system produced the data.
    pub record_source: String,
}

impl LoadStamp {
    /// Stamps the current instant with the given record source.
    pub fn now(record_source: impl Into<String>) -> Self {
        Self {
            load_date: Utc::now(),
            record_source: record_source.into(),
        }
    }

    /// Stamps a fixed instant, for replays and tests.
    pub fn at(load_date: DateTime<Utc>, record_source: impl Into<String>) -> Self {
        Self {
            load_date,
            record_source: record_source.into(),
        }
    }
}

impl Default for LoadStamp {
    fn default() -> Self {
        Self::now(DEFAULT_RECORD_SOURCE)
    }
}

/// A hub record: one row per distinct business key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubRecord {
    /// The natural business key.
    pub business_key: String,
    /// Hash of the business key (and parent key, for hierarchical hubs).
    pub hash_key: HashKey,
    /// Hash key of the owning hub, for hierarchical hubs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash_key: Option<HashKey>,
    /// When the record was loaded.
    pub load_date: DateTime<Utc>,
    /// Which system produced the record.
    pub record_source: String,
}

impl HubRecord {
    /// Builds a root hub record keyed by `hash(business_key)`.
    pub fn new(business_key: impl Into<String>, stamp: &LoadStamp) -> HashResult<Self> {
        let business_key = business_key.into();
        let hash_key = compute_hash_key([business_key.as_str()])?;
        Ok(Self {
            business_key,
            hash_key,
            parent_hash_key: None,
            load_date: stamp.load_date,
            record_source: stamp.record_source.clone(),
        })
    }

    /// Builds a hub record owned by a parent hub.
    ///
    /// The key is `hash(business_key, hex(parent))`, so the same business key
    /// under two parents yields two distinct hubs.
    pub fn with_parent(
        business_key: impl Into<String>,
        parent: HashKey,
        stamp: &LoadStamp,
    ) -> HashResult<Self> {
        let business_key = business_key.into();
        let parent_hex = parent.to_hex();
        let hash_key = compute_hash_key([business_key.as_str(), parent_hex.as_str()])?;
        Ok(Self {
            business_key,
            hash_key,
            parent_hash_key: Some(parent),
            load_date: stamp.load_date,
            record_source: stamp.record_source.clone(),
        })
    }
}

/// Builds the tenant hub record for a tenant business key.
pub fn tenant_hub(tenant_bk: &str, stamp: &LoadStamp) -> HashResult<HubRecord> {
    HubRecord::new(tenant_bk, stamp)
}

/// Builds a user hub record scoped to its tenant hub.
pub fn user_hub(user_bk: &str, tenant_hk: HashKey, stamp: &LoadStamp) -> HashResult<HubRecord> {
    HubRecord::with_parent(user_bk, tenant_hk, stamp)
}

/// A satellite record: one historized version of a hub's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteRecord {
    /// The hub this satellite describes.
    pub parent_hash_key: HashKey,
    /// Digest of the attribute values, in attribute order.
    pub hash_diff: HashDiff,
    /// Attribute names and values, in the order they were hashed.
    pub attributes: Vec<(String, serde_json::Value)>,
    /// When the record was loaded.
    pub load_date: DateTime<Utc>,
    /// Which system produced the record.
    pub record_source: String,
}

impl SatelliteRecord {
    /// Builds a satellite version from ordered attributes.
    ///
    /// Attribute values must be JSON scalars; nulls are encoded in the hash
    /// diff rather than skipped.
    pub fn new(
        parent_hash_key: HashKey,
        attributes: Vec<(String, serde_json::Value)>,
        stamp: &LoadStamp,
    ) -> HashResult<Self> {
        let parts = attributes
            .iter()
            .enumerate()
            .map(|(index, (_, value))| KeyPart::from_json(index, value))
            .collect::<HashResult<Vec<_>>>()?;
        let hash_diff = compute_hash_diff(parts)?;
        Ok(Self {
            parent_hash_key,
            hash_diff,
            attributes,
            load_date: stamp.load_date,
            record_source: stamp.record_source.clone(),
        })
    }

    /// Returns `true` if `other` carries different attribute values.
    pub fn differs_from(&self, other: &SatelliteRecord) -> bool {
        self.hash_diff != other.hash_diff
    }
}

/// A link record relating two or more hubs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Hash of the participating hub keys, in order.
    pub link_hash_key: HashKey,
    /// Participating hub keys.
    pub hub_hash_keys: Vec<HashKey>,
    /// When the record was loaded.
    pub load_date: DateTime<Utc>,
    /// Which system produced the record.
    pub record_source: String,
}

impl LinkRecord {
    /// Builds a link over the given hubs; order is significant.
    pub fn new(hub_hash_keys: Vec<HashKey>, stamp: &LoadStamp) -> HashResult<Self> {
        let link_hash_key = compute_hash_key(hub_hash_keys.iter())?;
        Ok(Self {
            link_hash_key,
            hub_hash_keys,
            load_date: stamp.load_date,
            record_source: stamp.record_source.clone(),
        })
    }
}
