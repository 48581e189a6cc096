use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MarketplaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Category,
    Brand,
    Attribute,
}

impl MappingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingKind::Category => "category",
            MappingKind::Brand => "brand",
            MappingKind::Attribute => "attribute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "category" => Some(MappingKind::Category),
            "brand" => Some(MappingKind::Brand),
            "attribute" => Some(MappingKind::Attribute),
            _ => None,
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    Manual,
    Auto,
    Assisted,
}

impl MappingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingMethod::Manual => "manual",
            MappingMethod::Auto => "auto",
            MappingMethod::Assisted => "assisted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(MappingMethod::Manual),
            "auto" => Some(MappingMethod::Auto),
            "assisted" => Some(MappingMethod::Assisted),
            _ => None,
        }
    }
}

/// At most one active mapping exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingKey {
    pub local_id: String,
    pub marketplace: MarketplaceId,
    pub kind: MappingKind,
}

impl MappingKey {
    pub fn new(local_id: impl Into<String>, marketplace: MarketplaceId, kind: MappingKind) -> Self {
        Self {
            local_id: local_id.into(),
            marketplace,
            kind,
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.marketplace, self.kind, self.local_id)
    }
}

/// Association between a local taxonomy entity and its marketplace
/// counterpart.
///
/// Construct through [`MappingEntry::manual`] or [`MappingEntry::scored`] so
/// the confidence invariant holds: manual is always `1.0`, scored entries are
/// clamped into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub local_id: String,
    pub marketplace: MarketplaceId,
    pub kind: MappingKind,
    pub remote_id: String,
    pub remote_name: String,
    pub method: MappingMethod,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl MappingEntry {
    pub fn manual(
        key: MappingKey,
        remote_id: impl Into<String>,
        remote_name: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id: key.local_id,
            marketplace: key.marketplace,
            kind: key.kind,
            remote_id: remote_id.into(),
            remote_name: remote_name.into(),
            method: MappingMethod::Manual,
            confidence: 1.0,
            updated_at,
        }
    }

    /// An auto or assisted entry. Passing `Manual` here still pins the
    /// confidence to `1.0`.
    pub fn scored(
        key: MappingKey,
        remote_id: impl Into<String>,
        remote_name: impl Into<String>,
        method: MappingMethod,
        confidence: f64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let confidence = match method {
            MappingMethod::Manual => 1.0,
            _ if confidence.is_nan() => 0.0,
            _ => confidence.clamp(0.0, 1.0),
        };
        Self {
            local_id: key.local_id,
            marketplace: key.marketplace,
            kind: key.kind,
            remote_id: remote_id.into(),
            remote_name: remote_name.into(),
            method,
            confidence,
            updated_at,
        }
    }

    pub fn key(&self) -> MappingKey {
        MappingKey {
            local_id: self.local_id.clone(),
            marketplace: self.marketplace,
            kind: self.kind,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.method == MappingMethod::Manual
    }
}
