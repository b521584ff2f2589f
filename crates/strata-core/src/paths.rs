//! Canonical object layout for Strata's durable store.
//!
//! This module is the single source of truth for all storage paths. All
//! writers must construct paths through [`TierPaths`]; no hardcoded path
//! strings should exist outside this module.
//!
//! # Path Layout
//!
//! ```text
//! bronze/{domain}/{symbol}/{as_of}.json
//! silver/{domain}/{symbol}/{as_of}.json
//! system/run-manifests/{domain}/{run_id}.json
//! system/run-manifests/{domain}/acks/{run_id}.json
//! system/reconciliation/{domain}/latest.json
//! system/locks/{lock_name}.json
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::RunId;

/// Data tiers in the medallion layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Raw, least-processed ingestion layer.
    Bronze,
    /// Curated layer derived from Bronze.
    Silver,
}

impl Tier {
    /// Returns the path segment for this tier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated dataset domain (e.g. `equities-daily`).
///
/// Domains scope symbol universes, manifests, locks, and reports. The
/// character set is restricted so a domain is always path-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Creates a validated domain.
    ///
    /// # Errors
    ///
    /// Returns an error unless the name is non-empty ASCII lowercase
    /// alphanumeric plus `-`/`_`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidInput("domain cannot be empty".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "domain '{name}' contains invalid characters (allowed: a-z, 0-9, '-', '_')"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the domain as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A validated canonical ticker symbol, unique within a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a validated symbol.
    ///
    /// # Errors
    ///
    /// Returns an error unless the ticker is non-empty uppercase ASCII
    /// alphanumeric plus `.`/`-` (path-safe, exchange-style).
    pub fn new(ticker: impl Into<String>) -> Result<Self> {
        let ticker = ticker.into();
        if ticker.is_empty() {
            return Err(Error::InvalidInput("symbol cannot be empty".into()));
        }
        if !ticker
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
        {
            return Err(Error::InvalidInput(format!(
                "symbol '{ticker}' contains invalid characters (allowed: A-Z, 0-9, '.', '-')"
            )));
        }
        Ok(Self(ticker))
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Canonical path generator for the durable store.
pub struct TierPaths;

impl TierPaths {
    /// Prefix covering every record of a tier within a domain.
    #[must_use]
    pub fn tier_prefix(tier: Tier, domain: &Domain) -> String {
        format!("{tier}/{domain}/")
    }

    /// Prefix covering every record of one symbol within a tier.
    #[must_use]
    pub fn symbol_prefix(tier: Tier, domain: &Domain, symbol: &Symbol) -> String {
        format!("{tier}/{domain}/{symbol}/")
    }

    /// Path of a per-(symbol, as-of) tier record.
    #[must_use]
    pub fn record(tier: Tier, domain: &Domain, symbol: &Symbol, as_of: NaiveDate) -> String {
        format!("{tier}/{domain}/{symbol}/{as_of}.json")
    }

    /// Prefix of the per-domain run-manifest log.
    #[must_use]
    pub fn manifest_prefix(domain: &Domain) -> String {
        format!("system/run-manifests/{domain}/")
    }

    /// Path of one run manifest.
    #[must_use]
    pub fn manifest(domain: &Domain, run_id: RunId) -> String {
        format!("system/run-manifests/{domain}/{run_id}.json")
    }

    /// Prefix of the per-domain acknowledgement log.
    #[must_use]
    pub fn ack_prefix(domain: &Domain) -> String {
        format!("system/run-manifests/{domain}/acks/")
    }

    /// Path of one acknowledgement.
    #[must_use]
    pub fn ack(domain: &Domain, run_id: RunId) -> String {
        format!("system/run-manifests/{domain}/acks/{run_id}.json")
    }

    /// Path of the per-domain reconciliation report (overwritten each run).
    #[must_use]
    pub fn reconciliation(domain: &Domain) -> String {
        format!("system/reconciliation/{domain}/latest.json")
    }

    /// Path of a named lock lease.
    #[must_use]
    pub fn lock(lock_name: &str) -> String {
        format!("system/locks/{lock_name}.json")
    }

    /// Extracts the symbol segment from a listed tier-record path.
    ///
    /// Returns `None` for paths outside the given tier/domain prefix or
    /// with an unexpected shape.
    #[must_use]
    pub fn symbol_of_record(path: &str, tier: Tier, domain: &Domain) -> Option<Symbol> {
        let prefix = Self::tier_prefix(tier, domain);
        let rest = path.strip_prefix(&prefix)?;
        let (ticker, remainder) = rest.split_once('/')?;
        if remainder.is_empty() || remainder.contains('/') {
            return None;
        }
        Symbol::new(ticker).ok()
    }
}
