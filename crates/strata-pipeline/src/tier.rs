//! Tier record model and the Bronze→Silver derivation.
//!
//! Bronze records carry raw per-symbol time-series rows exactly as fetched;
//! Silver records carry curated bars derived from exactly one committed
//! Bronze record. The derivation is deterministic: identical Bronze input
//! always produces byte-identical Silver output, which is what makes every
//! materialization upsert safe to replay.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use strata_core::storage::{BlobStore, PutCondition};
use strata_core::{Domain, Error as CoreError, Symbol, Tier, TierPaths};

use crate::error::Result;

/// One raw time-series row, as fetched from the upstream source.
///
/// Fields are optional because the Bronze tier preserves whatever the
/// source produced; validation happens at derivation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    /// Row timestamp as delivered by the source (RFC 3339 expected).
    pub ts: String,
    /// Opening price.
    pub open: Option<f64>,
    /// High price.
    pub high: Option<f64>,
    /// Low price.
    pub low: Option<f64>,
    /// Closing price.
    pub close: Option<f64>,
    /// Traded volume.
    pub volume: Option<f64>,
}

/// One curated bar in the Silver tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar timestamp.
    pub ts: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

/// Raw per-(symbol, domain, as-of) record in the Bronze tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeRecord {
    /// Dataset domain.
    pub domain: Domain,
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Batch date of the ingesting run.
    pub as_of: NaiveDate,
    /// Name of the upstream source that produced the rows.
    pub source: String,
    /// When the record was written.
    pub ingested_at: DateTime<Utc>,
    /// Raw rows, unvalidated.
    pub rows: Vec<SeriesRow>,
}

/// Curated per-(symbol, domain, as-of) record in the Silver tier.
///
/// Contains no wall-clock fields: the document is a pure function of its
/// Bronze input, so recomputation writes identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilverRecord {
    /// Dataset domain.
    pub domain: Domain,
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Batch date, mirroring the Bronze record it derives from.
    pub as_of: NaiveDate,
    /// `as_of` of the Bronze input (equal to `as_of`; kept explicit for
    /// audit once retention policies diverge between tiers).
    pub bronze_as_of: NaiveDate,
    /// Curated bars: validated, deduplicated by timestamp, ascending.
    pub bars: Vec<Bar>,
    /// Row count of the raw input.
    pub raw_row_count: usize,
    /// Rows removed by validation or timestamp deduplication.
    pub dropped_row_count: usize,
}

/// Derives the curated Silver record from a committed Bronze record.
#[must_use]
pub fn derive_silver(bronze: &BronzeRecord) -> SilverRecord {
    let (bars, dropped) = curate(&bronze.rows);
    SilverRecord {
        domain: bronze.domain.clone(),
        symbol: bronze.symbol.clone(),
        as_of: bronze.as_of,
        bronze_as_of: bronze.as_of,
        bars,
        raw_row_count: bronze.rows.len(),
        dropped_row_count: dropped,
    }
}

/// Validates and normalizes raw rows into curated bars.
///
/// Rows are dropped when the timestamp does not parse as RFC 3339, any
/// price is missing or non-positive, the high/low range is inverted, or
/// volume is negative. Duplicate timestamps keep the last occurrence.
/// Output is sorted ascending by timestamp. The returned count covers both
/// invalid and duplicate-shadowed rows.
#[must_use]
pub fn curate(rows: &[SeriesRow]) -> (Vec<Bar>, usize) {
    let mut by_ts: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();

    for row in rows {
        let Ok(ts) = DateTime::parse_from_rfc3339(&row.ts) else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) =
            (row.open, row.high, row.low, row.close)
        else {
            continue;
        };
        if open <= 0.0 || high <= 0.0 || low <= 0.0 || close <= 0.0 || high < low {
            continue;
        }
        let volume = row.volume.unwrap_or(0.0);
        if volume < 0.0 {
            continue;
        }

        by_ts.insert(
            ts.with_timezone(&Utc),
            Bar {
                ts: ts.with_timezone(&Utc),
                open,
                high,
                low,
                close,
                volume,
            },
        );
    }

    let bars: Vec<Bar> = by_ts.into_values().collect();
    let dropped = rows.len() - bars.len();
    (bars, dropped)
}

/// Reader/writer for tier records over the blob store.
#[derive(Clone)]
pub struct TierStore {
    store: Arc<dyn BlobStore>,
}

impl TierStore {
    /// Creates a tier store over the given backend.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Returns the set of symbols with at least one record in a tier.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the prefix listing.
    pub async fn symbols(&self, tier: Tier, domain: &Domain) -> Result<BTreeSet<Symbol>> {
        let prefix = TierPaths::tier_prefix(tier, domain);
        Ok(self
            .store
            .list(&prefix)
            .await?
            .iter()
            .filter_map(|meta| TierPaths::symbol_of_record(&meta.path, tier, domain))
            .collect())
    }

    /// Reads the latest committed Bronze record for a symbol.
    ///
    /// "Latest" is the maximum as-of date in the symbol's directory; the
    /// `YYYY-MM-DD` file names make that a lexicographic maximum.
    ///
    /// # Errors
    ///
    /// Returns storage errors from listing or reading, or a serialization
    /// error for a corrupt record. `None` means no record exists.
    pub async fn latest_bronze(
        &self,
        domain: &Domain,
        symbol: &Symbol,
    ) -> Result<Option<BronzeRecord>> {
        let prefix = TierPaths::symbol_prefix(Tier::Bronze, domain, symbol);
        let listed = self.store.list(&prefix).await?;

        let Some(latest) = listed.iter().map(|meta| meta.path.as_str()).max() else {
            return Ok(None);
        };

        let data = self.store.get(latest).await?;
        let record = serde_json::from_slice(&data)
            .map_err(|e| CoreError::serialization(format!("parse bronze record {latest}: {e}")))?;
        Ok(Some(record))
    }

    /// Writes a Bronze record (idempotent overwrite).
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn write_bronze(&self, record: &BronzeRecord) -> Result<()> {
        let path = TierPaths::record(Tier::Bronze, &record.domain, &record.symbol, record.as_of);
        self.write(&path, record).await
    }

    /// Writes a Silver record (idempotent overwrite).
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn write_silver(&self, record: &SilverRecord) -> Result<()> {
        let path = TierPaths::record(Tier::Silver, &record.domain, &record.symbol, record.as_of);
        self.write(&path, record).await
    }

    /// Reads a Silver record by symbol and as-of date.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors; a missing record is `None`.
    pub async fn get_silver(
        &self,
        domain: &Domain,
        symbol: &Symbol,
        as_of: NaiveDate,
    ) -> Result<Option<SilverRecord>> {
        let path = TierPaths::record(Tier::Silver, domain, symbol, as_of);
        match self.store.get(&path).await {
            Ok(data) => {
                let record = serde_json::from_slice(&data).map_err(|e| {
                    CoreError::serialization(format!("parse silver record {path}: {e}"))
                })?;
                Ok(Some(record))
            }
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(&self, path: &str, record: &T) -> Result<()> {
        let body = serde_json::to_vec(record)
            .map(Bytes::from)
            .map_err(|e| CoreError::serialization(format!("encode tier record: {e}")))?;
        self.store.put(path, body, PutCondition::Always).await?;
        Ok(())
    }
}
