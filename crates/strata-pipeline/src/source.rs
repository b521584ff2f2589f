//! Upstream market-data source seam.
//!
//! Fetch and rate-limit logic belongs to external collaborators; the
//! ingestion job only needs a per-symbol fetch with three outcomes: rows,
//! an explicit skip with a recorded reason, or a failure that aborts the
//! run. The trait keeps that seam injectable so tests drive ingestion from
//! in-memory fixtures.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use strata_core::{Domain, Symbol};

use crate::error::{PipelineError, Result};
use crate::tier::SeriesRow;

/// Result of fetching one symbol from a source.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The source produced raw rows for the symbol.
    Series(Vec<SeriesRow>),
    /// The source explicitly skipped the symbol.
    Skip {
        /// Recorded reason for the skip.
        reason: String,
    },
}

/// A per-symbol market-data source.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Name recorded on Bronze records produced from this source.
    fn name(&self) -> &str;

    /// Fetches one symbol.
    ///
    /// # Errors
    ///
    /// A returned error aborts the ingestion run: no manifest may describe
    /// a run whose fetches did not all resolve to rows or explicit skips.
    async fn fetch(&self, domain: &Domain, symbol: &Symbol) -> Result<FetchOutcome>;
}

/// In-memory source for tests and harnesses.
#[derive(Debug, Default)]
pub struct StaticSource {
    series: HashMap<String, Vec<SeriesRow>>,
    skips: HashMap<String, String>,
    failures: HashMap<String, String>,
}

impl StaticSource {
    /// Creates an empty source; unknown symbols are skipped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages rows for a symbol.
    #[must_use]
    pub fn with_series(mut self, symbol: &Symbol, rows: Vec<SeriesRow>) -> Self {
        self.series.insert(symbol.as_str().to_string(), rows);
        self
    }

    /// Stages an explicit skip for a symbol.
    #[must_use]
    pub fn with_skip(mut self, symbol: &Symbol, reason: impl Into<String>) -> Self {
        self.skips.insert(symbol.as_str().to_string(), reason.into());
        self
    }

    /// Stages a fetch failure for a symbol.
    #[must_use]
    pub fn with_failure(mut self, symbol: &Symbol, message: impl Into<String>) -> Self {
        self.failures
            .insert(symbol.as_str().to_string(), message.into());
        self
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _domain: &Domain, symbol: &Symbol) -> Result<FetchOutcome> {
        if let Some(message) = self.failures.get(symbol.as_str()) {
            return Err(PipelineError::source_failure(symbol.as_str(), message));
        }
        if let Some(rows) = self.series.get(symbol.as_str()) {
            return Ok(FetchOutcome::Series(rows.clone()));
        }
        if let Some(reason) = self.skips.get(symbol.as_str()) {
            return Ok(FetchOutcome::Skip {
                reason: reason.clone(),
            });
        }
        Ok(FetchOutcome::Skip {
            reason: "no data staged for symbol".into(),
        })
    }
}

/// Source backed by a staged-drop JSON file.
///
/// The file maps tickers to raw row arrays:
///
/// ```json
/// { "AAPL": [{"ts": "2026-01-05T21:00:00Z", "open": 100.0, ...}], "MSFT": [] }
/// ```
///
/// Symbols absent from the file are explicit skips: a staged drop is the
/// complete statement of what the upstream delivered for the batch.
#[derive(Debug)]
pub struct JsonFileSource {
    name: String,
    data: HashMap<String, Vec<SeriesRow>>,
}

impl JsonFileSource {
    /// Loads a staged drop from disk. Called once at job start.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            PipelineError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let data = serde_json::from_slice(&raw).map_err(|e| {
            PipelineError::configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        Ok(Self {
            name: format!("file:{}", path.display()),
            data,
        })
    }
}

#[async_trait]
impl MarketDataSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _domain: &Domain, symbol: &Symbol) -> Result<FetchOutcome> {
        match self.data.get(symbol.as_str()) {
            Some(rows) => Ok(FetchOutcome::Series(rows.clone())),
            None => Ok(FetchOutcome::Skip {
                reason: "absent from staged drop file".into(),
            }),
        }
    }
}
