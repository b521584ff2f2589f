//! CLI command implementations, one module per batch job.

pub mod ingest;
pub mod materialize;
pub mod reconcile;

use std::path::Path;
use std::sync::Arc;

use strata_core::storage::BlobStore;
use strata_core::ObjectStoreBackend;

/// Opens the durable store rooted at `data_dir`, creating it if needed.
pub(crate) fn open_store(data_dir: &Path) -> anyhow::Result<Arc<dyn BlobStore>> {
    std::fs::create_dir_all(data_dir)?;
    let backend = ObjectStoreBackend::local(data_dir)?;
    Ok(Arc::new(backend))
}
