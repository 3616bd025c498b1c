use std::path::Path;
use thiserror::Error;

use crate::models::NewCat;

/// Errors raised while reading the seed catalogue
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid seed file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Seed cat {name:?} in {path} has no id")]
    MissingId { path: String, name: String },
}

/// Load the initial cat catalogue from a JSON array of `{ id, name, url }`
///
/// Seed entries must carry an id so that restarts do not duplicate cats.
pub async fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<Vec<NewCat>, SeedError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let raw = tokio::fs::read_to_string(path).await.map_err(|source| SeedError::Io {
        path: shown.clone(),
        source,
    })?;

    let cats: Vec<NewCat> = serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
        path: shown.clone(),
        source,
    })?;

    if let Some(cat) = cats.iter().find(|cat| cat.id.as_deref().map_or(true, str::is_empty)) {
        return Err(SeedError::MissingId {
            path: shown,
            name: cat.name.clone(),
        });
    }

    tracing::info!("Loaded {} seed cats from {}", cats.len(), shown);
    Ok(cats)
}
