//! Optional configuration file.
//!
//! ```toml
//! [publish]
//! source = "/srv/build/client"
//! branch_name = "production"
//! codec = { kind = "zstd", level = 19 }
//!
//! [s3]
//! endpoint = "minio.internal:9000"
//! bucket = "updates"
//! secure = false
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use cachepub_pipeline::PublishConfig;
use cachepub_store::S3Config;
use serde::{Deserialize, Serialize};

/// Contents of a `--config` file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Publish settings
    pub publish: PublishConfig,
    /// Store settings
    pub s3: S3Config,
}

impl FileConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: FileConfig = toml::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(config)
            }
            "json" => {
                let config: FileConfig = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
