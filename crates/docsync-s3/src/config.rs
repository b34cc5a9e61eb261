use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use docsync_core::StaticCatalog;

/// Configuration for the docsync-s3 mirror daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "docsync-s3")]
#[command(about = "Mirror a folder of JSON documents from S3/R2 and watch it for changes")]
pub struct Config {
    /// Bucket holding the documents
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: String,

    /// Custom endpoint URL (e.g. https://<account>.r2.cloudflarestorage.com)
    #[arg(long, env = "S3_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Region; R2 expects "auto"
    #[arg(long, default_value = "auto", env = "S3_REGION")]
    pub region: String,

    /// Access key ID; falls back to the default AWS credential chain
    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    /// Secret access key
    #[arg(long, env = "S3_SECRET_ACCESS_KEY")]
    pub secret_access_key: Option<String>,

    /// Remote folder holding the catalog
    #[arg(long, default_value = "/JSONs", env = "DOCSYNC_FOLDER")]
    pub folder: String,

    /// Logical group name of the catalog
    #[arg(long, default_value = "content", env = "DOCSYNC_GROUP")]
    pub group: String,

    /// File names making up the catalog (repeat or comma-separate)
    #[arg(long = "item", env = "DOCSYNC_ITEMS", value_delimiter = ',', required = true)]
    pub items: Vec<String>,

    /// Local cache root; defaults to the platform data directory
    #[arg(long, env = "DOCSYNC_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Polling interval for remote revisions (seconds)
    #[arg(long, default_value = "10", env = "DOCSYNC_POLL_INTERVAL")]
    pub poll_interval_secs: u64,

    /// host:port probed to decide whether the network is reachable
    #[arg(long, env = "DOCSYNC_PROBE_ADDR")]
    pub probe_addr: Option<String>,

    /// Connectivity probe interval (seconds)
    #[arg(long, default_value = "5", env = "DOCSYNC_PROBE_INTERVAL")]
    pub probe_interval_secs: u64,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    /// Explicit static credentials, if both halves were given.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }

    /// Get the effective connectivity probe address.
    pub fn effective_probe_addr(&self) -> String {
        if let Some(addr) = &self.probe_addr {
            return addr.clone();
        }

        let host = self
            .endpoint_url
            .as_deref()
            .and_then(endpoint_authority)
            .unwrap_or_else(|| format!("s3.{}.amazonaws.com", self.region));

        if host.contains(':') {
            host
        } else {
            format!("{}:443", host)
        }
    }

    /// Catalog described by the command line.
    pub fn catalog(&self) -> StaticCatalog {
        self.items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .fold(
                StaticCatalog::new(self.group.as_str(), self.folder.as_str()),
                |catalog, item| catalog.with_item(item),
            )
    }
}

/// `host[:port]` part of an endpoint URL.
fn endpoint_authority(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    (!authority.is_empty()).then(|| authority.to_string())
}
