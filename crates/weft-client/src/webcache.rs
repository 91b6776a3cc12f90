//! Web-version cache.
//!
//! The messenger ships a new page version frequently; pinning a session to a
//! known-good version means serving a cached copy of the index document
//! instead of the live response. The cache is pluggable: a local directory,
//! a remote HTTP store, or nothing.

use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;

/// Storage for index documents keyed by page version.
#[async_trait]
pub trait VersionCache: Send + Sync {
    /// Fetch the cached document for `version`, if present.
    async fn resolve(&self, version: &str) -> anyhow::Result<Option<String>>;

    /// Store the document observed for `version`. Read-only caches no-op.
    async fn persist(&self, version: &str, html: &str) -> anyhow::Result<()>;
}

/// No caching: always run the live page version.
pub struct NoopCache;

#[async_trait]
impl VersionCache for NoopCache {
    async fn resolve(&self, _version: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn persist(&self, _version: &str, _html: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A directory of `<version>.html` files.
pub struct LocalVersionCache {
    dir: PathBuf,
}

impl LocalVersionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, version: &str) -> PathBuf {
        // Versions come from the page; keep them from escaping the dir.
        let safe: String = version
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.html"))
    }
}

#[async_trait]
impl VersionCache for LocalVersionCache {
    async fn resolve(&self, version: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(version);
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Ok(Some(html)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn persist(&self, version: &str, html: &str) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(version);
        tokio::fs::write(&path, html)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// A read-only remote store of cached versions.
///
/// `url_pattern` contains a `{version}` placeholder, e.g.
/// `https://cache.example/html/{version}.html`.
pub struct RemoteVersionCache {
    url_pattern: String,
    client: reqwest::Client,
}

impl RemoteVersionCache {
    pub fn new(url_pattern: impl Into<String>) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VersionCache for RemoteVersionCache {
    async fn resolve(&self, version: &str) -> anyhow::Result<Option<String>> {
        let url = self.url_pattern.replace("{version}", version);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("fetching {url}"))?;
        Ok(Some(response.text().await?))
    }

    async fn persist(&self, _version: &str, _html: &str) -> anyhow::Result<()> {
        // The remote store is someone else's to fill.
        Ok(())
    }
}
