// src/tools/provisioner.rs

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{ActionGraphError, Result};
use crate::tools::{ToolBuild, ToolSource, ToolSpec};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Downloads (or copies) tool artifacts and verifies their digest before
/// anything lands at the destination.
#[derive(Debug, Clone, Default)]
pub struct ToolProvisioner {
    client: reqwest::Client,
}

impl ToolProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Make the build of `spec` for this host available at
    /// `dest_dir/<name>` and return that path.
    ///
    /// The artifact is streamed into a temporary file next to the
    /// destination while hashing. On a digest mismatch the temporary file is
    /// removed and the destination is left as it was.
    pub async fn fetch(&self, spec: &ToolSpec, dest_dir: &Path) -> Result<PathBuf> {
        let build = spec.current_build().ok_or_else(|| {
            let (platform, architecture) = super::current_platform();
            anyhow!(
                "tool '{}' has no build for {platform}/{architecture}",
                spec.name
            )
        })?;
        self.fetch_build(&spec.name, build, dest_dir).await
    }

    pub async fn fetch_build(
        &self,
        name: &str,
        build: &ToolBuild,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let dest = dest_dir.join(name);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            let existing = hash_file(&dest).await?;
            if digest_matches(&existing, &build.sha256) {
                debug!(tool = name, path = ?dest, "tool already present and verified");
                return Ok(dest);
            }
            warn!(tool = name, path = ?dest, "existing tool does not match expected digest; refetching");
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("creating tool directory {:?}", dest_dir))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".partial")
            .tempfile_in(dest_dir)?;

        let actual = match &build.source {
            ToolSource::Url(url) => self.download(url, &mut tmp).await?,
            ToolSource::Path(path) => copy_local(path, &mut tmp).await?,
        };

        if !digest_matches(&actual, &build.sha256) {
            // Dropping the temp file deletes it.
            drop(tmp);
            return Err(ActionGraphError::ToolIntegrity {
                tool: name.to_string(),
                expected: build.sha256.to_lowercase(),
                actual,
            });
        }

        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        make_executable(tmp.path())?;
        tmp.persist(&dest).map_err(|e| e.error)?;

        info!(tool = name, path = ?dest, sha256 = %actual, "tool provisioned");
        Ok(dest)
    }

    /// Fetch several tools concurrently. Fails with the first error, after
    /// every fetch has finished.
    pub async fn fetch_all(
        &self,
        specs: &[ToolSpec],
        dest_dir: &Path,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let mut set = JoinSet::new();
        for spec in specs {
            let this = self.clone();
            let spec = spec.clone();
            let dest_dir = dest_dir.to_path_buf();
            set.spawn(async move {
                let result = this.fetch(&spec, &dest_dir).await;
                (spec.name, result)
            });
        }

        let mut paths = BTreeMap::new();
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let (name, result) = joined.map_err(|e| anyhow!("tool fetch task failed: {e}"))?;
            match result {
                Ok(path) => {
                    paths.insert(name, path);
                }
                Err(err) => {
                    warn!(tool = %name, error = %err, "tool fetch failed");
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(paths),
        }
    }

    async fn download(&self, url: &str, tmp: &mut NamedTempFile) -> Result<String> {
        debug!(url, "downloading tool");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("requesting {url}"))?;

        let mut hasher = Sha256::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("reading body of {url}"))?
        {
            hasher.update(&chunk);
            tmp.write_all(&chunk)?;
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

async fn copy_local(path: &Path, tmp: &mut NamedTempFile) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening tool source {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        tmp.write_all(&buf[..n])?;
    }
    Ok(format!("{:x}", hasher.finalize()))
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
