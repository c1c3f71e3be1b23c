// src/tools/mod.rs

//! External tools (CLIs that handlers shell out to), pinned by SHA-256.
//!
//! ```toml
//! name = "kubectl"
//!
//! [[builds]]
//! platform = "linux"
//! architecture = "amd64"
//! url = "https://example.com/kubectl"
//! sha256 = "0f3c..."
//! ```

use std::path::PathBuf;

use serde::Deserialize;

pub mod provisioner;

pub use provisioner::ToolProvisioner;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub builds: Vec<ToolBuild>,
}

impl ToolSpec {
    pub fn build_for(&self, platform: &str, architecture: &str) -> Option<&ToolBuild> {
        self.builds
            .iter()
            .find(|b| b.platform == platform && b.architecture == architecture)
    }

    pub fn current_build(&self) -> Option<&ToolBuild> {
        let (platform, architecture) = current_platform();
        self.build_for(platform, architecture)
    }
}

/// One downloadable artifact of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolBuild {
    /// `linux`, `darwin` or `windows`.
    pub platform: String,
    /// `amd64` or `arm64`.
    pub architecture: String,
    #[serde(flatten)]
    pub source: ToolSource,
    /// Expected lowercase hex digest of the artifact.
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Url(String),
    Path(PathBuf),
}

/// `(platform, architecture)` of the running host, in tool build naming.
pub fn current_platform() -> (&'static str, &'static str) {
    let platform = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let architecture = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (platform, architecture)
}
