//! Distribution/version resolution.
//!
//! Picks the effective tool for a project and makes sure it is installed
//! before anything runs. Exactly one ensure call is made per run step, always
//! on the effective distribution.

use async_trait::async_trait;
use runstep_core::env::ToolEnv;
use runstep_core::{Distribution, EngineConfig, ExecutionContext, ToolVersion};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{distribution} {version} is not installed: {} does not exist", .path.display())]
    NotInstalled {
        distribution: Distribution,
        version: ToolVersion,
        path: PathBuf,
    },
    #[error("failed to ensure {distribution} {version}: {message}")]
    Failed {
        distribution: Distribution,
        version: ToolVersion,
        message: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Makes a tool version available, installing it if needed.
///
/// Implementations must be idempotent: ensuring an installed version is a
/// cheap no-op.
#[async_trait]
pub trait VersionEnsurer: Send + Sync {
    async fn ensure_version(&self, distribution: Distribution, version: &ToolVersion)
        -> Result<()>;
}

/// The project's choice where set, otherwise the engine default.
pub fn effective_tool(ctx: &ExecutionContext, config: &EngineConfig) -> ToolEnv {
    ToolEnv {
        bin_dir: config.bin_dir.clone(),
        distribution: ctx.distribution.unwrap_or(config.default_distribution),
        version: ctx
            .version
            .clone()
            .unwrap_or_else(|| config.default_version.clone()),
    }
}

/// Resolve the effective tool and ensure it is installed.
///
/// Ensure failures are returned as-is; nothing is retried.
pub async fn resolve(
    ensurer: &dyn VersionEnsurer,
    ctx: &ExecutionContext,
    config: &EngineConfig,
) -> Result<ToolEnv> {
    let tool = effective_tool(ctx, config);
    debug!(
        distribution = %tool.distribution,
        version = %tool.version,
        project_override = ctx.distribution.is_some() || ctx.version.is_some(),
        "ensuring tool version"
    );
    ensurer
        .ensure_version(tool.distribution, &tool.version)
        .await?;
    Ok(tool)
}

/// Checks that a versioned binary is present in the bin dir.
///
/// Binaries are laid out as `{bin_dir}/{binary}{version}`, e.g.
/// `terraform1.5.7` or `tofu1.6.2`. Fetching missing versions is left to
/// the installer that populates the directory.
#[derive(Debug, Clone)]
pub struct BinDirEnsurer {
    bin_dir: PathBuf,
}

impl BinDirEnsurer {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
        }
    }

    pub fn binary_path(&self, distribution: Distribution, version: &ToolVersion) -> PathBuf {
        self.bin_dir
            .join(format!("{}{version}", distribution.binary_name()))
    }
}

#[async_trait]
impl VersionEnsurer for BinDirEnsurer {
    async fn ensure_version(
        &self,
        distribution: Distribution,
        version: &ToolVersion,
    ) -> Result<()> {
        let path = self.binary_path(distribution, version);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        Err(ResolveError::NotInstalled {
            distribution,
            version: version.clone(),
            path,
        })
    }
}

/// Ensurer that records every call; optionally fails each one.
///
/// Only built for tests and with the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingEnsurer {
    calls: std::sync::Mutex<Vec<(Distribution, ToolVersion)>>,
    fail_with: Option<String>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingEnsurer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            calls: std::sync::Mutex::default(),
            fail_with: Some(message.into()),
        }
    }

    pub fn calls(&self) -> Vec<(Distribution, ToolVersion)> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl VersionEnsurer for RecordingEnsurer {
    async fn ensure_version(
        &self,
        distribution: Distribution,
        version: &ToolVersion,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((distribution, version.clone()));
        match &self.fail_with {
            Some(message) => Err(ResolveError::Failed {
                distribution,
                version: version.clone(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> EngineConfig {
        EngineConfig {
            default_distribution: Distribution::Terraform,
            default_version: ToolVersion::new(0, 8, 0),
            bin_dir: PathBuf::from("/bin/dir"),
            ..Default::default()
        }
    }

    #[test]
    fn effective_tool_falls_back_to_defaults() {
        let tool = effective_tool(&ExecutionContext::default(), &config());
        assert_eq!(tool.distribution, Distribution::Terraform);
        assert_eq!(tool.version, ToolVersion::new(0, 8, 0));
        assert_eq!(tool.bin_dir, PathBuf::from("/bin/dir"));
    }

    #[test]
    fn effective_tool_prefers_project_choice() {
        let ctx = ExecutionContext {
            distribution: Some(Distribution::OpenTofu),
            version: Some(ToolVersion::new(1, 6, 0)),
            ..Default::default()
        };
        let tool = effective_tool(&ctx, &config());
        assert_eq!(tool.distribution, Distribution::OpenTofu);
        assert_eq!(tool.version, ToolVersion::new(1, 6, 0));
    }

    #[test]
    fn effective_tool_mixes_override_and_default() {
        let ctx = ExecutionContext {
            version: Some(ToolVersion::new(1, 2, 3)),
            ..Default::default()
        };
        let tool = effective_tool(&ctx, &config());
        assert_eq!(tool.distribution, Distribution::Terraform);
        assert_eq!(tool.version, ToolVersion::new(1, 2, 3));
    }

    #[tokio::test]
    async fn resolve_ensures_defaults_once() {
        let ensurer = RecordingEnsurer::new();
        resolve(&ensurer, &ExecutionContext::default(), &config())
            .await
            .unwrap();
        assert_eq!(
            ensurer.calls(),
            vec![(Distribution::Terraform, ToolVersion::new(0, 8, 0))]
        );
    }

    #[tokio::test]
    async fn resolve_never_touches_default_when_project_overrides() {
        let ensurer = RecordingEnsurer::new();
        let ctx = ExecutionContext {
            distribution: Some(Distribution::OpenTofu),
            version: Some(ToolVersion::new(1, 6, 0)),
            ..Default::default()
        };
        resolve(&ensurer, &ctx, &config()).await.unwrap();
        assert_eq!(
            ensurer.calls(),
            vec![(Distribution::OpenTofu, ToolVersion::new(1, 6, 0))]
        );
    }

    #[tokio::test]
    async fn resolve_does_not_double_call_when_override_equals_default() {
        let ensurer = RecordingEnsurer::new();
        let ctx = ExecutionContext {
            distribution: Some(Distribution::Terraform),
            version: Some(ToolVersion::new(0, 8, 0)),
            ..Default::default()
        };
        resolve(&ensurer, &ctx, &config()).await.unwrap();
        assert_eq!(ensurer.calls().len(), 1);
    }

    #[tokio::test]
    async fn resolve_surfaces_ensure_failure() {
        let ensurer = RecordingEnsurer::failing("checksum mismatch");
        let err = resolve(&ensurer, &ExecutionContext::default(), &config())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to ensure terraform 0.8.0: checksum mismatch"
        );
        assert_eq!(ensurer.calls().len(), 1);
    }

    #[tokio::test]
    async fn bin_dir_ensurer_checks_versioned_binary() {
        let dir = TempDir::new().unwrap();
        let ensurer = BinDirEnsurer::new(dir.path());
        let version = ToolVersion::new(1, 6, 2);

        let err = ensurer
            .ensure_version(Distribution::OpenTofu, &version)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotInstalled { .. }));

        std::fs::write(dir.path().join("tofu1.6.2"), "").unwrap();
        ensurer
            .ensure_version(Distribution::OpenTofu, &version)
            .await
            .unwrap();
        // Idempotent.
        ensurer
            .ensure_version(Distribution::OpenTofu, &version)
            .await
            .unwrap();
    }
}
