//! Core types describing a single run-step invocation.

use crate::version::{Distribution, ToolVersion};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one run-step invocation.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Repository identity as seen by the VCS host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    pub name: String,
    pub owner: String,
}

impl Repo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// `owner/name`, or just the name when the owner is unknown.
    pub fn full_name(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.owner, self.name)
        }
    }
}

/// Pull request that triggered the run step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    /// `None` when the step does not run for a pull request.
    pub num: Option<u64>,
    pub url: String,
    pub author: String,
    pub head_branch: String,
    pub base_branch: String,
    pub head_commit: String,
}

/// VCS user who triggered the run step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
}

/// Immutable description of the project and triggering event for one run step.
///
/// `distribution` and `version` are the project's own overrides; `None` means
/// "use the engine default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    pub base_repo: Repo,
    pub head_repo: Repo,
    pub pull: PullRequest,
    pub user: User,
    pub workspace: String,
    pub repo_rel_dir: String,
    pub project_name: String,
    pub distribution: Option<Distribution>,
    pub version: Option<ToolVersion>,
    pub escaped_comment_args: Vec<String>,
    /// Set when the step runs as part of a custom policy check.
    pub custom_policy_check: bool,
}

impl ExecutionContext {
    /// Key identifying this run for output subscribers.
    pub fn run_key(&self) -> RunKey {
        RunKey {
            workspace: self.workspace.clone(),
            repo: self.base_repo.full_name(),
            project: self.project_name.clone(),
        }
    }
}

/// Identifies the stream a run step's output belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub workspace: String,
    pub repo: String,
    pub project: String,
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.project.is_empty() {
            write!(f, "{}/{}", self.repo, self.workspace)
        } else {
            write!(f, "{}/{}/{}", self.repo, self.project, self.workspace)
        }
    }
}

/// What to do with captured output before returning it to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessMode {
    /// Return the output unmodified.
    #[default]
    Show,
    /// Return nothing; the output is only streamed.
    Hide,
    /// Treat the output as plan output and drop the state-refresh preamble.
    StripRefreshing,
}

impl PostProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::StripRefreshing => "strip_refreshing",
        }
    }
}

impl std::str::FromStr for PostProcessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "show" => Ok(Self::Show),
            "hide" => Ok(Self::Hide),
            "strip_refreshing" => Ok(Self::StripRefreshing),
            other => Err(format!(
                "post-process mode must be 'show', 'hide', or 'strip_refreshing', got '{other}'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_full_name_joins_owner() {
        assert_eq!(Repo::new("acme", "infra").full_name(), "acme/infra");
        assert_eq!(Repo::new("", "infra").full_name(), "infra");
    }

    #[test]
    fn run_key_uses_base_repo_and_project() {
        let ctx = ExecutionContext {
            base_repo: Repo::new("baseowner", "basename"),
            head_repo: Repo::new("headowner", "headname"),
            workspace: "default".to_string(),
            project_name: "network".to_string(),
            ..Default::default()
        };
        let key = ctx.run_key();
        assert_eq!(key.repo, "baseowner/basename");
        assert_eq!(key.to_string(), "baseowner/basename/network/default");
    }

    #[test]
    fn context_deserializes_with_missing_fields() {
        let json = r#"{
            "base_repo": {"name": "basename", "owner": "baseowner"},
            "pull": {"num": 2},
            "workspace": "myworkspace",
            "distribution": "opentofu",
            "version": "v1.6.0"
        }"#;
        let ctx: ExecutionContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.pull.num, Some(2));
        assert_eq!(ctx.distribution, Some(Distribution::OpenTofu));
        assert_eq!(ctx.version.unwrap().to_string(), "1.6.0");
        assert!(ctx.project_name.is_empty());
        assert!(!ctx.custom_policy_check);
    }

    #[test]
    fn post_process_mode_round_trips_names() {
        for mode in [
            PostProcessMode::Show,
            PostProcessMode::Hide,
            PostProcessMode::StripRefreshing,
        ] {
            assert_eq!(mode.as_str().parse::<PostProcessMode>().unwrap(), mode);
        }
        assert!("verbose".parse::<PostProcessMode>().is_err());
    }
}
