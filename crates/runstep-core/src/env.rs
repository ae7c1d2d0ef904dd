//! Environment construction for custom run steps.
//!
//! Commands rely on these variable names, so they are part of the public
//! contract. Every key is always present; unknown values are empty strings.

use crate::types::ExecutionContext;
use crate::version::{Distribution, ToolVersion};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const WORKSPACE: &str = "WORKSPACE";
pub const TOOL_VERSION: &str = "ATLANTIS_TERRAFORM_VERSION";
pub const TOOL_DISTRIBUTION: &str = "ATLANTIS_TERRAFORM_DISTRIBUTION";
pub const DIR: &str = "DIR";
pub const PLANFILE: &str = "PLANFILE";
pub const SHOWFILE: &str = "SHOWFILE";
pub const POLICYCHECKFILE: &str = "POLICYCHECKFILE";
pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const BASE_REPO_NAME: &str = "BASE_REPO_NAME";
pub const BASE_REPO_OWNER: &str = "BASE_REPO_OWNER";
pub const HEAD_REPO_NAME: &str = "HEAD_REPO_NAME";
pub const HEAD_REPO_OWNER: &str = "HEAD_REPO_OWNER";
pub const HEAD_BRANCH_NAME: &str = "HEAD_BRANCH_NAME";
pub const HEAD_COMMIT: &str = "HEAD_COMMIT";
pub const BASE_BRANCH_NAME: &str = "BASE_BRANCH_NAME";
pub const PULL_NUM: &str = "PULL_NUM";
pub const PULL_URL: &str = "PULL_URL";
pub const PULL_AUTHOR: &str = "PULL_AUTHOR";
pub const USER_NAME: &str = "USER_NAME";
pub const REPO_REL_DIR: &str = "REPO_REL_DIR";
pub const COMMENT_ARGS: &str = "COMMENT_ARGS";
pub const PATH: &str = "PATH";

/// Project names may contain `/`; plan files must stay flat.
const PROJECT_SLASH_REPLACEMENT: &str = "::";

/// The resolved tool a run step executes against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEnv {
    pub bin_dir: PathBuf,
    pub distribution: Distribution,
    pub version: ToolVersion,
}

fn file_stem(workspace: &str, project_name: &str) -> String {
    if project_name.is_empty() {
        workspace.to_string()
    } else {
        format!(
            "{}-{workspace}",
            project_name.replace('/', PROJECT_SLASH_REPLACEMENT)
        )
    }
}

/// Plan file name: `{workspace}.tfplan` or `{project}-{workspace}.tfplan`.
pub fn plan_filename(workspace: &str, project_name: &str) -> String {
    format!("{}.tfplan", file_stem(workspace, project_name))
}

/// Show output file name: `{workspace}.json` or `{project}-{workspace}.json`.
pub fn show_filename(workspace: &str, project_name: &str) -> String {
    format!("{}.json", file_stem(workspace, project_name))
}

/// Policy check result file name: `{workspace}-policyout.json` or
/// `{project}-{workspace}-policyout.json`.
pub fn policy_check_filename(workspace: &str, project_name: &str) -> String {
    format!("{}-policyout.json", file_stem(workspace, project_name))
}

/// Build the complete environment for a run step.
///
/// `extra` is applied first so caller-supplied variables can never shadow the
/// derived keys. `PATH` puts the tool's bin dir ahead of `inherited_path`.
pub fn build_env(
    ctx: &ExecutionContext,
    dir: &Path,
    tool: &ToolEnv,
    inherited_path: &str,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let path_of = |name: String| dir.join(name).display().to_string();

    let mut env = extra.clone();
    let derived = [
        (WORKSPACE, ctx.workspace.clone()),
        (TOOL_VERSION, tool.version.to_string()),
        (TOOL_DISTRIBUTION, tool.distribution.binary_name().to_string()),
        (DIR, dir.display().to_string()),
        (PLANFILE, path_of(plan_filename(&ctx.workspace, &ctx.project_name))),
        (SHOWFILE, path_of(show_filename(&ctx.workspace, &ctx.project_name))),
        (
            POLICYCHECKFILE,
            path_of(policy_check_filename(&ctx.workspace, &ctx.project_name)),
        ),
        (PROJECT_NAME, ctx.project_name.clone()),
        (BASE_REPO_NAME, ctx.base_repo.name.clone()),
        (BASE_REPO_OWNER, ctx.base_repo.owner.clone()),
        (HEAD_REPO_NAME, ctx.head_repo.name.clone()),
        (HEAD_REPO_OWNER, ctx.head_repo.owner.clone()),
        (HEAD_BRANCH_NAME, ctx.pull.head_branch.clone()),
        (HEAD_COMMIT, ctx.pull.head_commit.clone()),
        (BASE_BRANCH_NAME, ctx.pull.base_branch.clone()),
        (PULL_NUM, ctx.pull.num.map(|n| n.to_string()).unwrap_or_default()),
        (PULL_URL, ctx.pull.url.clone()),
        (PULL_AUTHOR, ctx.pull.author.clone()),
        (USER_NAME, ctx.user.username.clone()),
        (REPO_REL_DIR, ctx.repo_rel_dir.clone()),
        (COMMENT_ARGS, ctx.escaped_comment_args.join(" ")),
        (PATH, format!("{}:{inherited_path}", tool.bin_dir.display())),
    ];
    for (key, value) in derived {
        env.insert(key.to_string(), value);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PullRequest, Repo, User};

    fn test_context(project_name: &str) -> ExecutionContext {
        ExecutionContext {
            base_repo: Repo::new("baseowner", "basename"),
            head_repo: Repo::new("headowner", "headname"),
            pull: PullRequest {
                num: Some(2),
                url: "https://github.com/acme/infra/pull/2".to_string(),
                author: "acme".to_string(),
                head_branch: "add-feat".to_string(),
                base_branch: "main".to_string(),
                head_commit: "12345abcdef".to_string(),
            },
            user: User {
                username: "acme-user".to_string(),
            },
            workspace: "myworkspace".to_string(),
            repo_rel_dir: "mydir".to_string(),
            project_name: project_name.to_string(),
            escaped_comment_args: vec![
                "-target=resource1".to_string(),
                "-target=resource2".to_string(),
            ],
            ..Default::default()
        }
    }

    fn test_tool() -> ToolEnv {
        ToolEnv {
            bin_dir: PathBuf::from("/bin/dir"),
            distribution: Distribution::Terraform,
            version: ToolVersion::new(0, 11, 0),
        }
    }

    #[test]
    fn filenames_without_project() {
        assert_eq!(plan_filename("default", ""), "default.tfplan");
        assert_eq!(show_filename("default", ""), "default.json");
        assert_eq!(policy_check_filename("default", ""), "default-policyout.json");
    }

    #[test]
    fn filenames_flatten_project_slashes() {
        assert_eq!(
            plan_filename("myworkspace", "my/project/name"),
            "my::project::name-myworkspace.tfplan"
        );
        assert_eq!(
            show_filename("myworkspace", "my/project/name"),
            "my::project::name-myworkspace.json"
        );
        assert_eq!(
            policy_check_filename("myworkspace", "my/project/name"),
            "my::project::name-myworkspace-policyout.json"
        );
    }

    #[test]
    fn build_env_sets_contract_keys() {
        let dir = Path::new("/tmp/work");
        let env = build_env(
            &test_context(""),
            dir,
            &test_tool(),
            "/usr/bin:/bin",
            &BTreeMap::new(),
        );

        assert_eq!(env[WORKSPACE], "myworkspace");
        assert_eq!(env[TOOL_VERSION], "0.11.0");
        assert_eq!(env[TOOL_DISTRIBUTION], "terraform");
        assert_eq!(env[DIR], "/tmp/work");
        assert_eq!(env[PLANFILE], "/tmp/work/myworkspace.tfplan");
        assert_eq!(env[SHOWFILE], "/tmp/work/myworkspace.json");
        assert_eq!(env[POLICYCHECKFILE], "/tmp/work/myworkspace-policyout.json");
        assert_eq!(env[PROJECT_NAME], "");
        assert_eq!(env[BASE_REPO_NAME], "basename");
        assert_eq!(env[BASE_REPO_OWNER], "baseowner");
        assert_eq!(env[HEAD_REPO_NAME], "headname");
        assert_eq!(env[HEAD_REPO_OWNER], "headowner");
        assert_eq!(env[HEAD_BRANCH_NAME], "add-feat");
        assert_eq!(env[HEAD_COMMIT], "12345abcdef");
        assert_eq!(env[BASE_BRANCH_NAME], "main");
        assert_eq!(env[PULL_NUM], "2");
        assert_eq!(env[PULL_URL], "https://github.com/acme/infra/pull/2");
        assert_eq!(env[PULL_AUTHOR], "acme");
        assert_eq!(env[USER_NAME], "acme-user");
        assert_eq!(env[REPO_REL_DIR], "mydir");
        assert_eq!(env[COMMENT_ARGS], "-target=resource1 -target=resource2");
        assert_eq!(env[PATH], "/bin/dir:/usr/bin:/bin");
    }

    #[test]
    fn build_env_uses_project_in_file_paths() {
        let env = build_env(
            &test_context("my/project/name"),
            Path::new("/w"),
            &test_tool(),
            "",
            &BTreeMap::new(),
        );
        assert_eq!(env[PROJECT_NAME], "my/project/name");
        assert_eq!(env[PLANFILE], "/w/my::project::name-myworkspace.tfplan");
        assert_eq!(env[SHOWFILE], "/w/my::project::name-myworkspace.json");
    }

    #[test]
    fn build_env_reports_tofu_binary_name() {
        let tool = ToolEnv {
            distribution: Distribution::OpenTofu,
            ..test_tool()
        };
        let env = build_env(&test_context(""), Path::new("/w"), &tool, "", &BTreeMap::new());
        assert_eq!(env[TOOL_DISTRIBUTION], "tofu");
    }

    #[test]
    fn extra_vars_are_merged_but_cannot_shadow_derived_keys() {
        let mut extra = BTreeMap::new();
        extra.insert("test".to_string(), "var".to_string());
        extra.insert(WORKSPACE.to_string(), "hijacked".to_string());
        extra.insert(PATH.to_string(), "/evil".to_string());

        let env = build_env(&test_context(""), Path::new("/w"), &test_tool(), "/usr/bin", &extra);
        assert_eq!(env["test"], "var");
        assert_eq!(env[WORKSPACE], "myworkspace");
        assert_eq!(env[PATH], "/bin/dir:/usr/bin");
    }

    #[test]
    fn build_env_is_deterministic() {
        let ctx = test_context("net");
        let mut extra = BTreeMap::new();
        extra.insert("A".to_string(), "1".to_string());
        let first = build_env(&ctx, Path::new("/w"), &test_tool(), "/usr/bin", &extra);
        let second = build_env(&ctx, Path::new("/w"), &test_tool(), "/usr/bin", &extra);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_context_maps_every_key_to_empty_string() {
        let env = build_env(
            &ExecutionContext::default(),
            Path::new("/w"),
            &test_tool(),
            "",
            &BTreeMap::new(),
        );
        for key in [
            PROJECT_NAME,
            BASE_REPO_NAME,
            PULL_NUM,
            PULL_URL,
            USER_NAME,
            COMMENT_ARGS,
        ] {
            assert_eq!(env[key], "", "{key} should be empty");
        }
    }
}
