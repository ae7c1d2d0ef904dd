//! Post-processing of successful run-step output.
//!
//! ANSI escapes are already removed line by line while the output is
//! collected, so every mode works on plain text.

use regex::Regex;
use runstep_core::env::ToolEnv;
use runstep_core::{Distribution, PostProcessMode, ToolVersion};
use std::sync::LazyLock;

const REFRESHING_MARKER: &str = "Refreshing state...";

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").expect("valid ANSI escape pattern")
});

/// Apply `mode` to the output of a successful run step.
pub fn apply(mode: PostProcessMode, output: String, tool: &ToolEnv) -> String {
    match mode {
        PostProcessMode::Show => output,
        PostProcessMode::Hide => String::new(),
        PostProcessMode::StripRefreshing => {
            strip_refreshing(&output, tool.distribution, &tool.version)
        }
    }
}

/// Drop everything up to and including the last `Refreshing state...` line.
///
/// Only plan output from Terraform 0.14+ and OpenTofu has this preamble
/// shape; older output is returned unchanged.
pub fn strip_refreshing(output: &str, distribution: Distribution, version: &ToolVersion) -> String {
    if distribution == Distribution::Terraform && *version < ToolVersion::new(0, 14, 0) {
        return output.to_string();
    }

    let lines: Vec<&str> = output.split('\n').collect();
    match lines
        .iter()
        .rposition(|line| line.contains(REFRESHING_MARKER))
    {
        Some(last) => lines[last + 1..].join("\n"),
        None => output.to_string(),
    }
}

/// Remove ANSI escape sequences (colors, cursor movement) from `text`.
pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}
