//! Git checkout commands

use std::path::Path;

use crate::deploy::process::CommandSpec;

/// `git clone` of a single branch, submodules included
pub fn clone_command(repo_url: &str, branch: &str, target_dir: &Path) -> CommandSpec {
    let mut spec = CommandSpec::new("git").args(["clone", "--recurse-submodules"]);
    if !branch.trim().is_empty() {
        spec = spec.args(["-b", branch.trim()]);
    }
    spec.arg(repo_url).arg(target_dir.to_string_lossy())
}
