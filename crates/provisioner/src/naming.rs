//! Naming and labelling conventions for provisioned containers.
//!
//! Container names carry a random suffix so that concurrent test runs, and
//! leftovers from earlier crashed runs, never collide. Labels mark every
//! container this crate creates so orphaned ones can be found later.

use std::env;

use rand::Rng;

#[cfg(test)]
#[path = "naming_tests.rs"]
mod tests;

/// Characters used for the random part of container names.
pub const CONTAINER_NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Length of the random part of container names.
pub const CONTAINER_NAME_ID_LENGTH: usize = 16;

/// Label present (with value `true`) on every provisioned container.
pub const LABEL_MANAGED: &str = "io.provisioner.managed";

/// Label holding the dependency kind, e.g. `mysql`.
pub const LABEL_KIND: &str = "io.provisioner.kind";

/// Label holding the unix timestamp after which the container has expired.
pub const LABEL_EXPIRES_AT: &str = "io.provisioner.expires-at";

/// Label holding the workflow context that created the container.
pub const LABEL_CONTEXT: &str = "io.provisioner.context";

/// Generates a random identifier drawn from [`CONTAINER_NAME_ALPHABET`].
pub fn random_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CONTAINER_NAME_ALPHABET.len());
            CONTAINER_NAME_ALPHABET[idx] as char
        })
        .collect()
}

/// Generates a unique container name.
///
/// Format: `{prefix}-{kind}_{random}`, for example
/// `provisioner-mysql_qwhdkeuzmxnaptbc`.
pub fn generate_container_name(prefix: &str, kind: &str) -> String {
    format!(
        "{}-{}_{}",
        prefix,
        kind,
        random_id(CONTAINER_NAME_ID_LENGTH)
    )
}

/// Extracts the workflow context used to label containers.
///
/// Returns:
/// - `pr{number}` for pull request workflows (e.g., "pr123")
/// - `main` for pushes to main/master branch
/// - the sanitized branch name for other branch pushes
/// - `local` for local development
pub fn get_workflow_context() -> String {
    workflow_context_from(env::var("GITHUB_REF").ok().as_deref())
}

/// Derives the workflow context from a `GITHUB_REF` value.
pub fn workflow_context_from(github_ref: Option<&str>) -> String {
    if let Some(github_ref) = github_ref {
        if let Some(rest) = github_ref.strip_prefix("refs/pull/") {
            if let Some(pr_num) = rest.split('/').next().filter(|n| !n.is_empty()) {
                return format!("pr{}", pr_num);
            }
        } else if let Some(branch) = github_ref.strip_prefix("refs/heads/") {
            if branch == "main" || branch == "master" {
                return "main".to_string();
            }
            return branch.replace('/', "-");
        }
    }

    "local".to_string()
}
