//! Tests for container naming conventions.

use super::*;

#[test]
fn test_random_id_uses_alphabet() {
    let id = random_id(CONTAINER_NAME_ID_LENGTH);

    assert_eq!(id.len(), CONTAINER_NAME_ID_LENGTH);
    assert!(id.bytes().all(|b| CONTAINER_NAME_ALPHABET.contains(&b)));
}

#[test]
fn test_generate_container_name() {
    let name = generate_container_name("provisioner", "mysql");

    assert!(name.starts_with("provisioner-mysql_"));
    let suffix = name.rsplit('_').next().expect("name has a suffix");
    assert_eq!(suffix.len(), CONTAINER_NAME_ID_LENGTH);
}

#[test]
fn test_generated_names_are_unique() {
    let first = generate_container_name("provisioner", "firebase");
    let second = generate_container_name("provisioner", "firebase");

    assert_ne!(first, second);
}

#[test]
fn test_workflow_context_pr() {
    assert_eq!(workflow_context_from(Some("refs/pull/456/merge")), "pr456");
}

#[test]
fn test_workflow_context_main_and_master() {
    assert_eq!(workflow_context_from(Some("refs/heads/main")), "main");
    assert_eq!(workflow_context_from(Some("refs/heads/master")), "main");
}

#[test]
fn test_workflow_context_feature_branch() {
    assert_eq!(
        workflow_context_from(Some("refs/heads/feature/new-feature")),
        "feature-new-feature"
    );
}

#[test]
fn test_workflow_context_local() {
    assert_eq!(workflow_context_from(None), "local");
    assert_eq!(workflow_context_from(Some("refs/tags/v1.0.0")), "local");
}
