//! Checks on the workspace manifests: every crate under `crates/` is a
//! member, takes its version from the workspace, and pulls shared
//! dependencies through `[workspace.dependencies]`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn read_manifest(path: &Path) -> toml::Value {
    let text = std::fs::read_to_string(path).unwrap();
    text.parse().unwrap()
}

fn root_manifest() -> toml::Value {
    read_manifest(&workspace_root().join("Cargo.toml"))
}

fn members(root: &toml::Value) -> Vec<String> {
    root["workspace"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap().to_string())
        .collect()
}

fn inherits(value: &toml::Value) -> bool {
    value
        .as_table()
        .and_then(|t| t.get("workspace"))
        .and_then(toml::Value::as_bool)
        == Some(true)
}

#[test]
fn every_crate_directory_is_a_member() {
    let root = root_manifest();
    let listed: BTreeSet<String> = members(&root).into_iter().collect();
    let on_disk: BTreeSet<String> = std::fs::read_dir(workspace_root().join("crates"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.join("Cargo.toml").is_file())
        .map(|p| format!("crates/{}", p.file_name().unwrap().to_str().unwrap()))
        .collect();
    assert_eq!(listed, on_disk);
}

#[test]
fn members_inherit_version_and_shared_dependencies() {
    let root = root_manifest();
    let shared = root["workspace"]["dependencies"].as_table().unwrap();

    for member in members(&root) {
        let manifest = read_manifest(&workspace_root().join(&member).join("Cargo.toml"));
        assert!(
            inherits(&manifest["package"]["version"]),
            "{member} should use version.workspace = true"
        );

        for section in ["dependencies", "dev-dependencies"] {
            let Some(deps) = manifest.get(section).and_then(toml::Value::as_table) else {
                continue;
            };
            for (name, spec) in deps {
                if shared.contains_key(name) {
                    assert!(
                        inherits(spec),
                        "{member} [{section}] {name} should use {name}.workspace = true"
                    );
                }
            }
        }
    }
}

#[test]
fn internal_dependencies_pin_the_workspace_version() {
    let root = root_manifest();
    let version = root["workspace"]["package"]["version"].as_str().unwrap();
    let shared = root["workspace"]["dependencies"].as_table().unwrap();

    let internal: Vec<_> = shared
        .iter()
        .filter(|(_, spec)| spec.get("path").is_some())
        .collect();
    assert!(!internal.is_empty());
    for (name, spec) in internal {
        assert_eq!(spec["version"].as_str(), Some(version), "{name}");
        let path = workspace_root().join(spec["path"].as_str().unwrap());
        let manifest = read_manifest(&path.join("Cargo.toml"));
        assert_eq!(manifest["package"]["name"].as_str(), Some(name.as_str()));
    }
}

#[test]
fn library_version_matches_workspace() {
    let root = root_manifest();
    assert_eq!(
        root["workspace"]["package"]["version"].as_str(),
        Some(buildrig_core::VERSION)
    );
}
