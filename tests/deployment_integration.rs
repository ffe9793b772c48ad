//! ---
//! renew_section: "15-testing-qa-runbook"
//! renew_subsection: "integration-tests"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Deployment checks: config loading, directory layout and metrics scraping."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use renew_common::{AppConfig, LaunchStrategy};
use walkdir::WalkDir;

fn repo_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

fn read(path: &str) -> String {
    let full = repo_path(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn reference_config_loads_and_validates() {
    let config = AppConfig::load(&[repo_path("configs/renewd.toml")]).expect("config loads");
    assert_eq!(config.service.name, "renewd");
    assert_eq!(config.update.launch, LaunchStrategy::SystemdRun);
    assert_eq!(config.update.poll_interval, Duration::from_secs(3600));
    assert!(config.update.enforce_checksum);
    assert!(!config
        .paths
        .backup_dir()
        .starts_with(&config.service.install_dir));
}

#[test]
fn systemd_unit_keeps_applier_alive() {
    let unit = read("deploy/systemd/renewd.service");
    assert!(unit.contains("ExecStart=/opt/renew/renewd"), "unit missing ExecStart stanza");
    assert!(
        unit.contains("KillMode=process"),
        "stopping the unit must not kill the detached applier"
    );
    assert!(unit.contains("Restart=on-failure"));
}

#[test]
fn deployment_files_carry_frontmatter() {
    for file in ["configs/renewd.toml", "deploy/systemd/renewd.service"] {
        let content = read(file);
        assert!(
            content.starts_with("# ---"),
            "{file} should start with the metadata header"
        );
        assert!(content.contains("renew_section:"), "{file} missing renew_section");
    }
}

fn description_of(content: &str) -> Option<&str> {
    content
        .lines()
        .take_while(|line| line.starts_with("//!"))
        .find_map(|line| line.split_once("renew_description:"))
        .map(|(_, value)| value.trim().trim_matches('"'))
}

#[test]
fn source_descriptions_are_specific_to_each_file() {
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    for root in ["crates", "bin", "tests"] {
        for entry in WalkDir::new(repo_path(root))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"))
            .filter(|entry| !entry.path().components().any(|c| c.as_os_str() == "target"))
        {
            let path = entry.path().to_path_buf();
            let content = fs::read_to_string(&path).expect("read source");
            assert!(
                content.starts_with("//! ---"),
                "{} should start with the metadata header",
                path.display()
            );
            let description = description_of(&content)
                .unwrap_or_else(|| panic!("{} missing renew_description", path.display()))
                .to_string();
            assert!(!description.is_empty(), "{} has an empty description", path.display());
            if let Some(previous) = seen.insert(description.clone(), path.clone()) {
                panic!(
                    "{} and {} share the description {description:?}",
                    previous.display(),
                    path.display()
                );
            }
        }
    }
    assert!(seen.len() > 10, "expected to scan the workspace sources");
}
