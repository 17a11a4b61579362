// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Layered configuration loading from files on disk

use std::{fs, path::Path, time::Duration};

use tempfile::TempDir;
use trellis::{Environment, ServerConfig};

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).expect("Failed to write config file");
}

#[test]
fn defaults_without_files() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = ServerConfig::load_from(dir.path(), None).expect("Failed to load config");

    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.port.value(), 3000);
    assert_eq!(config.timeout_seconds.value(), Duration::from_secs(30));
    assert_eq!(config.api_prefix, "api");
    assert!(config.docs.enabled);
    assert!(config.cors.allowed_origins.is_empty());
}

#[test]
fn environment_file_overrides_base_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(
        dir.path(),
        "config.json",
        r#"{ "port": 8080, "api_prefix": "/v1", "log_level": "warn", "cors": { "allowed_origins": ["https://a.example"] } }"#,
    );
    write(
        dir.path(),
        "config.testing.json",
        r#"{ "port": 0, "timeout_seconds": 10, "docs": { "enabled": false } }"#,
    );

    let config =
        ServerConfig::load_from(dir.path(), Some("testing")).expect("Failed to load config");

    assert_eq!(config.environment, Environment::Testing);
    assert_eq!(config.port.value(), 0);
    assert_eq!(config.timeout_seconds.value(), Duration::from_secs(10));
    assert_eq!(config.api_prefix, "/v1");
    assert_eq!(config.log_level, "warn");
    assert!(!config.docs.enabled);
    assert_eq!(config.cors.allowed_origins, vec!["https://a.example"]);
}

#[test]
fn explicit_environment_wins_over_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(
        dir.path(),
        "config.json",
        r#"{ "environment": "testing" }"#,
    );

    let config =
        ServerConfig::load_from(dir.path(), Some("production")).expect("Failed to load config");
    assert_eq!(config.environment, Environment::Production);
}

#[test]
fn invalid_values_are_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(dir.path(), "config.json", r#"{ "timeout_seconds": 0 }"#);
    assert!(ServerConfig::load_from(dir.path(), None).is_err());

    write(dir.path(), "config.json", r#"{ "port": 0 }"#);
    let error = ServerConfig::load_from(dir.path(), Some("development"))
        .expect_err("port 0 outside testing");
    assert!(error.to_string().contains("invalid port configuration"));

    write(dir.path(), "config.json", r#"{ "body_limit_bytes": 0 }"#);
    assert!(ServerConfig::load_from(dir.path(), None).is_err());
}
