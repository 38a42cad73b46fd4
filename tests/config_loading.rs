//! Layered configuration loading.

use std::fs;

use camino::Utf8PathBuf;
use netfleet::FleetConfig;
use netfleet::config::{DEFAULT_IMAGE_NAME, DEFAULT_KEY_NAME};
use netfleet::test_support::EnvGuard;
use rstest::rstest;

fn write_config(dir: &tempfile::TempDir, contents: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("netfleet.toml")).expect("utf-8 path");
    fs::write(&path, contents).expect("write config");
    path
}

#[rstest]
#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::isolated(&[
        ("NETFLEET_KEY_NAME", "ops-key"),
        ("NETFLEET_COMMAND_MAX_ATTEMPTS", "25"),
    ])
    .await;

    let config = FleetConfig::load_without_cli_args().expect("load config");

    assert_eq!(config.key_name, "ops-key");
    assert_eq!(config.command_max_attempts, 25);
    assert_eq!(config.image_name, DEFAULT_IMAGE_NAME);
    config.validate().expect("loaded config validates");
}

#[rstest]
#[tokio::test]
async fn config_file_is_layered_under_the_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "image_name = \"custom-ami\"\nkey_name = \"file-key\"\ncommand_poll_interval_ms = 500\n",
    );
    let _guard = EnvGuard::isolated(&[
        ("NETFLEET_CONFIG_PATH", path.as_str()),
        ("NETFLEET_KEY_NAME", "env-key"),
    ])
    .await;

    let config = FleetConfig::load_without_cli_args().expect("load config");

    assert_eq!(config.image_name, "custom-ami");
    assert_eq!(config.key_name, "env-key");
    assert_eq!(config.command_poll_interval_ms, 500);
}

#[rstest]
#[tokio::test]
async fn unusable_values_fail_validation_with_a_hint() {
    let _guard = EnvGuard::isolated(&[("NETFLEET_COMMAND_MAX_ATTEMPTS", "0")]).await;

    let config = FleetConfig::load_without_cli_args().expect("load config");
    let err = config.validate().expect_err("zero attempts");

    let message = err.to_string();
    assert!(message.contains("NETFLEET_COMMAND_MAX_ATTEMPTS"), "{message}");
    assert_eq!(config.key_name, DEFAULT_KEY_NAME);
}
