// tests/cli_test.rs

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

// --- Test Setup Helper ---

struct TestHome {
    temp_dir: TempDir,
    imagemate_path: PathBuf,
}

impl TestHome {
    fn new() -> Self {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let imagemate_path = assert_cmd::cargo::cargo_bin("imagemate");
        Self {
            temp_dir,
            imagemate_path,
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn imagemate(&self) -> Command {
        let mut cmd = Command::new(&self.imagemate_path);
        cmd.current_dir(self.path());
        cmd.env("HOME", self.path());
        cmd.env("USERPROFILE", self.path());
        cmd.env("XDG_CONFIG_HOME", self.path().join(".config"));
        cmd
    }
}

// --- Tests ---

#[test]
fn test_init_command() {
    let home = TestHome::new();
    let mut cmd = home.imagemate();
    cmd.arg("init");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Created default config file at"));
}

#[test]
fn test_providers_command_lists_builtins() {
    let home = TestHome::new();
    let mut cmd = home.imagemate();
    cmd.arg("providers");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("openai"))
        .stdout(predicate::str::contains("ollama"))
        .stdout(predicate::str::contains("dashscope"));
}

#[test]
fn test_list_shows_seeded_builtin_configs() {
    let home = TestHome::new();
    let mut cmd = home.imagemate();
    cmd.arg("list");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("image-openai"));
}

#[test]
fn test_models_command_prints_static_catalog() {
    let home = TestHome::new();
    let mut cmd = home.imagemate();
    cmd.args(["models", "openai"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("gpt-image-1"))
        .stdout(predicate::str::contains("dall-e-3"));
}

#[test]
fn test_cache_stats_on_fresh_install() {
    let home = TestHome::new();
    let mut cmd = home.imagemate();
    cmd.args(["cache", "stats"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("记录数: 0"));
}
