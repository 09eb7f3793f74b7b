//! CLI smoke tests for stagebuild.
//!
//! These run the real binary against throwaway prefixes and caches. Stages
//! fetch `file://` archives generated on the fly, so nothing touches the
//! network.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use flate2::Compression;
use flate2::write::GzEncoder;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the stagebuild binary with its environment pinned to `temp`.
fn stagebuild_cmd(temp: &Path) -> Command {
  let mut cmd = cargo_bin_cmd!("stagebuild");
  cmd
    .env_remove("RUST_LOG")
    .env_remove("STAGEBUILD_CONFIG")
    .env("HOME", temp.join("home"))
    .env("XDG_CONFIG_HOME", temp.join("xdg-config"))
    .env("XDG_CACHE_HOME", temp.join("xdg-cache"));
  cmd
}

/// A `<name>.tar.gz` wrapping `<name>-1.0/` with one executable script.
fn project_archive(dir: &Path, name: &str, script: &str, body: &str) -> PathBuf {
  std::fs::create_dir_all(dir).unwrap();
  let path = dir.join(format!("{name}.tar.gz"));
  let file = std::fs::File::create(&path).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

  let mut header = tar::Header::new_gnu();
  header.set_entry_type(tar::EntryType::Directory);
  header.set_mode(0o755);
  header.set_size(0);
  header.set_cksum();
  builder
    .append_data(&mut header, format!("{name}-1.0"), std::io::empty())
    .unwrap();

  let mut header = tar::Header::new_gnu();
  header.set_entry_type(tar::EntryType::Regular);
  header.set_mode(0o755);
  header.set_size(body.len() as u64);
  header.set_cksum();
  builder
    .append_data(&mut header, format!("{name}-1.0/{script}"), body.as_bytes())
    .unwrap();

  builder.into_inner().unwrap().finish().unwrap();
  path
}

/// Write a config with the given `[[stages]]` text and return its path.
fn write_config(temp: &Path, stages: &str) -> PathBuf {
  let path = temp.join("config.toml");
  let config = format!(
    r#"
[setup]
prefix = "{prefix}"
cache = "{cache}"

{stages}
"#,
    prefix = temp.join("prefix").display(),
    cache = temp.join("cache").display(),
  );
  std::fs::write(&path, config).unwrap();
  path
}

fn installing_stage(temp: &Path, key: &str) -> String {
  let archive = project_archive(
    &temp.join("mirror"),
    key,
    "install.sh",
    "#!/bin/sh\nmkdir -p \"$1/bin\" && touch \"$1/bin/$2\"\n",
  );
  format!(
    "[[stages]]\nkey = \"{key}\"\nurl = \"file://{}\"\ncommands = [\"./install.sh $${{prefix}} {key}\"]\n",
    archive.display()
  )
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let temp = TempDir::new().unwrap();
  stagebuild_cmd(temp.path())
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let temp = TempDir::new().unwrap();
  stagebuild_cmd(temp.path())
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("stagebuild"));
}

#[test]
fn subcommand_help_works() {
  let temp = TempDir::new().unwrap();
  for cmd in &["run", "init", "clean", "uninstall"] {
    stagebuild_cmd(temp.path())
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// init
// =============================================================================

#[test]
#[serial]
fn init_writes_default_config() {
  let temp = TempDir::new().unwrap();
  let path = temp.path().join("conf").join("config.toml");

  stagebuild_cmd(temp.path())
    .arg("init")
    .arg("--config")
    .arg(&path)
    .assert()
    .success();

  let written = std::fs::read_to_string(&path).unwrap();
  assert!(written.contains("openssl"));
  assert!(written.contains("[[stages]]"));
}

#[test]
#[serial]
fn init_uses_xdg_config_dir_by_default() {
  let temp = TempDir::new().unwrap();

  stagebuild_cmd(temp.path()).arg("init").assert().success();

  assert!(temp.path().join("xdg-config/stagebuild/config.toml").exists());
}

#[test]
#[serial]
fn init_fails_if_config_exists() {
  let temp = TempDir::new().unwrap();
  let path = write_config(temp.path(), "");

  stagebuild_cmd(temp.path())
    .arg("init")
    .arg("--config")
    .arg(&path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("already exists"));
}

// =============================================================================
// run
// =============================================================================

#[test]
#[serial]
fn run_builds_every_stage() {
  let temp = TempDir::new().unwrap();
  let stages = [installing_stage(temp.path(), "liba"), installing_stage(temp.path(), "app")].join("\n");
  let path = write_config(temp.path(), &stages);

  stagebuild_cmd(temp.path())
    .arg("run")
    .arg("--config")
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Setup complete!"));

  assert!(temp.path().join("prefix/bin/liba").exists());
  assert!(temp.path().join("prefix/bin/app").exists());
  assert!(temp.path().join("cache/download/liba.tar.gz").exists());
  assert!(temp.path().join("cache/build/app").is_dir());
}

#[test]
#[serial]
fn run_reports_failed_stage() {
  let temp = TempDir::new().unwrap();
  let archive = project_archive(&temp.path().join("mirror"), "libb", "make.sh", "#!/bin/sh\nexit 1\n");
  let stages = format!(
    "[[stages]]\nkey = \"libb\"\nurl = \"file://{}\"\ncommands = [\"./make.sh\"]\n\n{}",
    archive.display(),
    installing_stage(temp.path(), "app")
  );
  let path = write_config(temp.path(), &stages);

  stagebuild_cmd(temp.path())
    .arg("run")
    .arg("--config")
    .arg(&path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Setup failed at stage 'libb' (build)"))
    .stderr(predicate::str::contains("setup failed... please check the log file."));

  assert!(!temp.path().join("prefix/bin/app").exists());
}

#[test]
#[serial]
fn run_with_missing_config_fails() {
  let temp = TempDir::new().unwrap();

  stagebuild_cmd(temp.path())
    .arg("run")
    .arg("--config")
    .arg(temp.path().join("missing.toml"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
#[serial]
fn verbose_run_logs_command_output() {
  let temp = TempDir::new().unwrap();
  let archive = project_archive(
    &temp.path().join("mirror"),
    "chatty",
    "build.sh",
    "#!/bin/sh\necho compiling-chatty-objects\n",
  );
  let stages = format!(
    "[[stages]]\nkey = \"chatty\"\nurl = \"file://{}\"\ncommands = [\"./build.sh\"]\n",
    archive.display()
  );
  let path = write_config(temp.path(), &stages);

  stagebuild_cmd(temp.path())
    .arg("run")
    .arg("-v")
    .arg("--config")
    .arg(&path)
    .assert()
    .success()
    .stderr(predicate::str::contains("compiling-chatty-objects"));
}

// =============================================================================
// clean & uninstall
// =============================================================================

#[test]
#[serial]
fn clean_removes_build_cache_and_keeps_downloads() {
  let temp = TempDir::new().unwrap();
  let path = write_config(temp.path(), &installing_stage(temp.path(), "liba"));

  stagebuild_cmd(temp.path()).arg("run").arg("--config").arg(&path).assert().success();
  stagebuild_cmd(temp.path())
    .arg("clean")
    .arg("--config")
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache cleared!"));

  assert!(!temp.path().join("cache/build").exists());
  assert!(temp.path().join("cache/download/liba.tar.gz").exists());

  stagebuild_cmd(temp.path())
    .arg("clean")
    .arg("--downloads")
    .arg("--config")
    .arg(&path)
    .assert()
    .success();
  assert!(!temp.path().join("cache/download").exists());
}

#[test]
#[serial]
fn uninstall_removes_matching_files() {
  let temp = TempDir::new().unwrap();
  let path = write_config(temp.path(), "");
  let prefix = temp.path().join("prefix");
  let config_dir = temp.path().join("xdg-config/stagebuild");

  for file in ["bin/shadow", "lib/libshadow-util.so", "share/shadow/data.xml", "bin/openssl"] {
    let file = prefix.join(file);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "x").unwrap();
  }
  std::fs::create_dir_all(&config_dir).unwrap();

  stagebuild_cmd(temp.path())
    .arg("uninstall")
    .arg("--config")
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Uninstall complete!"));

  assert!(!prefix.join("bin/shadow").exists());
  assert!(!prefix.join("lib/libshadow-util.so").exists());
  assert!(!prefix.join("share/shadow").exists());
  assert!(!config_dir.exists());
  assert!(prefix.join("bin/openssl").exists());
}
