//! Implementation of the `stagebuild uninstall` command.

use std::path::Path;

use anyhow::{Context, Result};

use stagebuild_lib::uninstall::uninstall;
use stagebuild_lib::{Config, paths};

use crate::output::{Status, print_field, print_status};

/// Remove installed files under the configured prefix, then the
/// configuration directory itself.
pub fn cmd_uninstall(config_path: &Path) -> Result<()> {
  let config =
    Config::load(config_path).with_context(|| format!("Failed to load config '{}'", config_path.display()))?;

  let plan = config.uninstall_plan(Some(paths::config_dir()));
  let report = uninstall(&plan).context("Uninstall failed")?;

  println!();
  if report.removed.is_empty() {
    print_status(Status::Info, "Nothing to remove");
  } else {
    print_status(Status::Success, "Uninstall complete!");
    for path in &report.removed {
      print_field("Removed", &path.display().to_string());
    }
  }

  Ok(())
}
