use std::path::Path;

use anyhow::{Context, Result};

use stagebuild_lib::Config;
use stagebuild_lib::cache::{self, CacheLock, ClearOptions};

use crate::output::{Status, format_bytes, print_field, print_status};

pub fn cmd_clean(config_path: &Path, downloads: bool) -> Result<()> {
  let config =
    Config::load(config_path).with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
  let ctx = config.build_context();

  let _lock = CacheLock::acquire(&ctx.cache_root, "clean").context("Failed to acquire cache lock")?;

  let stats = cache::clear(
    &ctx.layout(),
    ClearOptions {
      build: true,
      download: downloads,
    },
  )?;

  println!();
  print_status(Status::Success, "Cache cleared!");
  print_field("Cache", &ctx.cache_root.display().to_string());
  print_field("Directories removed", &stats.removed.len().to_string());
  print_field("Space freed", &format_bytes(stats.bytes_freed));

  Ok(())
}
