//! Test utilities for stagebuild-lib.
//!
//! Helpers for building tarballs and small shell-script "projects" so stage
//! and pipeline tests run entirely offline.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

/// One entry to put in a generated tarball.
pub enum TarEntry<'a> {
  Dir(&'a str),
  File(&'a str, &'a str),
  /// An executable file (mode 0755).
  Script(&'a str, &'a str),
}

/// Write a `.tar.gz` with the given entries to `path` and return the path.
pub fn write_tar_gz(path: &Path, entries: &[TarEntry<'_>]) -> PathBuf {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }

  let file = File::create(path).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

  for entry in entries {
    let mut header = tar::Header::new_gnu();
    match entry {
      TarEntry::Dir(name) => {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_cksum();
        builder.append_data(&mut header, name, std::io::empty()).unwrap();
      }
      TarEntry::File(name, contents) | TarEntry::Script(name, contents) => {
        let mode = if matches!(entry, TarEntry::Script(..)) { 0o755 } else { 0o644 };
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(mode);
        header.set_size(contents.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
      }
    }
  }

  builder.into_inner().unwrap().finish().unwrap();
  path.to_path_buf()
}

/// A project tarball `<dir>/<name>.tar.gz` wrapping a single `<name>-1.0/`
/// directory that contains the given executable scripts.
pub fn project_archive(dir: &Path, name: &str, scripts: &[(&str, &str)]) -> PathBuf {
  let root = format!("{name}-1.0");
  let paths: Vec<String> = scripts.iter().map(|(file, _)| format!("{root}/{file}")).collect();

  let mut entries = vec![TarEntry::Dir(&root)];
  for (path, (_, body)) in paths.iter().zip(scripts) {
    entries.push(TarEntry::Script(path, body));
  }

  write_tar_gz(&dir.join(format!("{name}.tar.gz")), &entries)
}

/// `file://` URL for a local path.
pub fn file_url(path: &Path) -> String {
  format!("file://{}", path.display())
}
