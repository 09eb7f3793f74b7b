//! Cache-aware resource fetching.
//!
//! A resource URL maps to `<cache>/download/<basename(url)>`. If that file
//! exists it is used as-is; otherwise the resource is downloaded. Downloads
//! are written to a `.part` sibling and renamed into place once complete, so
//! a file at the final path always means a finished transfer.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::cache::CacheLayout;
use crate::control::ControlSignal;

const PART_SUFFIX: &str = ".part";

/// Errors that can occur while fetching a resource.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("cannot derive a file name from url '{0}'")]
  InvalidUrl(String),

  #[error("failed to create download directory '{}': {source}", .path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("request for {url} failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("request for {url} returned HTTP {status}")]
  Status { url: String, status: reqwest::StatusCode },

  #[error("failed to write '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("download of {url} was cancelled")]
  Cancelled { url: String },
}

/// Return the local path for `url`, downloading it on a cache miss.
pub async fn fetch(url: &str, layout: &CacheLayout, control: &ControlSignal) -> Result<PathBuf, FetchError> {
  let file_name = url_file_name(url).ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

  let download_dir = layout.download_dir();
  fs::create_dir_all(&download_dir)
    .await
    .map_err(|source| FetchError::CreateDir {
      path: download_dir.clone(),
      source,
    })?;

  let target = layout.download_path(file_name);
  if fs::try_exists(&target).await.unwrap_or(false) {
    info!(path = %target.display(), "using cached resource");
    return Ok(target);
  }

  info!(url, "downloading resource");
  let part = download_dir.join(format!("{file_name}{PART_SUFFIX}"));

  if let Err(e) = transfer(url, &part, control).await {
    remove_partial(&part).await;
    return Err(e);
  }

  fs::rename(&part, &target).await.map_err(|source| FetchError::Write {
    path: target.clone(),
    source,
  })?;

  info!(path = %target.display(), "download complete");
  Ok(target)
}

async fn transfer(url: &str, dest: &Path, control: &ControlSignal) -> Result<(), FetchError> {
  if let Some(local) = url.strip_prefix("file://") {
    debug!(source = local, "copying local resource");
    fs::copy(local, dest).await.map_err(|source| FetchError::Write {
      path: dest.to_path_buf(),
      source,
    })?;
    return Ok(());
  }

  let request_err = |source: reqwest::Error| FetchError::Request {
    url: url.to_string(),
    source,
  };
  let write_err = |source: std::io::Error| FetchError::Write {
    path: dest.to_path_buf(),
    source,
  };

  let mut response = reqwest::get(url).await.map_err(request_err)?;
  if !response.status().is_success() {
    return Err(FetchError::Status {
      url: url.to_string(),
      status: response.status(),
    });
  }

  let mut file = fs::File::create(dest).await.map_err(write_err)?;
  let mut written: u64 = 0;

  loop {
    let chunk = tokio::select! {
      biased;
      _ = control.cancelled() => {
        return Err(FetchError::Cancelled { url: url.to_string() });
      }
      chunk = response.chunk() => chunk.map_err(request_err)?,
    };

    let Some(bytes) = chunk else { break };
    file.write_all(&bytes).await.map_err(write_err)?;
    written += bytes.len() as u64;
  }

  file.flush().await.map_err(write_err)?;
  debug!(url, bytes = written, "transfer finished");
  Ok(())
}

async fn remove_partial(part: &Path) {
  match fs::remove_file(part).await {
    Ok(()) => debug!(path = %part.display(), "removed partial download"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %part.display(), error = %e, "failed to remove partial download"),
  }
}

/// The last path segment of `url`, ignoring any query string or fragment.
pub fn url_file_name(url: &str) -> Option<&str> {
  let without_query = url.split(['?', '#']).next().unwrap_or(url);
  let name = without_query.rsplit('/').next()?;

  if name.is_empty() || name == "." || name == ".." {
    None
  } else {
    Some(name)
  }
}
