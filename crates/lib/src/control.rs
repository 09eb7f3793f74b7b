//! Cancel and pause flags shared between a control surface and the worker.
//!
//! The control surface only ever writes these flags; the pipeline worker only
//! reads them. Cancellation also wakes any task blocked in
//! [`ControlSignal::cancelled`] so waits can be raced against it.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ControlSignal {
  cancel_requested: AtomicBool,
  pause_requested: AtomicBool,
  cancel_notify: Notify,
}

impl ControlSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation. Idempotent.
  pub fn request_cancel(&self) {
    if !self.cancel_requested.swap(true, Ordering::SeqCst) {
      debug!("cancel requested");
    }
    self.cancel_notify.notify_waiters();
  }

  pub fn is_cancel_requested(&self) -> bool {
    self.cancel_requested.load(Ordering::SeqCst)
  }

  pub fn set_paused(&self, paused: bool) {
    if self.pause_requested.swap(paused, Ordering::SeqCst) != paused {
      debug!(paused, "pause state changed");
    }
  }

  /// Flip the pause flag and return the new value.
  pub fn toggle_pause(&self) -> bool {
    let paused = !self.pause_requested.fetch_xor(true, Ordering::SeqCst);
    debug!(paused, "pause state changed");
    paused
  }

  pub fn is_pause_requested(&self) -> bool {
    self.pause_requested.load(Ordering::SeqCst)
  }

  /// Clear both flags. Only called when a new run starts.
  pub fn reset(&self) {
    self.cancel_requested.store(false, Ordering::SeqCst);
    self.pause_requested.store(false, Ordering::SeqCst);
  }

  /// Completes once cancellation has been requested.
  pub async fn cancelled(&self) {
    loop {
      // Register interest before checking the flag so a concurrent
      // request_cancel cannot slip between the check and the await.
      let notified = self.cancel_notify.notified();
      if self.is_cancel_requested() {
        return;
      }
      notified.await;
    }
  }
}
