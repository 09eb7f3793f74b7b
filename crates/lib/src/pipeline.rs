//! The background worker that runs every stage in order.
//!
//! [`Pipeline::start`] takes the cache lock, spawns one tokio task, and hands
//! back a [`PipelineHandle`]. Clearing the build cache, when the mode asks
//! for it, is the worker's first step. The handle is the whole control surface:
//! cancel, pause, observe progress through a watch channel, and join.
//! Stages run strictly one after another and the first failure ends the run.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use crate::cache::{self, CacheError, CacheLock, ClearOptions, LockError};
use crate::consts::APP_NAME;
use crate::control::ControlSignal;
use crate::stage::{self, BuildContext, Stage, StageError, StagePhase, StageState};

/// What to do with the existing build cache before a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetupMode {
  /// Reuse everything from the previous run.
  #[default]
  Last,
  /// Rebuild from scratch: clear the build cache, keep downloads.
  Default,
}

impl SetupMode {
  fn clear_options(self) -> Option<ClearOptions> {
    match self {
      SetupMode::Last => None,
      SetupMode::Default => Some(ClearOptions {
        build: true,
        download: false,
      }),
    }
  }
}

/// Progress as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Running {
    key: String,
    index: usize,
    total: usize,
    stage: StageState,
  },
  Completed,
  Failed {
    key: String,
    phase: StagePhase,
  },
  Cancelled,
}

impl PipelineState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      PipelineState::Completed | PipelineState::Failed { .. } | PipelineState::Cancelled
    )
  }
}

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
  Completed,
  Failed(StageError),
  Cancelled,
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("failed to clear build cache: {0}")]
  Cache(#[from] CacheError),

  #[error("pipeline worker did not finish: {0}")]
  Join(#[from] tokio::task::JoinError),
}

pub struct Pipeline {
  ctx: BuildContext,
  stages: Vec<Stage>,
  mode: SetupMode,
  control: Arc<ControlSignal>,
}

impl Pipeline {
  pub fn new(ctx: BuildContext, stages: Vec<Stage>) -> Self {
    Self {
      ctx,
      stages,
      mode: SetupMode::default(),
      control: Arc::new(ControlSignal::new()),
    }
  }

  pub fn mode(mut self, mode: SetupMode) -> Self {
    self.mode = mode;
    self
  }

  /// Use an existing control signal, e.g. one already wired to Ctrl-C.
  pub fn with_control(mut self, control: Arc<ControlSignal>) -> Self {
    self.control = control;
    self
  }

  pub fn control(&self) -> Arc<ControlSignal> {
    self.control.clone()
  }

  /// Lock the cache and spawn the worker.
  ///
  /// Must be called from within a tokio runtime. Fails without spawning
  /// anything if another run holds the cache. A failure to clear the cache
  /// is reported by [`PipelineHandle::join`].
  pub fn start(self) -> Result<PipelineHandle, PipelineError> {
    let Pipeline {
      ctx,
      stages,
      mode,
      control,
    } = self;

    control.reset();
    let lock = CacheLock::acquire(&ctx.cache_root, &format!("{APP_NAME} run"))?;

    let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
    let worker_control = control.clone();
    let task = tokio::spawn(
      async move {
        let outcome = prepare_and_run(&ctx, &stages, mode, &worker_control, &state_tx).await;
        drop(lock);
        outcome
      }
      .in_current_span(),
    );

    Ok(PipelineHandle {
      control,
      state: state_rx,
      task,
    })
  }
}

/// Control surface of a running pipeline.
pub struct PipelineHandle {
  control: Arc<ControlSignal>,
  state: watch::Receiver<PipelineState>,
  task: JoinHandle<Result<PipelineOutcome, PipelineError>>,
}

impl PipelineHandle {
  pub fn request_cancel(&self) {
    self.control.request_cancel();
  }

  pub fn pause(&self) {
    self.control.set_paused(true);
  }

  pub fn resume(&self) {
    self.control.set_paused(false);
  }

  /// Returns whether the pipeline is now paused.
  pub fn toggle_pause(&self) -> bool {
    self.control.toggle_pause()
  }

  pub fn control(&self) -> Arc<ControlSignal> {
    self.control.clone()
  }

  pub fn state(&self) -> watch::Receiver<PipelineState> {
    self.state.clone()
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Wait for the worker to finish.
  pub async fn join(self) -> Result<PipelineOutcome, PipelineError> {
    self.task.await?
  }
}

async fn prepare_and_run(
  ctx: &BuildContext,
  stages: &[Stage],
  mode: SetupMode,
  control: &ControlSignal,
  state: &watch::Sender<PipelineState>,
) -> Result<PipelineOutcome, PipelineError> {
  if let Some(options) = mode.clear_options() {
    let layout = ctx.layout();
    let cleared = tokio::task::spawn_blocking(move || cache::clear(&layout, options)).await?;
    if let Err(e) = cleared {
      error!(error = %e, "failed to clear build cache");
      return Err(e.into());
    }
  }

  Ok(run(ctx, stages, control, state).await)
}

async fn run(
  ctx: &BuildContext,
  stages: &[Stage],
  control: &ControlSignal,
  state: &watch::Sender<PipelineState>,
) -> PipelineOutcome {
  let total = stages.len();
  info!(stages = total, prefix = %ctx.prefix.display(), cache = %ctx.cache_root.display(), "starting setup");

  for (index, stage) in stages.iter().enumerate() {
    let result = stage::run_stage(stage, ctx, control, |stage_state| {
      state.send_replace(PipelineState::Running {
        key: stage.key.clone(),
        index,
        total,
        stage: stage_state,
      });
    })
    .await;

    match result {
      Ok(_) => {}
      Err(e) if e.is_cancelled() || control.is_cancel_requested() => {
        info!(key = %e.key(), "setup cancelled");
        state.send_replace(PipelineState::Cancelled);
        return PipelineOutcome::Cancelled;
      }
      Err(e) => {
        error!(key = %e.key(), phase = %e.phase(), "setup failed... please check the log file.");
        state.send_replace(PipelineState::Failed {
          key: e.key().to_string(),
          phase: e.phase(),
        });
        return PipelineOutcome::Failed(e);
      }
    }
  }

  let bin = ctx.bin_dir();
  info!(
    path = %bin.display(),
    "setup succeeded! please check '{}' for binaries and add it to your PATH.",
    bin.display()
  );
  state.send_replace(PipelineState::Completed);
  PipelineOutcome::Completed
}
