//! Lifecycle of a single trainer fit.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Where a trainer is in its fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerState {
    Untrained,
    Fitting,
    Fitted,
    Failed(String),
}

impl TrainerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fitted | Self::Failed(_))
    }
}

impl fmt::Display for TrainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untrained => write!(f, "untrained"),
            Self::Fitting => write!(f, "fitting"),
            Self::Fitted => write!(f, "fitted"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Drives one trainer through `Untrained -> Fitting -> Fitted | Failed`.
#[derive(Debug)]
pub struct TrainingRun {
    trainer: &'static str,
    state: TrainerState,
}

impl TrainingRun {
    pub fn new(trainer: &'static str) -> Self {
        Self {
            trainer,
            state: TrainerState::Untrained,
        }
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn begin(&mut self) -> PipelineResult<()> {
        self.transition(TrainerState::Fitting)
    }

    /// Mark the fit as done and hand back the trained model.
    pub fn finish<M>(&mut self, model: M) -> PipelineResult<M> {
        self.transition(TrainerState::Fitted)?;
        Ok(model)
    }

    /// Record a failure and return it so callers can `return Err(run.fail(err))`.
    pub fn fail(&mut self, err: PipelineError) -> PipelineError {
        let failed = TrainerState::Failed(err.to_string());
        if let Err(invalid) = self.transition(failed) {
            return invalid;
        }
        warn!(trainer = self.trainer, "Training failed: {err}");
        err
    }

    /// Run `fit` between `begin` and `finish`, failing the run on error.
    pub fn run<M>(&mut self, fit: impl FnOnce() -> PipelineResult<M>) -> PipelineResult<M> {
        self.begin()?;
        match fit() {
            Ok(model) => self.finish(model),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn transition(&mut self, next: TrainerState) -> PipelineResult<()> {
        let allowed = matches!(
            (&self.state, &next),
            (TrainerState::Untrained, TrainerState::Fitting)
                | (TrainerState::Fitting, TrainerState::Fitted)
                | (TrainerState::Fitting, TrainerState::Failed(_))
        );
        if !allowed {
            return Err(PipelineError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(trainer = self.trainer, from = %self.state, to = %next, "Trainer state change");
        self.state = next;
        Ok(())
    }
}
