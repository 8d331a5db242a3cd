//! The three console workflows and the menu loop that drives them.
//!
//! Each workflow trains a model from `assets/` and saves it to
//! `workspace/model.zip`, or loads that model and predicts.

pub mod image;
pub mod regression;
pub mod text;

use std::io::{self, Write};

use thiserror::Error;
use tracing::info;

use crate::app_dirs::{LayoutError, ProjectLayout};
use crate::config::{ConfigError, WorkflowConfig};
use crate::context::MlContext;
use crate::dataset::DatasetError;
use crate::error::PipelineError;
use crate::logging;
use crate::menu::{self, MenuChoice, WRONG_ANSWER};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("Console I/O failed: {0}")]
    Console(#[from] io::Error),
}

/// Where a workflow runs and with which settings.
#[derive(Debug, Clone)]
pub struct TaskEnv {
    pub layout: ProjectLayout,
    pub config: WorkflowConfig,
    pub ctx: MlContext,
}

impl TaskEnv {
    pub fn new(layout: ProjectLayout, config: WorkflowConfig) -> Self {
        let ctx = config.context.ml_context();
        Self {
            layout,
            config,
            ctx,
        }
    }

    /// Resolve the project root and read its optional `mlpipe.toml`.
    pub fn load() -> Result<Self, TaskError> {
        let layout = ProjectLayout::resolve()?;
        let config = WorkflowConfig::load(&layout.config_path())?;
        Ok(Self::new(layout, config))
    }

    /// Threads for batch prediction.
    pub fn prediction_workers(&self) -> usize {
        self.config.predict.workers.unwrap_or(self.ctx.threads).max(1)
    }
}

/// A train-or-predict console program.
pub trait Workflow {
    /// Short task name recorded in saved artifacts.
    fn name(&self) -> &'static str;
    fn train(&self, env: &TaskEnv, out: &mut dyn Write) -> Result<(), TaskError>;
    fn predict(&self, env: &TaskEnv, out: &mut dyn Write) -> Result<(), TaskError>;
}

/// Run `workflow` for an already-read menu choice.
pub fn run_choice(
    workflow: &dyn Workflow,
    env: &TaskEnv,
    choice: MenuChoice,
    out: &mut dyn Write,
) -> Result<(), TaskError> {
    match choice {
        MenuChoice::Train => {
            info!(task = workflow.name(), "Training");
            workflow.train(env, out)
        }
        MenuChoice::Predict => {
            info!(task = workflow.name(), "Predicting");
            workflow.predict(env, out)
        }
        MenuChoice::Invalid => {
            writeln!(out, "{WRONG_ANSWER}")?;
            Ok(())
        }
    }
}

/// Entry point shared by the binaries: set up, ask, dispatch.
pub fn run_console(workflow: &dyn Workflow) -> Result<(), TaskError> {
    let env = TaskEnv::load()?;
    if let Err(err) = logging::init(&env.layout) {
        eprintln!("Logging disabled: {err}");
    }
    let stdin = io::stdin();
    let stdout = io::stdout();
    let choice = menu::prompt(&mut stdin.lock(), &mut stdout.lock())?;
    run_choice(workflow, &env, choice, &mut stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Recorder {
        trained: Cell<bool>,
        predicted: Cell<bool>,
    }

    impl Workflow for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn train(&self, _env: &TaskEnv, _out: &mut dyn Write) -> Result<(), TaskError> {
            self.trained.set(true);
            Ok(())
        }

        fn predict(&self, _env: &TaskEnv, _out: &mut dyn Write) -> Result<(), TaskError> {
            self.predicted.set(true);
            Ok(())
        }
    }

    fn env() -> TaskEnv {
        TaskEnv::new(ProjectLayout::new("/unused"), WorkflowConfig::default())
    }

    #[test]
    fn dispatches_menu_choices() {
        let recorder = Recorder::default();
        let mut out = Vec::new();
        run_choice(&recorder, &env(), MenuChoice::Train, &mut out).unwrap();
        assert!(recorder.trained.get());
        assert!(!recorder.predicted.get());
        run_choice(&recorder, &env(), MenuChoice::Predict, &mut out).unwrap();
        assert!(recorder.predicted.get());
        assert!(out.is_empty());
    }

    #[test]
    fn invalid_choice_prints_wrong_answer() {
        let recorder = Recorder::default();
        let mut out = Vec::new();
        run_choice(&recorder, &env(), MenuChoice::Invalid, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Wrong answer!\n");
        assert!(!recorder.trained.get() && !recorder.predicted.get());
    }

    #[test]
    fn workers_fall_back_to_context_threads() {
        let mut env = env();
        env.ctx = env.ctx.with_threads(3);
        assert_eq!(env.prediction_workers(), 3);
        env.config.predict.workers = Some(2);
        assert_eq!(env.prediction_workers(), 2);
    }
}
