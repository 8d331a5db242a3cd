//! Library behind the `mlpipe-*` console programs.
//!
//! Data loading, feature pipelines, trainers, model artifacts and prediction
//! are shared; `tasks` wires them into the image, regression and text workflows.

/// Project directory layout.
pub mod app_dirs;
/// Optional `mlpipe.toml` settings.
pub mod config;
/// Seed and thread settings passed to every fit.
pub mod context;
/// Image folder, CSV and split loaders.
pub mod dataset;
/// Library-wide error type.
pub mod error;
/// Model quality metrics on held-out data.
pub mod evaluate;
/// Tracing setup for the binaries.
pub mod logging;
/// One-key console menu.
pub mod menu;
/// Tree, forest and softmax trainers.
pub mod ml;
/// Zip artifacts holding fitted pipelines.
pub mod model_store;
/// Estimator chains and fitted pipelines.
pub mod pipeline;
/// Single and batch prediction.
pub mod predict;
/// Train and predict workflows.
pub mod tasks;
/// Transfer-learning image classifier.
pub mod vision;

pub use context::MlContext;
pub use error::{PipelineError, PipelineResult};
