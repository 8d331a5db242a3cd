//! Image classification by transfer learning over a frozen featurizer.

pub mod backbone;
pub mod bottleneck;
mod classifier;

pub use backbone::Architecture;
pub use classifier::{
    ImageClassificationOptions, ImageClassifierModel, MetricsCallback, fit_image_classifier,
};
