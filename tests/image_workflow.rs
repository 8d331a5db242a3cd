mod support;

use mlpipe::config::WorkflowConfig;
use mlpipe::menu::MenuChoice;
use mlpipe::tasks::image::{self, ImageWorkflow};
use mlpipe::tasks::{TaskError, run_choice};
use mlpipe::PipelineError;
use support::fixtures::{env_for, write_image_folders};
use tempfile::tempdir;

const CLASSES: [(&str, [u8; 3]); 2] = [("red", [230, 30, 30]), ("blue", [30, 40, 220])];

fn quick_config() -> WorkflowConfig {
    let mut config = WorkflowConfig::default();
    config.image.epochs = 40;
    config.image.learning_rate = 0.1;
    config.predict.workers = Some(2);
    config
}

#[test]
fn train_then_classify_test_folder() {
    let dir = tempdir().unwrap();
    write_image_folders(&dir.path().join("assets"), &CLASSES, 8);
    write_image_folders(&dir.path().join("test"), &CLASSES, 2);
    let env = env_for(dir.path(), quick_config());

    let report = image::train(&env).unwrap();
    assert_eq!(
        report.train_rows + report.validation_rows + report.test_rows,
        16
    );
    assert!(report.validation_rows > 0);
    let metrics = report.metrics.unwrap();
    assert_eq!(metrics.classes.len(), 2);
    assert!(dir.path().join("workspace/bottleneck/train_bottleneck.json").is_file());

    let predictions = image::predict(&env).unwrap();
    assert_eq!(predictions.failures, 0);
    assert_eq!(predictions.predictions.len(), 4);
    let correct = predictions
        .predictions
        .iter()
        .filter(|p| p.actual == p.predicted)
        .count();
    assert!(correct >= 3, "{:?}", predictions.predictions);
    for prediction in &predictions.predictions {
        assert!(prediction.score > 0.0 && prediction.score <= 1.0);
        assert!(prediction.file_name.ends_with(".png"));
    }

    let mut out = Vec::new();
    run_choice(&ImageWorkflow, &env, MenuChoice::Predict, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Classifying multiple images"));
    assert!(text.contains("Image: blue0.png | Actual Value: blue | Predicted Value: "));
}

#[test]
fn empty_assets_fail_before_training() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("assets/empty")).unwrap();
    let env = env_for(dir.path(), quick_config());
    let err = image::train(&env).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Pipeline(PipelineError::EmptyDataset(_))
    ));
    assert!(!env.layout.model_path().exists());
}

#[test]
fn images_loose_in_assets_root_fail_before_training() {
    let dir = tempdir().unwrap();
    let assets = dir.path().join("assets");
    write_image_folders(&assets, &CLASSES, 4);
    for (label, _) in CLASSES {
        for entry in std::fs::read_dir(assets.join(label)).unwrap() {
            let path = entry.unwrap().path();
            std::fs::rename(&path, assets.join(path.file_name().unwrap())).unwrap();
        }
        std::fs::remove_dir(assets.join(label)).unwrap();
    }
    let env = env_for(dir.path(), quick_config());
    let err = image::train(&env).unwrap_err();
    assert!(
        matches!(
            err,
            TaskError::Pipeline(PipelineError::EmptyDataset(ref msg)) if msg.contains("subfolders")
        ),
        "{err}"
    );
    assert!(!env.layout.model_path().exists());
}

#[test]
fn single_label_is_degenerate() {
    let dir = tempdir().unwrap();
    write_image_folders(&dir.path().join("assets"), &CLASSES[..1], 6);
    let env = env_for(dir.path(), quick_config());
    let err = image::train(&env).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Pipeline(PipelineError::DegenerateDataset(_))
    ));
}
