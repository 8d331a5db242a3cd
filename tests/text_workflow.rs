mod support;

use mlpipe::config::WorkflowConfig;
use mlpipe::menu::MenuChoice;
use mlpipe::tasks::run_choice;
use mlpipe::tasks::text::{self, TextWorkflow};
use support::fixtures::{env_for, write_products_csv};
use tempfile::tempdir;

const CATEGORIES: [&str; 3] = ["Accessories", "Clothing", "Shoes"];

#[test]
fn train_then_predict_the_sample_product() {
    let dir = tempdir().unwrap();
    write_products_csv(dir.path(), 60);
    let env = env_for(dir.path(), WorkflowConfig::default());

    let report = text::train(&env).unwrap();
    assert_eq!(report.train_rows + report.test_rows, 60);
    let mut classes = report.metrics.classes.clone();
    classes.sort();
    assert_eq!(classes, CATEGORIES);
    assert!(report.metrics.micro_accuracy > 0.5, "{}", report.metrics);

    let prediction = text::predict(&env).unwrap();
    assert!(CATEGORIES.contains(&prediction.predicted.as_str()));
    assert_eq!(prediction.actual, "Accessories");
    assert_eq!(prediction.top_scores.len(), 3);
    let total: f32 = prediction.top_scores.iter().map(|(_, s)| s).sum();
    assert!((total - 1.0).abs() < 1e-4, "{total}");
    assert!(prediction.top_scores[0].1 >= prediction.top_scores[1].1);
    assert_eq!(prediction.top_scores[0].0, prediction.predicted);
}

#[test]
fn batch_accuracy_over_assets() {
    let dir = tempdir().unwrap();
    write_products_csv(dir.path(), 36);
    let mut config = WorkflowConfig::default();
    config.predict.batch_from_assets = true;
    let env = env_for(dir.path(), config);

    text::train(&env).unwrap();
    let accuracy = text::predict(&env).unwrap().batch_accuracy.unwrap();
    assert!(accuracy > 0.5, "{accuracy}");
}

#[test]
fn console_predict_prints_categories() {
    let dir = tempdir().unwrap();
    write_products_csv(dir.path(), 30);
    let env = env_for(dir.path(), WorkflowConfig::default());
    text::train(&env).unwrap();

    let mut out = Vec::new();
    run_choice(&TextWorkflow, &env, MenuChoice::Predict, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("| Actual category: Accessories"));
}
