//! Train or query the life expectancy regression model.

use mlpipe::tasks::{self, regression::RegressionWorkflow};

fn main() {
    if let Err(err) = tasks::run_console(&RegressionWorkflow) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
