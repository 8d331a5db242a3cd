//! Train or query the product category classifier.

use mlpipe::tasks::{self, text::TextWorkflow};

fn main() {
    if let Err(err) = tasks::run_console(&TextWorkflow) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
