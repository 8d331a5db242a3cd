//! Train an image classifier on `assets/` or classify the images in `test/`.

use mlpipe::tasks::{self, image::ImageWorkflow};

fn main() {
    if let Err(err) = tasks::run_console(&ImageWorkflow) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
