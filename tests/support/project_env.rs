use std::{
    path::Path,
    sync::{Mutex, OnceLock},
};

use mlpipe::app_dirs::PROJECT_DIR_ENV;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Points `MLPIPE_PROJECT_DIR` at a fixture project until dropped.
pub struct ProjectDirGuard {
    previous: Option<std::ffi::OsString>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl ProjectDirGuard {
    pub fn set(path: &Path) -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let previous = std::env::var_os(PROJECT_DIR_ENV);
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            std::env::set_var(PROJECT_DIR_ENV, path);
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for ProjectDirGuard {
    fn drop(&mut self) {
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            match self.previous.take() {
                Some(value) => std::env::set_var(PROJECT_DIR_ENV, value),
                None => std::env::remove_var(PROJECT_DIR_ENV),
            }
        }
    }
}
