//! Scoped clearing of a process environment variable

use std::ffi::OsString;

/// Variable that makes the registry tooling prefer an alternate API path.
/// Provisioning must run with it unset.
pub const AVOID_XCODE_API_VAR: &str = "SPACESHIP_AVOID_XCODE_API";

/// Clears an environment variable for its lifetime and restores the original
/// value (or absence) when dropped, on success and error paths alike.
///
/// # Example
/// ```no_run
/// # use kodegen_bundler_provision::env_guard::{ClearedEnvVar, AVOID_XCODE_API_VAR};
/// let _guard = ClearedEnvVar::clear(AVOID_XCODE_API_VAR);
/// // ... run provisioning ...
/// // original value restored here
/// ```
#[must_use = "the variable is restored as soon as the guard is dropped"]
pub struct ClearedEnvVar {
    key: &'static str,
    original: Option<OsString>,
}

impl ClearedEnvVar {
    pub fn clear(key: &'static str) -> Self {
        let original = std::env::var_os(key);
        crate::debug!("original {key}: {original:?}");

        // SAFETY: the provisioning pipeline is sequential and no other thread
        // reads or writes the environment while the guard is alive.
        unsafe { std::env::remove_var(key) };
        crate::debug!("{key} cleared");

        Self { key, original }
    }

    #[must_use]
    pub fn original(&self) -> Option<&OsString> {
        self.original.as_ref()
    }
}

impl Drop for ClearedEnvVar {
    fn drop(&mut self) {
        // SAFETY: see `ClearedEnvVar::clear`.
        unsafe {
            match &self.original {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
        crate::debug!("{} restored", self.key);
    }
}
