//! Throwaway keychain used to validate a certificate batch

use super::{import_certificate, run_security};
use crate::command::CommandRunner;
use crate::error::{ProvisionError, Result};
use rand::distr::{Alphanumeric, SampleString};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zeroize::Zeroizing;

/// Random-named keychain that is deleted when dropped.
///
/// Importing the batch here first means a wrong passphrase or a corrupt
/// bundle fails before the real keychain is touched.
pub struct StagingKeychain {
    path: PathBuf,
    password: Zeroizing<String>,
    deleted: bool,
    // Holds the keychain file; removed after the keychain is deleted
    _dir: TempDir,
}

impl StagingKeychain {
    pub async fn create<R: CommandRunner>(runner: &R) -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join(format!(
            "kodegen-staging-{}.keychain-db",
            Alphanumeric.sample_string(&mut rand::rng(), 16)
        ));
        let password = Zeroizing::new(Alphanumeric.sample_string(&mut rand::rng(), 32));

        let staging = Self {
            path,
            password,
            deleted: false,
            _dir: dir,
        };
        run_security(runner, &["create-keychain", "-p", &staging.password], &staging.path).await?;
        run_security(runner, &["unlock-keychain", "-p", &staging.password], &staging.path).await?;

        crate::debug!("created staging keychain {}", staging.path.display());
        Ok(staging)
    }

    /// Import one certificate bundle, failing on any `security` error
    pub async fn import<R: CommandRunner>(
        &self,
        runner: &R,
        certificate: &Path,
        passphrase: &str,
    ) -> Result<()> {
        import_certificate(runner, certificate, passphrase, &self.path)
            .await
            .map_err(|e| {
                ProvisionError::KeychainOperation(format!(
                    "{} could not be imported: {e}",
                    certificate.display()
                ))
            })
    }

    pub async fn delete<R: CommandRunner>(mut self, runner: &R) {
        let Some(path) = self.path.to_str() else {
            return;
        };
        match runner.run("security", &["delete-keychain", path]).await {
            Ok(output) if output.success => self.deleted = true,
            Ok(output) => crate::warn!("staging keychain deletion failed: {}", output.stderr.trim()),
            Err(e) => crate::warn!("staging keychain deletion failed: {e}"),
        }
    }
}

impl Drop for StagingKeychain {
    fn drop(&mut self) {
        if self.deleted {
            return;
        }
        // Best effort when `delete` was never reached (error or cancellation)
        let path = self.path.clone();
        std::thread::spawn(move || {
            let _ = std::process::Command::new("security")
                .arg("delete-keychain")
                .arg(&path)
                .output();
        });
    }
}
