//! Certificate installation into a macOS keychain
//!
//! Installs run under an exclusive lock so concurrent provisioning runs on
//! one machine never interleave keychain edits. The whole batch is validated
//! in a staging keychain before the target keychain is modified.

mod staging;

pub use staging::StagingKeychain;

use crate::command::CommandRunner;
use crate::error::{ProvisionError, Result};
use fs4::tokio::AsyncFileExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Keychain settings: lock after 20 hours, lock on sleep
const KEYCHAIN_TIMEOUT_SECONDS: &str = "72000";

/// Tools allowed to use imported keys without a prompt
const TRUSTED_APPLICATIONS: &[&str] = &["/usr/bin/codesign", "/usr/bin/security"];

const PARTITION_LIST: &str = "apple-tool:,apple:,codesign:";

pub struct KeychainInstaller<R> {
    keychain_path: PathBuf,
    password: Zeroizing<String>,
    runner: R,
    lock_path: Option<PathBuf>,
}

impl<R: CommandRunner> KeychainInstaller<R> {
    /// # Arguments
    /// * `keychain` - Keychain path, or a bare name under `~/Library/Keychains`
    /// * `password` - Password unlocking (or creating) the keychain
    pub fn new(keychain: &Path, password: Zeroizing<String>, runner: R) -> Result<Self> {
        let keychain_path = if keychain.is_absolute() {
            keychain.to_path_buf()
        } else {
            dirs::home_dir()
                .ok_or_else(|| ProvisionError::MissingConfig("HOME not set".to_string()))?
                .join("Library/Keychains")
                .join(keychain)
        };

        Ok(Self {
            keychain_path,
            password,
            runner,
            lock_path: None,
        })
    }

    /// Override the lock file (default `<cache dir>/kodegen/keychain.lock`)
    #[must_use]
    pub fn with_lock_path(mut self, lock_path: PathBuf) -> Self {
        self.lock_path = Some(lock_path);
        self
    }

    #[must_use]
    pub fn keychain_path(&self) -> &Path {
        &self.keychain_path
    }

    /// Install every certificate as one batch and return how many were
    /// installed.
    ///
    /// The batch is imported into a staging keychain first, so a bad file or
    /// passphrase aborts before the target keychain changes.
    pub async fn install_certificates(
        &self,
        certificates: &BTreeMap<PathBuf, Zeroizing<String>>,
    ) -> Result<usize> {
        if certificates.is_empty() {
            return Ok(0);
        }

        let lock_path = match &self.lock_path {
            Some(path) => path.clone(),
            None => default_lock_path()?,
        };
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let lock_file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .await?;
        lock_file.lock_exclusive().map_err(|e| {
            ProvisionError::KeychainOperation(format!("failed to acquire keychain lock: {e}"))
        })?;

        // Lock held until `lock_file` drops at return
        let staging = StagingKeychain::create(&self.runner).await?;
        let mut staged = Ok(());
        for (path, passphrase) in certificates {
            staged = staging.import(&self.runner, path, passphrase).await;
            if staged.is_err() {
                break;
            }
        }
        staging.delete(&self.runner).await;
        staged?;

        self.prepare_keychain().await?;
        for (path, passphrase) in certificates {
            import_certificate(&self.runner, path, passphrase, &self.keychain_path).await?;
            crate::detail!("imported {}", path.display());
        }

        run_security(
            &self.runner,
            &["set-key-partition-list", "-S", PARTITION_LIST, "-s", "-k", &self.password],
            &self.keychain_path,
        )
        .await?;
        self.add_to_search_list().await?;

        Ok(certificates.len())
    }

    async fn prepare_keychain(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.keychain_path).await? {
            crate::detail!("creating keychain {}", self.keychain_path.display());
            run_security(&self.runner, &["create-keychain", "-p", &self.password], &self.keychain_path).await?;
        }

        run_security(&self.runner, &["unlock-keychain", "-p", &self.password], &self.keychain_path).await?;
        run_security(
            &self.runner,
            &["set-keychain-settings", "-lut", KEYCHAIN_TIMEOUT_SECONDS],
            &self.keychain_path,
        )
        .await
    }

    async fn add_to_search_list(&self) -> Result<()> {
        let keychain = path_str(&self.keychain_path)?;
        let listed = self
            .runner
            .run("security", &["list-keychains", "-d", "user"])
            .await?
            .check(|stderr| ProvisionError::KeychainOperation(format!("security list-keychains failed: {stderr}")))?;

        let mut keychains: Vec<String> = listed
            .stdout
            .lines()
            .map(|line| line.trim().trim_matches('"').to_string())
            .filter(|line| !line.is_empty())
            .collect();

        if keychains.iter().any(|listed| listed == keychain) {
            return Ok(());
        }
        keychains.push(keychain.to_string());

        let mut args = vec!["list-keychains", "-d", "user", "-s"];
        args.extend(keychains.iter().map(String::as_str));
        self.runner
            .run("security", &args)
            .await?
            .check(|stderr| ProvisionError::KeychainOperation(format!("security list-keychains failed: {stderr}")))?;
        Ok(())
    }
}

fn default_lock_path() -> Result<PathBuf> {
    Ok(dirs::cache_dir()
        .ok_or_else(|| ProvisionError::MissingConfig("could not determine cache directory".to_string()))?
        .join("kodegen")
        .join("keychain.lock"))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| ProvisionError::InvalidConfig(format!("non UTF-8 path: {}", path.display())))
}

/// Run a `security` subcommand whose last argument is the keychain
async fn run_security<R: CommandRunner>(runner: &R, args: &[&str], keychain: &Path) -> Result<()> {
    let mut command_args = args.to_vec();
    command_args.push(path_str(keychain)?);

    runner
        .run("security", &command_args)
        .await?
        .check(|stderr| ProvisionError::KeychainOperation(format!("security {} failed: {stderr}", args[0])))?;
    Ok(())
}

/// Import a PKCS#12 bundle. An identity already present counts as imported.
async fn import_certificate<R: CommandRunner>(
    runner: &R,
    certificate: &Path,
    passphrase: &str,
    keychain: &Path,
) -> Result<()> {
    let mut args = vec![
        "import",
        path_str(certificate)?,
        "-k",
        path_str(keychain)?,
        "-f",
        "pkcs12",
        "-P",
        passphrase,
    ];
    for application in TRUSTED_APPLICATIONS {
        args.extend(["-T", *application]);
    }

    let output = runner.run("security", &args).await?;
    if output.success || output.stderr.contains("already exists") {
        return Ok(());
    }

    Err(ProvisionError::KeychainOperation(format!(
        "security import failed: {}",
        output.stderr.trim()
    )))
}
