//! Configuration structures for signing provisioning.

use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Default keychain for certificate installation
pub const DEFAULT_KEYCHAIN: &str = "login.keychain-db";

/// Profiles expiring sooner than this are regenerated
pub const DEFAULT_MIN_PROFILE_DAYS_VALID: u32 = 0;

/// Separator for multi-value inputs (certificate URLs, passphrases)
pub const LIST_SEPARATOR: char = '|';

/// How the signed app is going to be distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DistributionType {
    #[serde(rename = "development")]
    Development,
    #[serde(rename = "ad-hoc")]
    AdHoc,
    #[serde(rename = "app-store")]
    AppStore,
    #[serde(rename = "enterprise")]
    Enterprise,
}

impl DistributionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::AdHoc => "ad-hoc",
            Self::AppStore => "app-store",
            Self::Enterprise => "enterprise",
        }
    }

    /// Profiles of this type embed an explicit device list
    #[must_use]
    pub fn is_device_scoped(&self) -> bool {
        matches!(self, Self::Development | Self::AdHoc)
    }
}

impl fmt::Display for DistributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionType {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Self::Development),
            "ad-hoc" => Ok(Self::AdHoc),
            "app-store" => Ok(Self::AppStore),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(ProvisionError::InvalidConfig(format!(
                "unknown distribution type '{other}' \
                 (expected development, ad-hoc, app-store or enterprise)"
            ))),
        }
    }
}

/// One certificate source and the passphrase that decrypts it.
#[derive(Debug, Clone)]
pub struct CertificateSource {
    pub url: String,
    pub passphrase: Zeroizing<String>,
}

/// Inputs for a provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Build endpoint that serves the developer portal connection
    pub build_url: String,

    #[serde(skip_serializing)]
    pub build_api_token: Zeroizing<String>,

    /// Explicit team id, overrides the project's team when set
    #[serde(default)]
    pub team_id: Option<String>,

    /// `|`-separated certificate URLs (`https://` or `file://`)
    pub certificate_urls: String,

    /// `|`-separated passphrases, positionally aligned with `certificate_urls`
    #[serde(default, skip_serializing)]
    pub passphrases: Zeroizing<String>,

    pub distribution_type: DistributionType,

    /// Path to the `.xcodeproj` bundle
    pub project_path: PathBuf,

    /// Main target name, defaults to the first application target
    #[serde(default)]
    pub main_target: Option<String>,

    /// Build configuration, defaults to the project's default configuration
    #[serde(default)]
    pub configuration: Option<String>,

    #[serde(default)]
    pub register_test_devices: bool,

    #[serde(default = "default_true")]
    pub generate_profiles: bool,

    #[serde(default)]
    pub min_profile_days_valid: u32,

    pub keychain_path: PathBuf,

    #[serde(skip_serializing)]
    pub keychain_password: Zeroizing<String>,

    /// Where resolved profiles are written, defaults to the Xcode profiles directory
    #[serde(default)]
    pub profiles_dir: Option<PathBuf>,

    /// Resolve without writing to the registry, project, keychain or outputs
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub verbose: bool,
}

impl ProvisionConfig {
    /// Load configuration from a TOML file
    pub async fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content).map_err(|e| {
            ProvisionError::InvalidConfig(format!("{}: {e}", path.display()))
        })
    }

    /// Check required inputs
    pub fn validate(&self) -> Result<()> {
        if self.build_url.trim().is_empty() {
            return Err(ProvisionError::MissingConfig("build_url".to_string()));
        }
        if self.build_api_token.trim().is_empty() {
            return Err(ProvisionError::MissingConfig("build_api_token".to_string()));
        }
        if self.project_path.as_os_str().is_empty() {
            return Err(ProvisionError::MissingConfig("project_path".to_string()));
        }
        if self.keychain_path.as_os_str().is_empty() {
            return Err(ProvisionError::MissingConfig("keychain_path".to_string()));
        }
        if self.keychain_password.is_empty() {
            return Err(ProvisionError::MissingConfig("keychain_password".to_string()));
        }

        // Alignment is checked here; an empty URL list is reported by the pipeline.
        self.certificate_sources().map(|_| ())
    }

    /// Pair certificate URLs with their passphrases.
    ///
    /// Both lists are split on `|` and must have the same length. Entries with
    /// an empty URL are dropped along with their passphrase. A single empty
    /// passphrase list is accepted for a single URL (unencrypted bundle).
    pub fn certificate_sources(&self) -> Result<Vec<CertificateSource>> {
        let urls: Vec<&str> = split_list(&self.certificate_urls);
        let passphrases: Vec<&str> = split_list(&self.passphrases);

        if urls.len() != passphrases.len() {
            return Err(ProvisionError::InvalidConfig(format!(
                "certificate URL count ({}) does not match passphrase count ({})",
                urls.len(),
                passphrases.len()
            )));
        }

        Ok(urls
            .into_iter()
            .zip(passphrases)
            .filter(|(url, _)| !url.is_empty())
            .map(|(url, passphrase)| CertificateSource {
                url: url.to_string(),
                passphrase: Zeroizing::new(passphrase.to_string()),
            })
            .collect())
    }

    /// Profiles directory, falling back to the one Xcode reads
    pub fn resolved_profiles_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.profiles_dir {
            return Ok(dir.clone());
        }
        Ok(dirs::home_dir()
            .ok_or_else(|| ProvisionError::MissingConfig("HOME not set".to_string()))?
            .join("Library/MobileDevice/Provisioning Profiles"))
    }
}

fn split_list(value: &str) -> Vec<&str> {
    value.split(LIST_SEPARATOR).map(str::trim).collect()
}

fn default_true() -> bool {
    true
}
