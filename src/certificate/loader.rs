//! Certificate download and PKCS#12 inspection

use crate::config::CertificateSource;
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Environment variable used to hand the bundle passphrase to openssl
/// without exposing it on the command line
const PASSPHRASE_ENV: &str = "KODEGEN_P12_PASSPHRASE";

/// Facts read from a decrypted certificate bundle.
#[derive(Debug, Clone)]
pub struct InspectedCertificate {
    pub common_name: String,
    /// Organizational unit, which Apple sets to the team id
    pub team_id: Option<String>,
    pub serial: String,
    pub not_after: DateTime<Utc>,
    pub path: PathBuf,
}

/// Fetches a certificate bundle and reads its identity.
#[allow(async_fn_in_trait)]
pub trait CertificateLoader {
    /// Download `source` into `dest_dir`, decrypt it with the source's
    /// passphrase and return what it contains. `index` is the position of the
    /// source in the input list.
    async fn load(
        &self,
        source: &CertificateSource,
        dest_dir: &Path,
        index: usize,
    ) -> Result<InspectedCertificate>;
}

/// Loader backed by reqwest for `http(s)://` sources, the filesystem for
/// `file://` sources, and the `openssl` CLI for decryption.
pub struct OpenSslCertificateLoader {
    client: reqwest::Client,
}

impl OpenSslCertificateLoader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path).await.map_err(|e| {
                ProvisionError::InvalidConfig(format!("failed to read certificate {path}: {e}"))
            });
        }

        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ProvisionError::InvalidConfig(format!(
                "unsupported certificate URL scheme: {url}"
            )));
        }

        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProvisionError::InvalidConfig(
                        "certificate download timed out. Check network connection.".to_string(),
                    )
                } else {
                    ProvisionError::Reqwest(e)
                }
            })?
            .error_for_status()?
            .bytes()
            .await?;

        if bytes.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                "certificate download returned empty data".to_string(),
            ));
        }

        Ok(bytes.to_vec())
    }

    async fn extract_pem(&self, p12_path: &Path, passphrase: &str) -> Result<String> {
        let first = run_pkcs12(p12_path, passphrase, false).await?;
        let output = if first.status.success() {
            first
        } else {
            // OpenSSL 3 refuses RC2-encrypted bundles exported by older Keychain Access
            crate::debug!("pkcs12 read failed, retrying with -legacy");
            run_pkcs12(p12_path, passphrase, true).await?
        };

        if !output.status.success() {
            return Err(ProvisionError::InvalidConfig(format!(
                "failed to decrypt certificate bundle (wrong passphrase?): {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            ProvisionError::CommandExecution(format!("openssl output is not valid UTF-8: {e}"))
        })
    }
}

impl CertificateLoader for OpenSslCertificateLoader {
    async fn load(
        &self,
        source: &CertificateSource,
        dest_dir: &Path,
        index: usize,
    ) -> Result<InspectedCertificate> {
        let data = self.fetch(&source.url).await?;

        let path = dest_dir.join(format!("certificate_{index}.p12"));
        tokio::fs::write(&path, &data).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        let pem = self.extract_pem(&path, &source.passphrase).await?;
        let summary = x509_summary(&pem).await?;
        let mut inspected = parse_x509_summary(&summary)?;
        inspected.path = path;
        Ok(inspected)
    }
}

async fn run_pkcs12(p12_path: &Path, passphrase: &str, legacy: bool) -> Result<std::process::Output> {
    let mut cmd = tokio::process::Command::new("openssl");
    cmd.arg("pkcs12");
    if legacy {
        cmd.arg("-legacy");
    }
    cmd.args(["-nokeys", "-clcerts", "-passin"])
        .arg(format!("env:{PASSPHRASE_ENV}"))
        .arg("-in")
        .arg(p12_path)
        .env(PASSPHRASE_ENV, passphrase);

    cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProvisionError::MissingDependency(
                "openssl command not found. Please install OpenSSL.".to_string(),
            )
        } else {
            ProvisionError::CommandExecution(format!("Failed to run openssl pkcs12: {e}"))
        }
    })
}

async fn x509_summary(pem: &str) -> Result<String> {
    let mut child = tokio::process::Command::new("openssl")
        .args([
            "x509",
            "-noout",
            "-subject",
            "-serial",
            "-enddate",
            "-nameopt",
            "sep_multiline,utf8,sname",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ProvisionError::CommandExecution(format!("Failed to run openssl x509: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(pem.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(ProvisionError::CommandExecution(format!(
            "openssl x509 failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `openssl x509 -subject -serial -enddate -nameopt sep_multiline` output.
///
/// # Example Input
/// ```text
/// subject=
///     UID=ABCDE12345
///     CN=iPhone Developer: Jane Doe (ABCDE12345)
///     OU=TEAM123456
/// serial=5A1B2C
/// notAfter=Dec 31 23:59:59 2025 GMT
/// ```
pub fn parse_x509_summary(output: &str) -> Result<InspectedCertificate> {
    let mut common_name = None;
    let mut team_id = None;
    let mut serial = None;
    let mut not_after = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("CN=") {
            common_name = Some(value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix("OU=") {
            team_id = Some(value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix("serial=") {
            serial = Some(value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix("notAfter=") {
            not_after = Some(parse_openssl_date(value)?);
        }
    }

    Ok(InspectedCertificate {
        common_name: common_name.ok_or_else(|| {
            ProvisionError::InvalidConfig("certificate has no common name".to_string())
        })?,
        team_id,
        serial: serial.ok_or_else(|| {
            ProvisionError::InvalidConfig("certificate has no serial number".to_string())
        })?,
        not_after: not_after.ok_or_else(|| {
            ProvisionError::InvalidConfig("certificate has no expiry date".to_string())
        })?,
        path: PathBuf::new(),
    })
}

// Format: `Dec  1 23:59:59 2025 GMT` (day is space padded)
fn parse_openssl_date(value: &str) -> Result<DateTime<Utc>> {
    let normalized = value
        .trim()
        .trim_end_matches("GMT")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y")
        .map(|naive| naive.and_utc())
        .map_err(|e| ProvisionError::InvalidConfig(format!("Failed to parse date '{value}': {e}")))
}
