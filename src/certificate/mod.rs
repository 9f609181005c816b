//! Downloaded signing certificates and identity matching
//!
//! This module provides:
//! - `loader` - Fetching and decrypting PKCS#12 bundles
//! - `CertificateStore` - Development/production classification and selection

mod loader;

pub use loader::{CertificateLoader, InspectedCertificate, OpenSslCertificateLoader, parse_x509_summary};

use crate::config::{CertificateSource, DistributionType};
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use tempfile::TempDir;
use zeroize::Zeroizing;

/// Common name prefixes of development signing identities
const DEVELOPMENT_PREFIXES: &[&str] = &[
    "iPhone Developer",
    "iOS Developer",
    "Apple Development",
    "Mac Developer",
];

/// Common name prefixes of distribution signing identities
const PRODUCTION_PREFIXES: &[&str] = &[
    "iPhone Distribution",
    "iOS Distribution",
    "Apple Distribution",
    "3rd Party Mac Developer Application",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateKind {
    Development,
    Production,
}

impl CertificateKind {
    /// Classify a signing identity (full common name or generic prefix)
    #[must_use]
    pub fn from_common_name(common_name: &str) -> Option<Self> {
        if DEVELOPMENT_PREFIXES.iter().any(|p| common_name.starts_with(p)) {
            Some(Self::Development)
        } else if PRODUCTION_PREFIXES.iter().any(|p| common_name.starts_with(p)) {
            Some(Self::Production)
        } else {
            None
        }
    }

    /// Kind of certificate that signs profiles of the given distribution type
    #[must_use]
    pub fn for_distribution(distribution_type: DistributionType) -> Self {
        match distribution_type {
            DistributionType::Development => Self::Development,
            _ => Self::Production,
        }
    }
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// A classified signing certificate bundle on disk.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub kind: CertificateKind,
    pub common_name: String,
    pub team_id: Option<String>,
    /// Hex serial number as printed by openssl
    pub serial: String,
    pub not_after: DateTime<Utc>,
    pub path: PathBuf,
    pub passphrase: Zeroizing<String>,
}

impl Certificate {
    /// Whether this certificate satisfies a project signing identity.
    ///
    /// Identities are either a full common name or a generic selector such
    /// as `iPhone Developer`. Generic selectors of one kind are
    /// interchangeable, so `iPhone Developer` accepts `Apple Development: Jane`.
    #[must_use]
    pub fn matches_identity(&self, identity: &str) -> bool {
        if !identity.contains(':')
            && let Some(kind) = CertificateKind::from_common_name(identity)
        {
            return kind == self.kind;
        }
        self.common_name == identity || self.common_name.starts_with(identity)
    }

    /// Compare against a registry serial number
    #[must_use]
    pub fn serial_matches(&self, other: &str) -> bool {
        normalize_serial(&self.serial) == normalize_serial(other)
    }
}

fn normalize_serial(serial: &str) -> String {
    let upper = serial.trim().replace(':', "").to_ascii_uppercase();
    let trimmed = upper.trim_start_matches('0');
    if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
}

/// Active development and production certificates for one run.
///
/// At most one certificate of each kind is active. When several of the same
/// kind are supplied, the one expiring last wins; equal expiry falls back to
/// the greater serial number so the choice never depends on input order.
#[derive(Debug, Default)]
pub struct CertificateStore {
    development: Option<Certificate>,
    production: Option<Certificate>,
    // Keeps downloaded bundles on disk until the store is dropped
    _download_dir: Option<TempDir>,
}

impl CertificateStore {
    /// Fetch, decrypt and classify every certificate source.
    pub async fn download_and_identify<L: CertificateLoader>(
        loader: &L,
        sources: &[CertificateSource],
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(ProvisionError::MissingConfig(
                "no certificate source provided".to_string(),
            ));
        }

        let download_dir = TempDir::new()?;
        let mut certificates = Vec::with_capacity(sources.len());
        let now = Utc::now();

        for (index, source) in sources.iter().enumerate() {
            let inspected = loader.load(source, download_dir.path(), index).await?;
            crate::detail!("certificate #{index}: {}", inspected.common_name);

            let Some(kind) = CertificateKind::from_common_name(&inspected.common_name) else {
                crate::warn!(
                    "skipping certificate #{index}: not a development or distribution identity ({})",
                    inspected.common_name
                );
                continue;
            };

            if inspected.not_after <= now {
                crate::warn!(
                    "skipping certificate #{index}: expired at {} ({})",
                    inspected.not_after,
                    inspected.common_name
                );
                continue;
            }

            certificates.push(Certificate {
                kind,
                common_name: inspected.common_name,
                team_id: inspected.team_id,
                serial: inspected.serial,
                not_after: inspected.not_after,
                path: inspected.path,
                passphrase: source.passphrase.clone(),
            });
        }

        let mut store = Self::from_certificates(certificates)?;
        store._download_dir = Some(download_dir);
        Ok(store)
    }

    /// Build a store from already classified certificates.
    pub fn from_certificates(certificates: Vec<Certificate>) -> Result<Self> {
        let mut store = Self::default();

        for certificate in certificates {
            let slot = match certificate.kind {
                CertificateKind::Development => &mut store.development,
                CertificateKind::Production => &mut store.production,
            };

            match slot.take() {
                None => *slot = Some(certificate),
                Some(current) => {
                    let (kept, dropped) = if prefer(&certificate, &current) == Ordering::Greater {
                        (certificate, current)
                    } else {
                        (current, certificate)
                    };
                    crate::warn!(
                        "multiple {} certificates provided, using {} (expires {}), ignoring {} (expires {})",
                        kept.kind,
                        kept.common_name,
                        kept.not_after,
                        dropped.common_name,
                        dropped.not_after
                    );
                    *slot = Some(kept);
                }
            }
        }

        if store.development.is_none() && store.production.is_none() {
            return Err(ProvisionError::CertificateMismatch(
                "no valid development or distribution certificate found".to_string(),
            ));
        }

        Ok(store)
    }

    /// Check that the project's signing identity can be satisfied.
    ///
    /// The certificate for `distribution_type` must exist and belong to
    /// `team_id`. When the project names an identity, the certificate of that
    /// identity's kind must match it. Without an identity any certificate of
    /// the team is accepted.
    pub fn ensure_certificate(
        &self,
        identity: Option<&str>,
        team_id: &str,
        distribution_type: DistributionType,
    ) -> Result<&Certificate> {
        let required_kind = CertificateKind::for_distribution(distribution_type);
        let certificate = self.certificate_info(required_kind).ok_or_else(|| {
            ProvisionError::CertificateMismatch(format!(
                "distribution type {distribution_type} requires a {required_kind} certificate, none provided"
            ))
        })?;

        for candidate in [&self.development, &self.production].into_iter().flatten() {
            if let Some(certificate_team) = &candidate.team_id
                && certificate_team != team_id
            {
                return Err(ProvisionError::CertificateMismatch(format!(
                    "{} belongs to team {certificate_team}, project team is {team_id}",
                    candidate.common_name
                )));
            }
        }

        if let Some(identity) = identity {
            crate::debug!("matching project codesign identity: {identity}");
            if let Some(identity_kind) = CertificateKind::from_common_name(identity) {
                match self.certificate_info(identity_kind) {
                    Some(candidate) if !candidate.matches_identity(identity) => {
                        return Err(ProvisionError::CertificateMismatch(format!(
                            "project codesign identity '{identity}' does not match provided {identity_kind} certificate '{}'",
                            candidate.common_name
                        )));
                    }
                    _ => {}
                }
            }
        }

        crate::success!("using {required_kind} certificate: {}", certificate.common_name);
        Ok(certificate)
    }

    #[must_use]
    pub fn certificate_info(&self, kind: CertificateKind) -> Option<&Certificate> {
        match kind {
            CertificateKind::Development => self.development.as_ref(),
            CertificateKind::Production => self.production.as_ref(),
        }
    }

    #[must_use]
    pub fn development_certificate(&self) -> Option<&Certificate> {
        self.development.as_ref()
    }

    #[must_use]
    pub fn production_certificate(&self) -> Option<&Certificate> {
        self.production.as_ref()
    }

    /// Active certificates in install order (development first)
    #[must_use]
    pub fn active_certificates(&self) -> Vec<&Certificate> {
        [&self.development, &self.production]
            .into_iter()
            .flatten()
            .collect()
    }
}

fn prefer(a: &Certificate, b: &Certificate) -> Ordering {
    a.not_after.cmp(&b.not_after).then_with(|| {
        let (a_serial, b_serial) = (normalize_serial(&a.serial), normalize_serial(&b.serial));
        a_serial
            .len()
            .cmp(&b_serial.len())
            .then_with(|| a_serial.cmp(&b_serial))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn certificate(kind: CertificateKind, common_name: &str, days: i64) -> Certificate {
        Certificate {
            kind,
            common_name: common_name.to_string(),
            team_id: Some("TEAM123456".to_string()),
            serial: "0A1B".to_string(),
            not_after: Utc::now() + Duration::days(days),
            path: PathBuf::from(format!("/tmp/{}.p12", common_name.len())),
            passphrase: Zeroizing::new(String::new()),
        }
    }

    #[test]
    fn classifies_common_names() {
        assert_eq!(
            CertificateKind::from_common_name("Apple Development: Jane (ABC)"),
            Some(CertificateKind::Development)
        );
        assert_eq!(
            CertificateKind::from_common_name("iPhone Distribution: Acme (TEAM)"),
            Some(CertificateKind::Production)
        );
        assert_eq!(
            CertificateKind::from_common_name("iOS Developer"),
            Some(CertificateKind::Development)
        );
        assert_eq!(
            CertificateKind::from_common_name("iOS Distribution"),
            Some(CertificateKind::Production)
        );
        assert_eq!(CertificateKind::from_common_name("Developer ID Application: Acme"), None);
    }

    #[test]
    fn duplicate_kind_keeps_latest_expiry() {
        let older = certificate(CertificateKind::Development, "iPhone Developer: Old", 10);
        let newer = certificate(CertificateKind::Development, "iPhone Developer: New", 300);

        let store = CertificateStore::from_certificates(vec![newer.clone(), older.clone()]).unwrap();
        assert_eq!(store.development_certificate().unwrap().common_name, newer.common_name);

        let store = CertificateStore::from_certificates(vec![older, newer.clone()]).unwrap();
        assert_eq!(store.development_certificate().unwrap().common_name, newer.common_name);
    }

    #[test]
    fn equal_expiry_falls_back_to_serial() {
        let mut a = certificate(CertificateKind::Production, "Apple Distribution: A", 30);
        let mut b = a.clone();
        b.common_name = "Apple Distribution: B".to_string();
        a.serial = "0F".to_string();
        b.serial = "10".to_string();

        let store = CertificateStore::from_certificates(vec![b.clone(), a.clone()]).unwrap();
        assert_eq!(store.production_certificate().unwrap().common_name, b.common_name);
        let store = CertificateStore::from_certificates(vec![a, b.clone()]).unwrap();
        assert_eq!(store.production_certificate().unwrap().common_name, b.common_name);
    }

    #[test]
    fn empty_store_is_rejected() {
        assert!(matches!(
            CertificateStore::from_certificates(vec![]),
            Err(ProvisionError::CertificateMismatch(_))
        ));
    }

    #[test]
    fn ensure_requires_kind_for_distribution() {
        let store = CertificateStore::from_certificates(vec![certificate(
            CertificateKind::Development,
            "iPhone Developer: Jane (ABC)",
            30,
        )])
        .unwrap();

        assert!(store
            .ensure_certificate(None, "TEAM123456", DistributionType::Development)
            .is_ok());
        assert!(matches!(
            store.ensure_certificate(None, "TEAM123456", DistributionType::AdHoc),
            Err(ProvisionError::CertificateMismatch(_))
        ));
    }

    #[test]
    fn ensure_checks_team_and_identity() {
        let store = CertificateStore::from_certificates(vec![certificate(
            CertificateKind::Development,
            "iPhone Developer: Jane (ABC)",
            30,
        )])
        .unwrap();

        assert!(store
            .ensure_certificate(Some("iPhone Developer"), "TEAM123456", DistributionType::Development)
            .is_ok());
        assert!(store
            .ensure_certificate(
                Some("iPhone Developer: Jane (ABC)"),
                "TEAM123456",
                DistributionType::Development
            )
            .is_ok());
        assert!(matches!(
            store.ensure_certificate(
                Some("iPhone Developer: Bob (XYZ)"),
                "TEAM123456",
                DistributionType::Development
            ),
            Err(ProvisionError::CertificateMismatch(_))
        ));
        assert!(matches!(
            store.ensure_certificate(None, "OTHERTEAM1", DistributionType::Development),
            Err(ProvisionError::CertificateMismatch(_))
        ));
    }

    #[test]
    fn generic_identities_match_by_kind() {
        let store = CertificateStore::from_certificates(vec![
            certificate(CertificateKind::Development, "Apple Development: Jane (ABC)", 30),
            certificate(CertificateKind::Production, "iPhone Distribution: Acme (XYZ)", 30),
        ])
        .unwrap();

        for identity in ["iPhone Developer", "iOS Developer", "Apple Development"] {
            assert!(
                store
                    .ensure_certificate(Some(identity), "TEAM123456", DistributionType::Development)
                    .is_ok(),
                "{identity}"
            );
        }
        for identity in ["Apple Distribution", "iOS Distribution", "iPhone Distribution"] {
            assert!(
                store
                    .ensure_certificate(Some(identity), "TEAM123456", DistributionType::AppStore)
                    .is_ok(),
                "{identity}"
            );
        }

        let development = store.development_certificate().unwrap();
        assert!(!development.matches_identity("Apple Distribution"));
        assert!(!development.matches_identity("iPhone Developer: Bob (XYZ)"));
    }

    #[test]
    fn serial_comparison_ignores_case_and_padding() {
        let cert = certificate(CertificateKind::Production, "Apple Distribution: A", 30);
        assert!(cert.serial_matches("a1b"));
        assert!(cert.serial_matches("00:0A:1B"));
        assert!(!cert.serial_matches("A1C"));
    }
}
