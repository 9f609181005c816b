//! Provisioning profile reconciliation
//!
//! For every planned distribution type and every target bundle id the
//! resolver guarantees one usable profile on the developer portal, reusing
//! what exists and generating the rest.

use crate::capabilities::required_capabilities;
use crate::certificate::{Certificate, CertificateKind, CertificateStore};
use crate::config::DistributionType;
use crate::devices::EnsuredDevices;
use crate::error::{ProvisionError, Result};
use crate::portal::{
    BundleIdRecord, DeveloperPortal, PortalCertificate, PortalProfile, ProfileRequest,
    profile_type_name,
};
use crate::project::Target;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix of profiles this tool generates
pub const PROFILE_NAME_PREFIX: &str = "Kodegen";

/// Profile chosen for one (distribution type, bundle id) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub distribution_type: DistributionType,
    pub bundle_id: String,
    pub portal_profile: PortalProfile,
}

impl ResolvedProfile {
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.portal_profile.uuid
    }
}

/// Outcome of [`ProfileResolver::ensure_profiles`].
#[derive(Debug, Clone, Default)]
pub struct ProfileResolution {
    /// Every pair is covered by a portal-managed profile; the project keeps
    /// its automatic signing settings
    pub managed_signing: bool,
    profiles: BTreeMap<(DistributionType, String), ResolvedProfile>,
}

impl ProfileResolution {
    /// Profiles of one distribution type keyed by bundle id
    #[must_use]
    pub fn profiles_by_bundle_id(&self, distribution_type: DistributionType) -> BTreeMap<&str, &ResolvedProfile> {
        self.profiles
            .iter()
            .filter(|((kind, _), _)| *kind == distribution_type)
            .map(|((_, bundle_id), profile)| (bundle_id.as_str(), profile))
            .collect()
    }

    #[must_use]
    pub fn profile(&self, distribution_type: DistributionType, bundle_id: &str) -> Option<&ResolvedProfile> {
        self.profiles.get(&(distribution_type, bundle_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedProfile> {
        self.profiles.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub(crate) fn insert(&mut self, profile: ResolvedProfile) {
        self.profiles
            .insert((profile.distribution_type, profile.bundle_id.clone()), profile);
    }
}

/// Name given to generated profiles. A stale profile with this name is
/// replaced rather than left to accumulate.
#[must_use]
pub fn generated_profile_name(distribution_type: DistributionType, bundle_id: &str) -> String {
    format!("{PROFILE_NAME_PREFIX} {distribution_type} - ({bundle_id})")
}

pub struct ProfileResolver<'a, P> {
    portal: &'a P,
    certificates: &'a CertificateStore,
    targets: &'a [Target],
    uses_managed_signing: bool,
    dry_run: bool,
}

/// Per-pair requirements a reusable profile must satisfy
struct Requirements<'r> {
    profile_type: &'static str,
    bundle_id: &'r str,
    certificate_id: Option<&'r str>,
    device_ids: Option<&'r [String]>,
    valid_until: DateTime<Utc>,
}

impl<'a, P: DeveloperPortal> ProfileResolver<'a, P> {
    pub fn new(
        portal: &'a P,
        certificates: &'a CertificateStore,
        targets: &'a [Target],
        uses_managed_signing: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            portal,
            certificates,
            targets,
            uses_managed_signing,
            dry_run,
        }
    }

    /// Ensure a valid profile for every (distribution type, target) pair.
    ///
    /// Device-scoped types need `devices`, the registry list ensured for this
    /// run. Profiles expiring within `min_days_valid` days count as missing.
    /// Missing profiles are generated when `allow_generate` is set, otherwise
    /// the pair fails the run.
    pub async fn ensure_profiles(
        &self,
        distribution_types: &[DistributionType],
        devices: Option<&EnsuredDevices>,
        allow_generate: bool,
        min_days_valid: u32,
    ) -> Result<ProfileResolution> {
        let device_ids = devices.map(EnsuredDevices::ids);
        if let Some(distribution_type) = distribution_types.iter().find(|kind| kind.is_device_scoped())
            && device_ids.is_none()
        {
            return Err(ProvisionError::Provisioning(format!(
                "{distribution_type} profiles require the test device list to be ensured first"
            )));
        }

        let valid_until = Utc::now() + Duration::days(i64::from(min_days_valid));

        if self.uses_managed_signing {
            crate::detail!("project uses managed signing, looking for portal-managed profiles");
            if let Some(resolution) = self
                .managed_profiles(distribution_types, device_ids.as_deref(), valid_until)
                .await?
            {
                crate::success!("all targets covered by portal-managed profiles");
                return Ok(resolution);
            }
            crate::warn!("portal-managed profiles are missing or outdated, falling back to manual profiles");
        }

        let portal_certificates = self.portal.list_certificates().await?;
        let mut resolution = ProfileResolution::default();

        for target in self.targets {
            crate::detail!("checking {} ({})", target.name, target.bundle_id);

            let Some(bundle_id) = self.ensure_bundle_id(target, allow_generate).await? else {
                continue;
            };
            let existing = self.portal.list_profiles(&bundle_id).await?;

            for &distribution_type in distribution_types {
                let certificate = self.certificate_for(distribution_type)?;
                let portal_certificate = find_portal_certificate(&portal_certificates, certificate)?;
                let requirements = Requirements {
                    profile_type: profile_type_name(distribution_type, target.platform)?,
                    bundle_id: &target.bundle_id,
                    certificate_id: Some(&portal_certificate.id),
                    device_ids: device_ids.as_deref().filter(|_| distribution_type.is_device_scoped()),
                    valid_until,
                };

                let reusable = existing
                    .iter()
                    .filter(|profile| !profile.is_managed() && is_reusable(profile, &requirements))
                    .max_by_key(|profile| profile.expires);

                let profile = match reusable {
                    Some(profile) => {
                        crate::detail!("using existing profile: {} ({})", profile.name, profile.uuid);
                        profile.clone()
                    }
                    None if !allow_generate => {
                        return Err(ProvisionError::Provisioning(format!(
                            "missing valid {distribution_type} provisioning profile for {} and profile generation is disabled",
                            target.bundle_id
                        )));
                    }
                    None if self.dry_run => {
                        crate::detail!(
                            "would generate {distribution_type} profile for {}",
                            target.bundle_id
                        );
                        continue;
                    }
                    None => {
                        self.generate(&bundle_id, distribution_type, &requirements, &existing)
                            .await?
                    }
                };

                resolution.insert(ResolvedProfile {
                    distribution_type,
                    bundle_id: target.bundle_id.clone(),
                    portal_profile: profile,
                });
            }
        }

        Ok(resolution)
    }

    /// Managed profiles for every pair, or `None` if any pair lacks one.
    async fn managed_profiles(
        &self,
        distribution_types: &[DistributionType],
        device_ids: Option<&[String]>,
        valid_until: DateTime<Utc>,
    ) -> Result<Option<ProfileResolution>> {
        let mut resolution = ProfileResolution {
            managed_signing: true,
            ..ProfileResolution::default()
        };

        for target in self.targets {
            let Some(bundle_id) = self.portal.find_bundle_id(&target.bundle_id).await? else {
                crate::debug!("{} is not registered on the developer portal", target.bundle_id);
                return Ok(None);
            };
            let existing = self.portal.list_profiles(&bundle_id).await?;

            for &distribution_type in distribution_types {
                let requirements = Requirements {
                    profile_type: profile_type_name(distribution_type, target.platform)?,
                    bundle_id: &target.bundle_id,
                    certificate_id: None,
                    device_ids: device_ids.filter(|_| distribution_type.is_device_scoped()),
                    valid_until,
                };
                let Some(profile) = existing
                    .iter()
                    .filter(|profile| profile.is_managed() && is_reusable(profile, &requirements))
                    .max_by_key(|profile| profile.expires)
                else {
                    crate::debug!("no managed {distribution_type} profile for {}", target.bundle_id);
                    return Ok(None);
                };

                resolution.insert(ResolvedProfile {
                    distribution_type,
                    bundle_id: target.bundle_id.clone(),
                    portal_profile: profile.clone(),
                });
            }
        }

        Ok(Some(resolution))
    }

    /// Find or register the target's bundle id and enable the capabilities
    /// its entitlements need. `None` only in dry runs for unregistered ids.
    async fn ensure_bundle_id(&self, target: &Target, allow_generate: bool) -> Result<Option<BundleIdRecord>> {
        let record = match self.portal.find_bundle_id(&target.bundle_id).await? {
            Some(record) => record,
            None if !allow_generate => {
                return Err(ProvisionError::Provisioning(format!(
                    "bundle id {} is not registered and profile generation is disabled",
                    target.bundle_id
                )));
            }
            None if self.dry_run => {
                crate::detail!("would register bundle id: {}", target.bundle_id);
                return Ok(None);
            }
            None => {
                let name = format!("{PROFILE_NAME_PREFIX} {}", target.name);
                let record = self
                    .portal
                    .create_bundle_id(&target.bundle_id, &name, target.platform)
                    .await?;
                crate::success!("registered bundle id: {}", record.identifier);
                record
            }
        };

        for capability in required_capabilities(&target.entitlements) {
            if record.capabilities.iter().any(|enabled| enabled == capability) {
                continue;
            }
            if self.dry_run {
                crate::detail!("would enable {capability} for {}", record.identifier);
                continue;
            }
            self.portal.enable_capability(&record, capability).await?;
            crate::success!("enabled {capability} for {}", record.identifier);
        }

        Ok(Some(record))
    }

    async fn generate(
        &self,
        bundle_id: &BundleIdRecord,
        distribution_type: DistributionType,
        requirements: &Requirements<'_>,
        existing: &[PortalProfile],
    ) -> Result<PortalProfile> {
        let name = generated_profile_name(distribution_type, &bundle_id.identifier);

        for stale in existing.iter().filter(|profile| profile.name == name) {
            crate::detail!("deleting outdated profile: {} ({})", stale.name, stale.uuid);
            self.portal.delete_profile(stale).await?;
        }

        let request = ProfileRequest {
            name,
            profile_type: requirements.profile_type,
            bundle_id: bundle_id.clone(),
            certificate_ids: requirements.certificate_id.map(str::to_string).into_iter().collect(),
            device_ids: requirements.device_ids.map(<[String]>::to_vec).unwrap_or_default(),
        };
        let profile = self.portal.create_profile(&request).await?;
        crate::success!("generated profile: {} ({})", profile.name, profile.uuid);
        Ok(profile)
    }

    fn certificate_for(&self, distribution_type: DistributionType) -> Result<&'a Certificate> {
        let kind = CertificateKind::for_distribution(distribution_type);
        self.certificates.certificate_info(kind).ok_or_else(|| {
            ProvisionError::CertificateMismatch(format!(
                "no {kind} certificate available for {distribution_type} profiles"
            ))
        })
    }
}

fn find_portal_certificate<'c>(
    portal_certificates: &'c [PortalCertificate],
    certificate: &Certificate,
) -> Result<&'c PortalCertificate> {
    let found = portal_certificates
        .iter()
        .find(|candidate| certificate.serial_matches(&candidate.serial_number))
        .ok_or_else(|| {
            ProvisionError::CertificateMismatch(format!(
                "certificate {} (serial {}) is not registered on the developer portal",
                certificate.common_name, certificate.serial
            ))
        })?;
    crate::debug!(
        "{} is portal certificate {} ({}, {})",
        certificate.common_name,
        found.id,
        found.name,
        found.certificate_type
    );
    Ok(found)
}

fn is_reusable(profile: &PortalProfile, requirements: &Requirements<'_>) -> bool {
    profile.active
        && profile.profile_type == requirements.profile_type
        && profile.bundle_id == requirements.bundle_id
        && profile.expires > requirements.valid_until
        && requirements
            .certificate_id
            .is_none_or(|id| profile.certificate_ids.iter().any(|included| included == id))
        && requirements.device_ids.is_none_or(|ids| {
            ids.iter()
                .all(|id| profile.device_ids.iter().any(|included| included == id))
        })
}

/// Write every resolved profile to `<dir>/<uuid>.mobileprovision`.
pub async fn install_profiles(resolution: &ProfileResolution, dir: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(dir).await?;

    let mut installed = 0;
    for profile in resolution.iter() {
        if profile.portal_profile.content.is_empty() {
            crate::warn!("profile {} has no content, not installing", profile.uuid());
            continue;
        }
        let path = dir.join(format!("{}.mobileprovision", profile.uuid()));
        tokio::fs::write(&path, &profile.portal_profile.content).await?;
        crate::debug!("installed {}", path.display());
        installed += 1;
    }

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::tests::certificate;
    use crate::portal::{PortalDevice, TestDevice};
    use crate::project::Platform;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Portal that records every call and owns nothing
    #[derive(Default)]
    struct RecordingPortal {
        calls: RefCell<Vec<&'static str>>,
    }

    impl DeveloperPortal for RecordingPortal {
        async fn list_certificates(&self) -> Result<Vec<PortalCertificate>> {
            self.calls.borrow_mut().push("list_certificates");
            Ok(vec![])
        }

        async fn list_devices(&self, _platform: Platform) -> Result<Vec<PortalDevice>> {
            self.calls.borrow_mut().push("list_devices");
            Ok(vec![])
        }

        async fn register_device(&self, _device: &TestDevice, _platform: Platform) -> Result<PortalDevice> {
            self.calls.borrow_mut().push("register_device");
            Err(ProvisionError::Provisioning("unexpected".into()))
        }

        async fn find_bundle_id(&self, _identifier: &str) -> Result<Option<BundleIdRecord>> {
            self.calls.borrow_mut().push("find_bundle_id");
            Ok(None)
        }

        async fn create_bundle_id(&self, _identifier: &str, _name: &str, _platform: Platform) -> Result<BundleIdRecord> {
            self.calls.borrow_mut().push("create_bundle_id");
            Err(ProvisionError::Provisioning("unexpected".into()))
        }

        async fn enable_capability(&self, _bundle_id: &BundleIdRecord, _capability: &str) -> Result<()> {
            self.calls.borrow_mut().push("enable_capability");
            Ok(())
        }

        async fn list_profiles(&self, _bundle_id: &BundleIdRecord) -> Result<Vec<PortalProfile>> {
            self.calls.borrow_mut().push("list_profiles");
            Ok(vec![])
        }

        async fn create_profile(&self, _request: &ProfileRequest) -> Result<PortalProfile> {
            self.calls.borrow_mut().push("create_profile");
            Err(ProvisionError::Provisioning("unexpected".into()))
        }

        async fn delete_profile(&self, _profile: &PortalProfile) -> Result<()> {
            self.calls.borrow_mut().push("delete_profile");
            Ok(())
        }
    }

    fn profile(name: &str, days: i64) -> PortalProfile {
        PortalProfile {
            id: "P1".into(),
            uuid: "uuid-1".into(),
            name: name.into(),
            profile_type: "IOS_APP_ADHOC".into(),
            active: true,
            expires: Utc::now() + Duration::days(days),
            bundle_id: "com.x.app".into(),
            certificate_ids: vec!["C1".into()],
            device_ids: vec!["D1".into(), "D2".into()],
            content: b"profile".to_vec(),
        }
    }

    fn requirements<'r>(device_ids: Option<&'r [String]>, min_days: i64) -> Requirements<'r> {
        Requirements {
            profile_type: "IOS_APP_ADHOC",
            bundle_id: "com.x.app",
            certificate_id: Some("C1"),
            device_ids,
            valid_until: Utc::now() + Duration::days(min_days),
        }
    }

    #[test]
    fn reusable_profile_meets_every_requirement() {
        let devices = vec!["D1".to_string()];
        assert!(is_reusable(&profile("p", 30), &requirements(Some(&devices), 7)));
    }

    #[test]
    fn expiring_profile_is_not_reusable() {
        assert!(!is_reusable(&profile("p", 5), &requirements(None, 7)));
    }

    #[test]
    fn profile_missing_a_device_is_not_reusable() {
        let devices = vec!["D1".to_string(), "D3".to_string()];
        assert!(!is_reusable(&profile("p", 30), &requirements(Some(&devices), 0)));
    }

    #[test]
    fn profile_without_certificate_or_inactive_is_not_reusable() {
        let mut other_certificate = profile("p", 30);
        other_certificate.certificate_ids = vec!["C2".into()];
        assert!(!is_reusable(&other_certificate, &requirements(None, 0)));

        let mut inactive = profile("p", 30);
        inactive.active = false;
        assert!(!is_reusable(&inactive, &requirements(None, 0)));
    }

    #[tokio::test]
    async fn device_scoped_types_need_ensured_devices() {
        let portal = RecordingPortal::default();
        let certificates = CertificateStore::from_certificates(vec![certificate(
            CertificateKind::Production,
            "Apple Distribution: Acme (XYZ)",
            30,
        )])
        .unwrap();
        let targets = [Target {
            name: "App".into(),
            bundle_id: "com.x.app".into(),
            entitlements: plist::Dictionary::new(),
            platform: Platform::Ios,
        }];

        let resolver = ProfileResolver::new(&portal, &certificates, &targets, false, false);
        let err = resolver
            .ensure_profiles(&[DistributionType::AdHoc], None, true, 0)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Provisioning(_)), "{err}");
        assert!(portal.calls.borrow().is_empty());

        let managed = ProfileResolver::new(&portal, &certificates, &targets, true, false);
        assert!(managed
            .ensure_profiles(&[DistributionType::Development], None, true, 0)
            .await
            .is_err());
        assert!(portal.calls.borrow().is_empty());
    }

    #[test]
    fn names_generated_profiles() {
        assert_eq!(
            generated_profile_name(DistributionType::AdHoc, "com.x.app"),
            "Kodegen ad-hoc - (com.x.app)"
        );
    }

    #[tokio::test]
    async fn installs_profiles_by_uuid() {
        let dir = TempDir::new().unwrap();
        let mut resolution = ProfileResolution::default();
        resolution.insert(ResolvedProfile {
            distribution_type: DistributionType::AdHoc,
            bundle_id: "com.x.app".into(),
            portal_profile: profile("p", 30),
        });

        let installed = install_profiles(&resolution, dir.path()).await.unwrap();
        assert_eq!(installed, 1);
        let written = tokio::fs::read(dir.path().join("uuid-1.mobileprovision")).await.unwrap();
        assert_eq!(written, b"profile");
        assert_eq!(
            resolution.profiles_by_bundle_id(DistributionType::AdHoc)["com.x.app"].uuid(),
            "uuid-1"
        );
        assert!(resolution.profiles_by_bundle_id(DistributionType::Development).is_empty());
    }
}
