//! The provisioning run, stage by stage
//!
//! authenticate, download certificates, inspect the project, reconcile the
//! team, plan distribution types, ensure devices, resolve profiles, apply
//! signing, install certificates, publish outputs. Every stage completes
//! before the next starts and the first error ends the run.

use crate::certificate::{CertificateLoader, CertificateStore};
use crate::command::CommandRunner;
use crate::config::{DistributionType, ProvisionConfig};
use crate::devices::DeviceRegistry;
use crate::error::{ProvisionError, Result};
use crate::keychain::KeychainInstaller;
use crate::outputs::{OutputKey, OutputSink, collect_outputs, publish_outputs};
use crate::plan::{DistributionPlan, reconcile_team};
use crate::portal::{Authenticator, TestDevice};
use crate::profiles::{ProfileResolver, install_profiles};
use crate::project::ProjectInspector;
use crate::signing::{SigningApplier, SigningAssignment};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What a completed run did.
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    pub team_id: String,
    pub distribution_types: Vec<DistributionType>,
    pub managed_signing: bool,
    /// Profile uuid per (distribution type, bundle id)
    pub profiles: BTreeMap<(DistributionType, String), String>,
    pub assignments: Vec<SigningAssignment>,
    pub certificates_installed: usize,
    pub profiles_installed: usize,
    pub outputs: Vec<(OutputKey, String)>,
}

pub struct Provisioner<'a, A, L, R, S> {
    config: &'a ProvisionConfig,
    authenticator: A,
    loader: L,
    runner: R,
    outputs: S,
    keychain_lock: Option<PathBuf>,
}

impl<'a, A, L, R, S> Provisioner<'a, A, L, R, S>
where
    A: Authenticator,
    L: CertificateLoader,
    R: CommandRunner,
    S: OutputSink,
{
    /// # Arguments
    /// * `authenticator` - Opens the developer portal session
    /// * `loader` - Downloads and inspects certificate bundles
    /// * `runner` - Runs keychain commands
    /// * `outputs` - Receives the published values
    pub fn new(config: &'a ProvisionConfig, authenticator: A, loader: L, runner: R, outputs: S) -> Self {
        Self {
            config,
            authenticator,
            loader,
            runner,
            outputs,
            keychain_lock: None,
        }
    }

    /// Override the keychain lock file
    #[must_use]
    pub fn with_keychain_lock(mut self, path: PathBuf) -> Self {
        self.keychain_lock = Some(path);
        self
    }

    /// Run every stage. `open_project` is called once certificates are known.
    pub async fn run<I, F>(&self, open_project: F) -> Result<ProvisionReport>
    where
        I: ProjectInspector,
        F: AsyncFnOnce() -> Result<I>,
    {
        let config = self.config;
        config.validate()?;

        let sources = config.certificate_sources()?;
        if sources.is_empty() {
            return Err(ProvisionError::MissingConfig(
                "no certificate URL provided".to_string(),
            ));
        }
        if config.dry_run {
            crate::warn!("dry run: nothing will be written");
        }

        crate::info!("Authenticating with the developer portal");
        let session = self
            .authenticator
            .login(&config.build_url, &config.build_api_token, config.team_id.as_deref())
            .await?;
        crate::success!("authenticated");

        crate::info!("Downloading certificates");
        let certificates = CertificateStore::download_and_identify(&self.loader, &sources).await?;
        for certificate in certificates.active_certificates() {
            crate::detail!("{} certificate: {}", certificate.kind, certificate.common_name);
        }

        crate::info!("Analyzing project");
        let mut project = open_project().await?;
        crate::detail!("project codesign identity: {}", project.codesign_identity().unwrap_or("none"));
        crate::detail!("project team id: {}", project.team_id().unwrap_or("none"));
        crate::detail!("uses managed signing: {}", project.uses_managed_signing());
        crate::detail!("main target's platform: {}", project.platform());
        for (index, target) in project.targets().iter().enumerate() {
            crate::detail!(
                "target #{index}: {} ({}) with {} services",
                target.name,
                target.bundle_id,
                target.entitlements.len()
            );
        }

        let team = reconcile_team(
            config.team_id.as_deref(),
            project.team_id(),
            project.codesign_identity(),
        )?;

        crate::info!("Matching project codesign identity with the uploaded certificates");
        certificates.ensure_certificate(
            team.codesign_identity.as_deref(),
            &team.team_id,
            config.distribution_type,
        )?;

        let plan = DistributionPlan::new(team.team_id, config.distribution_type, &certificates);
        crate::debug!("distribution types: {:?}", plan.distribution_types());

        let devices = if plan.requires_devices() {
            crate::info!("Ensure test devices on the developer portal");
            let test_devices: &[TestDevice] = if config.register_test_devices {
                session.test_devices.as_slice()
            } else {
                &[]
            };
            let registry = DeviceRegistry::new(&session.portal, config.dry_run);
            Some(registry.ensure_test_devices(test_devices, project.platform()).await?)
        } else {
            None
        };

        crate::info!("Ensure provisioning profiles on the developer portal");
        let targets = project.targets().to_vec();
        let resolution = ProfileResolver::new(
            &session.portal,
            &certificates,
            &targets,
            project.uses_managed_signing(),
            config.dry_run,
        )
        .ensure_profiles(
            plan.distribution_types(),
            devices.as_ref(),
            config.generate_profiles,
            config.min_profile_days_valid,
        )
        .await?;

        let mut report = ProvisionReport {
            team_id: plan.team_id.clone(),
            distribution_types: plan.distribution_types().to_vec(),
            managed_signing: resolution.managed_signing,
            profiles: resolution
                .iter()
                .map(|profile| {
                    (
                        (profile.distribution_type, profile.bundle_id.clone()),
                        profile.uuid().to_string(),
                    )
                })
                .collect(),
            ..ProvisionReport::default()
        };

        let applier = SigningApplier::new(&certificates, &resolution, &plan);

        if config.dry_run {
            if !resolution.managed_signing {
                match applier.assignments(&targets) {
                    Ok(assignments) => {
                        for assignment in &assignments {
                            crate::detail!(
                                "would sign {} with {} and profile {}",
                                assignment.target_name,
                                assignment.identity,
                                assignment.profile_uuid
                            );
                        }
                        report.assignments = assignments;
                    }
                    Err(e) => crate::warn!("signing settings not yet resolvable: {e}"),
                }
            }
            crate::success!("dry run complete, project, keychain and outputs left unchanged");
            return Ok(report);
        }

        if !resolution.managed_signing {
            crate::info!("Apply code sign setting in project");
            report.assignments = applier.apply(&mut project).await?;
        }

        crate::info!("Install provisioning profiles");
        report.profiles_installed = install_profiles(&resolution, &config.resolved_profiles_dir()?).await?;
        crate::success!("{} profiles installed", report.profiles_installed);

        crate::info!("Install certificates");
        let batch: BTreeMap<PathBuf, _> = certificates
            .active_certificates()
            .into_iter()
            .map(|certificate| (certificate.path.clone(), certificate.passphrase.clone()))
            .collect();
        let mut installer = KeychainInstaller::new(
            &config.keychain_path,
            config.keychain_password.clone(),
            &self.runner,
        )?;
        if let Some(lock) = &self.keychain_lock {
            installer = installer.with_lock_path(lock.clone());
        }
        crate::detail!("keychain: {}", installer.keychain_path().display());
        report.certificates_installed = installer.install_certificates(&batch).await?;
        crate::success!("{} certificates installed", report.certificates_installed);

        crate::info!("Export outputs");
        report.outputs = collect_outputs(&plan, &certificates, &resolution, &project.main_target().bundle_id)?;
        publish_outputs(&self.outputs, &report.outputs).await?;

        Ok(report)
    }
}
