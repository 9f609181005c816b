//! Applying resolved identities and profiles to project targets

use crate::certificate::CertificateStore;
use crate::config::DistributionType;
use crate::error::{ProvisionError, Result};
use crate::plan::DistributionPlan;
use crate::profiles::ProfileResolution;
use crate::project::{ProjectInspector, Target};

/// Identity and profile assigned to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningAssignment {
    pub target_name: String,
    pub bundle_id: String,
    pub identity: String,
    pub profile_uuid: String,
}

pub struct SigningApplier<'a> {
    certificates: &'a CertificateStore,
    resolution: &'a ProfileResolution,
    plan: &'a DistributionPlan,
}

impl<'a> SigningApplier<'a> {
    pub fn new(
        certificates: &'a CertificateStore,
        resolution: &'a ProfileResolution,
        plan: &'a DistributionPlan,
    ) -> Self {
        Self {
            certificates,
            resolution,
            plan,
        }
    }

    /// Development signing when a development certificate is present,
    /// otherwise production signing for the primary distribution type.
    pub fn assignment(&self, target: &Target) -> Result<SigningAssignment> {
        let (certificate, distribution_type) = match (
            self.certificates.development_certificate(),
            self.certificates.production_certificate(),
        ) {
            (Some(development), _) => (development, DistributionType::Development),
            (None, Some(production)) => (production, self.plan.primary()),
            (None, None) => {
                return Err(ProvisionError::ProjectState(format!(
                    "no codesign settings generated for target: {} ({})",
                    target.name, target.bundle_id
                )));
            }
        };

        let profile = self
            .resolution
            .profile(distribution_type, &target.bundle_id)
            .ok_or_else(|| {
                ProvisionError::Provisioning(format!(
                    "no {distribution_type} profile resolved for target: {} ({})",
                    target.name, target.bundle_id
                ))
            })?;

        Ok(SigningAssignment {
            target_name: target.name.clone(),
            bundle_id: target.bundle_id.clone(),
            identity: certificate.common_name.clone(),
            profile_uuid: profile.uuid().to_string(),
        })
    }

    /// Assignments for every target, computed before anything is written
    pub fn assignments(&self, targets: &[Target]) -> Result<Vec<SigningAssignment>> {
        targets.iter().map(|target| self.assignment(target)).collect()
    }

    /// Force manual signing on every target and save the project.
    ///
    /// Nothing is written unless every target received an assignment.
    pub async fn apply<I: ProjectInspector>(&self, project: &mut I) -> Result<Vec<SigningAssignment>> {
        let assignments = self.assignments(project.targets())?;

        for assignment in &assignments {
            crate::success!("configure target: {} ({})", assignment.target_name, assignment.bundle_id);
            crate::detail!("  identity: {}", assignment.identity);
            crate::detail!("  profile:  {}", assignment.profile_uuid);
            project.force_code_sign_properties(
                &assignment.target_name,
                &self.plan.team_id,
                &assignment.identity,
                &assignment.profile_uuid,
            )?;
        }

        project.save().await?;
        Ok(assignments)
    }
}
