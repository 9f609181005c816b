//! Team reconciliation and distribution planning

use crate::certificate::CertificateStore;
use crate::config::DistributionType;
use crate::error::{ProvisionError, Result};

/// Team and identity the rest of the run signs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningTeam {
    pub team_id: String,
    /// Identity named by the project, `None` once the team was overridden
    pub codesign_identity: Option<String>,
}

/// Decide the team id for the run.
///
/// A configured team that differs from the project's wins, and the project's
/// identity is dropped since it was issued for another team. Certificates are
/// then selected by kind only.
pub fn reconcile_team(
    configured_team: Option<&str>,
    project_team: Option<&str>,
    project_identity: Option<&str>,
) -> Result<SigningTeam> {
    let configured_team = configured_team.filter(|team| !team.is_empty());
    let mut codesign_identity = project_identity.map(str::to_string);

    let team_id = match (configured_team, project_team) {
        (Some(configured), project) if project != Some(configured) => {
            crate::warn!(
                "different team id defined: {configured} than the project's one: {}",
                project.unwrap_or("none")
            );
            crate::warn!("using defined team id: {configured}");
            if let Some(identity) = codesign_identity.take() {
                crate::warn!("dropping project codesign identity: {identity}");
            }
            configured.to_string()
        }
        (_, Some(project)) => project.to_string(),
        (_, None) => {
            return Err(ProvisionError::ProjectState(
                "failed to determine project development team".to_string(),
            ));
        }
    };

    Ok(SigningTeam {
        team_id,
        codesign_identity,
    })
}

/// Distribution types to provision for, in resolution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPlan {
    pub team_id: String,
    primary: DistributionType,
    distribution_types: Vec<DistributionType>,
}

impl DistributionPlan {
    /// Development is provisioned ahead of any other primary type whenever a
    /// development certificate is available, so a debug-signable profile
    /// always exists.
    #[must_use]
    pub fn new(team_id: String, primary: DistributionType, certificates: &CertificateStore) -> Self {
        let mut distribution_types = vec![primary];
        if primary != DistributionType::Development && certificates.development_certificate().is_some() {
            distribution_types.insert(0, DistributionType::Development);
        }

        Self {
            team_id,
            primary,
            distribution_types,
        }
    }

    /// The requested distribution type
    #[must_use]
    pub fn primary(&self) -> DistributionType {
        self.primary
    }

    #[must_use]
    pub fn distribution_types(&self) -> &[DistributionType] {
        &self.distribution_types
    }

    /// Whether any planned type needs the registry device list
    #[must_use]
    pub fn requires_devices(&self) -> bool {
        self.distribution_types.iter().any(DistributionType::is_device_scoped)
    }
}
