//! Automatic code signing provisioning for Xcode projects
//!
//! Given signing certificates, an Xcode project and a developer portal
//! account, a run makes sure every target has a valid provisioning profile,
//! switches the project to those profiles, installs the certificates into a
//! keychain and exports the chosen identities for later build steps.

#[macro_use]
pub mod log;

pub mod capabilities;
pub mod certificate;
pub mod command;
pub mod config;
pub mod devices;
pub mod env_guard;
pub mod error;
pub mod keychain;
pub mod outputs;
pub mod pipeline;
pub mod plan;
pub mod portal;
pub mod profiles;
pub mod project;
pub mod signing;

pub use config::{DistributionType, ProvisionConfig};
pub use error::{ProvisionError, Result};
pub use pipeline::{ProvisionReport, Provisioner};

use certificate::OpenSslCertificateLoader;
use command::TokioCommandRunner;
use env_guard::{AVOID_XCODE_API_VAR, ClearedEnvVar};
use outputs::EnvmanPublisher;
use portal::PortalAuthenticator;
use project::XcodeProject;

/// Provision with the portal, `openssl`, `security` and `envman`.
///
/// The portal API toggle is cleared for the whole run and restored on
/// return, whether the run succeeded or not.
pub async fn run(config: &ProvisionConfig) -> Result<ProvisionReport> {
    let _avoid_xcode_api = ClearedEnvVar::clear(AVOID_XCODE_API_VAR);

    let provisioner = Provisioner::new(
        config,
        PortalAuthenticator::new()?,
        OpenSslCertificateLoader::new()?,
        TokioCommandRunner,
        EnvmanPublisher::new(TokioCommandRunner),
    );

    provisioner
        .run(async || {
            XcodeProject::open(
                &config.project_path,
                config.main_target.as_deref(),
                config.configuration.as_deref(),
            )
            .await
        })
        .await
}
