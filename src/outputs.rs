//! Publishing resolved signing values to the surrounding build

use crate::certificate::CertificateStore;
use crate::command::CommandRunner;
use crate::config::DistributionType;
use crate::error::{ProvisionError, Result};
use crate::plan::DistributionPlan;
use crate::profiles::ProfileResolution;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputKey {
    ExportMethod,
    DeveloperTeam,
    DevelopmentCodesignIdentity,
    DevelopmentProfile,
    ProductionCodesignIdentity,
    ProductionProfile,
}

impl OutputKey {
    /// Environment variable the value is exported as
    #[must_use]
    pub fn env_name(&self) -> &'static str {
        match self {
            Self::ExportMethod => "BITRISE_EXPORT_METHOD",
            Self::DeveloperTeam => "BITRISE_DEVELOPER_TEAM",
            Self::DevelopmentCodesignIdentity => "BITRISE_DEVELOPMENT_CODESIGN_IDENTITY",
            Self::DevelopmentProfile => "BITRISE_DEVELOPMENT_PROFILE",
            Self::ProductionCodesignIdentity => "BITRISE_PRODUCTION_CODESIGN_IDENTITY",
            Self::ProductionProfile => "BITRISE_PRODUCTION_PROFILE",
        }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_name())
    }
}

/// Receives published values. Publishing a key again replaces its value.
#[allow(async_fn_in_trait)]
pub trait OutputSink {
    async fn publish(&self, key: OutputKey, value: &str) -> Result<()>;
}

impl<S: OutputSink> OutputSink for &S {
    async fn publish(&self, key: OutputKey, value: &str) -> Result<()> {
        (**self).publish(key, value).await
    }
}

/// Exports values with `envman add`.
pub struct EnvmanPublisher<R> {
    runner: R,
}

impl<R: CommandRunner> EnvmanPublisher<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> OutputSink for EnvmanPublisher<R> {
    async fn publish(&self, key: OutputKey, value: &str) -> Result<()> {
        self.runner
            .run("envman", &["add", "--key", key.env_name(), "--value", value])
            .await?
            .check(|stderr| ProvisionError::CommandExecution(format!("envman add {key} failed: {stderr}")))?;
        Ok(())
    }
}

/// Keeps published values in memory.
#[derive(Debug, Default)]
pub struct MemoryOutputs {
    values: RefCell<BTreeMap<OutputKey, String>>,
}

impl MemoryOutputs {
    #[must_use]
    pub fn get(&self, key: OutputKey) -> Option<String> {
        self.values.borrow().get(&key).cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<OutputKey, String> {
        self.values.borrow().clone()
    }
}

impl OutputSink for MemoryOutputs {
    async fn publish(&self, key: OutputKey, value: &str) -> Result<()> {
        self.values.borrow_mut().insert(key, value.to_string());
        Ok(())
    }
}

/// Values describing how the main target is signed.
///
/// Development values are present whenever a development certificate is;
/// production values only when the primary type is not development.
pub fn collect_outputs(
    plan: &DistributionPlan,
    certificates: &CertificateStore,
    resolution: &ProfileResolution,
    main_bundle_id: &str,
) -> Result<Vec<(OutputKey, String)>> {
    let mut outputs = vec![
        (OutputKey::ExportMethod, plan.primary().to_string()),
        (OutputKey::DeveloperTeam, plan.team_id.clone()),
    ];

    let profile_uuid = |distribution_type: DistributionType| {
        resolution
            .profile(distribution_type, main_bundle_id)
            .map(|profile| profile.uuid().to_string())
            .ok_or_else(|| {
                ProvisionError::Provisioning(format!(
                    "no {distribution_type} profile resolved for {main_bundle_id}"
                ))
            })
    };

    if let Some(certificate) = certificates.development_certificate() {
        outputs.push((OutputKey::DevelopmentCodesignIdentity, certificate.common_name.clone()));
        outputs.push((OutputKey::DevelopmentProfile, profile_uuid(DistributionType::Development)?));
    }

    if plan.primary() != DistributionType::Development
        && let Some(certificate) = certificates.production_certificate()
    {
        outputs.push((OutputKey::ProductionCodesignIdentity, certificate.common_name.clone()));
        outputs.push((OutputKey::ProductionProfile, profile_uuid(plan.primary())?));
    }

    Ok(outputs)
}

pub async fn publish_outputs<S: OutputSink>(sink: &S, outputs: &[(OutputKey, String)]) -> Result<()> {
    for (key, value) in outputs {
        sink.publish(*key, value).await?;
        crate::success!("{key}={value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;

    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<(String, Vec<String>)>>,
    }

    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            self.calls.borrow_mut().push((
                program.to_string(),
                args.iter().map(|arg| arg.to_string()).collect(),
            ));
            Ok(CommandOutput {
                success: true,
                ..CommandOutput::default()
            })
        }
    }

    #[tokio::test]
    async fn envman_publishes_each_key() {
        let runner = RecordingRunner::default();
        let publisher = EnvmanPublisher::new(&runner);
        publish_outputs(
            &publisher,
            &[
                (OutputKey::ExportMethod, "ad-hoc".to_string()),
                (OutputKey::DeveloperTeam, "TEAM123456".to_string()),
            ],
        )
        .await
        .unwrap();

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "envman");
        assert_eq!(
            calls[1].1,
            ["add", "--key", "BITRISE_DEVELOPER_TEAM", "--value", "TEAM123456"]
        );
    }

    #[tokio::test]
    async fn memory_outputs_overwrite() {
        let outputs = MemoryOutputs::default();
        outputs.publish(OutputKey::DeveloperTeam, "A").await.unwrap();
        outputs.publish(OutputKey::DeveloperTeam, "B").await.unwrap();
        assert_eq!(outputs.get(OutputKey::DeveloperTeam).as_deref(), Some("B"));
        assert_eq!(outputs.snapshot().len(), 1);
    }
}
