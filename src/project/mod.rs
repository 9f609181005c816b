//! Project inspection and signing settings mutation

mod xcode;

pub use xcode::XcodeProject;

use crate::error::Result;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    TvOs,
    MacOs,
}

impl Platform {
    /// Map an `SDKROOT` build setting to a platform
    #[must_use]
    pub fn from_sdk_root(sdk_root: &str) -> Option<Self> {
        match sdk_root {
            s if s.starts_with("iphoneos") => Some(Self::Ios),
            s if s.starts_with("appletvos") => Some(Self::TvOs),
            s if s.starts_with("macosx") => Some(Self::MacOs),
            _ => None,
        }
    }

    /// Platform value the registry uses for devices and bundle ids
    #[must_use]
    pub fn registry_name(&self) -> &'static str {
        match self {
            Self::Ios | Self::TvOs => "IOS",
            Self::MacOs => "MAC_OS",
        }
    }

    /// SDK name used in conditional build settings (`[sdk=iphoneos*]`)
    #[must_use]
    pub fn sdk_name(&self) -> &'static str {
        match self {
            Self::Ios => "iphoneos",
            Self::TvOs => "appletvos",
            Self::MacOs => "macosx",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ios => f.write_str("iOS"),
            Self::TvOs => f.write_str("tvOS"),
            Self::MacOs => f.write_str("macOS"),
        }
    }
}

/// Build target that needs signing.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub bundle_id: String,
    /// Entitlement keys mapped to their configuration
    pub entitlements: plist::Dictionary,
    pub platform: Platform,
}

/// Read access to the project's targets and signing settings, plus the one
/// mutation provisioning performs.
#[allow(async_fn_in_trait)]
pub trait ProjectInspector {
    /// Main target first, followed by the targets it depends on
    fn targets(&self) -> &[Target];

    fn main_target(&self) -> &Target;

    fn team_id(&self) -> Option<&str>;

    fn codesign_identity(&self) -> Option<&str>;

    /// Whether the registry manages signing for this project
    fn uses_managed_signing(&self) -> bool;

    fn platform(&self) -> Platform {
        self.main_target().platform
    }

    fn target_bundle_id(&self, target_name: &str) -> Option<&str> {
        self.targets()
            .iter()
            .find(|target| target.name == target_name)
            .map(|target| target.bundle_id.as_str())
    }

    /// Switch a target to manual signing with the given team, identity and
    /// profile. Applying the same values twice leaves the project unchanged.
    fn force_code_sign_properties(
        &mut self,
        target_name: &str,
        team_id: &str,
        identity: &str,
        profile_uuid: &str,
    ) -> Result<()>;

    /// Persist changes made by `force_code_sign_properties`
    async fn save(&self) -> Result<()>;
}
