//! Remote developer registry (App Store Connect) access
//!
//! - `auth` - Exchanging build credentials for an authenticated session
//! - `app_store_connect` - JSON:API client implementing [`DeveloperPortal`]

pub mod app_store_connect;
pub mod auth;

pub use app_store_connect::AppStoreConnectClient;
pub use auth::{Authenticator, PortalAuthenticator, Session, TestDevice};

use crate::config::DistributionType;
use crate::error::{ProvisionError, Result};
use crate::project::Platform;
use chrono::{DateTime, Utc};

/// Name prefixes of profiles the registry manages on the developer's behalf
const MANAGED_PROFILE_PREFIXES: &[&str] = &["XC ", "iOS Team", "tvOS Team", "Mac Team"];

/// Signing certificate as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalCertificate {
    pub id: String,
    pub name: String,
    pub serial_number: String,
    pub certificate_type: String,
}

/// Test device registered in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalDevice {
    pub id: String,
    pub udid: String,
    pub name: String,
    pub enabled: bool,
}

/// Registered bundle identifier and its enabled capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIdRecord {
    pub id: String,
    pub identifier: String,
    pub capabilities: Vec<String>,
}

/// Provisioning profile record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalProfile {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub profile_type: String,
    pub active: bool,
    pub expires: DateTime<Utc>,
    pub bundle_id: String,
    pub certificate_ids: Vec<String>,
    pub device_ids: Vec<String>,
    /// Raw `.mobileprovision` payload
    pub content: Vec<u8>,
}

impl PortalProfile {
    /// Whether the registry generated and maintains this profile itself
    #[must_use]
    pub fn is_managed(&self) -> bool {
        MANAGED_PROFILE_PREFIXES
            .iter()
            .any(|prefix| self.name.starts_with(prefix))
    }
}

/// Parameters for creating a profile.
#[derive(Debug, Clone)]
pub struct ProfileRequest {
    pub name: String,
    pub profile_type: &'static str,
    pub bundle_id: BundleIdRecord,
    pub certificate_ids: Vec<String>,
    pub device_ids: Vec<String>,
}

/// Operations the provisioning core needs from the developer registry.
#[allow(async_fn_in_trait)]
pub trait DeveloperPortal {
    async fn list_certificates(&self) -> Result<Vec<PortalCertificate>>;

    /// Enabled and disabled devices of a platform
    async fn list_devices(&self, platform: Platform) -> Result<Vec<PortalDevice>>;

    async fn register_device(&self, device: &TestDevice, platform: Platform) -> Result<PortalDevice>;

    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleIdRecord>>;

    async fn create_bundle_id(
        &self,
        identifier: &str,
        name: &str,
        platform: Platform,
    ) -> Result<BundleIdRecord>;

    async fn enable_capability(&self, bundle_id: &BundleIdRecord, capability: &str) -> Result<()>;

    /// Every profile issued for a bundle id, of any type
    async fn list_profiles(&self, bundle_id: &BundleIdRecord) -> Result<Vec<PortalProfile>>;

    async fn create_profile(&self, request: &ProfileRequest) -> Result<PortalProfile>;

    async fn delete_profile(&self, profile: &PortalProfile) -> Result<()>;
}

/// Registry profile type for a distribution type on a platform.
///
/// See <https://developer.apple.com/documentation/appstoreconnectapi/profile/attributes>
pub fn profile_type_name(distribution_type: DistributionType, platform: Platform) -> Result<&'static str> {
    use DistributionType::{AdHoc, AppStore, Development, Enterprise};

    let name = match (platform, distribution_type) {
        (Platform::Ios, Development) => "IOS_APP_DEVELOPMENT",
        (Platform::Ios, AdHoc) => "IOS_APP_ADHOC",
        (Platform::Ios, AppStore) => "IOS_APP_STORE",
        (Platform::Ios, Enterprise) => "IOS_APP_INHOUSE",
        (Platform::TvOs, Development) => "TVOS_APP_DEVELOPMENT",
        (Platform::TvOs, AdHoc) => "TVOS_APP_ADHOC",
        (Platform::TvOs, AppStore) => "TVOS_APP_STORE",
        (Platform::TvOs, Enterprise) => "TVOS_APP_INHOUSE",
        (Platform::MacOs, Development) => "MAC_APP_DEVELOPMENT",
        (Platform::MacOs, AppStore) => "MAC_APP_STORE",
        (Platform::MacOs, other) => {
            return Err(ProvisionError::InvalidConfig(format!(
                "distribution type {other} is not supported for macOS targets"
            )));
        }
    };

    Ok(name)
}
