//! Developer portal authentication through the build service

use super::AppStoreConnectClient;
use crate::error::{ProvisionError, Result};
use serde::Deserialize;
use std::time::Duration;
use zeroize::Zeroizing;

/// Path, relative to the build URL, that serves the portal connection
const PORTAL_DATA_PATH: &str = "apple_developer_portal_data.json";

/// Header carrying the build API token
const BUILD_API_TOKEN_HEADER: &str = "BUILD_API_TOKEN";

/// Test device the caller wants present in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestDevice {
    #[serde(alias = "device_identifier")]
    pub udid: String,
    #[serde(default)]
    pub name: String,
}

/// Authenticated registry session.
pub struct Session<P> {
    pub portal: P,
    /// Devices registered with the build service for this account
    pub test_devices: Vec<TestDevice>,
}

/// Exchanges build credentials for a registry session.
#[allow(async_fn_in_trait)]
pub trait Authenticator {
    type Portal: super::DeveloperPortal;

    async fn login(
        &self,
        endpoint: &str,
        token: &str,
        team_id: Option<&str>,
    ) -> Result<Session<Self::Portal>>;
}

/// Fetches an App Store Connect API key connection from the build service.
pub struct PortalAuthenticator {
    http: reqwest::Client,
}

impl PortalAuthenticator {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http })
    }
}

#[derive(Deserialize)]
struct PortalData {
    #[serde(default)]
    api_key_connection: Option<ApiKeyConnection>,
    #[serde(default)]
    test_devices: Vec<TestDevice>,
}

#[derive(Deserialize)]
struct ApiKeyConnection {
    key_id: String,
    issuer_id: String,
    private_key: Zeroizing<String>,
}

impl Authenticator for PortalAuthenticator {
    type Portal = AppStoreConnectClient;

    async fn login(
        &self,
        endpoint: &str,
        token: &str,
        team_id: Option<&str>,
    ) -> Result<Session<AppStoreConnectClient>> {
        let url = portal_data_url(endpoint);
        crate::debug!("fetching developer portal connection from {url}");

        let response = self
            .http
            .get(&url)
            .header(BUILD_API_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| ProvisionError::Authentication(format!("portal data request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::Authentication(format!(
                "build service refused portal data request ({status}). \
                 Check that an Apple Developer connection is set up for this app."
            )));
        }

        let data: PortalData = response.json().await.map_err(|e| {
            ProvisionError::Authentication(format!("invalid portal data response: {e}"))
        })?;

        let connection = data.api_key_connection.ok_or_else(|| {
            ProvisionError::Authentication(
                "no App Store Connect API key connection configured".to_string(),
            )
        })?;

        let client = AppStoreConnectClient::new(
            &connection.key_id,
            &connection.issuer_id,
            connection.private_key.as_bytes(),
        )?;
        client.test_credentials()?;

        if let Some(team_id) = team_id {
            crate::debug!("session scoped to team {team_id}");
        }

        Ok(Session {
            portal: client,
            test_devices: data.test_devices,
        })
    }
}

fn portal_data_url(endpoint: &str) -> String {
    format!("{}/{PORTAL_DATA_PATH}", endpoint.trim_end_matches('/'))
}
