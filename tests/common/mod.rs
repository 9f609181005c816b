//! In-memory collaborators for driving a provisioning run

#![allow(dead_code)]

use chrono::{Duration, Utc};
use indoc::indoc;
use kodegen_bundler_provision::Result;
use kodegen_bundler_provision::certificate::{CertificateLoader, InspectedCertificate};
use kodegen_bundler_provision::command::{CommandOutput, CommandRunner};
use kodegen_bundler_provision::config::{CertificateSource, DistributionType, ProvisionConfig};
use kodegen_bundler_provision::portal::{
    Authenticator, BundleIdRecord, DeveloperPortal, PortalCertificate, PortalDevice, PortalProfile,
    ProfileRequest, Session, TestDevice,
};
use kodegen_bundler_provision::project::{Platform, ProjectInspector, Target};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use zeroize::Zeroizing;

pub const TEAM: &str = "TEAM123456";
pub const DEVELOPER: &str = "Apple Development: Jane Appleseed (ABCDE12345)";
pub const DISTRIBUTOR: &str = "Apple Distribution: Acme Inc (TEAM123456)";
pub const DEV_URL: &str = "file:///certs/development.p12";
pub const DIST_URL: &str = "file:///certs/distribution.p12";
pub const UDID: &str = "00008030-001A2D3C0E91802E";

// ---------------------------------------------------------------------------
// Developer portal
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PortalState {
    pub certificates: Vec<PortalCertificate>,
    pub devices: Vec<PortalDevice>,
    pub bundle_ids: Vec<BundleIdRecord>,
    pub profiles: Vec<PortalProfile>,
    /// Mutating calls, in order
    pub writes: Vec<String>,
    next_id: u32,
}

impl PortalState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    /// Registry with both certificates registered and one enabled device
    pub fn seeded() -> Self {
        Self {
            certificates: vec![
                PortalCertificate {
                    id: "CERT-DEV".into(),
                    name: DEVELOPER.into(),
                    serial_number: "A1B2".into(),
                    certificate_type: "DEVELOPMENT".into(),
                },
                PortalCertificate {
                    id: "CERT-DIST".into(),
                    name: DISTRIBUTOR.into(),
                    serial_number: "c3d4".into(),
                    certificate_type: "DISTRIBUTION".into(),
                },
            ],
            devices: vec![PortalDevice {
                id: "DEV-SEED".into(),
                udid: "a1b2c3d4e5f60718293a4b5c6d7e8f9012345678".into(),
                name: "Office iPad".into(),
                enabled: true,
            }],
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct FakePortal {
    pub state: Rc<RefCell<PortalState>>,
}

impl DeveloperPortal for FakePortal {
    async fn list_certificates(&self) -> Result<Vec<PortalCertificate>> {
        Ok(self.state.borrow().certificates.clone())
    }

    async fn list_devices(&self, _platform: Platform) -> Result<Vec<PortalDevice>> {
        Ok(self.state.borrow().devices.clone())
    }

    async fn register_device(&self, device: &TestDevice, _platform: Platform) -> Result<PortalDevice> {
        let mut state = self.state.borrow_mut();
        let registered = PortalDevice {
            id: state.next_id("DEV-"),
            udid: device.udid.clone(),
            name: device.name.clone(),
            enabled: true,
        };
        state.writes.push(format!("register_device {}", device.udid));
        state.devices.push(registered.clone());
        Ok(registered)
    }

    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleIdRecord>> {
        Ok(self
            .state
            .borrow()
            .bundle_ids
            .iter()
            .find(|record| record.identifier == identifier)
            .cloned())
    }

    async fn create_bundle_id(&self, identifier: &str, _name: &str, _platform: Platform) -> Result<BundleIdRecord> {
        let mut state = self.state.borrow_mut();
        let record = BundleIdRecord {
            id: state.next_id("BID-"),
            identifier: identifier.to_string(),
            capabilities: Vec::new(),
        };
        state.writes.push(format!("create_bundle_id {identifier}"));
        state.bundle_ids.push(record.clone());
        Ok(record)
    }

    async fn enable_capability(&self, bundle_id: &BundleIdRecord, capability: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .writes
            .push(format!("enable_capability {} {capability}", bundle_id.identifier));
        if let Some(record) = state.bundle_ids.iter_mut().find(|record| record.id == bundle_id.id) {
            record.capabilities.push(capability.to_string());
        }
        Ok(())
    }

    async fn list_profiles(&self, bundle_id: &BundleIdRecord) -> Result<Vec<PortalProfile>> {
        Ok(self
            .state
            .borrow()
            .profiles
            .iter()
            .filter(|profile| profile.bundle_id == bundle_id.identifier)
            .cloned()
            .collect())
    }

    async fn create_profile(&self, request: &ProfileRequest) -> Result<PortalProfile> {
        let mut state = self.state.borrow_mut();
        let id = state.next_id("PROF-");
        let profile = PortalProfile {
            uuid: format!("uuid-{id}"),
            id,
            name: request.name.clone(),
            profile_type: request.profile_type.to_string(),
            active: true,
            expires: Utc::now() + Duration::days(365),
            bundle_id: request.bundle_id.identifier.clone(),
            certificate_ids: request.certificate_ids.clone(),
            device_ids: request.device_ids.clone(),
            content: format!("profile {}", request.name).into_bytes(),
        };
        state.writes.push(format!("create_profile {}", request.name));
        state.profiles.push(profile.clone());
        Ok(profile)
    }

    async fn delete_profile(&self, profile: &PortalProfile) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.writes.push(format!("delete_profile {}", profile.id));
        state.profiles.retain(|existing| existing.id != profile.id);
        Ok(())
    }
}

/// Hands out sessions on a shared [`PortalState`] and counts logins.
#[derive(Clone)]
pub struct FakeAuthenticator {
    pub state: Rc<RefCell<PortalState>>,
    pub logins: Rc<Cell<usize>>,
    pub test_devices: Vec<TestDevice>,
}

impl FakeAuthenticator {
    pub fn new(state: PortalState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
            logins: Rc::new(Cell::new(0)),
            test_devices: Vec::new(),
        }
    }

    pub fn portal(&self) -> FakePortal {
        FakePortal {
            state: Rc::clone(&self.state),
        }
    }
}

impl Authenticator for FakeAuthenticator {
    type Portal = FakePortal;

    async fn login(&self, _endpoint: &str, _token: &str, _team_id: Option<&str>) -> Result<Session<FakePortal>> {
        self.logins.set(self.logins.get() + 1);
        Ok(Session {
            portal: self.portal(),
            test_devices: self.test_devices.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Serves inspected certificates keyed by source URL.
#[derive(Default)]
pub struct FakeLoader {
    certificates: BTreeMap<String, (String, String)>,
}

impl FakeLoader {
    pub fn with(mut self, url: &str, common_name: &str, serial: &str) -> Self {
        self.certificates
            .insert(url.to_string(), (common_name.to_string(), serial.to_string()));
        self
    }

    /// Development certificate at [`DEV_URL`], distribution at [`DIST_URL`]
    pub fn standard() -> Self {
        Self::default()
            .with(DEV_URL, DEVELOPER, "00A1B2")
            .with(DIST_URL, DISTRIBUTOR, "C3D4")
    }
}

impl CertificateLoader for FakeLoader {
    async fn load(&self, source: &CertificateSource, dest_dir: &Path, index: usize) -> Result<InspectedCertificate> {
        let (common_name, serial) = self.certificates.get(&source.url).cloned().ok_or_else(|| {
            kodegen_bundler_provision::ProvisionError::InvalidConfig(format!("unknown source {}", source.url))
        })?;
        Ok(InspectedCertificate {
            common_name,
            team_id: Some(TEAM.to_string()),
            serial,
            not_after: Utc::now() + Duration::days(300),
            path: dest_dir.join(format!("certificate-{index}.p12")),
        })
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Signing settings last forced onto a target: team, identity, profile uuid
pub type Applied = BTreeMap<String, (String, String, String)>;

pub struct FakeProject {
    pub targets: Vec<Target>,
    pub team_id: Option<String>,
    pub codesign_identity: Option<String>,
    pub managed: bool,
    pub applied: Rc<RefCell<Applied>>,
    pub saves: Rc<Cell<usize>>,
}

impl FakeProject {
    pub fn single_app() -> Self {
        Self {
            targets: vec![target("App", "com.x.app")],
            team_id: Some(TEAM.to_string()),
            codesign_identity: None,
            managed: false,
            applied: Rc::default(),
            saves: Rc::default(),
        }
    }
}

pub fn target(name: &str, bundle_id: &str) -> Target {
    Target {
        name: name.to_string(),
        bundle_id: bundle_id.to_string(),
        entitlements: plist::Dictionary::new(),
        platform: Platform::Ios,
    }
}

impl ProjectInspector for FakeProject {
    fn targets(&self) -> &[Target] {
        &self.targets
    }

    fn main_target(&self) -> &Target {
        &self.targets[0]
    }

    fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    fn codesign_identity(&self) -> Option<&str> {
        self.codesign_identity.as_deref()
    }

    fn uses_managed_signing(&self) -> bool {
        self.managed
    }

    fn force_code_sign_properties(
        &mut self,
        target_name: &str,
        team_id: &str,
        identity: &str,
        profile_uuid: &str,
    ) -> Result<()> {
        self.applied.borrow_mut().insert(
            target_name.to_string(),
            (team_id.to_string(), identity.to_string(), profile_uuid.to_string()),
        );
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Records every command and succeeds.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: RefCell<Vec<String>>,
}

impl FakeRunner {
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| call.split(' ').next().map(str::to_string))
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(format!("{program} {}", args.join(" ")));
        Ok(CommandOutput {
            success: true,
            ..CommandOutput::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Configuration and fixtures
// ---------------------------------------------------------------------------

pub fn config(dir: &Path, distribution_type: DistributionType, urls: &[&str]) -> ProvisionConfig {
    ProvisionConfig {
        build_url: "https://build.example/builds/42".to_string(),
        build_api_token: Zeroizing::new("token".to_string()),
        team_id: None,
        certificate_urls: urls.join("|"),
        passphrases: Zeroizing::new(vec!["secret"; urls.len().max(1)].join("|")),
        distribution_type,
        project_path: dir.join("App.xcodeproj"),
        main_target: None,
        configuration: None,
        register_test_devices: true,
        generate_profiles: true,
        min_profile_days_valid: 0,
        keychain_path: dir.join("ci.keychain-db"),
        keychain_password: Zeroizing::new("keychain-pw".to_string()),
        profiles_dir: Some(dir.join("profiles")),
        dry_run: false,
        verbose: false,
    }
}

pub fn keychain_lock(dir: &Path) -> PathBuf {
    dir.join("keychain.lock")
}

/// One iOS application target `App` (`com.x.app`) under manual signing
pub const PBXPROJ: &str = indoc! {r#"
    <?xml version="1.0" encoding="UTF-8"?>
    <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
    <plist version="1.0">
    <dict>
        <key>archiveVersion</key><string>1</string>
        <key>objectVersion</key><string>56</string>
        <key>rootObject</key><string>PROJECT</string>
        <key>objects</key>
        <dict>
            <key>PROJECT</key>
            <dict>
                <key>isa</key><string>PBXProject</string>
                <key>buildConfigurationList</key><string>PROJECT_LIST</string>
                <key>targets</key><array><string>APP</string></array>
            </dict>
            <key>PROJECT_LIST</key>
            <dict>
                <key>isa</key><string>XCConfigurationList</string>
                <key>buildConfigurations</key><array><string>PROJECT_RELEASE</string></array>
                <key>defaultConfigurationName</key><string>Release</string>
            </dict>
            <key>PROJECT_RELEASE</key>
            <dict>
                <key>isa</key><string>XCBuildConfiguration</string>
                <key>name</key><string>Release</string>
                <key>buildSettings</key><dict><key>SDKROOT</key><string>iphoneos</string></dict>
            </dict>
            <key>APP</key>
            <dict>
                <key>isa</key><string>PBXNativeTarget</string>
                <key>name</key><string>App</string>
                <key>productType</key><string>com.apple.product-type.application</string>
                <key>buildConfigurationList</key><string>APP_LIST</string>
                <key>dependencies</key><array/>
            </dict>
            <key>APP_LIST</key>
            <dict>
                <key>isa</key><string>XCConfigurationList</string>
                <key>buildConfigurations</key><array><string>APP_RELEASE</string></array>
            </dict>
            <key>APP_RELEASE</key>
            <dict>
                <key>isa</key><string>XCBuildConfiguration</string>
                <key>name</key><string>Release</string>
                <key>buildSettings</key>
                <dict>
                    <key>PRODUCT_BUNDLE_IDENTIFIER</key><string>com.x.app</string>
                    <key>DEVELOPMENT_TEAM</key><string>TEAM123456</string>
                    <key>CODE_SIGN_STYLE</key><string>Manual</string>
                </dict>
            </dict>
        </dict>
    </dict>
    </plist>
"#};

pub async fn write_project(dir: &Path) -> PathBuf {
    let project_path = dir.join("App.xcodeproj");
    tokio::fs::create_dir_all(&project_path).await.unwrap();
    tokio::fs::write(project_path.join("project.pbxproj"), PBXPROJ)
        .await
        .unwrap();
    project_path
}
