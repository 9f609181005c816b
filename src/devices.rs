//! Test device registration

use crate::error::Result;
use crate::portal::{DeveloperPortal, PortalDevice, TestDevice};
use crate::project::Platform;

/// Registry devices after the caller's test devices were registered.
///
/// Only [`DeviceRegistry::ensure_test_devices`] constructs this, so holding
/// one proves the device list is current before device-scoped profiles are
/// resolved.
#[derive(Debug, Clone)]
pub struct EnsuredDevices {
    devices: Vec<PortalDevice>,
}

impl EnsuredDevices {
    /// Registry ids of the enabled devices
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.devices.iter().map(|device| device.id.clone()).collect()
    }
}

pub struct DeviceRegistry<'a, P> {
    portal: &'a P,
    dry_run: bool,
}

impl<'a, P: DeveloperPortal> DeviceRegistry<'a, P> {
    pub fn new(portal: &'a P, dry_run: bool) -> Self {
        Self { portal, dry_run }
    }

    /// Register every missing test device and return the enabled device list.
    ///
    /// Devices with a malformed UDID are skipped with a warning.
    pub async fn ensure_test_devices(
        &self,
        test_devices: &[TestDevice],
        platform: Platform,
    ) -> Result<EnsuredDevices> {
        let mut registered = self.portal.list_devices(platform).await?;
        crate::detail!("{} devices registered on the developer portal", registered.len());

        for test_device in test_devices {
            if !is_valid_udid(&test_device.udid) {
                crate::warn!("skipping device with invalid UDID: {}", test_device.udid);
                continue;
            }

            let existing = registered
                .iter()
                .find(|device| device.udid.eq_ignore_ascii_case(&test_device.udid));

            match existing {
                Some(device) if !device.enabled => {
                    crate::warn!("device {} ({}) is disabled on the developer portal", device.name, device.udid);
                }
                Some(device) => {
                    crate::debug!("device already registered: {} ({})", device.name, device.udid);
                }
                None if self.dry_run => {
                    crate::detail!("would register device: {} ({})", test_device.name, test_device.udid);
                }
                None => {
                    let device = self.portal.register_device(test_device, platform).await?;
                    crate::success!("registered device: {} ({})", device.name, device.udid);
                    registered.push(device);
                }
            }
        }

        let devices: Vec<PortalDevice> = registered.into_iter().filter(|device| device.enabled).collect();
        crate::detail!("{} enabled {platform} devices", devices.len());

        Ok(EnsuredDevices { devices })
    }
}

/// Accepts 40 hex digit legacy UDIDs, `XXXXXXXX-XXXXXXXXXXXXXXXX` UDIDs and
/// Mac hardware UUIDs.
fn is_valid_udid(udid: &str) -> bool {
    let digits: String = udid.chars().filter(|c| *c != '-').collect();
    let dashes = udid.len() - digits.len();

    let shape_ok = match digits.len() {
        40 => dashes == 0,
        24 => dashes == 1 && udid.as_bytes().get(8) == Some(&b'-'),
        32 => dashes == 0 || dashes == 4,
        _ => false,
    };

    shape_ok && digits.chars().all(|c| c.is_ascii_hexdigit())
}
