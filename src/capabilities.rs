//! Entitlement keys to App Store Connect capability types
//!
//! See <https://developer.apple.com/documentation/appstoreconnectapi/capabilitytype>

use plist::Dictionary;

/// Entitlement key, capability type.
///
/// Entitlements with no entry (keychain sharing, `get-task-allow`, ...) need no
/// registry capability.
const ENTITLEMENT_CAPABILITIES: &[(&str, &str)] = &[
    ("aps-environment", "PUSH_NOTIFICATIONS"),
    ("com.apple.developer.aps-environment", "PUSH_NOTIFICATIONS"),
    ("com.apple.security.application-groups", "APP_GROUPS"),
    ("com.apple.developer.associated-domains", "ASSOCIATED_DOMAINS"),
    ("com.apple.developer.icloud-container-identifiers", "ICLOUD"),
    ("com.apple.developer.ubiquity-kvstore-identifier", "ICLOUD"),
    ("com.apple.developer.in-app-payments", "APPLE_PAY"),
    ("com.apple.developer.healthkit", "HEALTHKIT"),
    ("com.apple.developer.homekit", "HOMEKIT"),
    ("com.apple.developer.siri", "SIRIKIT"),
    ("com.apple.developer.networking.wifi-info", "ACCESS_WIFI_INFORMATION"),
    ("com.apple.developer.networking.networkextension", "NETWORK_EXTENSIONS"),
    ("com.apple.developer.networking.vpn.api", "PERSONAL_VPN"),
    ("com.apple.developer.networking.HotspotConfiguration", "HOT_SPOT"),
    ("com.apple.developer.networking.multipath", "MULTIPATH"),
    ("com.apple.developer.nfc.readersession.formats", "NFC_TAG_READING"),
    ("com.apple.developer.pass-type-identifiers", "WALLET"),
    ("com.apple.developer.game-center", "GAME_CENTER"),
    ("com.apple.developer.applesignin", "APPLE_ID_AUTH"),
    ("com.apple.developer.default-data-protection", "DATA_PROTECTION"),
    ("com.apple.developer.ClassKit-environment", "CLASSKIT"),
    ("com.apple.developer.authentication-services.autofill-credential-provider", "AUTOFILL_CREDENTIAL_PROVIDER"),
    ("inter-app-audio", "INTER_APP_AUDIO"),
    ("com.apple.external-accessory.wireless-configuration", "WIRELESS_ACCESSORY_CONFIGURATION"),
    ("com.apple.developer.usernotifications.time-sensitive", "USER_NOTIFICATIONS_TIME_SENSITIVE"),
    ("com.apple.developer.usernotifications.communication", "USER_NOTIFICATIONS_COMMUNICATION"),
];

/// Registry capability types required by a target's entitlements, deduplicated
/// and in table order.
#[must_use]
pub fn required_capabilities(entitlements: &Dictionary) -> Vec<&'static str> {
    let mut capabilities: Vec<&'static str> = Vec::new();

    for (key, capability) in ENTITLEMENT_CAPABILITIES {
        if entitlements.contains_key(key) && !capabilities.contains(capability) {
            capabilities.push(capability);
        }
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::Value;

    #[test]
    fn maps_known_entitlements() {
        let mut entitlements = Dictionary::new();
        entitlements.insert("aps-environment".into(), Value::String("development".into()));
        entitlements.insert(
            "com.apple.developer.icloud-container-identifiers".into(),
            Value::Array(vec![]),
        );
        entitlements.insert(
            "com.apple.developer.ubiquity-kvstore-identifier".into(),
            Value::String("TEAM.com.x.app".into()),
        );
        entitlements.insert("keychain-access-groups".into(), Value::Array(vec![]));

        assert_eq!(required_capabilities(&entitlements), ["PUSH_NOTIFICATIONS", "ICLOUD"]);
    }

    #[test]
    fn empty_entitlements_need_nothing() {
        assert!(required_capabilities(&Dictionary::new()).is_empty());
    }
}
