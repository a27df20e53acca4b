//! Remote mirror schema
//!
//! The remote mirror is a record set keyed by `(child_device_id,
//! application_token)`. A row's presence means the application belongs to the
//! device's restricted set; `is_shielded` and `shield_type` describe its
//! current enforcement state for display on the guardian's side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shield_util::{AppToken, DeviceId};

use crate::{ApplicationProfile, UnlockSession};

/// Whether a row is locked indefinitely or temporarily unlocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldType {
    Permanent,
    Temporary,
}

/// One row of the remote mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub child_device_id: DeviceId,
    pub application_token: AppToken,
    pub app_name: String,
    pub is_shielded: bool,
    pub shield_type: ShieldType,
    #[serde(default)]
    pub unlock_expiry: Option<DateTime<Utc>>,
}

impl RemoteRecord {
    /// Row for a restriction with no active grant
    pub fn shielded(device: &DeviceId, profile: &ApplicationProfile) -> Self {
        Self {
            child_device_id: device.clone(),
            application_token: profile.application_token.clone(),
            app_name: profile.application_name.clone(),
            is_shielded: true,
            shield_type: ShieldType::Permanent,
            unlock_expiry: None,
        }
    }

    /// Row for a restriction that is temporarily unlocked by `session`
    pub fn unlocked(device: &DeviceId, session: &UnlockSession) -> Self {
        Self {
            child_device_id: device.clone(),
            application_token: session.application_token.clone(),
            app_name: session.application_name.clone(),
            is_shielded: false,
            shield_type: ShieldType::Temporary,
            unlock_expiry: Some(session.expiry_date),
        }
    }

    /// Local profile for a row pulled from the mirror
    pub fn to_profile(&self) -> ApplicationProfile {
        ApplicationProfile::new(self.application_token.clone(), self.app_name.clone())
    }
}

/// A change to push to the remote mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorDelta {
    Upsert(RemoteRecord),
    Delete {
        child_device_id: DeviceId,
        application_token: AppToken,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use shield_util::{Clock, ManualClock};

    #[test]
    fn record_json_shape() {
        let device = DeviceId::new("child-1");
        let profile = ApplicationProfile::new(AppToken::from_bytes(vec![0x0a]), "Video");
        let record = RemoteRecord::shielded(&device, &profile);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["child_device_id"], "child-1");
        assert_eq!(json["application_token"], "0a");
        assert_eq!(json["shield_type"], "permanent");
        assert_eq!(json["is_shielded"], true);
    }

    #[test]
    fn missing_unlock_expiry_defaults_to_none() {
        let json = r#"{
            "child_device_id": "child-1",
            "application_token": "0a",
            "app_name": "Video",
            "is_shielded": true,
            "shield_type": "permanent"
        }"#;

        let record: RemoteRecord = serde_json::from_str(json).unwrap();
        assert!(record.unlock_expiry.is_none());
    }

    #[test]
    fn unlocked_row_carries_expiry() {
        let clock = ManualClock::fixed();
        let device = DeviceId::new("child-1");
        let session = UnlockSession::new(AppToken::from_bytes(vec![1]), "Game", clock.now(), 10);

        let record = RemoteRecord::unlocked(&device, &session);
        assert!(!record.is_shielded);
        assert_eq!(record.shield_type, ShieldType::Temporary);
        assert_eq!(record.unlock_expiry, Some(session.expiry_date));
    }
}
