//! Device session model and best-effort device classification.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Best-effort classification of a client-supplied device descriptor.
///
/// This is display metadata, not a security boundary; anything we cannot
/// classify degrades to "Unknown Device".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_type: String,
    pub display_name: String,
}

impl DeviceInfo {
    pub fn unknown() -> Self {
        Self {
            device_type: "unknown".to_string(),
            display_name: "Unknown Device".to_string(),
        }
    }

    /// Classify a raw descriptor (typically a User-Agent string).
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::unknown();
        }

        let os = if raw.contains("iPhone") || raw.contains("iPad") {
            Some("iOS")
        } else if raw.contains("Android") {
            Some("Android")
        } else if raw.contains("Windows") {
            Some("Windows")
        } else if raw.contains("Mac OS X") || raw.contains("Macintosh") {
            Some("macOS")
        } else if raw.contains("Linux") || raw.contains("X11") {
            Some("Linux")
        } else {
            None
        };

        // Order matters: Chromium-based agents also advertise "Safari".
        let browser = if raw.contains("Edg/") || raw.contains("Edge/") {
            Some("Edge")
        } else if raw.contains("OPR/") || raw.contains("Opera") {
            Some("Opera")
        } else if raw.contains("Chrome/") {
            Some("Chrome")
        } else if raw.contains("Firefox/") {
            Some("Firefox")
        } else if raw.contains("Safari/") {
            Some("Safari")
        } else {
            None
        };

        let device_type = match os {
            Some("iOS") | Some("Android") => "mobile",
            Some(_) => "desktop",
            None => "unknown",
        };

        let display_name = match (browser, os) {
            (Some(b), Some(o)) => format!("{} on {}", b, o),
            (Some(b), None) => b.to_string(),
            (None, Some(o)) => o.to_string(),
            (None, None) => return Self::unknown(),
        };

        Self {
            device_type: device_type.to_string(),
            display_name,
        }
    }
}

/// Durable record of an active device session.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,

    /// SHA-256 fingerprint of the session's current refresh token.
    pub refresh_fingerprint: String,

    pub device_type: String,
    pub device_name: String,
    pub origin_address: String,

    pub last_activity_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        refresh_token: &str,
        device: DeviceInfo,
        origin_address: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            refresh_fingerprint: Self::fingerprint(refresh_token),
            device_type: device.device_type,
            device_name: device.display_name,
            origin_address,
            last_activity_utc: now,
            created_utc: now,
            expires_utc: now + ttl,
            revoked_utc: None,
        }
    }

    /// Fingerprint a refresh token for storage (never store the token itself).
    pub fn fingerprint(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_utc
    }

    pub fn is_active(&self) -> bool {
        self.revoked_utc.is_none() && !self.is_expired()
    }
}
