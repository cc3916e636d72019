//! Tenant credentials: one bundle per LINE channel, looked up on every webhook call.
//!
//! Secrets are wrapped in [`Secret`] so they never show up in `Debug` output or logs;
//! they are exposed only when serialized to the registry or used on the wire.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

/// Credentials registered for one channel. Immutable once stored.
#[derive(Clone, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub line_channel_id: String,
    #[serde(serialize_with = "serialize_secret")]
    pub line_channel_secret: Secret<String>,
    #[serde(serialize_with = "serialize_secret")]
    pub line_channel_access_token: Secret<String>,
    pub coze_bot_id: String,
    #[serde(serialize_with = "serialize_secret")]
    pub coze_api_key: Secret<String>,
    pub cloud_storage_bucket_name: String,
}

impl std::fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("line_channel_id", &self.line_channel_id)
            .field("line_channel_secret", &"[REDACTED]")
            .field("line_channel_access_token", &"[REDACTED]")
            .field("coze_bot_id", &self.coze_bot_id)
            .field("coze_api_key", &"[REDACTED]")
            .field("cloud_storage_bucket_name", &self.cloud_storage_bucket_name)
            .finish()
    }
}

/// What the registry stores: credentials plus the computed callback URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    #[serde(flatten)]
    pub credentials: TenantCredentials,
    #[serde(rename = "complete_url")]
    pub callback_url: String,
}

impl TenantRecord {
    /// Build the record for `credentials`, deriving the callback URL from the server root.
    pub fn new(credentials: TenantCredentials, server_root: &str) -> Self {
        let callback_url = callback_url(server_root, &credentials.line_channel_id);
        Self {
            credentials,
            callback_url,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.credentials.line_channel_id
    }
}

/// `{root}/api/{channel_id}`; a trailing slash on root is ignored.
pub fn callback_url(server_root: &str, channel_id: &str) -> String {
    format!("{}/api/{}", server_root.trim_end_matches('/'), channel_id)
}

/// Registration form fields as submitted. Missing fields deserialize as empty strings; no validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationForm {
    pub line_channel_id: String,
    pub line_channel_secret: String,
    pub line_channel_access_token: String,
    pub coze_bot_id: String,
    pub coze_api_key: String,
    pub cloud_storage_bucket_name: String,
}

impl From<RegistrationForm> for TenantCredentials {
    fn from(form: RegistrationForm) -> Self {
        Self {
            line_channel_id: form.line_channel_id,
            line_channel_secret: Secret::new(form.line_channel_secret),
            line_channel_access_token: Secret::new(form.line_channel_access_token),
            coze_bot_id: form.coze_bot_id,
            coze_api_key: Secret::new(form.coze_api_key),
            cloud_storage_bucket_name: form.cloud_storage_bucket_name,
        }
    }
}

/// Mask a secret for display: first four characters kept, the rest replaced by `*`.
pub fn redact(secret: &Secret<String>) -> String {
    let value = secret.expose_secret();
    let visible: String = value.chars().take(4).collect();
    let hidden = value.chars().count().saturating_sub(4);
    format!("{}{}", visible, "*".repeat(hidden.min(12)))
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}
