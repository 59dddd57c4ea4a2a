//! # Cloud Catalog Payloads
//!
//! JSON shapes exchanged with the profile catalog: the response envelope,
//! the upload credential bundle, the profile listing and the metadata
//! record written after an upload.
//!
//! ## Catalog Listing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  { "code": 0, "msg": "success", "data": [                              │
//! │      { "deviceType": "EP3",                                            │
//! │        "sliceTypes": [                                                 │
//! │          { "sliceType": "cura",                                        │
//! │            "sliceConfs": [ { "id", "name", "configFileUrl", ... } ] }  │
//! │        ] }                                                             │
//! │  ] }                                                                   │
//! │                                                                         │
//! │  filter_profiles(EP3, cura) ──► Vec<CloudProfile>                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All fields are optional on the wire; missing ones decode to defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CloudSettings;
use crate::error::{SyncError, SyncResult};

/// `msg` value the catalog uses for success.
pub const SUCCESS_MSG: &str = "success";

// =============================================================================
// Envelope
// =============================================================================

/// Response wrapper used by every catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: Option<i64>,

    #[serde(default)]
    pub msg: Option<String>,

    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Accepted when `msg == "success"` or `code == 0`.
    pub fn is_success(&self) -> bool {
        self.msg.as_deref() == Some(SUCCESS_MSG) || self.code == Some(0)
    }

    /// Unwraps the payload of a successful envelope.
    ///
    /// A successful envelope without `data` yields `T::default()`.
    pub fn into_data(self) -> SyncResult<T>
    where
        T: Default,
    {
        if !self.is_success() {
            return Err(SyncError::InvalidEnvelope {
                code: self.code.unwrap_or(-1),
                message: self.msg.unwrap_or_else(|| "request failed".to_string()),
            });
        }
        Ok(self.data.unwrap_or_default())
    }
}

/// Decodes a raw response body and unwraps its payload.
pub fn decode<T>(body: &str) -> SyncResult<T>
where
    T: DeserializeOwned + Default,
{
    let envelope: ApiEnvelope<T> = serde_json::from_str(body)?;
    envelope.into_data()
}

// =============================================================================
// Upload Credentials
// =============================================================================

/// Short-lived object-storage credentials for one upload.
///
/// Opaque to the orchestrator; handed unchanged to the uploader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCredentials {
    /// Storage endpoint.
    #[serde(default)]
    pub host: String,

    /// Public CDN prefix for the uploaded file.
    #[serde(default)]
    pub cdn: String,

    /// Object key prefix.
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub policy: String,

    #[serde(default)]
    pub signature: String,

    #[serde(default, rename = "accessid")]
    pub access_id: String,
}

// =============================================================================
// Catalog Listing
// =============================================================================

/// One device type in the catalog listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDevice {
    #[serde(default)]
    pub device_type: String,

    #[serde(default)]
    pub slice_types: Vec<SliceTypeEntry>,
}

/// Profiles of one slicer family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceTypeEntry {
    #[serde(default)]
    pub slice_type: String,

    #[serde(default)]
    pub slice_confs: Vec<CloudProfile>,
}

/// A profile stored in the cloud catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfile {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub config_file_url: String,

    #[serde(default)]
    pub config_file_name: String,

    /// Free-form remarks.
    #[serde(default)]
    pub info: String,

    /// Non-zero for vendor-provided profiles.
    #[serde(default)]
    pub system_config: i64,
}

impl CloudProfile {
    pub fn is_system(&self) -> bool {
        self.system_config != 0
    }
}

/// Ids arrive as numbers from some catalog versions.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Keeps the profiles listed under the given device type and slicer family.
pub fn filter_profiles(devices: Vec<CatalogDevice>, device_type: &str, slice_type: &str) -> Vec<CloudProfile> {
    devices
        .into_iter()
        .filter(|d| d.device_type == device_type)
        .flat_map(|d| d.slice_types)
        .filter(|s| s.slice_type == slice_type)
        .flat_map(|s| s.slice_confs)
        .collect()
}

// =============================================================================
// Profile Record
// =============================================================================

/// Metadata written to the catalog after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub name: String,
    pub config_file_url: String,
    pub config_file_name: String,
    pub device_type: String,
    pub info: String,
    pub slice_type: String,
}

impl ProfileRecord {
    /// Builds the record for an uploaded file. The file name is the last
    /// path segment of the URL.
    pub fn new(name: &str, file_url: &str, info: &str, cloud: &CloudSettings) -> Self {
        ProfileRecord {
            name: name.to_string(),
            config_file_url: file_url.to_string(),
            config_file_name: file_name_of(file_url),
            device_type: cloud.device_type.clone(),
            info: info.to_string(),
            slice_type: cloud.slice_type.clone(),
        }
    }
}

fn file_name_of(file_url: &str) -> String {
    let from_url = url::Url::parse(file_url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });
    match from_url {
        Some(name) if !name.is_empty() => name,
        _ => file_url.rsplit(['/', '\\']).next().unwrap_or_default().to_string(),
    }
}
