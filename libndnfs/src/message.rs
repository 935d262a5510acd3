//! Docker volume-plugin protocol messages.
//!
//! The container engine POSTs a JSON [`PluginRequest`] to one endpoint per
//! [`PluginMethod`] and expects a [`PluginResponse`] whose `Err` field is
//! empty on success. Field names follow the engine's capitalization.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NdnfsError;
use crate::types::{Capability, VolumeInfo};

/// Plugin interface implemented by this driver.
pub const IMPLEMENTS_VOLUME_DRIVER: &str = "VolumeDriver";

/// Endpoints of the volume-plugin protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginMethod {
    Activate,
    Create,
    Remove,
    Mount,
    Path,
    Unmount,
    Get,
    List,
    Capabilities,
}

impl PluginMethod {
    pub const ALL: [PluginMethod; 9] = [
        Self::Activate,
        Self::Create,
        Self::Remove,
        Self::Mount,
        Self::Path,
        Self::Unmount,
        Self::Get,
        Self::List,
        Self::Capabilities,
    ];

    /// HTTP path of the endpoint.
    pub fn path(self) -> &'static str {
        match self {
            Self::Activate => "/Plugin.Activate",
            Self::Create => "/VolumeDriver.Create",
            Self::Remove => "/VolumeDriver.Remove",
            Self::Mount => "/VolumeDriver.Mount",
            Self::Path => "/VolumeDriver.Path",
            Self::Unmount => "/VolumeDriver.Unmount",
            Self::Get => "/VolumeDriver.Get",
            Self::List => "/VolumeDriver.List",
            Self::Capabilities => "/VolumeDriver.Capabilities",
        }
    }

    /// Whether the request body must carry a volume name.
    pub fn needs_name(self) -> bool {
        !matches!(self, Self::Activate | Self::List | Self::Capabilities)
    }
}

impl fmt::Display for PluginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path().trim_start_matches('/'))
    }
}

/// Request body shared by every volume endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequest {
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Driver options; only sent with `Create`.
    #[serde(rename = "Opts", default)]
    pub opts: Option<HashMap<String, String>>,
    /// Caller id; sent with `Mount` and `Unmount`.
    #[serde(rename = "ID", default)]
    pub id: String,
}

impl PluginRequest {
    /// Decode a request body. An empty body is an empty request.
    pub fn from_body(body: &[u8]) -> Result<Self, NdnfsError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| NdnfsError::InvalidArgument(format!("malformed plugin request: {e}")))
    }
}

/// Response body; fields a method does not produce are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResponse {
    #[serde(rename = "Implements", default, skip_serializing_if = "Vec::is_empty")]
    pub implements: Vec<String>,
    #[serde(rename = "Mountpoint", default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(rename = "Volume", default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    #[serde(rename = "Volumes", default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,
    #[serde(rename = "Capabilities", default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capability>,
    /// Empty on success.
    #[serde(rename = "Err", default)]
    pub err: String,
}

impl PluginResponse {
    pub fn activate() -> Self {
        Self {
            implements: vec![IMPLEMENTS_VOLUME_DRIVER.to_owned()],
            ..Default::default()
        }
    }

    pub fn error(err: &NdnfsError) -> Self {
        Self {
            err: err.to_string(),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}
