use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ImageError, Result};

/// Device keys whose `./`-relative URLs are resolved against the image base.
pub const RELATIVE_URL_KEYS: [&str; 4] = ["bios", "vga_bios", "initrd", "bzimage"];

/// A disk, ROM or kernel referenced by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceImage {
    pub url: String,
    #[serde(default, rename = "async", skip_serializing_if = "is_false")]
    pub load_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// 9p filesystem roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub baseurl: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub basefs: String,
}

impl FilesystemConfig {
    pub fn is_empty(&self) -> bool {
        self.baseurl.is_empty() && self.basefs.is_empty()
    }
}

/// The contents of an image's `image.json`.
///
/// Only the fields env86 itself reads are typed; everything else is kept in
/// [`ImageManifest::extra`] and handed to the emulator untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Number of `initial.state.<i>` chunks. Zero or absent means cold boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state_parts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wasm_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vga_memory_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios: Option<DeviceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vga_bios: Option<DeviceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd: Option<DeviceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bzimage: Option<DeviceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hda: Option<DeviceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fda: Option<DeviceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdrom: Option<DeviceImage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageManifest {
    /// Parse `image.json` bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Build a manifest from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(ImageError::Invalid(
                "image.json must be a JSON object".to_string(),
            ));
        }
        let manifest: Self = serde_json::from_value(value)?;
        manifest.state_parts()?;
        Ok(manifest)
    }

    /// Number of initial-state chunks to download.
    ///
    /// A negative count is rejected; absent and zero both mean none.
    pub fn state_parts(&self) -> Result<u32> {
        match self.initial_state_parts {
            None => Ok(0),
            Some(parts) => u32::try_from(parts).map_err(|_| {
                ImageError::Invalid(format!(
                    "initial_state_parts must be a non-negative count, got {parts}"
                ))
            }),
        }
    }

    /// Mutable access to one of the devices whose URL may be image-relative.
    pub(crate) fn relative_device_mut(&mut self, key: &str) -> Option<&mut DeviceImage> {
        match key {
            "bios" => self.bios.as_mut(),
            "vga_bios" => self.vga_bios.as_mut(),
            "initrd" => self.initrd.as_mut(),
            "bzimage" => self.bzimage.as_mut(),
            _ => None,
        }
    }

    /// Serialize back to a JSON object.
    pub fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(ImageError::Invalid(
                "manifest did not serialize to an object".to_string(),
            )),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}
