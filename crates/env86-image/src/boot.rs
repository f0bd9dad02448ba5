use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{ImageError, Result};
use crate::fetch::Fetcher;
use crate::manifest::{FilesystemConfig, ImageManifest, RELATIVE_URL_KEYS};
use crate::state::{chunk_urls, download_chunks};

/// Guest memory when the manifest does not say: 512 MiB.
pub const DEFAULT_MEMORY_SIZE: u64 = 512 * 1024 * 1024;

/// VGA memory when the manifest does not say: 8 MiB.
pub const DEFAULT_VGA_MEMORY_SIZE: u64 = 8 * 1024 * 1024;

/// Serial port carrying guest-service frames unless configured otherwise.
pub const DEFAULT_GUEST_PORT: u8 = 1;

/// Emulator wasm file name, resolved against the assets base.
pub const WASM_FILE: &str = "v86.wasm";

/// JSON keys owned by [`BootOptions`] rather than the manifest.
const OPTION_KEYS: [&str; 6] = [
    "control_url",
    "EnableTTY",
    "enable_tty",
    "guest_service",
    "guest_port",
    "assets_url",
];

/// Launch options layered over the image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootOptions {
    /// Control endpoint of the host peer; no peer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    /// Forward serial port 0 to the host as a tty stream.
    #[serde(default, rename = "EnableTTY", alias = "enable_tty")]
    pub enable_tty: bool,
    /// Tunnel guest-service frames over a serial port.
    #[serde(default)]
    pub guest_service: bool,
    /// Serial port used by the guest service.
    #[serde(default = "default_guest_port")]
    pub guest_port: u8,
    /// Where `v86.wasm` and friends are served from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_url: Option<String>,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            control_url: None,
            enable_tty: false,
            guest_service: false,
            guest_port: DEFAULT_GUEST_PORT,
            assets_url: None,
        }
    }
}

fn default_guest_port() -> u8 {
    DEFAULT_GUEST_PORT
}

/// The effective configuration an emulator is constructed from.
#[derive(Debug, Clone, PartialEq)]
pub struct BootConfig {
    /// Image base URL without a trailing slash.
    pub image_url: String,
    pub manifest: ImageManifest,
    pub options: BootOptions,
    pub autostart: bool,
    /// Concatenated initial-state chunks, if the image has any.
    pub initial_state: Option<Vec<u8>>,
}

impl BootConfig {
    /// Layer `options` over `manifest`. Option keys that also appear in the
    /// manifest are overridden.
    pub fn new(image_url: &str, mut manifest: ImageManifest, options: BootOptions) -> Self {
        for key in OPTION_KEYS {
            manifest.extra.remove(key);
        }
        Self {
            image_url: image_url.trim_end_matches('/').to_string(),
            manifest,
            options,
            autostart: true,
            initial_state: None,
        }
    }

    /// Fill in memory sizes, the wasm path and the 9p filesystem roots.
    ///
    /// Zero sizes count as unset.
    pub fn apply_defaults(&mut self) {
        let manifest = &mut self.manifest;
        if manifest.wasm_path.as_deref().is_none_or(str::is_empty) {
            manifest.wasm_path = Some(match &self.options.assets_url {
                Some(assets) => format!("{}/{WASM_FILE}", assets.trim_end_matches('/')),
                None => WASM_FILE.to_string(),
            });
        }
        if manifest.memory_size.is_none_or(|size| size == 0) {
            manifest.memory_size = Some(DEFAULT_MEMORY_SIZE);
        }
        if manifest.vga_memory_size.is_none_or(|size| size == 0) {
            manifest.vga_memory_size = Some(DEFAULT_VGA_MEMORY_SIZE);
        }
        if manifest.filesystem.as_ref().is_none_or(FilesystemConfig::is_empty) {
            manifest.filesystem = Some(FilesystemConfig {
                baseurl: format!("{}/fs/", self.image_url),
                basefs: format!("{}/fs.json", self.image_url),
            });
        }
        self.autostart = true;
    }

    /// Resolve `./`-relative device URLs against the image base.
    pub fn rewrite_relative_urls(&mut self) {
        for key in RELATIVE_URL_KEYS {
            if let Some(device) = self.manifest.relative_device_mut(key) {
                if let Some(rest) = device.url.strip_prefix("./") {
                    device.url = format!("{}/{rest}", self.image_url);
                }
            }
        }
    }

    /// Apply host-supplied overrides, such as the reply to a `config` call.
    ///
    /// Top-level keys replace existing ones. `null` is a no-op.
    pub fn merge_overrides(&mut self, overrides: Value) -> Result<()> {
        let mut overrides = match overrides {
            Value::Null => return Ok(()),
            Value::Object(map) => map,
            other => {
                return Err(ImageError::Invalid(format!(
                    "config overrides must be an object, got {other}"
                )))
            }
        };
        debug!(keys = overrides.len(), "merging config overrides");
        if let Some(tty) = overrides.remove("enable_tty") {
            overrides.insert("EnableTTY".to_string(), tty);
        }

        let mut map = self.settings()?;
        map.extend(overrides);

        self.options = serde_json::from_value(Value::Object(map.clone()))?;
        if let Some(autostart) = map.remove("autostart") {
            self.autostart = autostart.as_bool().ok_or_else(|| {
                ImageError::Invalid(format!("autostart must be a boolean, got {autostart}"))
            })?;
        }
        for key in OPTION_KEYS {
            map.remove(key);
        }
        self.manifest = ImageManifest::from_value(Value::Object(map))?;
        Ok(())
    }

    /// The whole configuration as one JSON object.
    ///
    /// The state buffer is summarised by its size.
    pub fn to_value(&self) -> Result<Value> {
        let mut map = self.settings()?;
        if let Some(state) = &self.initial_state {
            map.insert("initial_state".to_string(), json!({ "size": state.len() }));
        }
        Ok(Value::Object(map))
    }

    fn settings(&self) -> Result<Map<String, Value>> {
        let mut map = self.manifest.to_map()?;
        if let Value::Object(options) = serde_json::to_value(&self.options)? {
            map.extend(options);
        }
        map.insert("autostart".to_string(), Value::Bool(self.autostart));
        Ok(map)
    }
}

/// Manifest URL for an image base.
pub fn manifest_url(image_url: &str) -> String {
    format!("{}/image.json", image_url.trim_end_matches('/'))
}

/// Fetch `image.json`, merge `options`, download initial state and apply
/// defaults and URL rewrites.
pub fn prepare<F: Fetcher + ?Sized>(
    fetcher: &F,
    image_url: &str,
    options: BootOptions,
) -> Result<BootConfig> {
    let url = manifest_url(image_url);
    let bytes = fetcher
        .get(&url)?
        .ok_or_else(|| ImageError::MissingManifest(url.clone()))?;
    let manifest = ImageManifest::parse(&bytes)?;

    let mut config = BootConfig::new(image_url, manifest, options);

    let parts = config.manifest.state_parts()?;
    if parts > 0 {
        let urls = chunk_urls(&config.image_url, parts);
        let state = download_chunks(fetcher, &urls)?;
        info!(parts, size = state.len(), "initial state downloaded");
        config.initial_state = Some(state);
    }

    config.apply_defaults();
    config.rewrite_relative_urls();
    Ok(config)
}
