//! Image loading for env86.
//!
//! An image is a directory (served over HTTP or read locally) holding an
//! `image.json` manifest, optional `state/initial.state.<i>` chunks and the
//! disks and ROMs the manifest points at. [`prepare`] turns an image URL and
//! a set of [`BootOptions`] into the [`BootConfig`] an emulator is built from.

pub mod boot;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod state;

pub use boot::{
    manifest_url, prepare, BootConfig, BootOptions, DEFAULT_GUEST_PORT, DEFAULT_MEMORY_SIZE,
    DEFAULT_VGA_MEMORY_SIZE,
};
pub use error::{ImageError, Result};
pub use fetch::{AnyFetcher, Fetcher, HttpFetcher, LocalFetcher};
pub use manifest::{DeviceImage, FilesystemConfig, ImageManifest};
pub use state::{chunk_urls, download_chunks};
