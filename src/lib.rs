//! Relocating container images out of OCI image layouts.
//!
//! An OCI image layout is a directory holding an `index.json` and a content-addressed blob
//! store.  This crate finds images in such a layout by name and pushes image manifests or whole
//! image indexes from it to a registry.
//!
//! - [`name::Name`] and [`digest::Digest`] are the validated identifiers used throughout
//! - [`layout::Layout`] implements finding and pushing on top of injected collaborators
//! - [`layout::disk`] reads layouts from the local filesystem
//! - [`registry::remote`] writes to registries using the OCI distribution protocol

pub mod digest;
pub mod layout;
pub mod name;
pub mod registry;
