//! Writing layout content to registries.

pub mod remote;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    digest::Digest,
    layout::{Image, ImageIndex},
    name::Name,
};

pub use remote::{ClientOptions, RemoteClient};

/// Something that can be written to a registry: a resolved image manifest or image index.
pub trait Artifact {
    /// Writes the artifact to `target`, returning the digest and size of the written manifest.
    fn write(&self, target: &Name) -> Result<(Digest, u64)>;
}

/// Builds writable artifacts out of layout content.
pub trait RegistryClient {
    fn new_image_from_manifest(&self, image: Arc<dyn Image>) -> Box<dyn Artifact + '_>;
    fn new_image_from_index(&self, index: Arc<dyn ImageIndex>) -> Box<dyn Artifact + '_>;
}

impl<T: RegistryClient + ?Sized> RegistryClient for &T {
    fn new_image_from_manifest(&self, image: Arc<dyn Image>) -> Box<dyn Artifact + '_> {
        (**self).new_image_from_manifest(image)
    }

    fn new_image_from_index(&self, index: Arc<dyn ImageIndex>) -> Box<dyn Artifact + '_> {
        (**self).new_image_from_index(index)
    }
}
