//! Finding and pushing images stored in an OCI image layout.
//!
//! [`Layout`] resolves human-readable names to digests via the
//! `org.opencontainers.image.ref.name` annotations of the layout's index, and pushes the
//! manifest or index behind a digest to a registry.  Both of its collaborators are injected: a
//! [`LayoutPath`] giving access to the layout and a [`RegistryClient`] that turns what it finds
//! into something that can be written to a registry.

pub mod disk;

use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};
use oci_spec::image::MediaType;
use thiserror::Error;

use crate::{
    digest::{Digest, DigestError},
    name::{Name, NameError},
    registry::{Artifact, RegistryClient},
};

/// The annotation holding the name of an entry in the layout's index.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

pub const DOCKER_MANIFEST_SCHEMA2_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// What a descriptor's media type says it points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestKind {
    Image,
    Index,
}

impl ManifestKind {
    /// Classifies OCI and Docker v2 manifest media types; anything else is `None`.
    pub fn of(media_type: &MediaType) -> Option<Self> {
        match media_type {
            MediaType::ImageManifest => Some(ManifestKind::Image),
            MediaType::ImageIndex => Some(ManifestKind::Index),
            MediaType::Other(other) if other == DOCKER_MANIFEST_SCHEMA2_MEDIA_TYPE => {
                Some(ManifestKind::Image)
            }
            MediaType::Other(other) if other == DOCKER_MANIFEST_LIST_MEDIA_TYPE => {
                Some(ManifestKind::Index)
            }
            _ => None,
        }
    }
}

/// Access to the root of an image layout.
pub trait LayoutPath {
    /// Opens the layout and returns a view of its top-level index.
    fn image_index(&self) -> Result<Arc<dyn ImageIndex>>;
}

/// An image index: either the top-level index of a layout or a nested one.
pub trait ImageIndex {
    fn digest(&self) -> Result<Digest>;

    fn raw_manifest(&self) -> Result<Vec<u8>>;

    fn index_manifest(&self) -> Result<oci_spec::image::ImageIndex>;

    /// The media type a registry should be given for [`ImageIndex::raw_manifest`].
    fn media_type(&self) -> Result<String>;

    /// Resolves a child image manifest listed in this index.
    fn image(&self, digest: &Digest) -> Result<Arc<dyn Image>>;

    /// Resolves a child index listed in this index.
    fn image_index(&self, digest: &Digest) -> Result<Arc<dyn ImageIndex>>;
}

/// A single-platform image manifest along with access to the blobs it refers to.
pub trait Image {
    fn digest(&self) -> Digest;
    fn media_type(&self) -> String;
    fn raw_manifest(&self) -> Result<Vec<u8>>;
    fn blob(&self, digest: &Digest) -> Result<Vec<u8>>;
}

impl<T: LayoutPath + ?Sized> LayoutPath for &T {
    fn image_index(&self) -> Result<Arc<dyn ImageIndex>> {
        (**self).image_index()
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The layout itself could not be opened.
    #[error(transparent)]
    LayoutAccess(anyhow::Error),
    /// The layout opened but its index could not be read.
    #[error(transparent)]
    ManifestRead(anyhow::Error),
    #[error("invalid image reference: {reference:?}")]
    InvalidLayoutEntry {
        reference: String,
        #[source]
        source: NameError,
    },
    #[error("invalid digest in layout: {digest:?}")]
    InvalidLayoutDigest {
        digest: String,
        #[source]
        source: DigestError,
    },
    #[error("image {0} not found in layout")]
    NotFound(Name),
    /// The digest named neither an image manifest nor an index in the layout.
    #[error(transparent)]
    Lookup(anyhow::Error),
    #[error(transparent)]
    Write(anyhow::Error),
}

/// One descriptor of a layout's index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// The digest as written in the index, whichever algorithm it uses.
    pub digest: String,
    pub media_type: String,
    /// The raw value of the ref name annotation, if any.
    pub name: Option<String>,
}

pub struct Layout<C, P> {
    client: C,
    path: P,
}

impl<C: RegistryClient, P: LayoutPath> Layout<C, P> {
    pub fn new(client: C, path: P) -> Self {
        Layout { client, path }
    }

    /// Returns the digest of the first index entry whose ref name annotation parses to `name`.
    ///
    /// An entry with an annotation that isn't a valid image name fails the whole lookup.
    pub fn find(&self, name: &Name) -> Result<Digest, Error> {
        let index = self.path.image_index().map_err(Error::LayoutAccess)?;
        let manifest = index.index_manifest().map_err(Error::ManifestRead)?;

        for descriptor in manifest.manifests() {
            let Some(ref_name) = descriptor
                .annotations()
                .as_ref()
                .and_then(|annotations| annotations.get(REF_NAME_ANNOTATION))
            else {
                continue;
            };

            let entry_name = Name::new(ref_name).map_err(|source| Error::InvalidLayoutEntry {
                reference: ref_name.clone(),
                source,
            })?;

            if entry_name == *name {
                let digest = layout_digest(descriptor.digest())?;
                debug!("Found {name} in layout: {digest}");
                return Ok(digest);
            }
        }

        Err(Error::NotFound(name.clone()))
    }

    /// Pushes the image manifest or image index with the given digest to `target`.
    ///
    /// Image manifests are tried first.  If the digest is neither, the error from the index lookup
    /// is returned.
    pub fn push(&self, digest: &Digest, target: &Name) -> Result<(), Error> {
        let index = self.path.image_index().map_err(Error::LayoutAccess)?;

        let image_err = match index.image(digest) {
            Ok(image) => {
                debug!("{digest} is an image manifest");
                return write(self.client.new_image_from_manifest(image), target);
            }
            Err(err) => err,
        };

        match index.image_index(digest) {
            Ok(child) => {
                debug!("{digest} is an image index");
                write(self.client.new_image_from_index(child), target)
            }
            Err(err) => {
                debug!("{digest} is not an image manifest: {image_err:#}");
                Err(Error::Lookup(err))
            }
        }
    }

    /// Finds `name` in the layout and pushes it to `target`, returning the digest pushed.
    pub fn relocate(&self, name: &Name, target: &Name) -> Result<Digest, Error> {
        let digest = self.find(name)?;
        self.push(&digest, target)?;
        Ok(digest)
    }

    /// Lists the entries of the layout's index in order.
    ///
    /// Entries are reported as written, including digests that [`Layout::find`] can't return.
    pub fn list(&self) -> Result<Vec<Entry>, Error> {
        let index = self.path.image_index().map_err(Error::LayoutAccess)?;
        let manifest = index.index_manifest().map_err(Error::ManifestRead)?;

        Ok(manifest
            .manifests()
            .iter()
            .map(|descriptor| Entry {
                digest: descriptor.digest().to_string(),
                media_type: descriptor.media_type().to_string(),
                name: descriptor
                    .annotations()
                    .as_ref()
                    .and_then(|annotations| annotations.get(REF_NAME_ANNOTATION))
                    .cloned(),
            })
            .collect())
    }
}

fn layout_digest(digest: &oci_spec::image::Digest) -> Result<Digest, Error> {
    Digest::try_from(digest).map_err(|source| Error::InvalidLayoutDigest {
        digest: digest.to_string(),
        source,
    })
}

fn write(artifact: Box<dyn Artifact + '_>, target: &Name) -> Result<(), Error> {
    let (digest, size) = artifact.write(target).map_err(Error::Write)?;
    info!("Pushed {digest} ({size} bytes) to {target}");
    Ok(())
}
