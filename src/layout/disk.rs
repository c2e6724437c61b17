//! OCI image layouts stored in a local directory.
//!
//! A layout directory contains an `oci-layout` marker file, an `index.json` listing the
//! top-level manifests and a `blobs/<algorithm>/<hex>` content store.  Every read goes to the
//! filesystem; nothing is cached between calls.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, ensure, Context, Result};
use log::debug;
use oci_spec::image::{Descriptor, MediaType, OciLayout};

use super::{Image, ImageIndex, LayoutPath, ManifestKind};
use crate::digest::Digest;

pub const OCI_LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";
pub const BLOBS_DIR: &str = "blobs";

/// The root directory of an OCI image layout.
#[derive(Clone, Debug)]
pub struct OciLayoutPath {
    root: PathBuf,
}

impl OciLayoutPath {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OciLayoutPath { root: root.into() }
    }
}

impl LayoutPath for OciLayoutPath {
    fn image_index(&self) -> Result<Arc<dyn ImageIndex>> {
        let marker = self.root.join(OCI_LAYOUT_FILE);
        let layout = OciLayout::from_file(&marker)
            .with_context(|| format!("Reading {}", marker.display()))?;
        debug!(
            "Opened layout {} (version {})",
            self.root.display(),
            layout.image_layout_version()
        );

        let index = self.root.join(INDEX_FILE);
        let raw = fs::read(&index).with_context(|| format!("Reading {}", index.display()))?;

        Ok(Arc::new(DiskIndex {
            root: self.root.clone(),
            digest: Digest::sha256(&raw),
            media_type: None,
            raw,
        }))
    }
}

fn blob_path(root: &Path, digest: &Digest) -> PathBuf {
    root.join(BLOBS_DIR)
        .join(digest.algorithm().as_str())
        .join(digest.hex())
}

/// Reads a blob from the layout, checking that its content matches its digest.
pub fn read_blob(root: &Path, digest: &Digest) -> Result<Vec<u8>> {
    let path = blob_path(root, digest);
    let data = fs::read(&path).with_context(|| format!("Reading blob {}", path.display()))?;
    ensure!(
        digest.verify(&data),
        "blob {digest} failed digest verification"
    );
    Ok(data)
}

/// An image index read from a layout: either `index.json` or a nested index blob.
pub struct DiskIndex {
    root: PathBuf,
    digest: Digest,
    media_type: Option<String>,
    raw: Vec<u8>,
}

impl DiskIndex {
    /// Finds the descriptor for `digest` among this index's own manifests.
    fn find_descriptor(&self, digest: &Digest) -> Result<Descriptor> {
        self.index_manifest()?
            .manifests()
            .iter()
            .find(|descriptor| digest == descriptor.digest())
            .cloned()
            .with_context(|| format!("could not find descriptor in index: {digest}"))
    }
}

impl ImageIndex for DiskIndex {
    fn digest(&self) -> Result<Digest> {
        Ok(self.digest.clone())
    }

    fn raw_manifest(&self) -> Result<Vec<u8>> {
        Ok(self.raw.clone())
    }

    fn index_manifest(&self) -> Result<oci_spec::image::ImageIndex> {
        oci_spec::image::ImageIndex::from_reader(&self.raw[..])
            .with_context(|| format!("Parsing image index {}", self.digest))
    }

    fn media_type(&self) -> Result<String> {
        match &self.media_type {
            Some(media_type) => Ok(media_type.clone()),
            None => Ok(self
                .index_manifest()?
                .media_type()
                .as_ref()
                .map_or_else(|| MediaType::ImageIndex.to_string(), ToString::to_string)),
        }
    }

    fn image(&self, digest: &Digest) -> Result<Arc<dyn Image>> {
        let descriptor = self.find_descriptor(digest)?;
        let media_type = descriptor.media_type();
        if ManifestKind::of(media_type) != Some(ManifestKind::Image) {
            bail!("unexpected media type for {digest}: {media_type}");
        }

        Ok(Arc::new(DiskImage {
            root: self.root.clone(),
            digest: digest.clone(),
            media_type: media_type.to_string(),
        }))
    }

    fn image_index(&self, digest: &Digest) -> Result<Arc<dyn ImageIndex>> {
        let descriptor = self.find_descriptor(digest)?;
        let media_type = descriptor.media_type();
        if ManifestKind::of(media_type) != Some(ManifestKind::Index) {
            bail!("unexpected media type for {digest}: {media_type}");
        }

        Ok(Arc::new(DiskIndex {
            raw: read_blob(&self.root, digest)?,
            root: self.root.clone(),
            digest: digest.clone(),
            media_type: Some(media_type.to_string()),
        }))
    }
}

/// An image manifest stored in a layout.
pub struct DiskImage {
    root: PathBuf,
    digest: Digest,
    media_type: String,
}

impl Image for DiskImage {
    fn digest(&self) -> Digest {
        self.digest.clone()
    }

    fn media_type(&self) -> String {
        self.media_type.clone()
    }

    fn raw_manifest(&self) -> Result<Vec<u8>> {
        read_blob(&self.root, &self.digest)
    }

    fn blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        read_blob(&self.root, digest)
    }
}
