//! A registry client that speaks the OCI distribution protocol via `oci-client`.
//!
//! Manifests are uploaded byte-for-byte as they are stored in the layout so that their digests
//! are preserved at the destination.  The client owns a single-threaded tokio runtime and blocks
//! on each write.

use std::{future::Future, iter, pin::Pin, sync::Arc};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use oci_client::{
    client::{ClientConfig, ClientProtocol},
    secrets::RegistryAuth,
    Client, Reference, RegistryOperation,
};
use oci_spec::image::{Descriptor, ImageManifest};
use tokio::runtime::Runtime;

use super::{Artifact, RegistryClient};
use crate::{
    digest::Digest,
    layout::{Image, ImageIndex, ManifestKind},
    name::Name,
};

/// Tag written when the target reference carries neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// Connection settings for [`RemoteClient`].
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Talk plain HTTP instead of HTTPS.
    pub insecure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ClientOptions {
    fn auth(&self) -> RegistryAuth {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                RegistryAuth::Basic(username.clone(), password.clone())
            }
            _ => RegistryAuth::Anonymous,
        }
    }
}

pub struct RemoteClient {
    client: Client,
    auth: RegistryAuth,
    runtime: Runtime,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Maps a target name onto the reference a manifest is written to.
fn target_reference(target: &Name) -> Reference {
    let registry = target.host().to_string();
    let repository = target.path().to_string();
    match (target.digest(), target.tag()) {
        (Some(digest), _) => Reference::with_digest(registry, repository, digest.to_string()),
        (None, tag) => {
            Reference::with_tag(registry, repository, tag.unwrap_or(DEFAULT_TAG).to_string())
        }
    }
}

/// A reference to `digest` in the same repository as `reference`.
fn child_reference(reference: &Reference, digest: &Digest) -> Reference {
    Reference::with_digest(
        reference.registry().to_string(),
        reference.repository().to_string(),
        digest.to_string(),
    )
}

/// Decides how a child of an index is pushed.
fn child_kind(child: &Descriptor) -> Result<ManifestKind> {
    match ManifestKind::of(child.media_type()) {
        Some(kind) => Ok(kind),
        None => bail!(
            "Unsupported media type {} for {}",
            child.media_type(),
            child.digest()
        ),
    }
}

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "[eta {eta}] {bar:40.cyan/blue} {decimal_bytes:>7}/{decimal_total_bytes:7} {msg}",
        )?
        .progress_chars("##-"),
    );
    Ok(bar)
}

impl RemoteClient {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let config = ClientConfig {
            protocol: if options.insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Creating tokio runtime")?;

        Ok(RemoteClient {
            client: Client::new(config),
            auth: options.auth(),
            runtime,
        })
    }

    async fn authenticate(&self, target: &Name) -> Result<Reference> {
        let reference = target_reference(target);
        self.client
            .auth(&reference, &self.auth, RegistryOperation::Push)
            .await
            .with_context(|| format!("Authenticating to {}", reference.registry()))?;
        Ok(reference)
    }

    async fn push_image(&self, reference: &Reference, image: &dyn Image) -> Result<(Digest, u64)> {
        let digest = image.digest();
        let raw = image.raw_manifest()?;
        let manifest = ImageManifest::from_reader(&raw[..])
            .with_context(|| format!("Parsing image manifest {digest}"))?;

        let blobs = iter::once(manifest.config())
            .chain(manifest.layers())
            .collect::<Vec<_>>();
        let bar = progress_bar(blobs.iter().map(|blob| blob.size()).sum())?;
        bar.set_message(digest.to_string());

        for blob in blobs {
            let blob_digest = Digest::try_from(blob.digest())?;
            let data = image.blob(&blob_digest)?;
            debug!("Pushing blob {blob_digest} to {reference}");
            self.client
                .push_blob(reference, &data, &blob_digest.to_string())
                .await
                .with_context(|| format!("Pushing blob {blob_digest}"))?;
            bar.inc(blob.size());
        }
        bar.finish_and_clear();

        let size = raw.len() as u64;
        let content_type = image
            .media_type()
            .parse()
            .with_context(|| format!("Invalid media type for {digest}"))?;
        self.client
            .push_manifest_raw(reference, raw, content_type)
            .await
            .with_context(|| format!("Pushing manifest {digest}"))?;
        info!("Pushed image {digest} to {reference}");

        Ok((digest, size))
    }

    fn push_index<'a>(
        &'a self,
        reference: &'a Reference,
        index: &'a dyn ImageIndex,
    ) -> BoxFuture<'a, Result<(Digest, u64)>> {
        Box::pin(async move {
            let digest = index.digest()?;

            for child in index.index_manifest()?.manifests() {
                let child_digest = Digest::try_from(child.digest())?;
                let child_ref = child_reference(reference, &child_digest);
                match child_kind(child)? {
                    ManifestKind::Index => {
                        let nested = index.image_index(&child_digest)?;
                        self.push_index(&child_ref, &*nested).await?;
                    }
                    ManifestKind::Image => {
                        let image = index.image(&child_digest)?;
                        self.push_image(&child_ref, &*image).await?;
                    }
                }
            }

            let raw = index.raw_manifest()?;
            let size = raw.len() as u64;
            let content_type = index
                .media_type()?
                .parse()
                .with_context(|| format!("Invalid media type for {digest}"))?;
            self.client
                .push_manifest_raw(reference, raw, content_type)
                .await
                .with_context(|| format!("Pushing index {digest}"))?;
            info!("Pushed index {digest} to {reference}");

            Ok((digest, size))
        })
    }
}

struct RemoteImage<'c> {
    client: &'c RemoteClient,
    image: Arc<dyn Image>,
}

impl Artifact for RemoteImage<'_> {
    fn write(&self, target: &Name) -> Result<(Digest, u64)> {
        self.client.runtime.block_on(async {
            let reference = self.client.authenticate(target).await?;
            self.client.push_image(&reference, &*self.image).await
        })
    }
}

struct RemoteIndex<'c> {
    client: &'c RemoteClient,
    index: Arc<dyn ImageIndex>,
}

impl Artifact for RemoteIndex<'_> {
    fn write(&self, target: &Name) -> Result<(Digest, u64)> {
        self.client.runtime.block_on(async {
            let reference = self.client.authenticate(target).await?;
            self.client.push_index(&reference, &*self.index).await
        })
    }
}

impl RegistryClient for RemoteClient {
    fn new_image_from_manifest(&self, image: Arc<dyn Image>) -> Box<dyn Artifact + '_> {
        Box::new(RemoteImage {
            client: self,
            image,
        })
    }

    fn new_image_from_index(&self, index: Arc<dyn ImageIndex>) -> Box<dyn Artifact + '_> {
        Box::new(RemoteIndex {
            client: self,
            index,
        })
    }
}

#[cfg(test)]
mod test {
    use oci_spec::image::{DescriptorBuilder, MediaType};
    use similar_asserts::assert_eq;

    use super::*;
    use crate::layout::{DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_SCHEMA2_MEDIA_TYPE};

    const DIGEST: &str = "sha256:0000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn test_target_reference() {
        let reference = target_reference(&Name::new("someref").unwrap());
        assert_eq!(reference.registry(), "docker.io");
        assert_eq!(reference.repository(), "library/someref");
        assert_eq!(reference.tag(), Some(DEFAULT_TAG));
        assert_eq!(reference.digest(), None);

        let reference = target_reference(&Name::new("localhost:5000/app:v2").unwrap());
        assert_eq!(reference.registry(), "localhost:5000");
        assert_eq!(reference.repository(), "app");
        assert_eq!(reference.tag(), Some("v2"));

        let reference =
            target_reference(&Name::new(&format!("localhost:5000/app:v2@{DIGEST}")).unwrap());
        assert_eq!(reference.digest(), Some(DIGEST));
    }

    #[test]
    fn test_child_reference() {
        let parent = target_reference(&Name::new("registry.example.com/team/app:v1").unwrap());
        let child = child_reference(&parent, &Digest::new(DIGEST).unwrap());
        assert_eq!(child.registry(), "registry.example.com");
        assert_eq!(child.repository(), "team/app");
        assert_eq!(child.digest(), Some(DIGEST));
    }

    fn child(media_type: MediaType) -> Descriptor {
        DescriptorBuilder::default()
            .media_type(media_type)
            .digest(DIGEST.parse::<oci_spec::image::Digest>().unwrap())
            .size(10u64)
            .build()
            .unwrap()
    }

    #[test]
    fn test_child_kind() {
        let cases = [
            (MediaType::ImageManifest, ManifestKind::Image),
            (
                MediaType::Other(DOCKER_MANIFEST_SCHEMA2_MEDIA_TYPE.to_string()),
                ManifestKind::Image,
            ),
            (MediaType::ImageIndex, ManifestKind::Index),
            (
                MediaType::Other(DOCKER_MANIFEST_LIST_MEDIA_TYPE.to_string()),
                ManifestKind::Index,
            ),
        ];
        for (media_type, expected) in cases {
            assert_eq!(child_kind(&child(media_type)).unwrap(), expected);
        }

        let err = child_kind(&child(MediaType::ImageLayer)).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Unsupported media type {} for {DIGEST}", MediaType::ImageLayer)
        );
    }

    #[test]
    fn test_options_auth() {
        assert!(matches!(
            ClientOptions::default().auth(),
            RegistryAuth::Anonymous
        ));

        let options = ClientOptions {
            username: Some("user".into()),
            password: Some("secret".into()),
            ..Default::default()
        };
        assert!(matches!(
            options.auth(),
            RegistryAuth::Basic(ref user, ref password) if user == "user" && password == "secret"
        ));

        let options = ClientOptions {
            username: Some("user".into()),
            ..Default::default()
        };
        assert!(matches!(options.auth(), RegistryAuth::Anonymous));
    }

    #[test]
    fn test_new_client() {
        RemoteClient::new(&ClientOptions {
            insecure: true,
            ..Default::default()
        })
        .unwrap();
    }
}
