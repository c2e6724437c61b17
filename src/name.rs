//! Normalized image references.
//!
//! Parsing follows the docker reference grammar: `[domain/]path[:tag][@digest]`.  Names without
//! a domain live on `docker.io`, and single-component paths on `docker.io` are placed in the
//! `library/` namespace, so `testimage` and `docker.io/library/testimage` are the same name.

use core::{fmt, str::FromStr};

use thiserror::Error;

use crate::digest::{Digest, DigestError};

pub const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPOSITORY_NAMESPACE: &str = "library";
const NAME_TOTAL_LENGTH_MAX: usize = 255;
const TAG_LENGTH_MAX: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("invalid reference format: {0:?}")]
    InvalidFormat(String),
    #[error("invalid reference format: repository name must be lowercase: {0:?}")]
    Uppercase(String),
    #[error("repository name must not be a 64-byte hex identifier: {0:?}")]
    HexIdentifier(String),
    #[error("repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters: {0:?}")]
    NameTooLong(String),
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
    #[error(transparent)]
    Digest(#[from] DigestError),
}

/// A validated, normalized image reference.
///
/// Equality and hashing use the canonical string form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Name {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Name {
    pub fn new(reference: &str) -> Result<Self, NameError> {
        let invalid = || NameError::InvalidFormat(reference.to_string());

        let (remainder, digest) = match reference.split_once('@') {
            Some((remainder, digest)) => (remainder, Some(Digest::new(digest)?)),
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; earlier colons belong to a port.
        let last_slash = remainder.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match remainder[last_slash..].rfind(':') {
            Some(i) => {
                let (repository, tag) = remainder.split_at(last_slash + i);
                (repository, Some(&tag[1..]))
            }
            None => (remainder, None),
        };

        if let Some(tag) = tag {
            if !valid_tag(tag) {
                return Err(invalid());
            }
        }

        if reference.len() == 64 && reference.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(NameError::HexIdentifier(reference.to_string()));
        }

        let (domain, path) = split_domain(repository);

        if !domain.is_empty() && !valid_domain(domain) {
            return Err(invalid());
        }
        if path.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(NameError::Uppercase(reference.to_string()));
        }
        if path.is_empty() || !path.split('/').all(valid_path_component) {
            return Err(invalid());
        }

        let domain = match domain {
            "" | LEGACY_DEFAULT_DOMAIN => DEFAULT_DOMAIN,
            domain => domain,
        };
        let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
            format!("{OFFICIAL_REPOSITORY_NAMESPACE}/{path}")
        } else {
            path.to_string()
        };

        if domain.len() + 1 + path.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(NameError::NameTooLong(reference.to_string()));
        }

        Ok(Name {
            domain: domain.to_string(),
            path,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// The registry host, e.g. `docker.io` or `localhost:5000`.
    pub fn host(&self) -> &str {
        &self.domain
    }

    /// The repository path within the registry, e.g. `library/ubuntu`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// The name with `host/path` only.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    pub fn with_tag(&self, tag: &str) -> Result<Self, NameError> {
        if !valid_tag(tag) {
            return Err(NameError::InvalidTag(tag.to_string()));
        }
        Ok(Name {
            tag: Some(tag.to_string()),
            ..self.clone()
        })
    }

    pub fn without_tag_or_digest(&self) -> Self {
        Name {
            domain: self.domain.clone(),
            path: self.path.clone(),
            tag: None,
            digest: None,
        }
    }
}

/// Splits off the domain: the first component counts as one if it contains a `.` or a `:`, is
/// `localhost`, or has uppercase characters (which paths may not).
fn split_domain(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains(['.', ':'])
                || first == "localhost"
                || first.bytes().any(|b| b.is_ascii_uppercase()) =>
        {
            (first, rest)
        }
        _ => ("", name),
    }
}

fn valid_domain(domain: &str) -> bool {
    let (host, port) = match domain.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (domain, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    !host.is_empty()
        && host.split('.').all(|label| {
            let bytes = label.as_bytes();
            !bytes.is_empty()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
                && bytes[0] != b'-'
                && bytes[bytes.len() - 1] != b'-'
        })
}

/// `[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*`
fn valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let mut i = 0;
    loop {
        let start = i;
        while i < bytes.len() && alnum(bytes[i]) {
            i += 1;
        }
        if i == start {
            return false;
        }
        if i == bytes.len() {
            return true;
        }

        let sep_start = i;
        while i < bytes.len() && !alnum(bytes[i]) {
            i += 1;
        }
        match &component[sep_start..i] {
            "." | "_" | "__" => {}
            sep if sep.bytes().all(|b| b == b'-') => {}
            _ => return false,
        }
    }
}

/// `[\w][\w.-]{0,127}`
fn valid_tag(tag: &str) -> bool {
    let word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    match tag.as_bytes() {
        [first, rest @ ..] => {
            tag.len() <= TAG_LENGTH_MAX
                && word(*first)
                && rest.iter().all(|b| word(*b) || *b == b'.' || *b == b'-')
        }
        [] => false,
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::new(s)
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    fn canonical(reference: &str) -> String {
        Name::new(reference).unwrap().to_string()
    }

    #[test]
    fn test_normalization() {
        let cases = [
            ("testimage", "docker.io/library/testimage"),
            ("testimage:1.0", "docker.io/library/testimage:1.0"),
            ("someuser/app", "docker.io/someuser/app"),
            ("docker.io/library/testimage", "docker.io/library/testimage"),
            ("index.docker.io/busybox", "docker.io/library/busybox"),
            ("localhost/app", "localhost/app"),
            ("localhost:5000/app:v2", "localhost:5000/app:v2"),
            ("gcr.io/project/nested/image", "gcr.io/project/nested/image"),
            ("my-registry.example.com:8443/a_b/c__d/e-f", "my-registry.example.com:8443/a_b/c__d/e-f"),
            ("Registry.Example/app", "Registry.Example/app"),
        ];
        for (input, expected) in cases {
            assert_eq!(canonical(input), expected.to_string(), "input: {input}");
        }
    }

    #[test]
    fn test_components() {
        let digest = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        let name = Name::new(&format!("localhost:5000/team/app:v1@{digest}")).unwrap();
        assert_eq!(name.host(), "localhost:5000");
        assert_eq!(name.path(), "team/app");
        assert_eq!(name.tag(), Some("v1"));
        assert_eq!(name.digest().map(ToString::to_string).as_deref(), Some(digest));
        assert_eq!(name.repository(), "localhost:5000/team/app".to_string());
        assert_eq!(
            name.without_tag_or_digest().to_string(),
            "localhost:5000/team/app".to_string()
        );
        assert_eq!(name.with_tag("v2").unwrap().tag(), Some("v2"));
        assert_eq!(
            name.with_tag("-bad"),
            Err(NameError::InvalidTag("-bad".to_string()))
        );
    }

    #[test]
    fn test_equality_is_canonical() {
        assert_eq!(
            Name::new("testimage").unwrap(),
            Name::new("docker.io/library/testimage").unwrap()
        );
        assert!(Name::new("testimage").unwrap() != Name::new("testimage:latest").unwrap());
    }

    #[test]
    fn test_invalid() {
        for input in [
            ":",
            "",
            "/",
            "a//b",
            "image:",
            "image:-tag",
            "-image",
            "image-",
            "a..b",
            "a___b",
            "host:port/image",
            "-host.com/image",
        ] {
            assert!(Name::new(input).is_err(), "input: {input}");
        }

        assert_eq!(
            Name::new("Upper"),
            Err(NameError::Uppercase("Upper".to_string()))
        );
        let hex = "a".repeat(64);
        assert_eq!(Name::new(&hex), Err(NameError::HexIdentifier(hex.clone())));
        // only a bare identifier is ambiguous
        assert_eq!(canonical(&format!("{hex}:v1")), format!("docker.io/library/{hex}:v1"));
        let long = format!("x/{}", "y".repeat(300));
        assert_eq!(Name::new(&long), Err(NameError::NameTooLong(long.clone())));
        assert!(matches!(
            Name::new("image@sha256:beef"),
            Err(NameError::Digest(_))
        ));
    }
}
