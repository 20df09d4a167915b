//! Parsing of OCI image references (`registry/repo:tag` or
//! `registry/repo@sha256:<hex>`), spec §4.3 step 1.

use crate::ImageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Tag(String),
    Digest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciRef {
    pub registry: String,
    pub repository: String,
    pub reference: Reference,
}

impl OciRef {
    /// Parse `registry/repo:tag` or `registry/repo@sha256:...`. A bare
    /// `repo` or `repo:tag` without a registry host defaults to Docker Hub,
    /// matching how `docker pull`/`apptainer pull docker://` resolve it.
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        if s.is_empty() {
            return Err(ImageError::InvalidRef(s.to_string()));
        }

        let (name_and_ref, reference) = if let Some(at) = s.rfind('@') {
            let digest = &s[at + 1..];
            if !digest.starts_with("sha256:") || digest.len() != "sha256:".len() + 64 {
                return Err(ImageError::InvalidRef(s.to_string()));
            }
            (&s[..at], Reference::Digest(digest.to_string()))
        } else if let Some(colon) = s.rfind(':') {
            // A colon before the last '/' is a port, not a tag separator.
            if s[colon..].contains('/') {
                (s, Reference::Tag("latest".to_string()))
            } else {
                (&s[..colon], Reference::Tag(s[colon + 1..].to_string()))
            }
        } else {
            (s, Reference::Tag("latest".to_string()))
        };

        if name_and_ref.is_empty() {
            return Err(ImageError::InvalidRef(s.to_string()));
        }

        let (registry, repository) = match name_and_ref.split_once('/') {
            Some((host, rest)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                (host.to_string(), rest.to_string())
            }
            _ => ("registry-1.docker.io".to_string(), name_and_ref.to_string()),
        };

        if repository.is_empty() {
            return Err(ImageError::InvalidRef(s.to_string()));
        }

        Ok(OciRef {
            registry,
            repository,
            reference,
        })
    }

    pub fn is_digest_pinned(&self) -> bool {
        matches!(self.reference, Reference::Digest(_))
    }

    /// The path segment used in manifest/token requests (a tag or a digest).
    pub fn reference_str(&self) -> &str {
        match &self.reference {
            Reference::Tag(t) => t,
            Reference::Digest(d) => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_reference() {
        let r = OciRef::parse("ghcr.io/acme/runtime:v3").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "acme/runtime");
        assert_eq!(r.reference, Reference::Tag("v3".to_string()));
        assert!(!r.is_digest_pinned());
    }

    #[test]
    fn parses_digest_reference() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let s = format!("ghcr.io/acme/runtime@{digest}");
        let r = OciRef::parse(&s).unwrap();
        assert_eq!(r.reference, Reference::Digest(digest));
        assert!(r.is_digest_pinned());
    }

    #[test]
    fn defaults_bare_name_to_docker_hub_latest() {
        let r = OciRef::parse("ubuntu").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "ubuntu");
        assert_eq!(r.reference, Reference::Tag("latest".to_string()));
    }

    #[test]
    fn handles_registry_with_port() {
        let r = OciRef::parse("localhost:5000/team/image:dev").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "team/image");
        assert_eq!(r.reference, Reference::Tag("dev".to_string()));
    }

    #[test]
    fn rejects_malformed_digest() {
        assert!(OciRef::parse("acme/runtime@sha256:nothex").is_err());
    }
}
