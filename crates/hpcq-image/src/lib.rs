#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Image Refresher (spec §4.3): resolve the remote OCI manifest digest for
//! the runtime image, compare against the local digest sidecar, and
//! pull/convert only on mismatch. Used both at worker startup and
//! best-effort before every job.
//!
//! Grounded on the teacher's `client-engine` backend request plumbing (one
//! shared `reqwest::Client`, typed errors) for the registry HTTP calls, and
//! on `other_examples/25700dfa_containers-containrs__src-oci-oci_runtime.rs`
//! for the shape of shelling out to an external OCI-adjacent binary
//! (`tokio::process::Command`, capture `Output`, classify by exit status).

pub mod ociref;
pub mod registry;

use std::path::{Path, PathBuf};
use std::process::Output;

use hpcq_core::layout::write_atomic;
use ociref::OciRef;
use registry::RegistryAuth;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid OCI reference: {0}")]
    InvalidRef(String),
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry auth/manifest error: {0}")]
    RegistryAuth(String),
    #[error("image pull command failed: {0}")]
    PullFailed(String),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no local image and digest resolution failed: {0}")]
    NoFallback(String),
}

/// What [`ImageRefresher::refresh`] actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Local image already matched the remote digest; no pull performed.
    UpToDate { digest: String },
    /// A fresh image was pulled and installed.
    Pulled { digest: String },
    /// Digest resolution failed, but the local image is still usable.
    StaleFallback { reason: String },
}

pub struct ImageRefresher {
    http: reqwest::Client,
    apptainer_bin: String,
    image_path: PathBuf,
    oci_ref: String,
    sif_url: Option<String>,
    auth: RegistryAuth,
}

impl ImageRefresher {
    pub fn new(
        http: reqwest::Client,
        apptainer_bin: impl Into<String>,
        image_path: impl Into<PathBuf>,
        oci_ref: impl Into<String>,
        sif_url: Option<String>,
        auth: RegistryAuth,
    ) -> Self {
        Self {
            http,
            apptainer_bin: apptainer_bin.into(),
            image_path: image_path.into(),
            oci_ref: oci_ref.into(),
            sif_url,
            auth,
        }
    }

    fn digest_sidecar_path(&self) -> PathBuf {
        let mut p = self.image_path.clone().into_os_string();
        p.push(".digest");
        PathBuf::from(p)
    }

    fn local_digest(&self) -> Option<String> {
        std::fs::read_to_string(self.digest_sidecar_path())
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Run the full refresh sequence (spec §4.3 steps 1-4 + failure policy).
    pub async fn refresh(&self) -> Result<RefreshOutcome, ImageError> {
        let oci = OciRef::parse(&self.oci_ref)?;

        let remote_digest = self.resolve_digest(&oci).await;
        let image_exists = self.image_path.exists();

        let remote_digest = match remote_digest {
            Ok(d) => d,
            Err(e) if image_exists => {
                tracing::warn!(error = %e, "digest resolution failed, continuing with stale local image");
                return Ok(RefreshOutcome::StaleFallback {
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "digest resolution failed and no local image exists, attempting unconditional pull");
                let digest = self.pull_and_install(&oci).await?;
                return Ok(RefreshOutcome::Pulled { digest });
            }
        };

        if image_exists && self.local_digest().as_deref() == Some(remote_digest.as_str()) {
            return Ok(RefreshOutcome::UpToDate {
                digest: remote_digest,
            });
        }

        let digest = self.pull_and_install(&oci).await?;
        Ok(RefreshOutcome::Pulled { digest })
    }

    async fn resolve_digest(&self, oci: &OciRef) -> Result<String, ImageError> {
        if oci.is_digest_pinned() {
            return Ok(oci.reference_str().to_string());
        }
        let token = registry::fetch_pull_token(&self.http, oci, &self.auth).await?;
        registry::resolve_remote_digest(&self.http, oci, token.as_deref()).await
    }

    /// Pull the image to `<image_path>.tmp` via the configured container
    /// runtime binary, atomically rename it into place, then write the
    /// digest sidecar — writing the sidecar last is the invariant the rest
    /// of the system relies on (spec §4.1.3, §7.4).
    async fn pull_and_install(&self, oci: &OciRef) -> Result<String, ImageError> {
        let digest = self.resolve_digest(oci).await.or_else(|e| {
            if let Some(url) = &self.sif_url {
                tracing::warn!(error = %e, sif_url = %url, "falling back to SIF url after digest resolution failure");
                Ok(String::new())
            } else {
                Err(ImageError::NoFallback(e.to_string()))
            }
        })?;

        let mut tmp_path = self.image_path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        if let Some(parent) = self.image_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let source = if !digest.is_empty() && oci.is_digest_pinned() {
            format!("docker://{}/{}@{}", oci.registry, oci.repository, oci.reference_str())
        } else if !digest.is_empty() {
            format!("docker://{}/{}@{}", oci.registry, oci.repository, digest)
        } else if let Some(url) = &self.sif_url {
            url.clone()
        } else {
            format!("docker://{}/{}:{}", oci.registry, oci.repository, oci.reference_str())
        };

        run_pull(&self.apptainer_bin, &tmp_path, &source).await?;
        std::fs::rename(&tmp_path, &self.image_path)?;

        let digest = if digest.is_empty() {
            self.resolve_digest(oci).await.unwrap_or_default()
        } else {
            digest
        };
        write_atomic(&self.digest_sidecar_path(), digest.as_bytes())?;
        Ok(digest)
    }
}

async fn run_pull(apptainer_bin: &str, dest: &Path, source: &str) -> Result<(), ImageError> {
    let output: Output = tokio::process::Command::new(apptainer_bin)
        .arg("pull")
        .arg("--force")
        .arg(dest)
        .arg(source)
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ImageError::PullFailed(format!(
            "{} exited with {}: {}",
            apptainer_bin,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_sidecar_path_appends_digest_suffix() {
        let refresher = ImageRefresher::new(
            reqwest::Client::new(),
            "apptainer",
            "/runtime/image.sif",
            "ghcr.io/acme/runtime:v1",
            None,
            RegistryAuth::default(),
        );
        assert_eq!(
            refresher.digest_sidecar_path(),
            PathBuf::from("/runtime/image.sif.digest")
        );
    }

    #[test]
    fn local_digest_reads_trimmed_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("image.sif");
        std::fs::write(format!("{}.digest", image_path.display()), "sha256:abc\n").unwrap();
        let refresher = ImageRefresher::new(
            reqwest::Client::new(),
            "apptainer",
            &image_path,
            "ghcr.io/acme/runtime:v1",
            None,
            RegistryAuth::default(),
        );
        assert_eq!(refresher.local_digest().as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn local_digest_is_none_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = ImageRefresher::new(
            reqwest::Client::new(),
            "apptainer",
            dir.path().join("image.sif"),
            "ghcr.io/acme/runtime:v1",
            None,
            RegistryAuth::default(),
        );
        assert!(refresher.local_digest().is_none());
    }
}
