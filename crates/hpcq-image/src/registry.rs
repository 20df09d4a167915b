//! Registry token exchange and manifest digest lookup (spec §4.3 steps
//! 2-3): a pull-scoped bearer token from the registry's own token endpoint,
//! then a manifest request whose `Docker-Content-Digest` response header is
//! the remote digest to compare against the local sidecar.

use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;

use crate::ociref::OciRef;
use crate::ImageError;

const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json"
);

/// Optional HTTP Basic credentials for registries that don't allow
/// anonymous pulls.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("realm=") {
            realm = Some(v.trim_matches('"').to_string());
        } else if let Some(v) = part.strip_prefix("service=") {
            service = Some(v.trim_matches('"').to_string());
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

/// Obtain a pull-scoped bearer token, or `None` if the registry doesn't
/// require one (anonymous pulls allowed without a challenge).
pub async fn fetch_pull_token(
    http: &reqwest::Client,
    oci: &OciRef,
    auth: &RegistryAuth,
) -> Result<Option<String>, ImageError> {
    let probe_url = format!("https://{}/v2/", oci.registry);
    let probe = http
        .get(&probe_url)
        .send()
        .await
        .map_err(ImageError::Transport)?;

    if probe.status() != StatusCode::UNAUTHORIZED {
        return Ok(None);
    }

    let challenge = probe
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer_challenge)
        .ok_or_else(|| ImageError::RegistryAuth("no bearer challenge in 401 response".into()))?;

    let mut req = http.get(&challenge.realm).query(&[(
        "scope",
        format!("repository:{}:pull", oci.repository),
    )]);
    if let Some(service) = &challenge.service {
        req = req.query(&[("service", service)]);
    }
    if let (Some(user), Some(pass)) = (&auth.username, &auth.password) {
        req = req.basic_auth(user, Some(pass));
    }

    let res = req.send().await.map_err(ImageError::Transport)?;
    if !res.status().is_success() {
        return Err(ImageError::RegistryAuth(format!(
            "token endpoint returned {}",
            res.status()
        )));
    }

    #[derive(serde::Deserialize)]
    struct TokenResponse {
        token: Option<String>,
        access_token: Option<String>,
    }
    let parsed: TokenResponse = res.json().await.map_err(ImageError::Transport)?;
    Ok(parsed.token.or(parsed.access_token))
}

/// `HEAD` the manifest and return the `Docker-Content-Digest` header value.
pub async fn resolve_remote_digest(
    http: &reqwest::Client,
    oci: &OciRef,
    token: Option<&str>,
) -> Result<String, ImageError> {
    let url = format!(
        "https://{}/v2/{}/manifests/{}",
        oci.registry,
        oci.repository,
        oci.reference_str()
    );

    let mut req = http.head(&url).header(ACCEPT, MANIFEST_ACCEPT);
    if let Some(token) = token {
        req = req.header(AUTHORIZATION, format!("Bearer {token}"));
    }

    let res = req.send().await.map_err(ImageError::Transport)?;
    if !res.status().is_success() {
        return Err(ImageError::RegistryAuth(format!(
            "manifest HEAD returned {}",
            res.status()
        )));
    }

    res.headers()
        .get("Docker-Content-Digest")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ImageError::RegistryAuth("manifest response missing Docker-Content-Digest".into()))
}
