//! Ambient credential and region resolution.
//!
//! Order: `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (plus
//! `AWS_SESSION_TOKEN`), then the `~/.aws/credentials` profile named by
//! `AWS_PROFILE` (default `default`).

use log::debug;
use mpfu_core::config::S3Settings;
use mpfu_core::{UploadError, UploadResult};
use std::path::Path;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AwsCredentials {
    /// Resolve from the process environment and the shared credentials file.
    pub fn from_environment() -> UploadResult<Self> {
        let file = dirs::home_dir().map(|h| h.join(".aws").join("credentials"));
        Self::resolve(|key| std::env::var(key).ok(), file.as_deref())
    }

    /// Resolution with an injectable environment lookup.
    pub fn resolve(env: impl Fn(&str) -> Option<String>, credentials_file: Option<&Path>) -> UploadResult<Self> {
        let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

        if let (Some(id), Some(secret)) = (non_empty("AWS_ACCESS_KEY_ID"), non_empty("AWS_SECRET_ACCESS_KEY")) {
            debug!("Using object storage credentials from the environment");
            return Ok(Self {
                access_key_id: id,
                secret_access_key: secret,
                session_token: non_empty("AWS_SESSION_TOKEN"),
            });
        }

        let profile = non_empty("AWS_PROFILE").unwrap_or_else(|| "default".to_string());
        if let Some(path) = credentials_file.filter(|p| p.is_file()) {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                UploadError::credential_resolution(format!("Cannot read {}: {}", path.display(), e))
            })?;
            if let Some(creds) = parse_profile(&contents, &profile) {
                debug!("Using object storage credentials from profile '{}'", profile);
                return Ok(creds);
            }
        }

        Err(UploadError::credential_resolution(format!(
            "No object storage credentials found: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY or add profile '{}' to {}",
            profile,
            credentials_file
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "~/.aws/credentials".to_string())
        )))
    }
}

/// Pull one `[profile]` section out of an INI-style credentials file.
fn parse_profile(contents: &str, profile: &str) -> Option<AwsCredentials> {
    let mut in_section = false;
    let mut id = None;
    let mut secret = None;
    let mut token = None;

    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = name.trim() == profile;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => id = Some(value),
                "aws_secret_access_key" => secret = Some(value),
                "aws_session_token" => token = Some(value),
                _ => {}
            }
        }
    }

    Some(AwsCredentials {
        access_key_id: id?,
        secret_access_key: secret?,
        session_token: token,
    })
}

/// Configured region, then `AWS_REGION`, `AWS_DEFAULT_REGION`, `us-east-1`.
pub fn resolve_region(settings: &S3Settings, env: impl Fn(&str) -> Option<String>) -> String {
    settings
        .region
        .clone()
        .or_else(|| env("AWS_REGION"))
        .or_else(|| env("AWS_DEFAULT_REGION"))
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Configured endpoint or the regional AWS one.
pub fn resolve_endpoint(settings: &S3Settings, region: &str) -> String {
    match settings.endpoint {
        Some(ref endpoint) => endpoint.trim_end_matches('/').to_string(),
        None if region == DEFAULT_REGION => "https://s3.amazonaws.com".to_string(),
        None => format!("https://s3.{}.amazonaws.com", region),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpfu_core::UploadErrorKind;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn environment_wins() {
        let creds = AwsCredentials::resolve(
            env(&[
                ("AWS_ACCESS_KEY_ID", "AKID"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_SESSION_TOKEN", "tok"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert_eq!(creds.session_token.as_deref(), Some("tok"));
        assert!(!format!("{:?}", creds).contains("secret\""));
    }

    #[test]
    fn profile_from_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "[default]\naws_access_key_id = D\naws_secret_access_key = DS\n\n[ci]\naws_access_key_id=C\naws_secret_access_key=CS\n",
        )
        .unwrap();

        let creds = AwsCredentials::resolve(env(&[("AWS_PROFILE", "ci")]), Some(&path)).unwrap();
        assert_eq!(creds.access_key_id, "C");
        assert_eq!(creds.secret_access_key, "CS");

        let creds = AwsCredentials::resolve(env(&[]), Some(&path)).unwrap();
        assert_eq!(creds.access_key_id, "D");
    }

    #[test]
    fn missing_credentials_is_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AwsCredentials::resolve(
            env(&[("AWS_ACCESS_KEY_ID", "only-half")]),
            Some(&dir.path().join("absent")),
        )
        .unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::CredentialResolution);
    }

    #[test]
    fn region_and_endpoint() {
        let settings = S3Settings::default();
        assert_eq!(resolve_region(&settings, env(&[])), "us-east-1");
        assert_eq!(
            resolve_region(&settings, env(&[("AWS_DEFAULT_REGION", "eu-west-1")])),
            "eu-west-1"
        );
        assert_eq!(resolve_endpoint(&settings, "us-east-1"), "https://s3.amazonaws.com");
        assert_eq!(resolve_endpoint(&settings, "eu-west-1"), "https://s3.eu-west-1.amazonaws.com");

        let custom = S3Settings {
            endpoint: Some("http://localhost:9000/".into()),
            region: Some("auto".into()),
            ..Default::default()
        };
        assert_eq!(resolve_region(&custom, env(&[("AWS_REGION", "x")])), "auto");
        assert_eq!(resolve_endpoint(&custom, "auto"), "http://localhost:9000");
    }
}
