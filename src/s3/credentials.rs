//! S3 Credentials Module
//!
//! Resolves the access key pair used to sign upload URLs.
//!
//! Resolution order:
//! 1. `access_key` / `secret_key` from [`StorageConfig`]
//! 2. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//!
//! # Example
//!
//! ```
//! use tsubame_uploadr::s3::Credentials;
//!
//! let creds = Credentials::new("access-key", "secret-key");
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert!(creds.session_token().is_none());
//! ```

use crate::config::StorageConfig;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Credentials for AWS authentication
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    /// Get the access key ID
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret access key
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Get the session token (if any)
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl From<Credentials> for aws_credential_types::Credentials {
    fn from(creds: Credentials) -> Self {
        aws_credential_types::Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            creds.session_token,
            None,
            "tsubame-static",
        )
    }
}

/// Factory methods for loading credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = non_empty_env("AWS_ACCESS_KEY_ID").ok_or_else(|| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = non_empty_env("AWS_SECRET_ACCESS_KEY").ok_or_else(|| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        Ok(match non_empty_env("AWS_SESSION_TOKEN") {
            Some(token) => Credentials::with_session_token(access_key, secret_key, token),
            None => Credentials::new(access_key, secret_key),
        })
    }

    /// Load credentials from storage configuration
    pub fn from_config(config: &StorageConfig) -> Result<Credentials, CredentialsError> {
        let access_key = config.access_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("access_key not set in config".into())
        })?;

        let secret_key = config.secret_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("secret_key not set in config".into())
        })?;

        Ok(Credentials::new(access_key.clone(), secret_key.clone()))
    }

    /// Configuration first, then the environment
    pub fn resolve(config: &StorageConfig) -> Result<Credentials, CredentialsError> {
        match Self::from_config(config) {
            Ok(creds) => Ok(creds),
            Err(config_err) => Self::from_env().map_err(|env_err| {
                CredentialsError::MissingCredentials(format!("{}; {}", config_err, env_err))
            }),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn storage(access: Option<&str>, secret: Option<&str>) -> StorageConfig {
        StorageConfig {
            bucket: Some("test".into()),
            region: "us-east-1".into(),
            endpoint: None,
            access_key: access.map(Into::into),
            secret_key: secret.map(Into::into),
        }
    }

    #[test]
    fn test_credentials_with_session_token() {
        let creds = Credentials::with_session_token("access", "secret", "token");
        assert_eq!(creds.access_key_id(), "access");
        assert_eq!(creds.secret_access_key(), "secret");
        assert_eq!(creds.session_token(), Some("token"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("access", "super-secret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("access"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_from_config_missing_secret_key() {
        let result = CredentialsProvider::from_config(&storage(Some("access"), None));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_success() {
        let creds =
            CredentialsProvider::from_config(&storage(Some("config-access"), Some("config-secret")))
                .unwrap();
        assert_eq!(creds.access_key_id(), "config-access");
        assert_eq!(creds.secret_access_key(), "config-secret");
    }

    #[test]
    #[serial]
    fn test_resolve_falls_back_to_env() {
        std::env::set_var("AWS_ACCESS_KEY_ID", "env-access");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "env-secret");
        std::env::remove_var("AWS_SESSION_TOKEN");

        let creds = CredentialsProvider::resolve(&storage(None, None)).unwrap();
        assert_eq!(creds.access_key_id(), "env-access");

        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");
    }

    #[test]
    #[serial]
    fn test_resolve_reports_both_sources() {
        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");

        let err = CredentialsProvider::resolve(&storage(None, None)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("config"));
        assert!(message.contains("AWS_ACCESS_KEY_ID"));
    }
}
