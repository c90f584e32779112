//! HTTP Basic authentication
//!
//! Credentials come from an htpasswd file holding `user:{SHA}digest` lines,
//! where the digest is the base64 encoded SHA-1 of the password. When the
//! default `<repo>/.htpasswd` does not exist the server runs with open access
//! and the auth middleware is not installed at all.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{RestError, Result};

/// Source of truth for user credentials
pub trait CredentialStore: Send + Sync {
    fn authenticate(&self, user: &str, password: &str) -> bool;
}

/// Users loaded from an htpasswd file
#[derive(Debug, Default)]
pub struct Htpasswd {
    users: HashMap<String, Vec<u8>>,
}

impl Htpasswd {
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Parse htpasswd content, skipping lines that cannot be used
    pub fn parse(content: &str) -> Self {
        let mut users = HashMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, hash)) = line.split_once(':') else {
                warn!(line = index + 1, "Malformed htpasswd line");
                continue;
            };
            let Some(encoded) = hash.strip_prefix("{SHA}") else {
                warn!(line = index + 1, user, "Unsupported htpasswd hash scheme");
                continue;
            };
            match STANDARD.decode(encoded) {
                Ok(digest) if digest.len() == 20 => {
                    users.insert(user.to_string(), digest);
                }
                _ => warn!(line = index + 1, user, "Invalid htpasswd digest"),
            }
        }
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialStore for Htpasswd {
    fn authenticate(&self, user: &str, password: &str) -> bool {
        match self.users.get(user) {
            Some(expected) => Sha1::digest(password.as_bytes()).as_slice() == expected.as_slice(),
            None => false,
        }
    }
}

/// Load the configured credential file, if there is one
///
/// Only a missing `<repo>/.htpasswd` means open access. A credential file
/// named explicitly must exist.
pub fn load_credentials(config: &Config) -> Result<Option<Arc<dyn CredentialStore>>> {
    let path = config.htpasswd_path();
    match Htpasswd::from_file(&path) {
        Ok(htpasswd) => {
            info!(file = %path.display(), users = htpasswd.len(), "Authentication enabled");
            if htpasswd.is_empty() {
                warn!("No usable htpasswd entries, every request will be rejected");
            }
            Ok(Some(Arc::new(htpasswd)))
        }
        Err(e)
            if e.kind() == ErrorKind::NotFound && config.repository.htpasswd_file.is_some() =>
        {
            Err(RestError::Config(format!(
                "htpasswd file {} does not exist",
                path.display()
            )))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(file = %path.display(), "Authentication disabled");
            Ok(None)
        }
        Err(e) => Err(RestError::Config(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Reject requests without valid Basic credentials before they are routed
pub async fn require_basic_auth(
    State(credentials): State<Arc<dyn CredentialStore>>,
    request: Request,
    next: Next,
) -> Response {
    match basic_credentials(request.headers()) {
        Some((user, password)) if credentials.authenticate(&user, &password) => {
            next.run(request).await
        }
        Some((user, _)) => {
            warn!(user = %user, "Authentication failed");
            RestError::AuthFailure.into_response()
        }
        None => {
            debug!(path = %request.uri().path(), "Missing credentials");
            RestError::AuthFailure.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::create_router;
    use crate::storage::MemoryBackend;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use tower::util::ServiceExt;

    fn entry(user: &str, password: &str) -> String {
        format!("{}:{{SHA}}{}", user, STANDARD.encode(Sha1::digest(password.as_bytes())))
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
    }

    #[test]
    fn test_htpasswd_parsing() {
        let content = format!(
            "# backup users\n\n{}\n{}\nbroken-line\ncarol:$apr1$abc$def\ndave:{{SHA}}not-base64!\n",
            entry("alice", "secret"),
            entry("bob", "hunter2"),
        );
        let htpasswd = Htpasswd::parse(&content);

        assert_eq!(htpasswd.len(), 2);
        assert!(htpasswd.authenticate("alice", "secret"));
        assert!(htpasswd.authenticate("bob", "hunter2"));
        assert!(!htpasswd.authenticate("alice", "hunter2"));
        assert!(!htpasswd.authenticate("carol", "anything"));
        assert!(!htpasswd.authenticate("mallory", "secret"));
    }

    #[test]
    fn test_basic_header_decoding() {
        let mut headers = HeaderMap::new();
        assert_eq!(basic_credentials(&headers), None);

        headers.insert(header::AUTHORIZATION, basic("alice", "pa:ss").parse().unwrap());
        assert_eq!(
            basic_credentials(&headers),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );

        headers.insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        assert_eq!(basic_credentials(&headers), None);
    }

    #[test]
    fn test_missing_file_disables_auth() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.repository.path = dir.path().to_path_buf();
        assert!(load_credentials(&config).unwrap().is_none());

        std::fs::write(dir.path().join(".htpasswd"), entry("alice", "secret")).unwrap();
        let store = load_credentials(&config).unwrap().unwrap();
        assert!(store.authenticate("alice", "secret"));
    }

    #[test]
    fn test_explicit_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.repository.path = dir.path().to_path_buf();
        config.repository.htpasswd_file = Some(dir.path().join("typo.htpasswd"));

        match load_credentials(&config) {
            Err(RestError::Config(message)) => assert!(message.contains("typo.htpasswd")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(store) => panic!("loaded credentials: {}", store.is_some()),
        }

        // the default location still falls back to open access
        config.repository.htpasswd_file = None;
        assert!(load_credentials(&config).unwrap().is_none());

        let explicit = dir.path().join("users.htpasswd");
        std::fs::write(&explicit, entry("bob", "hunter2")).unwrap();
        config.repository.htpasswd_file = Some(explicit);
        let store = load_credentials(&config).unwrap().unwrap();
        assert!(store.authenticate("bob", "hunter2"));
    }

    #[tokio::test]
    async fn test_middleware_guards_router() {
        let credentials: Arc<dyn CredentialStore> =
            Arc::new(Htpasswd::parse(&entry("alice", "secret")));
        let app = create_router(Arc::new(MemoryBackend::new()), false).layer(
            axum::middleware::from_fn_with_state(credentials, require_basic_auth),
        );

        let request = |auth: Option<String>| {
            let mut builder = axum::http::Request::builder().method(Method::HEAD).uri("/config");
            if let Some(auth) = auth {
                builder = builder.header(header::AUTHORIZATION, auth);
            }
            builder.body(Body::empty()).unwrap()
        };

        let response = app.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let response = app
            .clone()
            .oneshot(request(Some(basic("alice", "wrong"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // authenticated requests reach the router; no config exists yet
        let response = app
            .oneshot(request(Some(basic("alice", "secret"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
