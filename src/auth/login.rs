//! Login collaborators that mint fresh portal tokens.
//!
//! The portal only issues bearer tokens through its browser sign-in flow, so the
//! actual browser work lives outside this crate. [`CommandLogin`] delegates to a
//! helper program (typically a headless browser script) and [`ManualLogin`]
//! asks the user to paste the token captured from their own browser.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::token::AuthToken;
use crate::error::{AuthError, ConfigError};

/// Portal account credentials, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Capability to sign in to the portal and return a fresh token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, AuthError>;
}

/// Runs an external helper that performs the browser login.
///
/// The helper receives `LSAC_USERNAME`, `LSAC_PASSWORD` and `LSAC_PORTAL_URL` in its
/// environment and must print the bearer token as the last line of stdout.
pub struct CommandLogin {
    program: String,
    args: Vec<String>,
    portal_url: String,
}

impl CommandLogin {
    pub fn new(program: impl Into<String>, args: Vec<String>, portal_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            portal_url: portal_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for CommandLogin {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, AuthError> {
        info!("Logging in to LSAC via {}", self.program);

        let output = Command::new(&self.program)
            .args(&self.args)
            .env("LSAC_USERNAME", credentials.username())
            .env("LSAC_PASSWORD", credentials.password())
            .env("LSAC_PORTAL_URL", &self.portal_url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AuthError::HelperSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output");
            return Err(AuthError::LoginFailed(format!(
                "login helper exited with {}: {}",
                output.status,
                detail.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = extract_bearer(&stdout).ok_or_else(|| {
            AuthError::LoginFailed("Failed to capture authentication token".to_string())
        })?;

        info!("Successfully logged in");
        Ok(AuthToken::fresh(token))
    }
}

/// Opens the status checker in the default browser and reads a pasted token from stdin.
pub struct ManualLogin {
    portal_url: String,
}

impl ManualLogin {
    pub fn new(portal_url: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for ManualLogin {
    async fn login(&self, _credentials: &Credentials) -> Result<AuthToken, AuthError> {
        info!("Starting manual sign-in");

        if let Err(e) = open::that(&self.portal_url) {
            warn!("Failed to open browser: {}", e);
        }

        eprintln!("Sign in at {}", self.portal_url);
        eprintln!("Then copy the 'authorization' header of any request to the status API");
        eprintln!("(browser developer tools, Network tab) and paste it here:");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| AuthError::LoginFailed(format!("failed to read token: {}", e)))?;

        let token = extract_bearer(&line).ok_or(AuthError::UserCancelled);
        line.zeroize();

        Ok(AuthToken::fresh(token?))
    }
}

/// Pull a bearer token out of helper or user output.
///
/// Uses the last non-empty line and strips an optional `Authorization:` header
/// name and `bearer ` prefix.
pub fn extract_bearer(output: &str) -> Option<String> {
    let line = output.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let line = match line.split_once(':') {
        Some((header, rest)) if header.trim().eq_ignore_ascii_case("authorization") => rest.trim(),
        _ => line,
    };
    if line.is_empty() || line.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = match line.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None => line,
    };

    if token.is_empty() || token.contains(char::is_whitespace) {
        None
    } else {
        Some(token.to_string())
    }
}

/// Build the status checker landing URL for an application GUID.
pub fn portal_login_url(status_checker_url: &str, guid: &str) -> Result<String, ConfigError> {
    let mut url = Url::parse(status_checker_url).map_err(|e| {
        ConfigError::Invalid(format!(
            "Invalid status checker URL '{}': {}",
            status_checker_url, e
        ))
    })?;
    url.query_pairs_mut().append_pair("guid", guid);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("abc.def.ghi\n"), Some("abc.def.ghi".into()));
        assert_eq!(extract_bearer("bearer abc.def"), Some("abc.def".into()));
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def".into()));
        assert_eq!(
            extract_bearer("navigating...\nlogged in\n  tok123  \n\n"),
            Some("tok123".into())
        );
        assert_eq!(extract_bearer(""), None);
        assert_eq!(extract_bearer("\n  \n"), None);
        assert_eq!(extract_bearer("login failed badly"), None);
        assert_eq!(extract_bearer("bearer "), None);
    }

    #[test]
    fn test_extract_bearer_from_authorization_header() {
        assert_eq!(
            extract_bearer("Authorization: Bearer eyJabc.def"),
            Some("eyJabc.def".into())
        );
        assert_eq!(
            extract_bearer("done
authorization:bearer eyJabc"),
            Some("eyJabc".into())
        );
        assert_eq!(extract_bearer("AUTHORIZATION: eyJabc"), Some("eyJabc".into()));
        assert_eq!(extract_bearer("Authorization:"), None);
        assert_eq!(extract_bearer("Authorization: Basic dXNlcg=="), None);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("jdoe", "hunter2");
        let debug_output = format!("{:?}", creds);
        assert!(debug_output.contains("jdoe"));
        assert!(!debug_output.contains("hunter2"));
    }

    #[test]
    fn test_portal_login_url_encodes_guid() {
        let url = portal_login_url("https://aso.lsac-unite.org/", "xjQd2C0H4WM=").unwrap();
        assert_eq!(url, "https://aso.lsac-unite.org/?guid=xjQd2C0H4WM%3D");

        assert!(portal_login_url("not a url", "x").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_login_reads_stdout() {
        let login = CommandLogin::new(
            "sh",
            vec![
                "-c".into(),
                "echo \"user=$LSAC_USERNAME\" >&2; echo 'bearer tok-123'".into(),
            ],
            "https://aso.lsac-unite.org/?guid=abc",
        );

        let token = login
            .login(&Credentials::new("jdoe", "hunter2"))
            .await
            .unwrap();
        assert_eq!(token.secret(), "tok-123");
        assert!(token.is_valid(chrono::Utc::now()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_login_failure_exit() {
        let login = CommandLogin::new(
            "sh",
            vec!["-c".into(), "echo 'bad password' >&2; exit 3".into()],
            "https://aso.lsac-unite.org/",
        );

        let err = login
            .login(&Credentials::new("jdoe", "wrong"))
            .await
            .unwrap_err();
        match err {
            AuthError::LoginFailed(msg) => assert!(msg.contains("bad password")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_login_without_token() {
        let login = CommandLogin::new("sh", vec!["-c".into(), "true".into()], "https://x/");
        let err = login.login(&Credentials::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, AuthError::LoginFailed(_)));
    }

    #[tokio::test]
    async fn test_command_login_missing_program() {
        let login = CommandLogin::new("/nonexistent/lsac-login-helper", vec![], "https://x/");
        let err = login.login(&Credentials::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, AuthError::HelperSpawn { .. }));
    }
}
