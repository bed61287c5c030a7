//! Repository credentials.

use crate::Error;

/// HTTPS Basic-Auth credential for the manifest repository, parsed from
/// `user:password`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GitCredential {
    pub username: String,
    pub password: String,
}

impl GitCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Whether there is anything to authenticate with.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    /// Embed the credential into an `https://` remote URL, percent-encoding
    /// both halves so reserved characters survive as userinfo.
    ///
    /// Other schemes (local paths, `file://`, ssh) are returned unchanged.
    pub fn apply_to_url(&self, url: &str) -> String {
        if self.is_empty() {
            return url.to_string();
        }

        match url.strip_prefix("https://") {
            Some(rest) => {
                // Drop any userinfo already present.
                let rest = match (rest.find('@'), rest.find('/')) {
                    (Some(at), Some(slash)) if at < slash => &rest[at + 1..],
                    (Some(at), None) => &rest[at + 1..],
                    _ => rest,
                };
                format!(
                    "https://{}:{}@{}",
                    urlencoding::encode(&self.username),
                    urlencoding::encode(&self.password),
                    rest
                )
            }
            None => url.to_string(),
        }
    }

    /// Replace the password in `text` so it can be surfaced in errors.
    ///
    /// Git echoes remote URLs back, so the encoded form is masked too.
    pub fn redact(&self, text: &str) -> String {
        if self.password.is_empty() {
            return text.to_string();
        }
        let encoded = urlencoding::encode(&self.password);
        text.replace(encoded.as_ref(), "[REDACTED]")
            .replace(&self.password, "[REDACTED]")
    }
}

impl std::fmt::Debug for GitCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl std::str::FromStr for GitCredential {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [username, password] => Ok(Self::new(*username, *password)),
            _ => Err(Error::InvalidInput(
                "invalid git secret format, expected <username>:<password>".to_string(),
            )),
        }
    }
}
