//! Access token handling for git transport URLs.

use std::fmt;

const REDACTED: &str = "***";

/// A host access token.
///
/// The token never appears in `Debug` output. Anything that may echo it
/// (command output, remote URLs in error messages) goes through
/// [`Credential::redact`] before it is logged or returned.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Embeds the token in an `https://` clone URL.
    ///
    /// Non-HTTPS URLs (local paths, ssh) are returned unchanged.
    pub fn inject(&self, url: &str) -> String {
        match url.strip_prefix("https://") {
            Some(rest) if !self.token.is_empty() => {
                format!("https://x-access-token:{}@{}", self.token, rest)
            }
            _ => url.to_string(),
        }
    }

    /// Replaces every occurrence of the token in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            return text.to_string();
        }
        text.replace(&self.token, REDACTED)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &REDACTED)
            .finish()
    }
}
