use anyhow::{Result, bail};

pub const SOURCE_ENV_PREFIX: &str = "SOURCE";
pub const DEST_ENV_PREFIX: &str = "DEST";

/// Fully resolved credentials for one help-center instance. Token auth
/// sends `{email}/token` as the basic-auth username with the API token as
/// the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub subdomain: String,
    pub email: String,
    pub api_token: String,
}

/// A partially resolved set of credentials, merged from command-line flags,
/// environment variables and interactive prompts in that order. Blank and
/// whitespace-only values count as absent at every layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialCredentials {
    pub subdomain: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl PartialCredentials {
    pub fn from_values(
        subdomain: Option<&str>,
        email: Option<&str>,
        api_token: Option<&str>,
    ) -> Self {
        Self {
            subdomain: non_empty(subdomain),
            email: non_empty(email),
            api_token: non_empty(api_token),
        }
    }

    /// Reads `{PREFIX}_ZENDESK_SUBDOMAIN`, `{PREFIX}_ZENDESK_EMAIL` and
    /// `{PREFIX}_ZENDESK_API_TOKEN` from the process environment.
    pub fn from_env(prefix: &str) -> Self {
        let read = |suffix: &str| {
            std::env::var(format!("{prefix}_ZENDESK_{suffix}"))
                .ok()
                .and_then(|v| non_empty(Some(&v)))
        };
        Self {
            subdomain: read("SUBDOMAIN"),
            email: read("EMAIL"),
            api_token: read("API_TOKEN"),
        }
    }

    /// Field-wise merge; `self` wins wherever it has a value.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            subdomain: self.subdomain.or(fallback.subdomain),
            email: self.email.or(fallback.email),
            api_token: self.api_token.or(fallback.api_token),
        }
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.subdomain.is_none() {
            missing.push("subdomain");
        }
        if self.email.is_none() {
            missing.push("email");
        }
        if self.api_token.is_none() {
            missing.push("api token");
        }
        missing
    }

    pub fn into_credentials(self, role: &str) -> Result<Credentials> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            bail!("{role} credentials incomplete: missing {}", missing.join(", "));
        }
        Ok(Credentials {
            subdomain: self.subdomain.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            api_token: self.api_token.unwrap_or_default(),
        })
    }
}

/// Keeps the first and last four characters of a token for display so a
/// user can recognize which token was picked up without it being usable
/// from a transcript.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}
