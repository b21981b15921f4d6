//! DTOs for interacting with an OAuth2 token endpoint

use sched_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{
    AccessToken, Audience, AudienceRef, ClientId, ClientIdRef, ClientSecret, ClientSecretRef,
    ConfigurationError,
};

/// The credentials an identity uses to acquire tokens
///
/// Every field is optional so that configuration can be loaded as-is and
/// checked before use; an absent or empty field makes the credentials
/// incomplete.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FetchCredentials {
    /// The client ID
    #[serde(default)]
    pub client_id: Option<ClientId>,

    /// The client secret
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,

    /// The API identifier tokens are requested for
    #[serde(default)]
    pub audience: Option<Audience>,

    /// The identity provider's domain
    ///
    /// A bare host such as `tenant.auth0.com` is reached over HTTPS. A value
    /// that already carries a scheme is used as the base URL unchanged.
    #[serde(default)]
    pub domain: Option<String>,
}

fn present<T: AsRef<str> + ?Sized>(value: Option<&T>) -> Option<&T> {
    value.filter(|v| !v.as_ref().trim().is_empty())
}

impl FetchCredentials {
    /// Lists the required fields that are absent or empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if present(self.client_id.as_deref().map(ClientIdRef::as_str)).is_none() {
            missing.push("client_id");
        }
        if present(self.client_secret.as_deref().map(ClientSecretRef::as_str)).is_none() {
            missing.push("client_secret");
        }
        if present(self.audience.as_deref().map(AudienceRef::as_str)).is_none() {
            missing.push("audience");
        }
        if present(self.domain.as_deref()).is_none() {
            missing.push("domain");
        }
        missing
    }

    /// Builds the token endpoint URL, `<domain>/oauth/token`
    pub fn token_url(&self) -> Result<reqwest::Url, ConfigurationError> {
        let domain = present(self.domain.as_deref())
            .ok_or_else(|| ConfigurationError::MissingFields {
                missing: vec!["domain"],
            })?
            .trim()
            .trim_end_matches('/');

        let raw = if domain.contains("://") {
            format!("{}/oauth/token", domain)
        } else {
            format!("https://{}/oauth/token", domain)
        };

        reqwest::Url::parse(&raw).map_err(|source| ConfigurationError::InvalidDomain {
            domain: domain.to_owned(),
            source,
        })
    }

    pub(super) fn request_body(&self) -> Result<ClientCredentialsRequest<'_>, ConfigurationError> {
        match (&self.client_id, &self.client_secret, &self.audience) {
            (Some(client_id), Some(client_secret), Some(audience))
                if self.missing_fields().is_empty() =>
            {
                Ok(ClientCredentialsRequest {
                    grant_type: "client_credentials",
                    client_id,
                    client_secret,
                    audience,
                })
            }
            _ => Err(ConfigurationError::MissingFields {
                missing: self.missing_fields(),
            }),
        }
    }
}

/// The body of a client credentials grant
#[derive(Debug, Serialize)]
pub(super) struct ClientCredentialsRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    pub client_secret: &'a ClientSecretRef,
    pub audience: &'a AudienceRef,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub expires_in: Option<DurationSecs>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> FetchCredentials {
        FetchCredentials {
            client_id: Some(ClientId::from_static("anon-client")),
            client_secret: Some(ClientSecret::from_static("anon-secret")),
            audience: Some(Audience::from_static("https://api.scheduled-tasks")),
            domain: Some("tenant.auth0.com".to_owned()),
        }
    }

    #[test]
    fn complete_credentials_have_no_missing_fields() {
        assert!(complete().missing_fields().is_empty());
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let credentials = FetchCredentials {
            client_secret: Some(ClientSecret::from_static("")),
            domain: None,
            ..complete()
        };

        assert_eq!(credentials.missing_fields(), ["client_secret", "domain"]);
        assert!(matches!(
            credentials.request_body(),
            Err(ConfigurationError::MissingFields { missing }) if missing == ["client_secret", "domain"]
        ));
    }

    #[test]
    fn bare_domain_uses_https() {
        let url = complete().token_url().unwrap();
        assert_eq!(url.as_str(), "https://tenant.auth0.com/oauth/token");
    }

    #[test]
    fn domain_with_scheme_is_kept() {
        let credentials = FetchCredentials {
            domain: Some("http://127.0.0.1:8089/".to_owned()),
            ..complete()
        };

        let url = credentials.token_url().unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8089/oauth/token");
    }

    #[test]
    fn request_body_serializes_client_credentials_grant() {
        let credentials = complete();
        let body = serde_json::to_value(credentials.request_body().unwrap()).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": "anon-client",
                "client_secret": "anon-secret",
                "audience": "https://api.scheduled-tasks",
            })
        );
    }

    #[test]
    fn token_response_without_expiry_parses() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","token_type":"Bearer"}"#).unwrap();

        assert_eq!(resp.access_token.as_str(), "abc");
        assert_eq!(resp.expires_in, None);
    }
}
