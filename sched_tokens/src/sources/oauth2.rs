//! A token source that uses an OAuth2 server as an authority

use async_trait::async_trait;
use thiserror::Error;

use super::AsyncTokenSource;
use crate::{ConfigurationError, IssuedToken};

pub mod dto;

/// A token source for the client credentials flow
///
/// Credentials are sent to `<domain>/oauth/token` as a JSON body.
#[derive(Clone, Debug)]
pub struct ClientCredentialsTokenSource {
    client: reqwest::Client,
    credentials: dto::FetchCredentials,
}

impl ClientCredentialsTokenSource {
    /// Constructs a new client credentials source
    ///
    /// The credentials are not checked here; incomplete credentials are
    /// reported by [`check_configuration()`][AsyncTokenSource::check_configuration]
    /// and whenever a token is requested.
    pub fn new(client: reqwest::Client, credentials: dto::FetchCredentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Gets the credentials used by this source
    pub fn credentials(&self) -> &dto::FetchCredentials {
        &self.credentials
    }
}

#[async_trait]
impl AsyncTokenSource for ClientCredentialsTokenSource {
    type Error = TokenRequestError;

    fn check_configuration(&self) -> Result<(), ConfigurationError> {
        self.credentials.request_body()?;
        self.credentials.token_url()?;
        Ok(())
    }

    async fn request_token(&self) -> Result<IssuedToken, Self::Error> {
        request_token(&self.client, &self.credentials).await
    }
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The credentials cannot form a valid request
    #[error("credentials cannot form a token request")]
    Configuration(#[from] ConfigurationError),
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// The authority answered with an empty access token
    #[error("authority returned an empty access token")]
    EmptyToken,
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
}

#[tracing::instrument(
    skip(client, credentials),
    fields(
        token_url = tracing::field::Empty,
        credentials.grant_type = "client_credentials",
        credentials.client_id = tracing::field::Empty,
        credentials.audience = tracing::field::Empty,
    ),
)]
async fn request_token(
    client: &reqwest::Client,
    credentials: &dto::FetchCredentials,
) -> Result<IssuedToken, TokenRequestError> {
    let body = credentials.request_body()?;
    let token_url = credentials.token_url()?;

    let span = tracing::Span::current();
    span.record("token_url", tracing::field::display(&token_url));
    span.record("credentials.client_id", body.client_id.as_str());
    span.record("credentials.audience", body.audience.as_str());

    tracing::trace!("requesting token from authority");

    let resp = client
        .post(token_url)
        .json(&body)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    if resp.access_token.as_str().is_empty() {
        return Err(TokenRequestError::EmptyToken);
    }

    tracing::info!(
        token_type = resp.token_type.as_deref().unwrap_or("unspecified"),
        expires_in = resp.expires_in.map(|e| e.0),
        "received new token"
    );

    let mut token = IssuedToken::new(resp.access_token);
    if let Some(expires_in) = resp.expires_in {
        token = token.with_expires_in(expires_in);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use sched_clock::DurationSecs;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{Audience, ClientId, ClientSecret};

    fn credentials_for(server: &MockServer) -> dto::FetchCredentials {
        dto::FetchCredentials {
            client_id: Some(ClientId::from_static("anon-client")),
            client_secret: Some(ClientSecret::from_static("anon-secret")),
            audience: Some(Audience::from_static("https://api.scheduled-tasks")),
            domain: Some(server.uri()),
        }
    }

    #[tokio::test]
    async fn posts_client_credentials_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": "anon-client",
                "client_secret": "anon-secret",
                "audience": "https://api.scheduled-tasks",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "anon-token",
                "expires_in": 86400,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = ClientCredentialsTokenSource::new(reqwest::Client::new(), credentials_for(&server));
        let token = source.request_token().await.unwrap();

        assert_eq!(token.access_token().as_str(), "anon-token");
        assert_eq!(token.expires_in(), Some(DurationSecs(86400)));
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("access_denied"))
            .mount(&server)
            .await;

        let source = ClientCredentialsTokenSource::new(reqwest::Client::new(), credentials_for(&server));
        let err = source.request_token().await.unwrap_err();

        assert!(matches!(err, TokenRequestError::ErrorWithBody { ref body, .. } if body == "access_denied"));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let source = ClientCredentialsTokenSource::new(reqwest::Client::new(), credentials_for(&server));
        let err = source.request_token().await.unwrap_err();

        assert!(matches!(err, TokenRequestError::TokenBodyError(_)));
    }

    #[tokio::test]
    async fn empty_access_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "" })),
            )
            .mount(&server)
            .await;

        let source = ClientCredentialsTokenSource::new(reqwest::Client::new(), credentials_for(&server));
        let err = source.request_token().await.unwrap_err();

        assert!(matches!(err, TokenRequestError::EmptyToken));
    }

    #[tokio::test]
    async fn incomplete_credentials_never_reach_the_authority() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let credentials = dto::FetchCredentials {
            client_secret: None,
            ..credentials_for(&server)
        };
        let source = ClientCredentialsTokenSource::new(reqwest::Client::new(), credentials);

        assert!(source.check_configuration().is_err());
        let err = source.request_token().await.unwrap_err();
        assert!(matches!(
            err,
            TokenRequestError::Configuration(ConfigurationError::MissingFields { .. })
        ));
    }
}
