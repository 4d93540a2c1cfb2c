use std::future::Future;

use http::Method;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::dpop::build_dpop_proof;
use crate::error::{FlowError, OAuthError, Result, Stage, StageExt};
use crate::http_client::HttpClient;
use crate::keys::DpopKeyPair;
use crate::request::ClientAuth;
use crate::resolver::discover;
use crate::types::{AuthMethod, Endpoints};
use crate::utils::negotiate_auth_method;

/// Who the client is and how it wants to authenticate.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: SmolStr,
    pub client_secret: Option<SmolStr>,
    /// Forces a method instead of negotiating one from server metadata.
    pub auth_method: Option<AuthMethod>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// An OAuth 2.0 client bound to one authorization server.
///
/// Every flow in this crate is a method on this type: the authorization code
/// flow in [`crate::flow`] and the other grants in [`crate::grants`].
pub struct OAuthClient<C> {
    http: C,
    endpoints: Endpoints,
    config: ClientConfig,
    dpop: Option<DpopKeyPair>,
}

impl<C> OAuthClient<C>
where
    C: HttpClient + Sync,
{
    pub fn new(http: C, endpoints: Endpoints, config: ClientConfig) -> Self {
        Self {
            http,
            endpoints,
            config,
            dpop: None,
        }
    }

    /// Discover `issuer`'s endpoints, then apply `overrides` on top.
    pub async fn discover(
        http: C,
        issuer: &Url,
        overrides: Endpoints,
        config: ClientConfig,
        cancel: &CancellationToken,
    ) -> core::result::Result<Self, FlowError> {
        let metadata = cancellable(cancel, discover(&http, issuer))
            .await
            .stage(Stage::Discovery)?;
        let endpoints = Endpoints::from_metadata(&metadata)
            .stage(Stage::Discovery)?
            .with_overrides(overrides);
        Ok(Self::new(http, endpoints, config))
    }

    /// Bind every token request to `key` with a DPoP proof.
    pub fn with_dpop(mut self, key: DpopKeyPair) -> Self {
        self.dpop = Some(key);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn dpop_key(&self) -> Option<&DpopKeyPair> {
        self.dpop.as_ref()
    }

    pub(crate) fn http(&self) -> &C {
        &self.http
    }

    /// Client authentication for the next request. `force_none` turns a
    /// secretless PKCE client into a public client.
    pub(crate) fn client_auth(&self, force_none: bool) -> ClientAuth {
        let method = if force_none {
            AuthMethod::None
        } else {
            negotiate_auth_method(
                self.config.auth_method,
                self.config.client_secret.as_ref().is_some_and(|s| !s.is_empty()),
                self.endpoints.auth_methods_supported.as_deref(),
            )
        };
        tracing::debug!(%method, "client authentication");
        ClientAuth::new(
            method,
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
        )
    }

    /// One fresh DPoP proof for a POST to `url`, when DPoP is enabled.
    pub(crate) fn dpop_proof(&self, url: &Url) -> Result<Option<SmolStr>> {
        self.dpop
            .as_ref()
            .map(|key| build_dpop_proof(key, &Method::POST, url))
            .transpose()
    }
}

/// Race `fut` against `cancel`; cancellation wins ties.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OAuthError::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::MockClient;

    fn client(secret: Option<&str>, supported: Option<Vec<SmolStr>>) -> OAuthClient<MockClient> {
        OAuthClient::new(
            MockClient::default(),
            Endpoints {
                auth_methods_supported: supported,
                ..Default::default()
            },
            ClientConfig {
                client_id: "cli".into(),
                client_secret: secret.map(Into::into),
                auth_method: None,
            },
        )
    }

    #[test]
    fn negotiates_from_metadata() {
        let c = client(Some("s"), Some(vec!["client_secret_post".into()]));
        assert_eq!(c.client_auth(false).method, AuthMethod::ClientSecretPost);
        assert_eq!(c.client_auth(true).method, AuthMethod::None);
        assert_eq!(client(None, None).client_auth(false).method, AuthMethod::None);
    }

    #[test]
    fn no_proof_without_key() {
        let url = Url::parse("https://auth.example.com/token").unwrap();
        assert!(client(None, None).dpop_proof(&url).unwrap().is_none());
        let with_key = client(None, None).with_dpop(crate::keys::tests::p256_pair());
        assert!(with_key.dpop_proof(&url).unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_before_completion() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = cancellable(&cancel, std::future::pending::<Result<()>>()).await;
        assert!(matches!(res, Err(OAuthError::Cancelled)));
    }

    #[test]
    fn config_debug_redacts_secret() {
        let config = ClientConfig {
            client_id: "cli".into(),
            client_secret: Some("hunter2".into()),
            auth_method: None,
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
