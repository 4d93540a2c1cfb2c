//! The authorization code flow, end to end, with a local callback server.

use std::time::Duration;

use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::{OAuthClient, cancellable};
use crate::error::{FlowError, OAuthError, Result, Stage, StageExt};
use crate::http_client::HttpClient;
use crate::loopback::{
    BrowserOpener, CALLBACK_TIMEOUT_CEILING, CallbackResponse, CallbackResult, CallbackServer,
};
use crate::pkce::{CHALLENGE_METHOD, Pkce};
use crate::request::{ClientAuth, OAuthRequest, oauth_request};
use crate::resolver::issuer_equivalent;
use crate::types::{
    AuthorizationRequest, Endpoints, ParResponse, TokenGrantType, TokenRequestParameters,
    TokenResponse,
};
use crate::utils::generate_state;

type FlowResult<T> = core::result::Result<T, FlowError>;

/// Per-run options of the authorization code flow.
#[derive(Debug, Clone)]
pub struct AuthCodeConfig {
    pub redirect_uri: Url,
    pub scope: Option<SmolStr>,
    pub prompt: Option<SmolStr>,
    pub acr_values: Option<SmolStr>,
    pub login_hint: Option<SmolStr>,
    pub max_age: Option<u64>,
    pub ui_locales: Option<SmolStr>,
    pub custom_params: Vec<(SmolStr, SmolStr)>,
    pub pkce: bool,
    pub par: bool,
    /// Capped at five minutes.
    pub callback_timeout: Duration,
}

impl AuthCodeConfig {
    pub fn new(redirect_uri: Url) -> Self {
        Self {
            redirect_uri,
            scope: None,
            prompt: None,
            acr_values: None,
            login_hint: None,
            max_age: None,
            ui_locales: None,
            custom_params: Vec::new(),
            pkce: true,
            par: false,
            callback_timeout: CALLBACK_TIMEOUT_CEILING,
        }
    }
}

/// What the front channel produced.
struct Authorized {
    code: SmolStr,
    redirect_uri: Url,
}

impl<C> OAuthClient<C>
where
    C: HttpClient + Sync,
{
    /// Run the authorization code flow: PKCE, optional PAR, browser redirect
    /// to a local callback server, then the code exchange (with a DPoP proof
    /// when a key is configured).
    ///
    /// The callback server is listening before the browser opens and is shut
    /// down on every exit path.
    #[tracing::instrument(level = "debug", skip_all, fields(client_id = %self.config().client_id))]
    pub async fn authorize_with_local_server<B>(
        &self,
        config: &AuthCodeConfig,
        browser: &B,
        cancel: &CancellationToken,
    ) -> FlowResult<TokenResponse>
    where
        B: BrowserOpener + ?Sized,
    {
        let pkce = config.pkce.then(Pkce::generate).transpose().stage(Stage::Pkce)?;
        let has_secret = self
            .config()
            .client_secret
            .as_ref()
            .is_some_and(|s| !s.is_empty());
        let auth = self.client_auth(pkce.is_some() && !has_secret);
        let state = generate_state().stage(Stage::AuthorizationRequest)?;

        let mut server = CallbackServer::new(&config.redirect_uri).stage(Stage::CallbackServer)?;
        server.start(cancel).await.stage(Stage::CallbackServer)?;
        let front_channel = self
            .front_channel(config, &mut server, &auth, pkce.as_ref(), &state, browser, cancel)
            .await;
        server.stop().await;
        let Authorized { code, redirect_uri } = front_channel?;

        let token_endpoint = self.endpoints().token().stage(Stage::TokenExchange)?;
        let proof = self.dpop_proof(token_endpoint).stage(Stage::DpopProof)?;
        let request = OAuthRequest::Token(TokenRequestParameters {
            grant_type: TokenGrantType::AuthorizationCode,
            code,
            redirect_uri: redirect_uri.as_str().into(),
            code_verifier: pkce.map(|p| p.verifier().into()),
        });
        let token: TokenResponse = cancellable(
            cancel,
            oauth_request(self.http(), token_endpoint, &auth, request, proof.as_deref()),
        )
        .await
        .stage(Stage::TokenExchange)?;
        tracing::info!(token_type = %token.token_type, "authorization code exchanged");
        Ok(token)
    }

    /// Steps from building the request to receiving the redirect, while the
    /// callback server is up.
    #[allow(clippy::too_many_arguments)]
    async fn front_channel<B>(
        &self,
        config: &AuthCodeConfig,
        server: &mut CallbackServer,
        auth: &ClientAuth,
        pkce: Option<&Pkce>,
        state: &SmolStr,
        browser: &B,
        cancel: &CancellationToken,
    ) -> FlowResult<Authorized>
    where
        B: BrowserOpener + ?Sized,
    {
        let redirect_uri = server.redirect_uri().clone();
        let client_id = self.config().client_id.clone();
        let request = AuthorizationRequest {
            scope: config.scope.clone(),
            state: Some(state.clone()),
            prompt: config.prompt.clone(),
            acr_values: config.acr_values.clone(),
            login_hint: config.login_hint.clone(),
            max_age: config.max_age,
            ui_locales: config.ui_locales.clone(),
            code_challenge: pkce.map(|p| p.challenge().into()),
            code_challenge_method: pkce.map(|_| CHALLENGE_METHOD.into()),
            dpop_jkt: self.dpop_key().map(|key| key.thumbprint()),
            custom: config.custom_params.clone(),
            ..AuthorizationRequest::new(client_id.clone(), redirect_uri.as_str())
        };
        request.validate().stage(Stage::AuthorizationRequest)?;

        let browser_request = if config.par {
            let endpoint = self
                .endpoints()
                .pushed_authorization()
                .stage(Stage::PushedAuthorizationRequest)?;
            let pushed: ParResponse = cancellable(
                cancel,
                oauth_request(
                    self.http(),
                    endpoint,
                    auth,
                    OAuthRequest::PushedAuthorizationRequest(&request),
                    None,
                ),
            )
            .await
            .stage(Stage::PushedAuthorizationRequest)?;
            tracing::debug!(request_uri = %pushed.request_uri, expires_in = ?pushed.expires_in, "authorization request pushed");
            AuthorizationRequest::pushed(client_id, pushed.request_uri)
        } else {
            request
        };

        let authorization_endpoint = self
            .endpoints()
            .authorization()
            .stage(Stage::AuthorizationRequest)?;
        let url = browser_request
            .authorization_url(authorization_endpoint)
            .stage(Stage::AuthorizationRequest)?;

        tracing::info!("opening browser for authorization");
        if let Err(e) = browser.open(&url) {
            tracing::warn!(error = %e, "could not open a browser");
            eprintln!("Open this URL in your browser to continue:\n\n  {url}\n");
        }

        let response = server
            .wait_for_callback(cancel, config.callback_timeout)
            .await
            .stage(Stage::Callback)?;
        let code = validate_callback(response, state, self.endpoints()).stage(Stage::Callback)?;
        Ok(Authorized { code, redirect_uri })
    }
}

/// Check `state` and `iss` on the redirect and extract the code.
fn validate_callback(
    response: CallbackResponse,
    state: &SmolStr,
    endpoints: &Endpoints,
) -> Result<SmolStr> {
    // providers commonly drop `state` on error redirects; the denial is the
    // more useful report then
    if response.state.is_none() && matches!(response.result, CallbackResult::Denied { .. }) {
        return response.into_code();
    }
    if response.state.as_ref() != Some(state) {
        return Err(OAuthError::StateMismatch);
    }
    // https://datatracker.ietf.org/doc/html/rfc9207#section-2.4
    match (&response.iss, &endpoints.issuer) {
        (Some(iss), Some(expected)) if !issuer_equivalent(iss, expected) => {
            return Err(OAuthError::IssuerMismatch {
                expected: expected.clone(),
                found: iss.clone(),
            });
        }
        (None, Some(expected)) if endpoints.iss_parameter_supported => {
            return Err(OAuthError::IssuerMissing(expected.clone()));
        }
        _ => {}
    }
    response.into_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(iss_parameter_supported: bool) -> Endpoints {
        Endpoints {
            issuer: Some("https://auth.example.com".into()),
            iss_parameter_supported,
            ..Default::default()
        }
    }

    fn response(result: CallbackResult, state: Option<&str>, iss: Option<&str>) -> CallbackResponse {
        CallbackResponse {
            result,
            state: state.map(Into::into),
            iss: iss.map(Into::into),
        }
    }

    fn code() -> CallbackResult {
        CallbackResult::Authorized { code: "c".into() }
    }

    fn denied() -> CallbackResult {
        CallbackResult::Denied {
            error: "access_denied".into(),
            description: None,
        }
    }

    #[test]
    fn accepts_matching_state_and_issuer() {
        let state = SmolStr::new("s");
        let ok = response(code(), Some("s"), Some("https://auth.example.com/"));
        assert_eq!(validate_callback(ok, &state, &endpoints(true)).unwrap(), "c");
    }

    #[test]
    fn rejects_foreign_state() {
        let state = SmolStr::new("s");
        let err = validate_callback(response(code(), Some("x"), None), &state, &endpoints(false));
        assert!(matches!(err, Err(OAuthError::StateMismatch)));
        let err = validate_callback(response(code(), None, None), &state, &endpoints(false));
        assert!(matches!(err, Err(OAuthError::StateMismatch)));
    }

    #[test]
    fn denial_without_state_reports_the_denial() {
        let state = SmolStr::new("s");
        let err = validate_callback(response(denied(), None, None), &state, &endpoints(true));
        assert!(matches!(
            err,
            Err(OAuthError::ProviderDenied { ref error, .. }) if error == "access_denied"
        ));
    }

    #[test]
    fn issuer_checks() {
        let state = SmolStr::new("s");
        let wrong = response(code(), Some("s"), Some("https://evil.example.com"));
        assert!(matches!(
            validate_callback(wrong, &state, &endpoints(false)),
            Err(OAuthError::IssuerMismatch { .. })
        ));

        let missing = response(code(), Some("s"), None);
        assert!(matches!(
            validate_callback(missing.clone(), &state, &endpoints(true)),
            Err(OAuthError::IssuerMissing(_))
        ));
        // not advertised, so its absence is fine
        assert_eq!(validate_callback(missing, &state, &endpoints(false)).unwrap(), "c");
    }
}
