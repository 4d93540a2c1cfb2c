//! Grants that only need the back channel.

use std::time::Duration;

use smol_str::SmolStr;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{OAuthClient, cancellable};
use crate::error::{FlowError, OAuthError, Stage, StageExt};
use crate::http_client::HttpClient;
use crate::request::{OAuthRequest, oauth_request};
use crate::types::{
    ClientCredentialsParameters, DeviceAuthorizationParameters, DeviceAuthorizationResponse,
    DeviceCodeParameters, IntrospectionRequestParameters, IntrospectionResponse,
    RefreshRequestParameters, TokenGrantType, TokenResponse,
};

type FlowResult<T> = core::result::Result<T, FlowError>;

// https://datatracker.ietf.org/doc/html/rfc8628#section-3.2
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
// https://datatracker.ietf.org/doc/html/rfc8628#section-3.5
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

impl<C> OAuthClient<C>
where
    C: HttpClient + Sync,
{
    async fn token_request(
        &self,
        stage: Stage,
        request: OAuthRequest<'_>,
        cancel: &CancellationToken,
    ) -> FlowResult<TokenResponse> {
        let endpoint = self.endpoints().token().stage(stage)?;
        let proof = self.dpop_proof(endpoint).stage(Stage::DpopProof)?;
        let auth = self.client_auth(false);
        cancellable(
            cancel,
            oauth_request(self.http(), endpoint, &auth, request, proof.as_deref()),
        )
        .await
        .stage(stage)
    }

    /// `grant_type=client_credentials`, optionally DPoP-bound.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn client_credentials(
        &self,
        scope: Option<SmolStr>,
        cancel: &CancellationToken,
    ) -> FlowResult<TokenResponse> {
        let request = OAuthRequest::ClientCredentials(ClientCredentialsParameters {
            grant_type: TokenGrantType::ClientCredentials,
            scope,
        });
        self.token_request(Stage::ClientCredentials, request, cancel)
            .await
    }

    /// `grant_type=refresh_token`, optionally narrowing `scope`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: SmolStr,
        scope: Option<SmolStr>,
        cancel: &CancellationToken,
    ) -> FlowResult<TokenResponse> {
        let request = OAuthRequest::Refresh(RefreshRequestParameters {
            grant_type: TokenGrantType::RefreshToken,
            refresh_token,
            scope,
        });
        self.token_request(Stage::Refresh, request, cancel).await
    }

    /// RFC 7662 token introspection.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn introspect(
        &self,
        token: SmolStr,
        token_type_hint: Option<SmolStr>,
        cancel: &CancellationToken,
    ) -> FlowResult<IntrospectionResponse> {
        let endpoint = self.endpoints().introspection().stage(Stage::Introspection)?;
        let auth = self.client_auth(false);
        let request = OAuthRequest::Introspection(IntrospectionRequestParameters {
            token,
            token_type_hint,
        });
        cancellable(
            cancel,
            oauth_request(self.http(), endpoint, &auth, request, None),
        )
        .await
        .stage(Stage::Introspection)
    }

    /// RFC 8628 device authorization: request a user code, hand it to
    /// `prompt` for display, then poll the token endpoint until the user
    /// finishes, the code expires, or `cancel` fires.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn device_authorize<F>(
        &self,
        scope: Option<SmolStr>,
        prompt: F,
        cancel: &CancellationToken,
    ) -> FlowResult<TokenResponse>
    where
        F: FnOnce(&DeviceAuthorizationResponse),
    {
        let endpoint = self
            .endpoints()
            .device_authorization()
            .stage(Stage::DeviceAuthorization)?;
        let auth = self.client_auth(false);
        let device: DeviceAuthorizationResponse = cancellable(
            cancel,
            oauth_request(
                self.http(),
                endpoint,
                &auth,
                OAuthRequest::DeviceAuthorization(DeviceAuthorizationParameters { scope }),
                None,
            ),
        )
        .await
        .stage(Stage::DeviceAuthorization)?;
        prompt(&device);

        // `None` when the server's lifetime is past what `Instant` can represent
        let deadline = Instant::now().checked_add(Duration::from_secs(device.expires_in));
        let mut interval = device
            .interval
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        loop {
            if let Some(deadline) = deadline {
                let next_poll = Instant::now().checked_add(interval);
                if next_poll.is_none_or(|next| next >= deadline) {
                    return Err(FlowError::new(
                        Stage::DevicePolling,
                        OAuthError::DeviceCodeExpired,
                    ));
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(FlowError::new(Stage::DevicePolling, OAuthError::Cancelled));
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let request = OAuthRequest::DeviceCode(DeviceCodeParameters {
                grant_type: TokenGrantType::DeviceCode,
                device_code: device.device_code.clone(),
            });
            let polled = self
                .token_request(Stage::DevicePolling, request, cancel)
                .await;
            let err = match polled {
                Ok(token) => return Ok(token),
                Err(err) => err,
            };
            match err.kind().oauth2_error().and_then(|e| e.code()) {
                Some("authorization_pending") => {
                    tracing::debug!("authorization pending");
                }
                Some("slow_down") => {
                    interval = interval.saturating_add(SLOW_DOWN_STEP);
                    tracing::debug!(?interval, "server asked to slow down");
                }
                Some("expired_token") => {
                    return Err(FlowError::new(
                        Stage::DevicePolling,
                        OAuthError::DeviceCodeExpired,
                    ));
                }
                _ => return Err(err),
            }
        }
    }
}
