//! Request codecs shared by every grant: body building, client
//! authentication, and uniform response parsing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use smol_str::{SmolStr, format_smolstr};
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::dpop::DPOP_HEADER;
use crate::error::{OAuth2Error, OAuthError, Result};
use crate::http_client::HttpClient;
use crate::types::{
    AuthMethod, AuthorizationRequest, ClientCredentialsParameters, DeviceAuthorizationParameters,
    DeviceCodeParameters, IntrospectionRequestParameters, OAuthErrorResponse, ParParameters,
    RefreshRequestParameters, TokenRequestParameters, TokenResponse,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A client identity plus the way it authenticates.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub method: AuthMethod,
    pub client_id: SmolStr,
    pub client_secret: Option<SmolStr>,
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuth")
            .field("method", &self.method)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientAuth {
    pub fn new(method: AuthMethod, client_id: impl Into<SmolStr>, client_secret: Option<SmolStr>) -> Self {
        Self {
            method,
            client_id: client_id.into(),
            client_secret: client_secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn public(client_id: impl Into<SmolStr>) -> Self {
        Self::new(AuthMethod::None, client_id, None)
    }

    /// The `Authorization` header value for `client_secret_basic`.
    // https://datatracker.ietf.org/doc/html/rfc6749#section-2.3.1
    pub fn authorization_header(&self) -> Result<Option<SmolStr>> {
        if self.method != AuthMethod::ClientSecretBasic {
            return Ok(None);
        }
        let Some(secret) = &self.client_secret else {
            return Err(OAuthError::config(
                "client_secret_basic requires a client secret",
            ));
        };
        let id: String = byte_serialize(self.client_id.as_bytes()).collect();
        let secret: String = byte_serialize(secret.as_bytes()).collect();
        Ok(Some(format_smolstr!(
            "Basic {}",
            STANDARD.encode(format!("{id}:{secret}"))
        )))
    }
}

/// The requests the codec layer knows how to encode.
#[derive(Debug)]
pub enum OAuthRequest<'a> {
    Token(TokenRequestParameters),
    Refresh(RefreshRequestParameters),
    ClientCredentials(ClientCredentialsParameters),
    DeviceCode(DeviceCodeParameters),
    DeviceAuthorization(DeviceAuthorizationParameters),
    Introspection(IntrospectionRequestParameters),
    PushedAuthorizationRequest(&'a AuthorizationRequest),
}

impl OAuthRequest<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Refresh(_) => "refresh",
            Self::ClientCredentials(_) => "client_credentials",
            Self::DeviceCode(_) => "device_code",
            Self::DeviceAuthorization(_) => "device_authorization",
            Self::Introspection(_) => "introspection",
            Self::PushedAuthorizationRequest(_) => "pushed_authorization_request",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestPayload<'a, T>
where
    T: Serialize,
{
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
    #[serde(flatten)]
    parameters: T,
}

fn build_oauth_req_body<S: Serialize>(
    auth: &ClientAuth,
    request: &OAuthRequest<'_>,
    parameters: S,
) -> Result<String> {
    let client_id = match auth.method {
        // RFC 9126 §2.1: a pushed request keeps client_id in the body
        AuthMethod::ClientSecretBasic => {
            matches!(request, OAuthRequest::PushedAuthorizationRequest(_)).then_some(&*auth.client_id)
        }
        AuthMethod::ClientSecretPost | AuthMethod::None => Some(&*auth.client_id),
    };
    let client_secret = match auth.method {
        AuthMethod::ClientSecretPost => auth.client_secret.as_deref(),
        _ => None,
    };
    Ok(serde_html_form::to_string(RequestPayload {
        client_id,
        client_secret,
        parameters,
    })?)
}

/// Form-encode `request` with the client authentication fields `auth` places
/// in the body.
pub fn build_request_body(auth: &ClientAuth, request: &OAuthRequest<'_>) -> Result<String> {
    match request {
        OAuthRequest::Token(p) => build_oauth_req_body(auth, request, p),
        OAuthRequest::Refresh(p) => build_oauth_req_body(auth, request, p),
        OAuthRequest::ClientCredentials(p) => build_oauth_req_body(auth, request, p),
        OAuthRequest::DeviceCode(p) => build_oauth_req_body(auth, request, p),
        OAuthRequest::DeviceAuthorization(p) => build_oauth_req_body(auth, request, p),
        OAuthRequest::Introspection(p) => build_oauth_req_body(auth, request, p),
        OAuthRequest::PushedAuthorizationRequest(p) => {
            build_oauth_req_body(auth, request, ParParameters(*p))
        }
    }
}

/// Assemble the POST for `request`, with an optional DPoP proof header.
pub fn build_http_request(
    endpoint: &Url,
    auth: &ClientAuth,
    request: &OAuthRequest<'_>,
    dpop_proof: Option<&str>,
) -> Result<Request<Vec<u8>>> {
    let body = build_request_body(auth, request)?;
    let mut builder = Request::builder()
        .uri(endpoint.as_str())
        .method(Method::POST)
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .header(ACCEPT, JSON_CONTENT_TYPE);
    if let Some(header) = auth.authorization_header()? {
        builder = builder.header(AUTHORIZATION, header.as_str());
    }
    if let Some(proof) = dpop_proof {
        builder = builder.header(DPOP_HEADER, proof);
    }
    Ok(builder.body(body.into_bytes())?)
}

/// Send `request` to `endpoint` and parse the reply.
#[tracing::instrument(level = "debug", skip_all, fields(request = request.name(), endpoint = %endpoint))]
pub async fn oauth_request<C, O>(
    client: &C,
    endpoint: &Url,
    auth: &ClientAuth,
    request: OAuthRequest<'_>,
    dpop_proof: Option<&str>,
) -> Result<O>
where
    C: HttpClient + Sync,
    O: DeserializeOwned,
{
    let req = build_http_request(endpoint, auth, &request, dpop_proof)?;
    tracing::debug!(auth_method = %auth.method, dpop = dpop_proof.is_some(), "sending");
    let res = client
        .send_http(req)
        .await
        .map_err(OAuthError::transport)?;
    tracing::debug!(status = %res.status(), "received");
    parse_response(res.status(), res.body())
}

/// Parse an OAuth 2.0 endpoint response.
///
/// JSON is always attempted first. The outcomes are disjoint:
/// - 2xx decoding as `O` succeeds;
/// - 2xx that does not decode is [`OAuthError::JsonParsing`];
/// - non-2xx with an `{"error": ...}` body is [`OAuthError::Protocol`];
/// - any other non-2xx is [`OAuthError::HttpFailure`].
pub fn parse_response<O: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<O> {
    if status.is_success() {
        // an empty body cannot be deserialized, read it as `null` so `()` works
        let body = if body.is_empty() { b"null".as_slice() } else { body };
        return serde_json::from_slice(body)
            .map_err(|source| OAuthError::JsonParsing { status, source });
    }
    let text = String::from_utf8_lossy(body).into_owned();
    match serde_json::from_slice::<OAuthErrorResponse>(body) {
        Ok(err) => Err(OAuthError::Protocol(OAuth2Error {
            status,
            error: Some(err.error),
            error_description: err.error_description,
            error_uri: err.error_uri,
            body: text,
        })),
        Err(_) => Err(OAuthError::HttpFailure(OAuth2Error {
            status,
            error: None,
            error_description: None,
            error_uri: None,
            body: text,
        })),
    }
}

pub fn parse_token_response(status: StatusCode, body: &[u8]) -> Result<TokenResponse> {
    parse_response(status, body)
}
