use std::fmt;
use std::time::Duration;

use http::StatusCode;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::keys::KeyFamily;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error payload returned by an OAuth 2.0 endpoint.
///
/// Shared by every response parser: `error` is set when the body decoded as a
/// standard `{"error": ...}` object, and `body` always holds the raw response
/// text so nothing the server said is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Error {
    pub status: StatusCode,
    pub error: Option<SmolStr>,
    pub error_description: Option<SmolStr>,
    pub error_uri: Option<SmolStr>,
    pub body: String,
}

impl OAuth2Error {
    /// The `error` code, if the server sent one.
    pub fn code(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl fmt::Display for OAuth2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => {
                write!(f, "{error}: {description} (HTTP {})", self.status)
            }
            (Some(error), None) => write!(f, "{error} (HTTP {})", self.status),
            _ if self.body.is_empty() => write!(f, "HTTP {}", self.status),
            _ => write!(f, "HTTP {}: {}", self.status, self.body),
        }
    }
}

/// Errors emitted by the OAuth engine.
#[derive(Debug, Error, Diagnostic)]
pub enum OAuthError {
    /// The operating system entropy source failed
    #[error("secure randomness unavailable")]
    #[diagnostic(
        code(quill_oauth::randomness),
        help("PKCE and DPoP material cannot be produced without OS entropy")
    )]
    RandomnessUnavailable(#[source] rand::Error),

    /// The loopback callback listener could not be started
    #[error("failed to listen on {addr}")]
    #[diagnostic(
        code(quill_oauth::listener_bind),
        help("choose a free port in the redirect URI or stop the process using it")
    )]
    ListenerBind {
        addr: SmolStr,
        #[source]
        source: std::io::Error,
    },

    /// No redirect arrived before the deadline
    #[error("no authorization callback received within {0:?}")]
    #[diagnostic(code(quill_oauth::callback_timeout))]
    CallbackTimeout(Duration),

    /// The caller cancelled the operation (interrupt, shutdown)
    #[error("cancelled")]
    #[diagnostic(code(quill_oauth::cancelled))]
    Cancelled,

    /// The authorization endpoint redirected back with an error
    #[error("authorization denied: {error}{}", describe(.description))]
    #[diagnostic(code(quill_oauth::provider_denied))]
    ProviderDenied {
        error: SmolStr,
        description: Option<SmolStr>,
    },

    /// Non-2xx response carrying a standard OAuth 2.0 error body
    #[error("oauth error: {0}")]
    #[diagnostic(
        code(quill_oauth::protocol),
        help("inspect the `error` and `error_description` returned by the server")
    )]
    Protocol(OAuth2Error),

    /// Non-2xx response without an OAuth 2.0 error body
    #[error("http failure: {0}")]
    #[diagnostic(code(quill_oauth::http_failure))]
    HttpFailure(OAuth2Error),

    /// 2xx response whose body did not decode
    #[error("invalid JSON in HTTP {status} response")]
    #[diagnostic(code(quill_oauth::json))]
    JsonParsing {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    /// Private and public halves of a key pair belong to different families
    #[error("private key is {private} but public key is {public}")]
    #[diagnostic(code(quill_oauth::key_type_mismatch))]
    KeyTypeMismatch {
        private: KeyFamily,
        public: KeyFamily,
    },

    #[error("unsupported key type: {0}")]
    #[diagnostic(
        code(quill_oauth::unsupported_key),
        help("use RSA (2048 bits or more), EC P-256/P-384/P-521, or Ed25519 keys")
    )]
    UnsupportedKeyType(SmolStr),

    /// Key material could not be read or decoded
    #[error("invalid key: {0}")]
    #[diagnostic(code(quill_oauth::key))]
    Key(SmolStr),

    #[error("signing error: {0}")]
    #[diagnostic(code(quill_oauth::signing))]
    Signing(SmolStr),

    /// The `state` returned on the redirect is not the one we sent
    #[error("state mismatch in authorization callback")]
    #[diagnostic(
        code(quill_oauth::state_mismatch),
        help("the redirect did not originate from this authorization request")
    )]
    StateMismatch,

    #[error("device code expired before the user completed authorization")]
    #[diagnostic(code(quill_oauth::device_code_expired))]
    DeviceCodeExpired,

    #[error("discovery document issuer {found} does not match {expected}")]
    #[diagnostic(code(quill_oauth::issuer_mismatch))]
    IssuerMismatch { expected: SmolStr, found: SmolStr },

    /// The server advertises RFC 9207 `iss` but the redirect lacked it
    #[error("authorization callback is missing the `iss` parameter for {0}")]
    #[diagnostic(code(quill_oauth::issuer_missing))]
    IssuerMissing(SmolStr),

    #[error("configuration error: {0}")]
    #[diagnostic(code(quill_oauth::config))]
    Config(SmolStr),

    #[error("transport error")]
    #[diagnostic(
        code(quill_oauth::transport),
        help("check network connectivity, TLS settings and the endpoint URL")
    )]
    Transport(#[source] BoxError),

    #[error(transparent)]
    #[diagnostic(code(quill_oauth::url))]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    #[diagnostic(code(quill_oauth::form))]
    UrlEncoding(#[from] serde_html_form::ser::Error),

    #[error(transparent)]
    #[diagnostic(code(quill_oauth::http_build))]
    HttpBuild(#[from] http::Error),

    #[error(transparent)]
    #[diagnostic(code(quill_oauth::header))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
}

impl OAuthError {
    pub fn config(message: impl Into<SmolStr>) -> Self {
        Self::Config(message.into())
    }

    pub fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(source))
    }

    /// The OAuth 2.0 error payload, for both protocol and plain HTTP failures.
    pub fn oauth2_error(&self) -> Option<&OAuth2Error> {
        match self {
            Self::Protocol(e) | Self::HttpFailure(e) => Some(e),
            _ => None,
        }
    }
}

fn describe(description: &Option<SmolStr>) -> String {
    description
        .as_ref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

pub type Result<T> = core::result::Result<T, OAuthError>;

/// The hop of a flow that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Discovery,
    Pkce,
    AuthorizationRequest,
    PushedAuthorizationRequest,
    CallbackServer,
    Callback,
    DpopProof,
    TokenExchange,
    ClientCredentials,
    Refresh,
    Introspection,
    DeviceAuthorization,
    DevicePolling,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::Discovery => "discovery",
            Stage::Pkce => "pkce generation",
            Stage::AuthorizationRequest => "authorization request",
            Stage::PushedAuthorizationRequest => "pushed authorization request",
            Stage::CallbackServer => "callback server",
            Stage::Callback => "authorization callback",
            Stage::DpopProof => "dpop proof",
            Stage::TokenExchange => "token exchange",
            Stage::ClientCredentials => "client credentials grant",
            Stage::Refresh => "token refresh",
            Stage::Introspection => "token introspection",
            Stage::DeviceAuthorization => "device authorization",
            Stage::DevicePolling => "device token polling",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An [`OAuthError`] tagged with the flow stage that produced it.
#[derive(Debug, Error, Diagnostic)]
#[error("{stage} failed")]
pub struct FlowError {
    stage: Stage,
    #[source]
    #[diagnostic_source]
    source: OAuthError,
}

impl FlowError {
    pub fn new(stage: Stage, source: impl Into<OAuthError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The underlying error kind.
    pub fn kind(&self) -> &OAuthError {
        &self.source
    }

    pub fn into_kind(self) -> OAuthError {
        self.source
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, OAuthError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.source,
            OAuthError::CallbackTimeout(_) | OAuthError::DeviceCodeExpired
        )
    }
}

/// Attach a [`Stage`] to a fallible result.
pub trait StageExt<T> {
    fn stage(self, stage: Stage) -> core::result::Result<T, FlowError>;
}

impl<T, E: Into<OAuthError>> StageExt<T> for core::result::Result<T, E> {
    fn stage(self, stage: Stage) -> core::result::Result<T, FlowError> {
        self.map_err(|e| FlowError::new(stage, e))
    }
}
