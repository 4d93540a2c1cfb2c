//! Single-use local HTTP listener that captures the authorization redirect.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header::CACHE_CONTROL};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use smol_str::{SmolStr, format_smolstr};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{OAuthError, Result};

/// Upper bound on how long [`CallbackServer::wait_for_callback`] suspends.
pub const CALLBACK_TIMEOUT_CEILING: Duration = Duration::from_secs(5 * 60);

/// A serve task that dies within this window after start is a bind failure.
const BIND_GRACE: Duration = Duration::from_millis(100);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<SmolStr>,
    pub state: Option<SmolStr>,
    pub iss: Option<SmolStr>,
    pub error: Option<SmolStr>,
    pub error_description: Option<SmolStr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Authorized {
        code: SmolStr,
    },
    Denied {
        error: SmolStr,
        description: Option<SmolStr>,
    },
}

/// What the redirect carried: a code or an error, plus the echoed `state`
/// and (RFC 9207) `iss`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub result: CallbackResult,
    pub state: Option<SmolStr>,
    pub iss: Option<SmolStr>,
}

impl From<CallbackParams> for CallbackResponse {
    fn from(params: CallbackParams) -> Self {
        let result = match (params.code, params.error) {
            (Some(code), None) => CallbackResult::Authorized { code },
            (_, Some(error)) => CallbackResult::Denied {
                error,
                description: params.error_description,
            },
            (None, None) => CallbackResult::Denied {
                error: "invalid_request".into(),
                description: Some("redirect carried neither `code` nor `error`".into()),
            },
        };
        Self {
            result,
            state: params.state,
            iss: params.iss,
        }
    }
}

impl CallbackResponse {
    /// The authorization code, or the provider's refusal as an error.
    pub fn into_code(self) -> Result<SmolStr> {
        match self.result {
            CallbackResult::Authorized { code } => Ok(code),
            CallbackResult::Denied { error, description } => {
                Err(OAuthError::ProviderDenied { error, description })
            }
        }
    }
}

type Slot = Arc<Mutex<Option<oneshot::Sender<CallbackResponse>>>>;

#[derive(Clone)]
struct CallbackState {
    path: SmolStr,
    slot: Slot,
}

/// Every request lands here; the redirect path is matched literally so that
/// characters axum treats as route syntax (`{`, `*`, `:`) are just text.
async fn handle_request(
    State(state): State<CallbackState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET || uri.path() != state.path {
        return StatusCode::NOT_FOUND.into_response();
    }
    match serde_html_form::from_str::<CallbackParams>(uri.query().unwrap_or_default()) {
        Ok(params) => handle_callback(&state, params).await,
        Err(e) => {
            tracing::warn!(error = %e, "malformed authorization callback query");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn handle_callback(state: &CallbackState, params: CallbackParams) -> Response {
    let response = CallbackResponse::from(params);
    let page = render_page(&response.result);

    match state.slot.lock().await.take() {
        Some(tx) => {
            tracing::info!("authorization callback received");
            if tx.send(response).is_err() {
                tracing::warn!("authorization callback arrived after the flow gave up");
            }
        }
        None => tracing::warn!("duplicate authorization callback dropped"),
    }

    ([(CACHE_CONTROL, "no-store")], Html(page)).into_response()
}

fn render_page(result: &CallbackResult) -> String {
    let (title, detail) = match result {
        CallbackResult::Authorized { .. } => (
            "Authorization complete",
            "You can close this window and return to the terminal.".to_owned(),
        ),
        CallbackResult::Denied { error, description } => (
            "Authorization failed",
            match description {
                Some(description) => format!(
                    "<code>{}</code>: {}",
                    escape_html(error),
                    escape_html(description)
                ),
                None => format!("<code>{}</code>", escape_html(error)),
            },
        ),
    };
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{detail}</p></body></html>\n"
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Ephemeral listener for one authorization redirect.
///
/// Created → listening ([`start`](Self::start)) → delivered (first request on
/// the redirect path) → closed ([`stop`](Self::stop) or drop). Only the first
/// callback is ever delivered; later ones get a page and are dropped.
pub struct CallbackServer {
    redirect_uri: Url,
    host: SmolStr,
    port: u16,
    slot: Slot,
    receiver: Option<oneshot::Receiver<CallbackResponse>>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl CallbackServer {
    /// Prepare a server for `redirect_uri`. Port `0` picks an ephemeral port
    /// and the redirect URI is rewritten once bound.
    pub fn new(redirect_uri: &Url) -> Result<Self> {
        if redirect_uri.scheme() != "http" {
            return Err(OAuthError::config(format_smolstr!(
                "redirect URI {redirect_uri} must use http:// to be served locally"
            )));
        }
        let host = redirect_uri
            .host_str()
            .ok_or_else(|| OAuthError::config("redirect URI has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = redirect_uri.port_or_known_default().unwrap_or(80);
        let (tx, rx) = oneshot::channel();
        Ok(Self {
            redirect_uri: redirect_uri.clone(),
            host: host.into(),
            port,
            slot: Arc::new(Mutex::new(Some(tx))),
            receiver: Some(rx),
            shutdown: None,
            task: None,
            local_addr: None,
        })
    }

    /// The redirect URI to send to the provider (with the bound port).
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind and serve in the background. Returns once listening; `cancel`
    /// (or [`stop`](Self::stop)) shuts the listener down.
    #[tracing::instrument(level = "debug", skip_all, fields(redirect_uri = %self.redirect_uri))]
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<SocketAddr> {
        if self.task.is_some() {
            return Err(OAuthError::config("callback server already started"));
        }
        let addr = format_smolstr!("{}:{}", self.host, self.port);
        let bind_error = |source: io::Error| OAuthError::ListenerBind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        if self.port == 0 {
            self.redirect_uri
                .set_port(Some(local_addr.port()))
                .map_err(|()| OAuthError::config("redirect URI cannot carry a port"))?;
        }

        let router = Router::new()
            .fallback(handle_request)
            .with_state(CallbackState {
                path: self.redirect_uri.path().into(),
                slot: self.slot.clone(),
            });

        let shutdown = cancel.child_token();
        let signal = shutdown.clone().cancelled_owned();
        let mut task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
        });

        // a serve loop that dies immediately never accepted anything
        if let Ok(joined) = tokio::time::timeout(BIND_GRACE, &mut task).await {
            if cancel.is_cancelled() {
                return Err(OAuthError::Cancelled);
            }
            let source = match joined {
                Ok(Err(e)) => e,
                Ok(Ok(())) => io::Error::other("callback server exited during startup"),
                Err(e) => io::Error::other(e),
            };
            return Err(bind_error(source));
        }

        tracing::info!(%local_addr, "callback server listening");
        self.shutdown = Some(shutdown);
        self.task = Some(task);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Suspend until the redirect arrives, `cancel` fires, or
    /// `min(timeout, 5 minutes)` elapses, whichever happens first.
    pub async fn wait_for_callback(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<CallbackResponse> {
        let limit = timeout.min(CALLBACK_TIMEOUT_CEILING);
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| OAuthError::config("authorization callback already consumed"))?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OAuthError::Cancelled),
            received = tokio::time::timeout(limit, receiver) => match received {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(closed)) => Err(OAuthError::transport(closed)),
                Err(_) => Err(OAuthError::CallbackTimeout(limit)),
            },
        };
        if outcome.is_ok() {
            self.receiver = None;
        }
        outcome
    }

    /// Shut the listener down, aborting it if it outlives the grace period.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown.cancel();
        }
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "callback server exited with an error"),
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("callback server did not shut down in time, aborting");
                task.abort();
            }
        }
        tracing::debug!("callback server stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens the authorization URL for the user.
pub trait BrowserOpener {
    fn open(&self, url: &Url) -> io::Result<()>;
}

impl<F> BrowserOpener for F
where
    F: Fn(&Url) -> io::Result<()>,
{
    fn open(&self, url: &Url) -> io::Result<()> {
        self(url)
    }
}

/// The platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    #[cfg(feature = "browser-open")]
    fn open(&self, url: &Url) -> io::Result<()> {
        webbrowser::open(url.as_str())
    }

    #[cfg(not(feature = "browser-open"))]
    fn open(&self, _url: &Url) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "built without browser support",
        ))
    }
}
