//! OAuth 2.0 / OpenID Connect protocol engine for the `quill` command-line
//! client.
//!
//! The centre is the authorization code flow
//! ([`OAuthClient::authorize_with_local_server`]): PKCE, optional pushed
//! authorization requests, a browser redirect captured by a short-lived
//! [`loopback::CallbackServer`], and a code exchange that can be bound to a
//! key with DPoP. The remaining grants ([`grants`]) share the same request
//! codecs in [`request`].
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use quill_oauth::{AuthCodeConfig, ClientConfig, OAuthClient, loopback::SystemBrowser};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let http = quill_oauth::http_client::build_http_client(&Default::default())?;
//! let cancel = CancellationToken::new();
//! let client = OAuthClient::discover(
//!     http,
//!     &Url::parse("https://accounts.example.com")?,
//!     Default::default(),
//!     ClientConfig {
//!         client_id: "my-cli".into(),
//!         ..Default::default()
//!     },
//!     &cancel,
//! )
//! .await?;
//! let config = AuthCodeConfig::new(Url::parse("http://127.0.0.1:0/callback")?);
//! let token = client
//!     .authorize_with_local_server(&config, &SystemBrowser, &cancel)
//!     .await?;
//! println!("{}", token.access_token);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dpop;
pub mod error;
pub mod flow;
pub mod grants;
pub mod http_client;
pub mod jose;
pub mod keys;
pub mod loopback;
pub mod pkce;
pub mod request;
pub mod resolver;
pub mod types;
pub mod utils;

pub use client::{ClientConfig, OAuthClient};
pub use error::{FlowError, OAuthError, Stage};
pub use flow::AuthCodeConfig;
pub use keys::DpopKeyPair;
