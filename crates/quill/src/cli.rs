use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use quill_oauth::types::AuthMethod;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "quill - OAuth 2.0 / OpenID Connect from the command line")]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerArgs,

    #[command(flatten)]
    pub client: ClientArgs,

    #[command(flatten)]
    pub transport: TransportArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Issuer URL; endpoints are discovered from its OpenID configuration
    #[arg(long, env = "QUILL_ISSUER", global = true)]
    pub issuer: Option<Url>,

    #[arg(long, env = "QUILL_AUTHORIZATION_ENDPOINT", global = true)]
    pub authorization_endpoint: Option<Url>,

    #[arg(long, env = "QUILL_TOKEN_ENDPOINT", global = true)]
    pub token_endpoint: Option<Url>,

    #[arg(long, env = "QUILL_INTROSPECTION_ENDPOINT", global = true)]
    pub introspection_endpoint: Option<Url>,

    /// Pushed authorization request endpoint
    #[arg(long, env = "QUILL_PAR_ENDPOINT", global = true)]
    pub par_endpoint: Option<Url>,

    #[arg(long, env = "QUILL_DEVICE_AUTHORIZATION_ENDPOINT", global = true)]
    pub device_authorization_endpoint: Option<Url>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[arg(long, env = "QUILL_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    #[arg(long, env = "QUILL_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    /// Token endpoint authentication; negotiated from discovery when unset
    #[arg(long, value_enum, env = "QUILL_AUTH_METHOD", global = true)]
    pub auth_method: Option<AuthMethodArg>,

    /// PEM private key (PKCS#8, PKCS#1 or SEC1) for DPoP-bound tokens
    #[arg(long, env = "QUILL_DPOP_KEY", global = true)]
    pub dpop_key: Option<PathBuf>,

    /// PEM public key matching --dpop-key; derived from it when omitted
    #[arg(long, env = "QUILL_DPOP_PUBLIC_KEY", requires = "dpop_key", global = true)]
    pub dpop_public_key: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TransportArgs {
    /// Skip TLS certificate verification
    #[arg(long, env = "QUILL_INSECURE", global = true)]
    pub insecure: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "QUILL_HTTP_TIMEOUT", default_value_t = 30, global = true)]
    pub http_timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethodArg {
    #[value(name = "client_secret_basic", alias = "basic")]
    ClientSecretBasic,
    #[value(name = "client_secret_post", alias = "post")]
    ClientSecretPost,
    #[value(name = "none")]
    None,
}

impl From<AuthMethodArg> for AuthMethod {
    fn from(value: AuthMethodArg) -> Self {
        match value {
            AuthMethodArg::ClientSecretBasic => AuthMethod::ClientSecretBasic,
            AuthMethodArg::ClientSecretPost => AuthMethod::ClientSecretPost,
            AuthMethodArg::None => AuthMethod::None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authorization code flow through the browser and a local callback server
    Authorize(AuthorizeArgs),
    /// Client credentials grant
    ClientCredentials {
        #[arg(long, env = "QUILL_SCOPE")]
        scope: Option<String>,
    },
    /// Exchange a refresh token
    Refresh {
        #[arg(long, env = "QUILL_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
        #[arg(long, env = "QUILL_SCOPE")]
        scope: Option<String>,
    },
    /// Token introspection (RFC 7662)
    Introspect {
        #[arg(long, env = "QUILL_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long, env = "QUILL_TOKEN_TYPE_HINT")]
        token_type_hint: Option<String>,
    },
    /// Device authorization grant (RFC 8628)
    Device {
        #[arg(long, env = "QUILL_SCOPE")]
        scope: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct AuthorizeArgs {
    #[arg(long, env = "QUILL_SCOPE")]
    pub scope: Option<String>,

    /// Where the provider redirects; served locally. Port 0 picks a free port
    #[arg(long, env = "QUILL_REDIRECT_URI", default_value = "http://localhost:9876/callback")]
    pub redirect_uri: Url,

    #[arg(long, env = "QUILL_NO_PKCE")]
    pub no_pkce: bool,

    /// Push the authorization request first (RFC 9126)
    #[arg(long, env = "QUILL_PAR")]
    pub par: bool,

    #[arg(long, env = "QUILL_PROMPT")]
    pub prompt: Option<String>,

    #[arg(long, env = "QUILL_ACR_VALUES")]
    pub acr_values: Option<String>,

    #[arg(long, env = "QUILL_LOGIN_HINT")]
    pub login_hint: Option<String>,

    #[arg(long, env = "QUILL_MAX_AGE")]
    pub max_age: Option<u64>,

    #[arg(long, env = "QUILL_UI_LOCALES")]
    pub ui_locales: Option<String>,

    /// Extra authorization parameter, repeatable; overrides built-in ones
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Seconds to wait for the redirect (at most 300)
    #[arg(long, env = "QUILL_CALLBACK_TIMEOUT", default_value_t = 300)]
    pub callback_timeout: u64,
}

impl AuthorizeArgs {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout)
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn authorize_with_params() {
        let cli = Cli::try_parse_from([
            "quill",
            "--issuer",
            "https://auth.example.com",
            "authorize",
            "--client-id",
            "cli",
            "--param",
            "audience=api",
            "--param",
            "resource=https://api.example.com/?a=b",
            "--par",
        ])
        .unwrap();
        assert_eq!(cli.client.client_id.as_deref(), Some("cli"));
        let Command::Authorize(args) = cli.command else {
            panic!("expected authorize");
        };
        assert!(args.par);
        assert!(!args.no_pkce);
        assert_eq!(args.redirect_uri.as_str(), "http://localhost:9876/callback");
        assert_eq!(
            args.params,
            vec![
                ("audience".to_owned(), "api".to_owned()),
                ("resource".to_owned(), "https://api.example.com/?a=b".to_owned()),
            ]
        );
    }

    #[test]
    fn auth_method_aliases() {
        let cli = Cli::try_parse_from([
            "quill",
            "--auth-method",
            "basic",
            "client-credentials",
        ])
        .unwrap();
        assert_eq!(cli.client.auth_method, Some(AuthMethodArg::ClientSecretBasic));
        assert!(matches!(cli.command, Command::ClientCredentials { scope: None }));

        let cli = Cli::try_parse_from(["quill", "--auth-method", "post", "device"]).unwrap();
        assert_eq!(
            cli.client.auth_method.map(AuthMethod::from),
            Some(AuthMethod::ClientSecretPost)
        );
        assert!(Cli::try_parse_from(["quill", "--auth-method", "private_key_jwt", "device"]).is_err());
    }

    #[test]
    fn rejects_malformed_param() {
        assert!(Cli::try_parse_from(["quill", "authorize", "--param", "novalue"]).is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn refresh_requires_token() {
        // QUILL_REFRESH_TOKEN may be set in the environment running the tests
        if std::env::var_os("QUILL_REFRESH_TOKEN").is_none() {
            assert!(Cli::try_parse_from(["quill", "refresh"]).is_err());
        }
    }
}
