mod cli;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use miette::IntoDiagnostic;
use quill_oauth::http_client::{TransportConfig, build_http_client};
use quill_oauth::loopback::SystemBrowser;
use quill_oauth::types::{
    DeviceAuthorizationResponse, Endpoints, IntrospectionResponse, TokenResponse,
};
use quill_oauth::{
    AuthCodeConfig, ClientConfig, DpopKeyPair, FlowError, OAuthClient, OAuthError, Stage,
};
use serde::Serialize;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{AuthorizeArgs, Cli, Command};

/// Exit status for a timed-out flow.
const EXIT_TIMEOUT: u8 = 2;

#[derive(Serialize)]
#[serde(untagged)]
enum Output {
    Token(TokenResponse),
    Introspection(IntrospectionResponse),
}

#[tokio::main]
async fn main() -> miette::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match run(cli, &cancel).await {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output).into_diagnostic()?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("cancelled");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_timeout() => {
            eprintln!("{:?}", miette::Report::new(e));
            Ok(ExitCode::from(EXIT_TIMEOUT))
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<Output, FlowError> {
    let client = build_client(&cli, cancel).await?;
    let scope = |s: Option<String>| s.map(SmolStr::from);

    let token = match cli.command {
        Command::Authorize(args) => {
            let config = auth_code_config(args);
            client
                .authorize_with_local_server(&config, &SystemBrowser, cancel)
                .await?
        }
        Command::ClientCredentials { scope: s } => {
            client.client_credentials(scope(s), cancel).await?
        }
        Command::Refresh {
            refresh_token,
            scope: s,
        } => client.refresh(refresh_token.into(), scope(s), cancel).await?,
        Command::Introspect {
            token,
            token_type_hint,
        } => {
            let res = client
                .introspect(token.into(), token_type_hint.map(Into::into), cancel)
                .await?;
            return Ok(Output::Introspection(res));
        }
        Command::Device { scope: s } => {
            client
                .device_authorize(scope(s), show_device_code, cancel)
                .await?
        }
    };
    Ok(Output::Token(token))
}

async fn build_client(
    cli: &Cli,
    cancel: &CancellationToken,
) -> Result<OAuthClient<reqwest::Client>, FlowError> {
    let configuration = |e: OAuthError| FlowError::new(Stage::Configuration, e);

    let client_id = cli.client.client_id.clone().ok_or_else(|| {
        configuration(OAuthError::config(
            "--client-id (or QUILL_CLIENT_ID) is required",
        ))
    })?;
    let config = ClientConfig {
        client_id: client_id.into(),
        client_secret: cli.client.client_secret.clone().map(Into::into),
        auth_method: cli.client.auth_method.map(Into::into),
    };
    let http = build_http_client(&TransportConfig {
        insecure: cli.transport.insecure,
        timeout: Some(Duration::from_secs(cli.transport.http_timeout)).filter(|t| !t.is_zero()),
    })
    .map_err(configuration)?;

    let overrides = Endpoints {
        authorization: cli.server.authorization_endpoint.clone(),
        token: cli.server.token_endpoint.clone(),
        introspection: cli.server.introspection_endpoint.clone(),
        pushed_authorization: cli.server.par_endpoint.clone(),
        device_authorization: cli.server.device_authorization_endpoint.clone(),
        ..Default::default()
    };
    let client = match &cli.server.issuer {
        Some(issuer) => OAuthClient::discover(http, issuer, overrides, config, cancel).await?,
        None => OAuthClient::new(http, overrides, config),
    };

    match &cli.client.dpop_key {
        Some(path) => {
            let key = DpopKeyPair::load(path, cli.client.dpop_public_key.as_deref())
                .map_err(configuration)?;
            tracing::info!(alg = key.algorithm().as_str(), "DPoP enabled");
            Ok(client.with_dpop(key))
        }
        None => Ok(client),
    }
}

fn auth_code_config(args: AuthorizeArgs) -> AuthCodeConfig {
    let callback_timeout = args.callback_timeout();
    AuthCodeConfig {
        scope: args.scope.map(Into::into),
        prompt: args.prompt.map(Into::into),
        acr_values: args.acr_values.map(Into::into),
        login_hint: args.login_hint.map(Into::into),
        max_age: args.max_age,
        ui_locales: args.ui_locales.map(Into::into),
        custom_params: args
            .params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
        pkce: !args.no_pkce,
        par: args.par,
        callback_timeout,
        ..AuthCodeConfig::new(args.redirect_uri)
    }
}

fn show_device_code(device: &DeviceAuthorizationResponse) {
    match &device.verification_uri_complete {
        Some(uri) => eprintln!("Open {uri} to continue (code {}).", device.user_code),
        None => eprintln!(
            "Open {} and enter the code {}.",
            device.verification_uri, device.user_code
        ),
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::debug!("signal received, cancelling");
    token.cancel();
}
