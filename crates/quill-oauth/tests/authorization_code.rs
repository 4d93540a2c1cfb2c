use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use quill_oauth::keys::PrivateKey;
use quill_oauth::types::AuthMethod;
use quill_oauth::{AuthCodeConfig, ClientConfig, DpopKeyPair, OAuthClient, OAuthError, Stage};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

const CODE: &str = "code-123";

#[derive(Default)]
struct Recorded {
    pushed: HashMap<String, HashMap<String, String>>,
    authorize_queries: Vec<HashMap<String, String>>,
    challenge: Option<String>,
    token_requests: Vec<(HeaderMap, HashMap<String, String>)>,
}

#[derive(Clone)]
struct Stub {
    issuer: String,
    deny: bool,
    recorded: Arc<Mutex<Recorded>>,
}

async fn metadata(State(stub): State<Stub>) -> Json<serde_json::Value> {
    let base = &stub.issuer;
    Json(serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "pushed_authorization_request_endpoint": format!("{base}/par"),
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "none"],
        "code_challenge_methods_supported": ["S256"],
        "authorization_response_iss_parameter_supported": true
    }))
}

async fn par(
    State(stub): State<Stub>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut recorded = stub.recorded.lock().await;
    let request_uri = format!("urn:ietf:params:oauth:request_uri:{}", recorded.pushed.len());
    recorded.pushed.insert(request_uri.clone(), form);
    (
        StatusCode::CREATED,
        Json(serde_json::json!({"request_uri": request_uri, "expires_in": 60})),
    )
}

async fn authorize(
    State(stub): State<Stub>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut recorded = stub.recorded.lock().await;
    recorded.authorize_queries.push(query.clone());
    let params = match query.get("request_uri") {
        Some(uri) => match recorded.pushed.get(uri) {
            Some(pushed) => pushed.clone(),
            None => return StatusCode::BAD_REQUEST.into_response(),
        },
        None => query,
    };
    recorded.challenge = params.get("code_challenge").cloned();

    let mut redirect = Url::parse(&params["redirect_uri"]).unwrap();
    {
        let mut pairs = redirect.query_pairs_mut();
        if stub.deny {
            pairs.append_pair("error", "access_denied");
            pairs.append_pair("error_description", "user said no");
        } else {
            pairs.append_pair("code", CODE);
        }
        pairs.append_pair("state", &params["state"]);
        pairs.append_pair("iss", &stub.issuer);
    }
    Redirect::to(redirect.as_str()).into_response()
}

async fn token(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut recorded = stub.recorded.lock().await;
    recorded.token_requests.push((headers, form.clone()));

    let verifier_ok = match (&recorded.challenge, form.get("code_verifier")) {
        (Some(challenge), Some(verifier)) => {
            URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())) == *challenge
        }
        (None, None) => true,
        _ => false,
    };
    if form.get("code").map(String::as_str) != Some(CODE) || !verifier_ok {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_grant"})),
        );
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "access_token": "stub-access-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "stub-refresh-token"
        })),
    )
}

async fn spawn_stub(deny: bool) -> Stub {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stub = Stub {
        issuer: format!("http://{}", listener.local_addr().unwrap()),
        deny,
        recorded: Default::default(),
    };
    let app = Router::new()
        .route("/.well-known/openid-configuration", get(metadata))
        .route("/authorize", get(authorize))
        .route("/par", post(par))
        .route("/token", post(token))
        .with_state(stub.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });
    stub
}

/// Follows the authorization URL like a user agent would.
fn headless_browser(url: &Url) -> io::Result<()> {
    let url = url.clone();
    tokio::spawn(async move { reqwest::get(url).await });
    Ok(())
}

fn redirect() -> Url {
    Url::parse("http://127.0.0.1:0/callback").unwrap()
}

async fn client(stub: &Stub, config: ClientConfig) -> OAuthClient<reqwest::Client> {
    OAuthClient::discover(
        reqwest::Client::new(),
        &Url::parse(&stub.issuer).unwrap(),
        Default::default(),
        config,
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

fn public_client() -> ClientConfig {
    ClientConfig {
        client_id: "quill-test".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn pkce_code_flow_returns_stub_token() {
    let stub = spawn_stub(false).await;
    let client = client(&stub, public_client()).await;
    let mut config = AuthCodeConfig::new(redirect());
    config.scope = Some("openid profile".into());
    config.callback_timeout = Duration::from_secs(10);

    let token = client
        .authorize_with_local_server(&config, &headless_browser, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token.access_token, "stub-access-token");
    assert_eq!(token.refresh_token.as_deref(), Some("stub-refresh-token"));

    let recorded = stub.recorded.lock().await;
    let query = &recorded.authorize_queries[0];
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["scope"], "openid profile");
    let (headers, form) = &recorded.token_requests[0];
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["client_id"], "quill-test");
    assert_eq!(form["code_verifier"].len(), 128);
    assert_eq!(form["redirect_uri"], query["redirect_uri"]);
    assert!(!headers.contains_key("authorization"));
    assert!(!headers.contains_key("dpop"));
}

#[tokio::test]
async fn pushed_request_with_dpop_and_basic_auth() {
    let stub = spawn_stub(false).await;
    let key = DpopKeyPair::from_private(PrivateKey::EcP256(p256::SecretKey::random(
        &mut rand::rngs::OsRng,
    )))
    .unwrap();
    let thumbprint = key.thumbprint();
    let client = client(
        &stub,
        ClientConfig {
            client_id: "confidential".into(),
            client_secret: Some("s3cret".into()),
            auth_method: None,
        },
    )
    .await
    .with_dpop(key);
    let mut config = AuthCodeConfig::new(redirect());
    config.par = true;

    let token = client
        .authorize_with_local_server(&config, &headless_browser, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token.access_token, "stub-access-token");

    let recorded = stub.recorded.lock().await;
    let mut keys: Vec<&str> = recorded.authorize_queries[0].keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["client_id", "request_uri"]);

    let pushed = recorded.pushed.values().next().unwrap();
    assert_eq!(pushed["dpop_jkt"], thumbprint.as_str());
    assert_eq!(pushed["client_id"], "confidential");
    assert!(!pushed.contains_key("client_secret"));

    let (headers, form) = &recorded.token_requests[0];
    assert!(headers["authorization"].to_str().unwrap().starts_with("Basic "));
    assert!(headers.contains_key("dpop"));
    assert!(!form.contains_key("client_secret"));
}

#[tokio::test]
async fn provider_denial_is_reported_from_callback_stage() {
    let stub = spawn_stub(true).await;
    let client = client(&stub, public_client()).await;
    let err = client
        .authorize_with_local_server(
            &AuthCodeConfig::new(redirect()),
            &headless_browser,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Callback);
    assert!(matches!(
        err.kind(),
        OAuthError::ProviderDenied { error, description }
            if error == "access_denied" && description.as_deref() == Some("user said no")
    ));
    assert!(stub.recorded.lock().await.token_requests.is_empty());
}

#[tokio::test]
async fn browser_failure_is_not_fatal() {
    let stub = spawn_stub(false).await;
    let client = client(&stub, public_client()).await;
    // the URL still gets visited, as if pasted by hand
    let broken = |url: &Url| -> io::Result<()> {
        headless_browser(url)?;
        Err(io::Error::other("no display"))
    };
    let token = client
        .authorize_with_local_server(&AuthCodeConfig::new(redirect()), &broken, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token.token_type, "Bearer");
}

#[tokio::test]
async fn cancellation_while_waiting_for_callback() {
    let stub = spawn_stub(false).await;
    let client = client(&stub, public_client()).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let never_visits = move |_: &Url| -> io::Result<()> {
        trigger.cancel();
        Ok(())
    };
    let err = client
        .authorize_with_local_server(&AuthCodeConfig::new(redirect()), &never_visits, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.stage(), Stage::Callback);
}

#[tokio::test]
async fn occupied_callback_port_fails_before_browser() {
    let stub = spawn_stub(false).await;
    let client = client(&stub, public_client()).await;
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let config = AuthCodeConfig::new(Url::parse(&format!("http://127.0.0.1:{port}/cb")).unwrap());
    let opened = std::sync::atomic::AtomicBool::new(false);
    let browser = |_: &Url| -> io::Result<()> {
        opened.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    };
    let err = client
        .authorize_with_local_server(&config, &browser, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::CallbackServer);
    assert!(matches!(err.kind(), OAuthError::ListenerBind { .. }));
    assert!(!opened.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn explicit_auth_method_overrides_metadata() {
    let stub = spawn_stub(false).await;
    let client = client(
        &stub,
        ClientConfig {
            client_id: "confidential".into(),
            client_secret: Some("s3cret".into()),
            auth_method: Some(AuthMethod::ClientSecretPost),
        },
    )
    .await;
    client
        .authorize_with_local_server(
            &AuthCodeConfig::new(redirect()),
            &headless_browser,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let recorded = stub.recorded.lock().await;
    let (headers, form) = &recorded.token_requests[0];
    assert_eq!(form["client_secret"], "s3cret");
    assert!(!headers.contains_key("authorization"));
}
