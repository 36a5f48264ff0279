//! Portal client against an in-process mock of the HomeCase portal.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use homecase_digest::config::PortalConfig;
use homecase_digest::error::{AuthError, FetchError};
use homecase_digest::portal::PortalClient;
use homecase_digest::traits::MessageSource;

const TOKEN: &str = "CfDJ8-test-token";
const AUTH_COOKIE: &str = "hc_auth=ok";

const DECEMBER: &[&str] = &[
    "Verbrauchswerte Dezember 2025",
    "Kaltwasser",
    "Dezember 2025: 3,210 m³",
    "Dezember 2024: 2,987 m³",
    "Durchschnitt der Liegenschaft Dezember 2025: 3,456 m³ (Gesamtverbrauch Liegenschaft / Anzahl Einheiten)",
    "Heizung",
    "Dezember 2025: 456,789 kWh",
    "Dezember 2024: 401,5 kWh",
];

const NOVEMBER: &[&str] = &[
    "Verbrauchswerte November 2025",
    "Kaltwasser: 2,5 m³",
    "Warmwasser: 1,1 m³",
];

#[derive(Clone, Copy, PartialEq)]
enum ApiMode {
    Ok,
    ServerError,
    Malformed,
    /// Activity list is empty, so the API finds no notices.
    Empty,
}

#[derive(Clone, Copy, PartialEq)]
enum LoginMode {
    Accept,
    /// Login answers 200 but no auth cookie is set.
    AcceptWithoutSession,
    Unauthorized,
    Denied,
}

#[derive(Clone)]
struct MockPortal {
    api: ApiMode,
    login: LoginMode,
    serve_token: bool,
    hits: Arc<Mutex<Vec<Instant>>>,
}

impl MockPortal {
    fn new(api: ApiMode, login: LoginMode) -> Self {
        Self {
            api,
            login,
            serve_token: true,
            hits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn hit(&self) {
        self.hits.lock().unwrap().push(Instant::now());
    }
}

fn api_text(lines: &[&str]) -> String {
    format!(
        "Hallo liebe Mieterin,\r\n\r\n{}\r\n\r\nFalls Sie Fragen haben, melden Sie sich gerne.\r\nIhr HomeCase Team",
        lines.join("\r\n")
    )
}

fn html_message(lines: &[&str]) -> String {
    let paragraphs: String = lines.iter().map(|l| format!("<p>{}</p>", l)).collect();
    format!(
        "<div class=\"message\"><p>Hallo liebe Mieterin,</p>{}<p>Falls Sie Fragen haben, melden Sie sich gerne.</p></div>",
        paragraphs
    )
}

fn expected_body(lines: &[&str]) -> String {
    lines.join("\n")
}

fn is_logged_in(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(AUTH_COOKIE))
}

async fn login_page(State(portal): State<MockPortal>) -> Response {
    portal.hit();
    if !portal.serve_token {
        return Html("<html><body><form></form></body></html>").into_response();
    }
    let page = format!(
        r#"<html><head><script>
        window.__ANTIFORGERY_CONFIG__ = {{ headerName: "RequestVerificationToken", token: "{}" }};
        window.__INITIAL_LOGIN_DATA__ = {{ "customerToken": "ct-1" }};
        </script></head><body><form></form></body></html>"#,
        TOKEN
    );
    (
        [(header::SET_COOKIE, ".AspNetCore.Antiforgery.x1=cookie-token; Path=/")],
        Html(page),
    )
        .into_response()
}

async fn login_api(
    State(portal): State<MockPortal>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    portal.hit();
    let token_ok = headers
        .get("RequestVerificationToken")
        .and_then(|v| v.to_str().ok())
        == Some(TOKEN);
    if !token_ok || query.get("customerToken").map(String::as_str) != Some("ct-1") {
        return (StatusCode::BAD_REQUEST, "bad antiforgery token").into_response();
    }
    if body["email"] != "tenant@example.org" {
        return (StatusCode::BAD_REQUEST, "missing email").into_response();
    }

    match portal.login {
        LoginMode::Accept => (
            [(header::SET_COOKIE, format!("{}; Path=/", AUTH_COOKIE))],
            Json(json!({ "success": true })),
        )
            .into_response(),
        LoginMode::AcceptWithoutSession => Json(json!({ "success": true })).into_response(),
        LoginMode::Unauthorized => {
            (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response()
        }
        LoginMode::Denied => {
            Json(json!({ "success": false, "message": "Falsches Passwort" })).into_response()
        }
    }
}

async fn activities(
    State(portal): State<MockPortal>,
    Path((ct, fo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    portal.hit();
    if !is_logged_in(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!((ct.as_str(), fo.as_str()), ("ct-1", "fo-2"));
    match portal.api {
        ApiMode::Ok => Json(json!([
            { "id": 7, "changedDateUTC": "2025-11-03T09:00:00Z" },
            { "id": "act-1", "changedDateUTC": "2025-12-03T09:00:00Z" },
        ]))
        .into_response(),
        ApiMode::ServerError => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        ApiMode::Malformed => Json(json!({ "items": "not a list" })).into_response(),
        ApiMode::Empty => Json(json!([])).into_response(),
    }
}

async fn contacts(
    State(portal): State<MockPortal>,
    Path((_ct, activity)): Path<(String, String)>,
) -> Response {
    portal.hit();
    let contacts = match activity.as_str() {
        "act-1" => json!([
            { "id": "c-1", "text": api_text(DECEMBER), "createdDateUTC": "2025-12-03T10:00:00Z" },
            { "id": "c-2", "text": "Die Hausordnung wurde aktualisiert.", "createdDateUTC": "2025-12-04T10:00:00Z" },
        ]),
        "7" => json!([
            { "id": 71, "text": api_text(NOVEMBER), "createdDateUTC": "2025-11-03T10:00:00" },
        ]),
        _ => json!([]),
    };
    Json(contacts).into_response()
}

async fn messages_page(State(portal): State<MockPortal>, headers: HeaderMap) -> Response {
    portal.hit();
    if !is_logged_in(&headers) {
        return Redirect::to("/anmelden?returnUrl=%2Fct-1").into_response();
    }
    Html(format!(
        "<html><body><main class=\"content\"><div class=\"messages-list\">{}{}<div class=\"message\"><p>Die Hausordnung wurde aktualisiert.</p></div></div></main></body></html>",
        html_message(DECEMBER),
        html_message(NOVEMBER)
    ))
    .into_response()
}

async fn spawn_portal(portal: MockPortal) -> SocketAddr {
    let app = Router::new()
        .route("/anmelden", get(login_page))
        .route("/login/withEmail", post(login_api))
        .route(
            "/api/v1/bff/customers/{ct}/facilityObjects/{fo}/activities",
            get(activities),
        )
        .route(
            "/api/v1/bff/customers/{ct}/activities/{id}/contacts",
            get(contacts),
        )
        .route("/ct-1/objekte/fo-2/nachrichten", get(messages_page))
        .route("/ct-1/objekte/fo-2/nachrichten/{activity}", get(messages_page))
        .with_state(portal);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn portal_config(addr: SocketAddr, delay_ms: u64) -> PortalConfig {
    PortalConfig {
        login_url: format!("http://{}/anmelden", addr),
        messages_url: format!("http://{}/ct-1/objekte/fo-2/nachrichten", addr),
        username: "tenant@example.org".to_string(),
        password: "secret".to_string(),
        request_delay_ms: delay_ms,
        timeout_secs: 5,
        ..PortalConfig::default()
    }
}

async fn fetch_bodies(api: ApiMode) -> Vec<String> {
    let addr = spawn_portal(MockPortal::new(api, LoginMode::Accept)).await;
    let mut client = PortalClient::new(&portal_config(addr, 0));
    let session = client.authenticate().await.unwrap();
    let messages = client.fetch_messages(&session).await.unwrap();
    let mut bodies: Vec<String> = messages.into_iter().map(|m| m.body_text).collect();
    bodies.sort();
    bodies
}

#[tokio::test]
async fn test_api_path_returns_newest_first() {
    let addr = spawn_portal(MockPortal::new(ApiMode::Ok, LoginMode::Accept)).await;
    let mut client = PortalClient::new(&portal_config(addr, 0));

    let session = client.authenticate().await.unwrap();

    let messages = client.fetch_messages(&session).await.unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["c-1", "71"]);
    assert_eq!(messages[0].body_text, expected_body(DECEMBER));
    assert_eq!(messages[1].body_text, expected_body(NOVEMBER));
    assert!(messages.iter().all(|m| m.date.is_some()));
}

#[tokio::test]
async fn test_fallback_on_server_error_matches_api_bodies() {
    let from_api = fetch_bodies(ApiMode::Ok).await;
    let from_html = fetch_bodies(ApiMode::ServerError).await;
    assert_eq!(from_api.len(), 2);
    assert_eq!(from_html, from_api);
}

#[tokio::test]
async fn test_fallback_on_malformed_json_matches_api_bodies() {
    let from_api = fetch_bodies(ApiMode::Ok).await;
    let from_html = fetch_bodies(ApiMode::Malformed).await;
    assert_eq!(from_html, from_api);
}

#[tokio::test]
async fn test_fallback_when_api_finds_nothing_matches_api_bodies() {
    let from_api = fetch_bodies(ApiMode::Ok).await;
    let from_html = fetch_bodies(ApiMode::Empty).await;
    assert_eq!(from_api.len(), 2);
    assert_eq!(from_html, from_api);
}

#[tokio::test]
async fn test_api_failure_still_scans_activity_named_in_url() {
    let addr = spawn_portal(MockPortal::new(ApiMode::ServerError, LoginMode::Accept)).await;
    let mut config = portal_config(addr, 0);
    config.messages_url = format!("http://{}/ct-1/objekte/fo-2/nachrichten/act-1", addr);
    let mut client = PortalClient::new(&config);

    let session = client.authenticate().await.unwrap();
    let messages = client.fetch_messages(&session).await.unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["c-1"]);
    assert_eq!(messages[0].body_text, expected_body(DECEMBER));
}

#[tokio::test]
async fn test_html_ids_are_synthetic() {
    let addr = spawn_portal(MockPortal::new(ApiMode::ServerError, LoginMode::Accept)).await;
    let mut client = PortalClient::new(&portal_config(addr, 0));
    let session = client.authenticate().await.unwrap();
    let messages = client.fetch_messages(&session).await.unwrap();
    assert!(messages.iter().all(|m| m.id.starts_with("html:") && m.date.is_none()));
}

#[tokio::test]
async fn test_requests_are_spaced_by_delay() {
    let portal = MockPortal::new(ApiMode::Ok, LoginMode::Accept);
    let hits = portal.hits.clone();
    let addr = spawn_portal(portal).await;
    let mut client = PortalClient::new(&portal_config(addr, 100));

    let session = client.authenticate().await.unwrap();
    client.fetch_messages(&session).await.unwrap();

    let hits = hits.lock().unwrap();
    // login page, login, activities, two contact lists
    assert_eq!(hits.len(), 5);
    for pair in hits.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(90), "gap was {:?}", gap);
    }
}

#[tokio::test]
async fn test_login_http_error_is_rejected() {
    let addr = spawn_portal(MockPortal::new(ApiMode::Ok, LoginMode::Unauthorized)).await;
    let mut client = PortalClient::new(&portal_config(addr, 0));
    match client.authenticate().await {
        Err(AuthError::Rejected { status, snippet }) => {
            assert_eq!(status, 401);
            assert!(snippet.contains("Invalid credentials"));
        }
        other => panic!("expected Rejected, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_login_success_false_is_denied() {
    let addr = spawn_portal(MockPortal::new(ApiMode::Ok, LoginMode::Denied)).await;
    let mut client = PortalClient::new(&portal_config(addr, 0));
    match client.authenticate().await {
        Err(AuthError::Denied(message)) => assert_eq!(message, "Falsches Passwort"),
        other => panic!("expected Denied, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_missing_token_fails_before_login() {
    let mut portal = MockPortal::new(ApiMode::Ok, LoginMode::Accept);
    portal.serve_token = false;
    let hits = portal.hits.clone();
    let addr = spawn_portal(portal).await;
    let mut client = PortalClient::new(&portal_config(addr, 0));

    assert!(matches!(
        client.authenticate().await,
        Err(AuthError::MissingToken)
    ));
    assert_eq!(hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_redirect_to_login_is_not_authenticated() {
    let addr = spawn_portal(MockPortal::new(
        ApiMode::ServerError,
        LoginMode::AcceptWithoutSession,
    ))
    .await;
    let mut client = PortalClient::new(&portal_config(addr, 0));
    let session = client.authenticate().await.unwrap();
    assert!(matches!(
        client.fetch_messages(&session).await,
        Err(FetchError::NotAuthenticated)
    ));
}

/// Serves the login page, then answers the login POST with a body shorter
/// than its announced length.
async fn spawn_truncating_portal() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = if request.starts_with("GET") {
                let page = format!(
                    r#"<html><head><script>window.__ANTIFORGERY_CONFIG__ = {{ token: "{}" }};</script></head></html>"#,
                    TOKEN
                );
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    page.len(),
                    page
                )
            } else {
                "HTTP/1.1 401 Unauthorized\r\nContent-Length: 100\r\nConnection: close\r\n\r\nInvalid".to_string()
            };
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });
    addr
}

/// Read headers and, if announced, the full request body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[tokio::test]
async fn test_unreadable_login_response_is_an_http_error() {
    let addr = spawn_truncating_portal().await;
    let mut client = PortalClient::new(&portal_config(addr, 0));
    match client.authenticate().await {
        Err(AuthError::Http(_)) => {}
        other => panic!("expected Http error, got {:?}", other.map(|_| ())),
    }
}
