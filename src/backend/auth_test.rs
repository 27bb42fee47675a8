use super::*;
use serde_json::json;

const USER_ID: &str = "5b3c4f3e-8a0d-4c39-9d5c-2f1f2c7e9a11";

fn session_json(expires_at: Option<i64>) -> String {
    let mut value = json!({
        "access_token": "at-1",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "rt-1",
        "user": {"id": USER_ID, "email": "ana@example.com", "user_metadata": {"rol": "student"}}
    });
    if let Some(at) = expires_at {
        value["expires_at"] = json!(at);
    }
    value.to_string()
}

fn api() -> AuthApi {
    let config = BackendConfig::new("https://x.test", "anon").unwrap();
    AuthApi::new(reqwest::Client::new(), config)
}

// =============================================================================
// parse_session
// =============================================================================

#[test]
fn parse_session_keeps_server_expiry() {
    let session = parse_session(&session_json(Some(99)), 1_000).unwrap();
    assert_eq!(session.expires_at, Some(99));
    assert_eq!(session.user.user_metadata["rol"], "student");
}

#[test]
fn parse_session_computes_missing_expiry() {
    let session = parse_session(&session_json(None), 1_000).unwrap();
    assert_eq!(session.expires_at, Some(4_600));
}

#[test]
fn parse_session_rejects_garbage() {
    assert!(matches!(parse_session("not json", 0), Err(BackendError::Decode(_))));
}

// =============================================================================
// parse_signup_response
// =============================================================================

#[test]
fn signup_with_session_returns_both() {
    let response = parse_signup_response(&session_json(Some(10)), 0).unwrap();
    assert!(response.session.is_some());
    assert_eq!(response.user.unwrap().id.to_string(), USER_ID);
}

#[test]
fn signup_pending_confirmation_returns_bare_user() {
    let body = json!({"id": USER_ID, "email": "ana@example.com", "confirmation_sent_at": "2024-05-01T10:00:00Z"});
    let response = parse_signup_response(&body.to_string(), 0).unwrap();
    assert!(response.session.is_none());
    assert_eq!(response.user.unwrap().email.as_deref(), Some("ana@example.com"));
}

#[test]
fn signup_nested_user_shape() {
    let body = json!({"user": {"id": USER_ID, "email": "ana@example.com"}, "session": null});
    let response = parse_signup_response(&body.to_string(), 0).unwrap();
    assert!(response.session.is_none());
    assert!(response.user.is_some());
}

#[test]
fn signup_without_user_returns_empty_payload() {
    let response = parse_signup_response("{}", 0).unwrap();
    assert_eq!(response, AuthResponse::default());
}

// =============================================================================
// parse_auth_error
// =============================================================================

#[test]
fn auth_error_prefers_msg() {
    let err = parse_auth_error(400, r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#);
    assert!(matches!(
        err,
        BackendError::Auth { ref message, status: Some(400) } if message == "Invalid login credentials"
    ));
}

#[test]
fn auth_error_falls_back_to_error_description() {
    let err = parse_auth_error(400, r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#);
    assert_eq!(err.to_string(), "Email not confirmed");
}

#[test]
fn auth_error_uses_raw_body_or_status() {
    assert_eq!(parse_auth_error(502, "Bad Gateway").to_string(), "Bad Gateway");
    assert_eq!(parse_auth_error(500, "").to_string(), "auth request failed: 500");
}

#[test]
fn logout_statuses_that_mean_already_gone() {
    assert!(session_already_gone(401));
    assert!(session_already_gone(403));
    assert!(session_already_gone(404));
    assert!(!session_already_gone(500));
}

// =============================================================================
// session slot
// =============================================================================

#[test]
fn bearer_token_is_anon_key_without_session() {
    let api = api();
    assert!(api.current_session().is_none());
    assert_eq!(api.bearer_token(), "anon");
}

#[test]
fn store_updates_slot_and_broadcasts() {
    let api = api();
    let mut rx = api.subscribe();
    let session = parse_session(&session_json(Some(10)), 0).unwrap();

    api.store(Some(session.clone()), AuthChangeEvent::SignedIn);
    assert_eq!(api.bearer_token(), "at-1");
    let change = rx.try_recv().unwrap();
    assert_eq!(change.event, AuthChangeEvent::SignedIn);
    assert_eq!(change.session, Some(session));

    api.store(None, AuthChangeEvent::SignedOut);
    assert!(api.current_session().is_none());
    assert_eq!(rx.try_recv().unwrap().event, AuthChangeEvent::SignedOut);
}

#[tokio::test]
async fn sign_out_without_session_only_clears_locally() {
    let api = api();
    let mut rx = api.subscribe();
    api.sign_out().await.unwrap();
    assert_eq!(rx.try_recv().unwrap().event, AuthChangeEvent::SignedOut);
}

#[tokio::test]
async fn refresh_without_session_is_auth_error() {
    let err = api().refresh_session().await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn get_user_without_session_is_none() {
    assert!(api().get_user().await.unwrap().is_none());
}

// =============================================================================
// refresh against a stub auth server
// =============================================================================

/// Answer one HTTP request with `status` and a JSON `body`; yields the raw
/// request text.
async fn serve_once(status: &'static str, body: String) -> (std::net::SocketAddr, tokio::task::JoinHandle<String>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = tcp.read(&mut chunk).await.unwrap();
            raw.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= head_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        tcp.write_all(response.as_bytes()).await.unwrap();
        tcp.shutdown().await.unwrap();
        String::from_utf8_lossy(&raw).to_string()
    });
    (addr, handle)
}

fn api_at(addr: std::net::SocketAddr) -> AuthApi {
    let config = BackendConfig::new(&format!("http://{addr}"), "anon").unwrap();
    AuthApi::new(reqwest::Client::builder().no_proxy().build().unwrap(), config)
}

fn signed_in(api: &AuthApi, access_token: &str) {
    let mut session = parse_session(&session_json(Some(10)), 0).unwrap();
    access_token.clone_into(&mut session.access_token);
    api.store(Some(session), AuthChangeEvent::SignedIn);
}

#[tokio::test]
async fn rejected_refresh_token_clears_session_and_signs_out() {
    let body = json!({"error": "invalid_grant", "error_description": "Invalid Refresh Token: Already Used"});
    let (addr, request) = serve_once("400 Bad Request", body.to_string()).await;
    let api = api_at(addr);
    signed_in(&api, "old");
    let mut rx = api.subscribe();

    let err = api.refresh_session().await.unwrap_err();
    assert!(matches!(
        err,
        BackendError::Auth { status: Some(400), ref message } if message == "Invalid Refresh Token: Already Used"
    ));
    assert!(api.current_session().is_none());
    let change = rx.try_recv().unwrap();
    assert_eq!(change.event, AuthChangeEvent::SignedOut);
    assert!(change.session.is_none());

    let raw = request.await.unwrap();
    assert!(raw.starts_with("POST /auth/v1/token?grant_type=refresh_token "), "{raw}");
    assert!(raw.contains(r#""refresh_token":"rt-1""#), "{raw}");
}

#[tokio::test]
async fn server_error_during_refresh_keeps_session() {
    let (addr, request) = serve_once("503 Service Unavailable", json!({"message": "upstream down"}).to_string()).await;
    let api = api_at(addr);
    signed_in(&api, "old");
    let mut rx = api.subscribe();

    let err = api.refresh_session().await.unwrap_err();
    assert!(matches!(err, BackendError::Auth { status: Some(503), .. }));
    assert_eq!(api.bearer_token(), "old");
    assert!(rx.try_recv().is_err());
    request.await.unwrap();
}

#[tokio::test]
async fn successful_refresh_replaces_session() {
    let (addr, request) = serve_once("200 OK", session_json(None)).await;
    let api = api_at(addr);
    signed_in(&api, "old");
    let mut rx = api.subscribe();

    let session = api.refresh_session().await.unwrap();
    assert_eq!(session.access_token, "at-1");
    assert_eq!(api.bearer_token(), "at-1");
    assert_eq!(rx.try_recv().unwrap().event, AuthChangeEvent::TokenRefreshed);
    request.await.unwrap();
}
