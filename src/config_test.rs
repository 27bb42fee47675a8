use super::*;

fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| (*v).to_owned())
}

#[test]
fn from_lookup_reads_both_values_and_applies_defaults() {
    let cfg = BackendConfig::from_lookup(lookup(&[
        (URL_VAR, "https://demo.supabase.co/"),
        (ANON_KEY_VAR, "anon-key"),
    ]))
    .unwrap();

    assert_eq!(cfg.url, "https://demo.supabase.co");
    assert_eq!(cfg.anon_key, "anon-key");
    assert_eq!(cfg.request_timeout, None);
    assert_eq!(cfg.connect_timeout, None);
    assert_eq!(cfg.heartbeat_interval, Duration::from_secs(DEFAULT_HEARTBEAT_SECS));
    assert!(cfg.auto_refresh_token);
}

#[test]
fn from_lookup_missing_url_is_config_error() {
    let err = BackendConfig::from_lookup(lookup(&[(ANON_KEY_VAR, "k")])).unwrap_err();
    assert!(matches!(err, BackendError::Config(msg) if msg.contains(URL_VAR)));
}

#[test]
fn from_lookup_missing_key_is_config_error() {
    let err = BackendConfig::from_lookup(lookup(&[(URL_VAR, "https://x.test")])).unwrap_err();
    assert!(matches!(err, BackendError::Config(msg) if msg.contains(ANON_KEY_VAR)));
}

#[test]
fn new_rejects_non_http_url() {
    assert!(BackendConfig::new("ftp://x.test", "k").is_err());
    assert!(BackendConfig::new("https://", "k").is_err());
}

#[test]
fn new_rejects_blank_key() {
    assert!(BackendConfig::new("https://x.test", "   ").is_err());
}

#[test]
fn endpoint_builders() {
    let cfg = BackendConfig::new("https://x.test", "k").unwrap();
    assert_eq!(cfg.auth_url("/signup"), "https://x.test/auth/v1/signup");
    assert_eq!(cfg.rest_url("messages"), "https://x.test/rest/v1/messages");
}

#[test]
fn realtime_url_swaps_scheme() {
    let secure = BackendConfig::new("https://x.test", "k").unwrap();
    assert_eq!(secure.realtime_url(), "wss://x.test/realtime/v1/websocket?apikey=k&vsn=1.0.0");

    let local = BackendConfig::new("http://127.0.0.1:54321", "k").unwrap();
    assert_eq!(local.realtime_url(), "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0");
}

#[test]
fn builder_overrides() {
    let cfg = BackendConfig::new("https://x.test", "k")
        .unwrap()
        .with_timeouts(Some(Duration::from_secs(5)), Some(Duration::from_secs(2)))
        .with_auto_refresh(false);
    assert_eq!(cfg.request_timeout, Some(Duration::from_secs(5)));
    assert_eq!(cfg.connect_timeout, Some(Duration::from_secs(2)));
    assert!(!cfg.auto_refresh_token);
}
