use super::*;
use crate::backend::MemoryBackend;
use crate::backend::memory::Op;
use std::sync::Mutex;

#[derive(Default)]
struct RecordingNavigator {
    visits: Mutex<Vec<(String, bool)>>,
    failure: Option<String>,
}

#[async_trait::async_trait]
impl Navigator for RecordingNavigator {
    async fn navigate_by_url(&self, url: &str, replace_url: bool) -> Result<(), NavigationError> {
        self.visits.lock().unwrap().push((url.to_owned(), replace_url));
        match &self.failure {
            Some(reason) => Err(NavigationError(reason.clone())),
            None => Ok(()),
        }
    }
}

struct Harness {
    backend: Arc<MemoryBackend>,
    navigator: Arc<RecordingNavigator>,
    form: LoginForm,
    seen: Arc<Mutex<Vec<FormFlags>>>,
}

fn harness_with(backend: MemoryBackend, navigator: RecordingNavigator) -> Harness {
    let backend = Arc::new(backend);
    let navigator = Arc::new(navigator);
    let gateway = Arc::new(ChatGateway::new(backend.clone()));
    let mut form = LoginForm::new(gateway, navigator.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    form.on_flags_changed(move |flags| sink.lock().unwrap().push(flags.clone()));
    Harness { backend, navigator, form, seen }
}

fn harness() -> Harness {
    harness_with(MemoryBackend::new(), RecordingNavigator::default())
}

fn fill(form: &mut LoginForm, email: &str, password: &str) {
    email.clone_into(&mut form.email);
    password.clone_into(&mut form.password);
}

fn loading_trace(seen: &Arc<Mutex<Vec<FormFlags>>>) -> Vec<bool> {
    seen.lock().unwrap().iter().map(|flags| flags.loading).collect()
}

// =============================================================================
// validation
// =============================================================================

#[test]
fn validate_accepts_ordinary_credentials() {
    assert_eq!(validate_credentials("ana@example.com", "secret1"), Ok(()));
    assert_eq!(validate_credentials("a.b+tag@sub.example.org", "123456"), Ok(()));
    assert_eq!(validate_credentials("ana@localhost", "123456"), Ok(()));
}

#[test]
fn validate_rejects_bad_email() {
    assert_eq!(validate_credentials("", "secret1"), Err(FieldError::EmailRequired));
    for email in [
        "ana", "ana@", "@example.com", "ana@@example.com", "ana @example.com", "ana@-example.com",
        ".ana@example.com", "ana.@example.com", "a..b@example.com",
    ] {
        assert_eq!(validate_credentials(email, "secret1"), Err(FieldError::EmailInvalid), "{email}");
    }
}

#[test]
fn validate_enforces_email_lengths() {
    let long_local = format!("{}@example.com", "a".repeat(65));
    assert_eq!(validate_credentials(&long_local, "secret1"), Err(FieldError::EmailInvalid));

    let label = "b".repeat(60);
    let long_total = format!("ana@{label}.{label}.{label}.{label}.{label}.com");
    assert!(long_total.len() > 254);
    assert_eq!(validate_credentials(&long_total, "secret1"), Err(FieldError::EmailInvalid));
}

#[test]
fn validate_rejects_short_or_missing_password() {
    assert_eq!(validate_credentials("ana@example.com", ""), Err(FieldError::PasswordRequired));
    assert_eq!(validate_credentials("ana@example.com", "12345"), Err(FieldError::PasswordTooShort));
    assert_eq!(validate_credentials("ana@example.com", "ñandú1"), Ok(()));
}

#[test]
fn password_length_counts_utf16_units() {
    assert_eq!(validate_credentials("ana@example.com", "😀😀😀"), Ok(()));
    assert_eq!(validate_credentials("ana@example.com", "😀😀"), Err(FieldError::PasswordTooShort));
}

#[tokio::test]
async fn invalid_form_makes_no_call_and_changes_nothing() {
    let mut h = harness();
    for (email, password) in [
        ("", "secret1"),
        ("not-an-email", "secret1"),
        ("a..b@example.com", "secret1"),
        ("ana@example.com", "123"),
    ] {
        fill(&mut h.form, email, password);
        h.form.on_login().await;
        h.form.on_register().await;
    }
    assert!(h.backend.calls().is_empty());
    assert!(h.seen.lock().unwrap().is_empty());
    assert_eq!(*h.form.flags(), FormFlags::default());
    assert!(h.navigator.visits.lock().unwrap().is_empty());
}

// =============================================================================
// on_login
// =============================================================================

#[tokio::test]
async fn login_success_navigates_home_once() {
    let mut h = harness();
    h.backend.add_account("ana@example.com", "secret1");
    fill(&mut h.form, "  ana@example.com ", "secret1");

    h.form.on_login().await;

    assert_eq!(loading_trace(&h.seen), [true, false]);
    assert_eq!(*h.navigator.visits.lock().unwrap(), [(HOME_ROUTE.to_owned(), true)]);
    assert_eq!(*h.form.flags(), FormFlags::default());
    assert!(h.backend.session().is_some());
}

#[tokio::test]
async fn login_rejection_shows_backend_message() {
    let mut h = harness();
    h.backend.fail_next(Op::SignIn, "Invalid credentials");
    fill(&mut h.form, "ana@example.com", "secret1");

    h.form.on_login().await;

    assert_eq!(h.form.flags().error_msg.as_deref(), Some("Invalid credentials"));
    assert!(!h.form.flags().loading);
    assert!(h.navigator.visits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn login_blank_error_uses_fallback() {
    let mut h = harness();
    h.backend.fail_next(Op::SignIn, "  ");
    fill(&mut h.form, "ana@example.com", "secret1");

    h.form.on_login().await;
    assert_eq!(h.form.flags().error_msg.as_deref(), Some(SIGN_IN_FALLBACK));
}

#[tokio::test]
async fn login_navigation_failure_is_shown() {
    let navigator = RecordingNavigator { failure: Some("route guard refused".to_owned()), ..Default::default() };
    let mut h = harness_with(MemoryBackend::new(), navigator);
    h.backend.add_account("ana@example.com", "secret1");
    fill(&mut h.form, "ana@example.com", "secret1");

    h.form.on_login().await;
    assert_eq!(h.form.flags().error_msg.as_deref(), Some("route guard refused"));
    assert_eq!(loading_trace(&h.seen), [true, false]);
}

#[tokio::test]
async fn resubmit_clears_previous_error() {
    let mut h = harness();
    h.backend.add_account("ana@example.com", "secret1");
    fill(&mut h.form, "ana@example.com", "wrong-pass");
    h.form.on_login().await;
    assert!(h.form.flags().error_msg.is_some());

    fill(&mut h.form, "ana@example.com", "secret1");
    h.form.on_login().await;

    let seen = h.seen.lock().unwrap();
    assert_eq!(seen[2], FormFlags { loading: true, error_msg: None, info_msg: None });
    assert_eq!(h.form.flags().error_msg, None);
}

// =============================================================================
// on_register
// =============================================================================

#[tokio::test]
async fn register_success_sets_info_without_navigation() {
    let mut h = harness_with(MemoryBackend::with_email_confirmation(), RecordingNavigator::default());
    fill(&mut h.form, "ana@example.com", "secret1");
    "admin".clone_into(&mut h.form.role);

    h.form.on_register().await;

    assert_eq!(h.form.flags().info_msg.as_deref(), Some(REGISTERED_INFO));
    assert_eq!(h.form.flags().error_msg, None);
    assert_eq!(loading_trace(&h.seen), [true, false]);
    assert!(h.navigator.visits.lock().unwrap().is_empty());
    assert_eq!(h.backend.profiles()[0].role, "admin");
}

#[tokio::test]
async fn register_defaults_role() {
    let mut h = harness();
    fill(&mut h.form, "ana@example.com", "secret1");
    h.form.on_register().await;
    assert_eq!(h.backend.profiles()[0].role, DEFAULT_ROLE);
}

#[tokio::test]
async fn register_duplicate_shows_backend_message() {
    let mut h = harness();
    h.backend.add_account("ana@example.com", "secret1");
    fill(&mut h.form, "ana@example.com", "secret1");

    h.form.on_register().await;
    assert_eq!(h.form.flags().error_msg.as_deref(), Some("User already registered"));
    assert_eq!(h.form.flags().info_msg, None);
    assert!(!h.form.flags().loading);
}

#[tokio::test]
async fn register_profile_failure_is_shown() {
    let mut h = harness();
    h.backend.fail_next(Op::InsertProfile, "new row violates row-level security policy");
    fill(&mut h.form, "ana@example.com", "secret1");

    h.form.on_register().await;
    assert_eq!(
        h.form.flags().error_msg.as_deref(),
        Some("new row violates row-level security policy")
    );
    assert!(h.backend.has_account("ana@example.com"));
}
