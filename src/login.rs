//! Login / registration form controller.
//!
//! SYSTEM CONTEXT
//! ==============
//! The presentation layer binds the text fields, renders [`FormFlags`] and
//! calls [`LoginForm::on_login`] / [`LoginForm::on_register`] on submit.
//! Routing is the host's concern and plugs in through [`Navigator`].
//!
//! DESIGN
//! ======
//! Validation runs before anything else; an invalid form returns without
//! touching flags or the network. A submit that passes validation clears both
//! messages, raises `loading`, and lowers it again on every exit path. Flag
//! observers see a snapshot after every mutation.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::gateway::ChatGateway;

/// Route opened after a successful sign-in.
pub const HOME_ROUTE: &str = "/home";
/// Role sent with a registration when the host does not set one.
pub const DEFAULT_ROLE: &str = "user";
pub const SIGN_IN_FALLBACK: &str = "Could not sign in";
pub const REGISTER_FALLBACK: &str = "Could not register user";
pub const REGISTERED_INFO: &str = "Account created. Check your email to confirm it.";
pub const MIN_PASSWORD_LEN: usize = 6;

const MAX_EMAIL_LEN: usize = 254;
const MAX_LOCAL_PART_LEN: usize = 64;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    )
    .expect("Invalid email regex")
});

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("email is required")]
    EmailRequired,
    #[error("email is not a valid address")]
    EmailInvalid,
    #[error("password is required")]
    PasswordRequired,
    #[error("password must be at least 6 characters")]
    PasswordTooShort,
}

/// Check the form fields without any network call.
///
/// # Errors
///
/// Returns the first failing [`FieldError`], email before password.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), FieldError> {
    if email.is_empty() {
        return Err(FieldError::EmailRequired);
    }
    if !is_valid_email(email) {
        return Err(FieldError::EmailInvalid);
    }
    if password.is_empty() {
        return Err(FieldError::PasswordRequired);
    }
    // Length in UTF-16 code units, as browser form validation counts it.
    if password.encode_utf16().count() < MIN_PASSWORD_LEN {
        return Err(FieldError::PasswordTooShort);
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, _)) = email.split_once('@') else {
        return false;
    };
    email.len() <= MAX_EMAIL_LEN && local.len() <= MAX_LOCAL_PART_LEN && EMAIL_PATTERN.is_match(email)
}

// =============================================================================
// Navigation seam
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NavigationError(pub String);

/// Host router.
#[async_trait::async_trait]
pub trait Navigator: Send + Sync {
    /// Open `url`. With `replace_url` the current history entry is replaced
    /// so "back" does not return to the form.
    async fn navigate_by_url(&self, url: &str, replace_url: bool) -> Result<(), NavigationError>;
}

// =============================================================================
// Form
// =============================================================================

/// Status the presentation layer renders next to the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFlags {
    pub loading: bool,
    pub error_msg: Option<String>,
    pub info_msg: Option<String>,
}

type FlagsObserver = Box<dyn Fn(&FormFlags) + Send + Sync>;

pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub role: String,
    flags: FormFlags,
    gateway: Arc<ChatGateway>,
    navigator: Arc<dyn Navigator>,
    observers: Vec<FlagsObserver>,
}

impl LoginForm {
    #[must_use]
    pub fn new(gateway: Arc<ChatGateway>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            role: DEFAULT_ROLE.to_owned(),
            flags: FormFlags::default(),
            gateway,
            navigator,
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn flags(&self) -> &FormFlags {
        &self.flags
    }

    /// Current field errors, for hosts that render them.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`FieldError`].
    pub fn validate(&self) -> Result<(), FieldError> {
        validate_credentials(self.email.trim(), &self.password)
    }

    /// Call `observer` with a snapshot of the flags after every change.
    pub fn on_flags_changed<F>(&mut self, observer: F)
    where
        F: Fn(&FormFlags) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Sign in, then open [`HOME_ROUTE`] replacing the history entry.
    pub async fn on_login(&mut self) {
        if let Err(e) = self.validate() {
            debug!(error = %e, "login submit ignored: invalid form");
            return;
        }
        self.begin_submit();

        let email = self.email.trim().to_owned();
        let outcome = match self.gateway.sign_in(&email, &self.password).await {
            Ok(_) => self
                .navigator
                .navigate_by_url(HOME_ROUTE, true)
                .await
                .map_err(|e| non_empty(e.to_string(), SIGN_IN_FALLBACK)),
            Err(e) => Err(user_message(&e, SIGN_IN_FALLBACK)),
        };

        match &outcome {
            Ok(()) => info!(email = %email, "signed in"),
            Err(message) => debug!(email = %email, error = %message, "sign-in failed"),
        }
        self.finish_submit(outcome.err(), None);
    }

    /// Register with [`Self::role`]. Stays on the form and shows the
    /// confirmation notice on success.
    pub async fn on_register(&mut self) {
        if let Err(e) = self.validate() {
            debug!(error = %e, "register submit ignored: invalid form");
            return;
        }
        self.begin_submit();

        let email = self.email.trim().to_owned();
        match self.gateway.sign_up(&email, &self.password, &self.role).await {
            Ok(_) => {
                info!(email = %email, role = %self.role, "registered");
                self.finish_submit(None, Some(REGISTERED_INFO.to_owned()));
            }
            Err(e) => {
                debug!(email = %email, error = %e, "registration failed");
                self.finish_submit(Some(user_message(&e, REGISTER_FALLBACK)), None);
            }
        }
    }

    fn begin_submit(&mut self) {
        self.update_flags(|flags| {
            flags.error_msg = None;
            flags.info_msg = None;
            flags.loading = true;
        });
    }

    fn finish_submit(&mut self, error_msg: Option<String>, info_msg: Option<String>) {
        self.update_flags(|flags| {
            flags.error_msg = error_msg;
            flags.info_msg = info_msg;
            flags.loading = false;
        });
    }

    fn update_flags(&mut self, change: impl FnOnce(&mut FormFlags)) {
        change(&mut self.flags);
        for observer in &self.observers {
            observer(&self.flags);
        }
    }
}

fn user_message(error: &BackendError, fallback: &str) -> String {
    error.message().unwrap_or_else(|| fallback.to_owned())
}

fn non_empty(text: String, fallback: &str) -> String {
    if text.trim().is_empty() { fallback.to_owned() } else { text }
}

#[cfg(test)]
#[path = "login_test.rs"]
mod tests;
