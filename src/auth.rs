/*!
Passwords, sessions, and the first-login gate.

A session moves through these states:

```text
Anonymous --login--> MustResetPassword --reset--> Authenticated
          \                                      ^
           `--login (no first-login flag)-------'
```

While a session is in `MustResetPassword`, the only pages it may reach are
the password reset page and logout.
*/
use std::collections::HashMap;
use std::time::{Duration, Instant};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::{Rng, distributions};
use serde::Serialize;

use crate::user::{Actor, Role};

const DEFAULT_KEY_LENGTH: usize = 32;
const DEFAULT_KEY_CHARS: &str =
"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produce a PHC-format Argon2 hash of `password` with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Error hashing password: {}", &e))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    BadPassword,
    NoSuchUser,
}

/// Check `password` against a stored hash. An unparseable hash is logged
/// and treated as a mismatch.
pub fn check_password(password: &str, stored_hash: &str) -> AuthResult {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(h) => h,
        Err(e) => {
            log::error!("Stored password hash is unparseable: {}", &e);
            return AuthResult::BadPassword;
        },
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => AuthResult::Ok,
        Err(_) => AuthResult::BadPassword,
    }
}

/// Validate the new/confirm pair from the password reset form.
pub fn check_new_password(
    new_password: &str,
    confirm: &str,
    min_length: usize,
) -> Result<(), String> {
    if new_password.is_empty() || confirm.is_empty() {
        return Err("Please fill in all fields".to_owned());
    }
    if new_password != confirm {
        return Err("New passwords do not match".to_owned());
    }
    if new_password.chars().count() < min_length {
        return Err(format!(
            "Password must be at least {} characters long", min_length
        ));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
    Warning,
    Info,
}

/// A one-shot banner shown on the next page the session renders.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub message: String,
    pub kind: NoticeKind,
}

impl Notice {
    pub fn success<S: Into<String>>(message: S) -> Notice {
        Notice { message: message.into(), kind: NoticeKind::Success }
    }
    pub fn error<S: Into<String>>(message: S) -> Notice {
        Notice { message: message.into(), kind: NoticeKind::Error }
    }
    pub fn warning<S: Into<String>>(message: S) -> Notice {
        Notice { message: message.into(), kind: NoticeKind::Warning }
    }
    pub fn info<S: Into<String>>(message: S) -> Notice {
        Notice { message: message.into(), kind: NoticeKind::Info }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Anonymous,
    MustResetPassword,
    Authenticated,
}

#[derive(Debug)]
pub struct Session {
    pub actor: Actor,
    pub first_login: bool,
    notice: Option<Notice>,
    last_seen: Instant,
}

impl Session {
    pub fn gate(&self) -> Gate {
        if self.first_login {
            Gate::MustResetPassword
        } else {
            Gate::Authenticated
        }
    }
}

/// Which sessions may reach a given page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Login, logout, the session check, static files.
    Open,
    /// The first-login password reset page.
    Reset,
    Only(&'static [Role]),
}

/// What the guard does with a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Login,
    ResetPassword,
    /// Send the user to their own dashboard.
    Home(Role),
    /// Same, but the user asked for a page their role can't have.
    Denied(Role),
}

/// The first-login gate and role check, as a pure function of session state
/// and the page requested.
pub fn admit(gate: Gate, role: Option<Role>, access: Access) -> Admission {
    let role = match (gate, role) {
        (Gate::Anonymous, _) | (_, None) => {
            return match access {
                Access::Open => Admission::Proceed,
                _ => Admission::Login,
            };
        },
        (_, Some(role)) => role,
    };

    match (gate, access) {
        (_, Access::Open) => Admission::Proceed,
        (Gate::MustResetPassword, Access::Reset) => Admission::Proceed,
        (Gate::MustResetPassword, Access::Only(_)) => Admission::ResetPassword,
        (_, Access::Reset) => Admission::Home(role),
        (_, Access::Only(roles)) => {
            if roles.contains(&role) {
                Admission::Proceed
            } else {
                Admission::Denied(role)
            }
        },
    }
}

/// Server-side session table, keyed by the value of the session cookie.
#[derive(Debug)]
pub struct Sessions {
    map: HashMap<String, Session>,
    timeout: Duration,
    key_chars: Vec<char>,
    key_length: usize,
}

impl Sessions {
    pub fn new(timeout: Duration) -> Sessions {
        log::trace!("Sessions::new( {:?} ) called.", &timeout);

        Sessions {
            map: HashMap::new(),
            timeout,
            key_chars: DEFAULT_KEY_CHARS.chars().collect(),
            key_length: DEFAULT_KEY_LENGTH,
        }
    }

    fn generate_key(&self) -> String {
        let rng = rand::thread_rng();
        match distributions::Slice::new(&self.key_chars) {
            Ok(dist) => rng.sample_iter(&dist).take(self.key_length).collect(),
            // `key_chars` is never empty; fall back to plain alphanumerics anyway.
            Err(_) => rng.sample_iter(&distributions::Alphanumeric)
                .take(self.key_length)
                .map(char::from)
                .collect(),
        }
    }

    /// Start a session for `actor`, returning its key.
    pub fn open(&mut self, actor: Actor, first_login: bool) -> String {
        log::trace!("Sessions::open( {:?}, {} ) called.", &actor.uname, first_login);

        let mut key = self.generate_key();
        while self.map.contains_key(&key) {
            key = self.generate_key();
        }

        let sess = Session {
            actor,
            first_login,
            notice: None,
            last_seen: Instant::now(),
        };
        self.map.insert(key.clone(), sess);
        key
    }

    /// Look up a live session and mark it as just used. Sessions idle
    /// longer than the timeout are dropped and yield `None`.
    pub fn touch(&mut self, key: &str) -> Option<&mut Session> {
        let expired = match self.map.get(key) {
            None => { return None; },
            Some(sess) => sess.last_seen.elapsed() > self.timeout,
        };
        if expired {
            log::trace!("Session for {:?} expired.", key);
            self.map.remove(key);
            return None;
        }

        let sess = self.map.get_mut(key)?;
        sess.last_seen = Instant::now();
        Some(sess)
    }

    pub fn close(&mut self, key: &str) -> Option<Session> {
        log::trace!("Sessions::close( {:?} ) called.", key);
        self.map.remove(key)
    }

    /// Move the session past the first-login gate.
    pub fn complete_reset(&mut self, key: &str) -> bool {
        match self.map.get_mut(key) {
            Some(sess) => {
                sess.first_login = false;
                true
            },
            None => false,
        }
    }

    pub fn notify(&mut self, key: &str, notice: Notice) {
        if let Some(sess) = self.map.get_mut(key) {
            sess.notice = Some(notice);
        }
    }

    pub fn take_notice(&mut self, key: &str) -> Option<Notice> {
        self.map.get_mut(key).and_then(|sess| sess.notice.take())
    }

    /// Drop every expired session, returning how many there were.
    pub fn prune(&mut self) -> usize {
        let timeout = self.timeout;
        let before = self.map.len();
        self.map.retain(|_, sess| sess.last_seen.elapsed() <= timeout);
        before - self.map.len()
    }
}
