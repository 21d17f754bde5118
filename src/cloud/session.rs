//! Login state for one account

use crate::cloud::client::{CloudClient, Surface};
use crate::models::LoginResponse;
use crate::util::mask_email;

/// uid the cloud expects from a client that has not logged in
pub const DISCONNECTED_UID: i64 = -1000;
pub const ANONYMOUS_TOKEN: &str = "anonymous";

/// Login attempts per `ensure_connected` call that is not already forced
const MAX_LOGIN_ATTEMPTS: usize = 2;

/// Session parameters sent with every request. Connected iff `uid > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    uid: i64,
    token: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            uid: DISCONNECTED_UID,
            token: ANONYMOUS_TOKEN.to_string(),
        }
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_connected(&self) -> bool {
        self.uid > 0
    }

    /// Mark the session stale; the next `ensure_connected` logs in again.
    pub fn invalidate(&mut self) {
        self.uid = DISCONNECTED_UID;
    }

    pub fn reset(&mut self) {
        self.uid = DISCONNECTED_UID;
        self.token = ANONYMOUS_TOKEN.to_string();
    }

    pub fn establish(&mut self, uid: i64, token: String) {
        self.uid = uid;
        self.token = token;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionController {
    session: Session,
    username: String,
    password: String,
    /// Bumped on every successful login; caches built under an older value are stale
    generation: u64,
}

impl SessionController {
    pub fn new(username: String, password: String) -> Self {
        Self {
            session: Session::new(),
            username,
            password,
            generation: 0,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// (Re)connect to the account and return connection status.
    ///
    /// A valid session is reused without touching the network unless `force`
    /// is set. An unforced call that fails to log in tries exactly once more.
    pub async fn ensure_connected(&mut self, client: &CloudClient, force: bool) -> bool {
        if !force && self.session.is_connected() {
            return true;
        }

        let attempts = if force { 1 } else { MAX_LOGIN_ATTEMPTS };
        for attempt in 1..=attempts {
            self.session.reset();

            let params = [
                ("chr", "clt".to_string()),
                ("email", self.username.clone()),
                ("password", self.password.clone()),
                ("os", "2".to_string()),
            ];
            let Some(resp) = client
                .query(&mut self.session, Surface::Account, "loginByEmail", &params)
                .await
            else {
                tracing::warn!(
                    "[Session] Login attempt {}/{} failed for {}",
                    attempt,
                    attempts,
                    mask_email(&self.username)
                );
                continue;
            };

            match serde_json::from_value::<LoginResponse>(resp) {
                Ok(login) if login.uid > 0 => {
                    self.session.establish(login.uid, login.safe_token);
                    self.generation += 1;
                    tracing::info!("[Session] Logged in as {}", mask_email(&self.username));
                    return true;
                }
                Ok(login) => {
                    tracing::warn!("[Session] Login returned unusable uid {}", login.uid);
                }
                Err(e) => {
                    tracing::warn!("[Session] Login response parse failed: {}", e);
                }
            }
        }

        false
    }
}
