//! Session resolution from the session cookie.
//!
//! The cookie value is the user id. Issuing the cookie happens elsewhere.

use axum_extra::extract::cookie::CookieJar;

use super::handlers::AppState;
use crate::content::User;
use crate::error::{NobleError, Result};

impl AppState {
    /// The user behind the request's session cookie.
    pub async fn current_user(&self, jar: &CookieJar) -> Result<User> {
        let user_id = jar
            .get(&self.session_cookie)
            .map(|c| c.value().trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| NobleError::Unauthorized("no session".to_string()))?;

        self.repo
            .get_user(user_id)
            .await?
            .ok_or_else(|| NobleError::Unauthorized("unknown session".to_string()))
    }

    /// Like [`current_user`](Self::current_user), but only for admins.
    pub async fn current_admin(&self, jar: &CookieJar) -> Result<User> {
        let user = self.current_user(jar).await?;
        if !user.is_admin {
            tracing::debug!(user_id = %user.id, "Non-admin denied admin route");
            return Err(NobleError::Unauthorized("admin access required".to_string()));
        }
        Ok(user)
    }
}
