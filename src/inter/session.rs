/*!
Logging in and out, and the first-login password reset.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Query},
    http::StatusCode,
    Json,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::auth::{self, AuthResult, Notice};
use crate::config::Glob;
use crate::user::UserType;
use super::*;

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub user_type: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("password", &"[ redacted ]")
            .field("user_type", &self.user_type)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    bye: Option<u8>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ResetForm {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

fn login_form_page(notice: Option<Notice>, username: &str, user_type: &str) -> Response {
    let data = json!({
        "notice": notice,
        "username": username,
        "user_type": user_type,
    });
    serve_template(StatusCode::OK, "login", &data, vec![])
}

/// `/` goes wherever the current session belongs.
pub async fn root(ctx: Option<Extension<Ctx>>) -> Response {
    match ctx {
        None => redirect("/login"),
        Some(Extension(ctx)) if ctx.first_login => redirect("/reset-password"),
        Some(Extension(ctx)) => redirect(ctx.actor.role.dashboard()),
    }
}

pub async fn login_page(
    ctx: Option<Extension<Ctx>>,
    Query(q): Query<LoginQuery>,
) -> Response {
    log::trace!("login_page( {:?} ) called.", &q);

    if ctx.is_some() {
        return root(ctx).await;
    }

    let notice = q.bye.map(|_| Notice::success("You have been logged out successfully"));
    login_form_page(notice, "", "student")
}

pub async fn login(
    ctx: Option<Extension<Ctx>>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<LoginForm>,
) -> Response {
    log::trace!("login( {:?} ) called.", &form);

    if ctx.is_some() {
        return root(ctx).await;
    }

    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() || form.user_type.is_empty() {
        return login_form_page(
            Some(Notice::error("Please fill in all fields")),
            username, &form.user_type
        );
    }
    let user_type: UserType = match form.user_type.parse() {
        Ok(ut) => ut,
        Err(_) => {
            return login_form_page(Some(Notice::error("Invalid user type")), username, "");
        },
    };

    let store = store_of(&glob).await;
    let creds = match store.get_credentials(user_type, username).await {
        Ok(creds) => creds,
        Err(e) => {
            log::error!(
                "Error retrieving credentials for {:?} ({:?}): {}",
                username, &user_type, &e
            );
            return html_500();
        },
    };

    let result = match &creds {
        None => AuthResult::NoSuchUser,
        Some(c) => auth::check_password(&form.password, &c.password_hash),
    };

    let creds = match (result, creds) {
        (AuthResult::Ok, Some(creds)) => creds,
        (x, _) => {
            log::trace!("Login by {:?} ({:?}) refused: {:?}", username, &user_type, &x);
            return login_form_page(
                Some(Notice::error("Invalid username or password")),
                username, &form.user_type
            );
        },
    };

    let first_login = creds.first_login && creds.actor.role.has_first_login();
    let destination = if first_login {
        "/reset-password"
    } else {
        creds.actor.role.dashboard()
    };
    let key = {
        let mut glob = glob.write().await;
        let key = glob.sessions.open(creds.actor, first_login);
        if first_login {
            glob.sessions.notify(
                &key,
                Notice::info("Please change your password before continuing.")
            );
        }
        key
    };

    match session_cookie(&key) {
        Some(cookie) => redirect(destination).add_headers(vec![cookie]),
        None => html_500(),
    }
}

pub async fn logout(
    ctx: Option<Extension<Ctx>>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    if let Some(Extension(ctx)) = ctx {
        log::trace!("logout() called for {:?}.", &ctx.actor.uname);
        glob.write().await.sessions.close(&ctx.key);
    }

    redirect("/login?bye=1").add_headers(vec![expired_cookie()])
}

fn reset_form_page(ctx: &Ctx, notice: Option<Notice>) -> Response {
    let data = json!({
        "actor": &ctx.actor,
        "notice": notice,
        "first_login": ctx.first_login,
    });
    serve_template(StatusCode::OK, "reset_password", &data, vec![])
}

pub async fn reset_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("reset_page() called for {:?}.", &ctx.actor.uname);

    let notice = glob.write().await.sessions.take_notice(&ctx.key);
    reset_form_page(&ctx, notice)
}

pub async fn reset_password(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<ResetForm>,
) -> Response {
    log::trace!("reset_password() called for {:?}.", &ctx.actor.uname);

    if form.current_password.is_empty() {
        return reset_form_page(&ctx, Some(Notice::error("Please fill in all fields")));
    }
    let (min_length, store) = {
        let glob = glob.read().await;
        (glob.min_password_length, glob.data().clone())
    };
    if let Err(msg) = auth::check_new_password(
        &form.new_password, &form.confirm_password, min_length
    ) {
        return reset_form_page(&ctx, Some(Notice::error(msg)));
    }

    let stored = match store.get_password_hash(&ctx.actor).await {
        Ok(Some(hash)) => hash,
        Ok(None) => {
            log::warn!("Session for {:?} outlived its user.", &ctx.actor.uname);
            glob.write().await.sessions.close(&ctx.key);
            return redirect("/login");
        },
        Err(e) => {
            log::error!("Error retrieving password hash for {:?}: {}", &ctx.actor.uname, &e);
            return html_500();
        },
    };
    if auth::check_password(&form.current_password, &stored) != AuthResult::Ok {
        return reset_form_page(&ctx, Some(Notice::error("Current password is incorrect")));
    }

    let hash = match auth::hash_password(&form.new_password) {
        Ok(hash) => hash,
        Err(e) => {
            log::error!("{}", &e);
            return html_500();
        },
    };
    if let Err(e) = store.set_password(&ctx.actor, &hash).await {
        log::error!("Error setting password for {:?}: {}", &ctx.actor.uname, &e);
        return reset_form_page(&ctx, Some(Notice::error("Failed to update password")));
    }

    {
        let mut glob = glob.write().await;
        glob.sessions.complete_reset(&ctx.key);
        glob.sessions.notify(&ctx.key, Notice::success("Password updated successfully!"));
    }

    redirect(ctx.actor.role.dashboard())
}

/// Polled by pages to notice an expired session.
pub async fn session_check(ctx: Option<Extension<Ctx>>) -> Response {
    let data = match ctx {
        Some(Extension(ctx)) => json!({
            "success": true,
            "message": format!("Logged in as {}", &ctx.actor.uname),
        }),
        None => json!({
            "success": false,
            "message": "Session expired. Please login again.",
        }),
    };

    (StatusCode::OK, Json(data)).into_response()
}
