/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `store`.)

Every request passes through `guard()`, which looks up the session named
by the session cookie, applies the first-login gate and the role check for
the requested path, and attaches a `Ctx` for the handlers.
*/
use std::{
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use axum::{
    extract::Extension,
    http::{header, Request, StatusCode},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use handlebars::Handlebars;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::services::ServeDir;

use crate::auth::{admit, Access, Admission, Gate, Notice};
use crate::config::Glob;
use crate::store::{Store, WorkflowError};
use crate::user::{Actor, Role};

pub mod admin;
pub mod faculty;
pub mod session;
pub mod student;

pub const SESSION_COOKIE: &str = "registrar_session";

static TEMPLATES: OnceCell<Handlebars> = OnceCell::new();

static HTML_500: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Registrar | Error</title>
<link rel="stylesheet" href="/static/registrar.css">
</head>
<body>
<h1>Internal Server Error</h1>
<p>(Error 500)</p>
<p>Something went wrong on our end. No further or more
helpful information is available about the problem.</p>
</body>
</html>"#;

static ADMIN: &[Role] = &[Role::Admin];
static FACULTY: &[Role] = &[Role::Teacher, Role::Principal];
static PRINCIPAL: &[Role] = &[Role::Principal];
static TEACHER: &[Role] = &[Role::Teacher];
static STUDENT: &[Role] = &[Role::Student];

trait AddHeaders: IntoResponse + Sized {
    fn add_headers(self, mut new_headers: Vec<(HeaderName, HeaderValue)>) -> Response {
        let mut r = self.into_response();
        let r_headers = r.headers_mut();
        for (name, value) in new_headers.drain(..) {
            r_headers.insert(name, value);
        }

        r
    }
}

impl<T: IntoResponse + Sized> AddHeaders for T {}

/// The logged-in user a request is being made on behalf of.
#[derive(Clone, Debug)]
pub struct Ctx {
    pub actor: Actor,
    /// Session key, for posting notices back into the session.
    pub key: String,
    pub first_login: bool,
}

/// Query-string actions on list pages, like `?action=delete&id=12`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ActionQuery {
    pub action: Option<String>,
    pub id: Option<i64>,
}

impl ActionQuery {
    /// The id, if the query asks for `action`.
    pub fn wants(&self, action: &str) -> Option<i64> {
        match self.action.as_deref() {
            Some(a) if a == action => self.id,
            _ => None,
        }
    }
}

/**
Initializes the resources used in this module. This function should be called
before any functionality of this module or any of its submodules is used.

Currently the only thing that happens here is loading the templates used by
`serve_template()`.

The argument is the path to the directory where the templates used by
`serve_template()` can be found.
*/
pub fn init<P: AsRef<Path>>(template_dir: P) -> Result<(), String> {
    if TEMPLATES.get().is_some() {
        log::warn!("Templates directory already initialized; ignoring.");
        return Ok(())
    }

    let template_dir = template_dir.as_ref();

    let mut h = Handlebars::new();
    #[cfg(debug_assertions)]
    h.set_dev_mode(true);
    h.register_templates_directory(".html", template_dir)
        .map_err(|e| format!(
            "Error registering templates directory {}: {}",
            template_dir.display(), &e
        ))?;

    TEMPLATES.set(h)
        .map_err(|old_h| {
            let mut estr = String::from("Templates directory already registered w/templates:");
            for template_name in old_h.get_templates().keys() {
                estr.push('\n');
                estr.push_str(template_name.as_str());
            }
            estr
        })?;

    Ok(())
}

/**
Return an HTML response in the case of an unrecoverable* error.

(*"Unrecoverable" from the perspective of fielding the current request,
not from the perspective of the program crashing.)
*/
pub fn html_500() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(HTML_500)
    ).into_response()
}

pub fn serve_template<S>(
    code: StatusCode,
    template_name: &str,
    data: &S,
    addl_headers: Vec<(HeaderName, HeaderValue)>
) -> Response
where
    S: Serialize + Debug
{
    log::trace!("serve_template( {}, {:?}, ... ) called.", &code, template_name);

    let templates = match TEMPLATES.get() {
        Some(t) => t,
        None => {
            log::error!("serve_template() called before inter::init().");
            return html_500();
        },
    };

    match templates.render(template_name, data) {
        Ok(response_body) => (
            code,
            Html(response_body)
        ).add_headers(addl_headers),
        Err(e) => {
            log::error!(
                "Error rendering template {:?} with data {:?}:\n{}",
                template_name, data, &e
            );
            html_500()
        },
    }
}

pub fn respond_bad_request(msg: String) -> Response {
    log::trace!("respond_bad_request( {:?} ) called.", &msg);

    (
        StatusCode::BAD_REQUEST,
        msg
    ).into_response()
}

/// A 303 to `to`; a 500 if `to` can't be a `Location` header.
pub fn redirect(to: &str) -> Response {
    match HeaderValue::from_str(to) {
        Ok(loc) => (StatusCode::SEE_OTHER, [(header::LOCATION, loc)]).into_response(),
        Err(e) => {
            log::error!("Unable to redirect to {:?}: {}", to, &e);
            html_500()
        },
    }
}

/// Pull the session key out of the request's `Cookie` header(s).
pub fn session_key(headers: &HeaderMap) -> Option<String> {
    for val in headers.get_all(header::COOKIE).iter() {
        let s = match val.to_str() {
            Ok(s) => s,
            Err(_) => { continue; },
        };
        for pair in s.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !value.is_empty() {
                    return Some(value.to_owned());
                }
            }
        }
    }
    None
}

pub fn session_cookie(key: &str) -> Option<(HeaderName, HeaderValue)> {
    let val = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, key);
    match HeaderValue::from_str(&val) {
        Ok(v) => Some((header::SET_COOKIE, v)),
        Err(e) => {
            log::error!("Unable to make session cookie from key {:?}: {}", key, &e);
            None
        },
    }
}

pub fn expired_cookie() -> (HeaderName, HeaderValue) {
    (
        header::SET_COOKIE,
        HeaderValue::from_static("registrar_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    )
}

/// Which sessions may reach `path`.
pub fn access_for(path: &str) -> Access {
    fn under(path: &str, prefix: &str) -> bool {
        path == prefix || path.starts_with(&format!("{}/", prefix))
    }

    if path == "/reset-password" {
        Access::Reset
    } else if under(path, "/admin") {
        Access::Only(ADMIN)
    } else if under(path, "/faculty/teachers") || under(path, "/faculty/stats") {
        Access::Only(PRINCIPAL)
    } else if under(path, "/faculty/attendance") {
        Access::Only(TEACHER)
    } else if under(path, "/faculty") {
        Access::Only(FACULTY)
    } else if under(path, "/student") {
        Access::Only(STUDENT)
    } else {
        Access::Open
    }
}

/**
Middleware that applies the first-login gate and role checks, and attaches
a `Ctx` to requests from logged-in users.

Expects an `Extension<Arc<RwLock<Glob>>>` layer outside it.
*/
pub async fn guard<B>(
    mut req: Request<B>,
    next: Next<B>
) -> Response {
    let glob: Arc<RwLock<Glob>> = match req.extensions().get::<Arc<RwLock<Glob>>>() {
        Some(g) => g.clone(),
        None => {
            log::error!("guard() found no global state attached to request.");
            return html_500();
        },
    };

    let path = req.uri().path().to_owned();
    let access = access_for(&path);

    let ctx = match session_key(req.headers()) {
        None => None,
        Some(key) => {
            let mut glob = glob.write().await;
            glob.sessions.touch(&key).map(|sess| Ctx {
                actor: sess.actor.clone(),
                key: key.clone(),
                first_login: sess.first_login,
            })
        },
    };

    let (gate, role) = match &ctx {
        None => (Gate::Anonymous, None),
        Some(ctx) if ctx.first_login => (Gate::MustResetPassword, Some(ctx.actor.role)),
        Some(ctx) => (Gate::Authenticated, Some(ctx.actor.role)),
    };

    match admit(gate, role, access) {
        Admission::Proceed => {
            if let Some(ctx) = ctx {
                req.extensions_mut().insert(ctx);
            }
            next.run(req).await
        },
        Admission::Login => redirect("/login"),
        Admission::ResetPassword => redirect("/reset-password"),
        Admission::Home(role) => redirect(role.dashboard()),
        Admission::Denied(role) => {
            log::trace!("{:?} refused {:?}.", &role, &path);
            if let Some(ctx) = ctx {
                glob.write().await.sessions.notify(
                    &ctx.key,
                    Notice::warning("You do not have permission to view that page.")
                );
            }
            redirect(role.dashboard())
        },
    }
}

/// A copy of the store handle, so the lock isn't held across queries.
pub async fn store_of(glob: &Arc<RwLock<Glob>>) -> Store {
    glob.read().await.data().clone()
}

/// Leave a notice to be shown on the next page this session renders.
pub async fn notify(glob: &Arc<RwLock<Glob>>, ctx: &Ctx, notice: Notice) {
    glob.write().await.sessions.notify(&ctx.key, notice);
}

/// Log a `WorkflowError` and turn it into a notice for the user.
pub fn workflow_notice(e: &WorkflowError, context: &str) -> Notice {
    e.log(context);
    Notice::error(e.to_string())
}

/**
Render a page for a logged-in user.

`data` should be a JSON object; the user and any pending notice are added
to it as `actor` and `notice`. A notice already in `data` takes precedence
over one from the session.
*/
pub async fn render_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    template_name: &str,
    mut data: Value,
) -> Response {
    let pending = glob.write().await.sessions.take_notice(&ctx.key);

    if let Value::Object(map) = &mut data {
        map.insert("actor".to_owned(), json!(&ctx.actor));
        let have_notice = map.get("notice").map(|n| !n.is_null()).unwrap_or(false);
        if !have_notice {
            map.insert("notice".to_owned(), json!(pending));
        }
    }

    serve_template(StatusCode::OK, template_name, &data, vec![])
}

pub fn router<P: AsRef<Path>>(glob: Arc<RwLock<Glob>>, static_dir: P) -> Router {
    Router::new()
        .route("/", get(session::root))
        .route("/login", get(session::login_page).post(session::login))
        .route("/logout", get(session::logout))
        .route("/reset-password", get(session::reset_page).post(session::reset_password))
        .route("/session-check", get(session::session_check))
        .route("/admin", get(admin::dashboard))
        .route("/admin/students", get(admin::students))
        .route("/admin/faculty", get(admin::faculty).post(admin::add_faculty))
        .route("/admin/courses", get(admin::courses).post(admin::add_course))
        .route("/admin/enroll", get(admin::enroll_page).post(admin::enroll))
        .route("/faculty", get(faculty::dashboard))
        .route("/faculty/students", get(faculty::students))
        .route("/faculty/students/new", get(faculty::new_student_page).post(faculty::add_student))
        .route("/faculty/students/:id", get(faculty::edit_student_page).post(faculty::edit_student))
        .route("/faculty/teachers/new", get(faculty::new_teacher_page).post(faculty::add_teacher))
        .route("/faculty/courses", get(faculty::courses).post(faculty::update_course))
        .route("/faculty/overview", get(faculty::overview))
        .route("/faculty/enroll", get(faculty::enroll_page).post(faculty::enroll))
        .route("/faculty/attendance", get(faculty::attendance_page).post(faculty::mark_attendance))
        .route("/faculty/attendance/mark", post(faculty::mark_one))
        .route("/faculty/stats", get(faculty::stats))
        .route("/student", get(student::dashboard))
        .nest_service("/static", ServeDir::new(static_dir.as_ref()))
        .layer(middleware::from_fn(guard))
        .layer(Extension(glob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Sessions;
    use crate::tests::ensure_logging;

    use std::time::Duration;

    use axum::body::Body;
    use tower::ServiceExt;

    fn actor(role: Role) -> Actor {
        Actor {
            id: 1,
            key: "X0001".to_owned(),
            uname: "someone".to_owned(),
            name: "Some One".to_owned(),
            role,
        }
    }

    // Nothing here reaches the database; the connection string is never used.
    fn test_glob() -> Arc<RwLock<Glob>> {
        let store = Store::new("host=localhost dbname=nonexistent".to_owned());
        Arc::new(RwLock::new(Glob::new(store, Sessions::new(Duration::from_secs(60)), 6)))
    }

    async fn login_as(glob: &Arc<RwLock<Glob>>, role: Role, first_login: bool) -> String {
        glob.write().await.sessions.open(actor(role), first_login)
    }

    async fn get_path(glob: &Arc<RwLock<Glob>>, path: &str, key: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, key));
        }
        let req = builder.body(Body::empty()).unwrap();
        router(glob.clone(), "static/").oneshot(req).await.unwrap()
    }

    async fn post_form(
        glob: &Arc<RwLock<Glob>>,
        path: &str,
        key: &str,
        body: &'static str
    ) -> Response {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, key))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        router(glob.clone(), "static/").oneshot(req).await.unwrap()
    }

    fn location(r: &Response) -> &str {
        r.headers().get(header::LOCATION).unwrap().to_str().unwrap()
    }

    #[test]
    fn path_access() {
        assert_eq!(access_for("/"), Access::Open);
        assert_eq!(access_for("/login"), Access::Open);
        assert_eq!(access_for("/static/registrar.css"), Access::Open);
        assert_eq!(access_for("/reset-password"), Access::Reset);
        assert_eq!(access_for("/admin/enroll"), Access::Only(ADMIN));
        assert_eq!(access_for("/administrivia"), Access::Open);
        assert_eq!(access_for("/faculty/stats"), Access::Only(PRINCIPAL));
        assert_eq!(access_for("/faculty/teachers/new"), Access::Only(PRINCIPAL));
        assert_eq!(access_for("/faculty/attendance/mark"), Access::Only(TEACHER));
        assert_eq!(access_for("/faculty/students/12"), Access::Only(FACULTY));
        assert_eq!(access_for("/student"), Access::Only(STUDENT));
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; registrar_session=abc123; other=1")
        );
        assert_eq!(session_key(&headers), Some("abc123".to_owned()));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("registrar_session="));
        assert_eq!(session_key(&headers), None);
        assert_eq!(session_key(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn anonymous_goes_to_login() {
        ensure_logging();
        let glob = test_glob();
        for path in ["/admin", "/faculty/overview", "/student", "/reset-password"] {
            let r = get_path(&glob, path, None).await;
            assert_eq!(r.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&r), "/login");
        }
        let r = get_path(&glob, "/student", Some("no-such-session")).await;
        assert_eq!(location(&r), "/login");
    }

    #[tokio::test]
    async fn first_login_is_gated() {
        ensure_logging();
        let glob = test_glob();
        let key = login_as(&glob, Role::Student, true).await;
        for path in ["/student", "/faculty", "/admin/students", "/faculty/attendance"] {
            let r = get_path(&glob, path, Some(&key)).await;
            assert_eq!(r.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&r), "/reset-password");
        }

        let r = get_path(&glob, "/", Some(&key)).await;
        assert_eq!(location(&r), "/reset-password");
    }

    #[tokio::test]
    async fn wrong_role_goes_home_with_notice() {
        ensure_logging();
        let glob = test_glob();

        let key = login_as(&glob, Role::Student, false).await;
        let r = get_path(&glob, "/admin", Some(&key)).await;
        assert_eq!(location(&r), "/student");
        let notice = glob.write().await.sessions.take_notice(&key).unwrap();
        assert_eq!(notice.message, "You do not have permission to view that page.");

        let key = login_as(&glob, Role::Principal, false).await;
        let r = get_path(&glob, "/faculty/attendance", Some(&key)).await;
        assert_eq!(location(&r), "/faculty");

        let key = login_as(&glob, Role::Teacher, false).await;
        let r = get_path(&glob, "/faculty/stats", Some(&key)).await;
        assert_eq!(location(&r), "/faculty");

        // Already past the gate: the reset page sends you home.
        let r = get_path(&glob, "/reset-password", Some(&key)).await;
        assert_eq!(location(&r), "/faculty");
    }

    #[test]
    fn unusable_locations_are_500s() {
        let r = redirect("/faculty");
        assert_eq!(r.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&r), "/faculty");

        let r = redirect("/faculty/attendance?course=MTH\n101");
        assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(r.headers().get(header::LOCATION).is_none());
    }

    // A bad date bounces back before the database gets involved.
    #[tokio::test]
    async fn attendance_bounce_keeps_course_code_intact() {
        ensure_logging();
        let glob = test_glob();
        let key = login_as(&glob, Role::Teacher, false).await;

        let r = post_form(
            &glob, "/faculty/attendance", &key, "course_code=C%23+101&date=bogus"
        ).await;
        assert_eq!(r.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&r), "/faculty/attendance?course=C%23%20101&date=bogus");
        let notice = glob.write().await.sessions.take_notice(&key).unwrap();
        assert_eq!(notice.message, "\"bogus\" is not a valid date.");

        let r = post_form(
            &glob, "/faculty/attendance", &key, "course_code=MTH%0A101&date=2024-13-45%0D"
        ).await;
        assert_eq!(r.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&r), "/faculty/attendance?course=MTH%0A101&date=2024-13-45");
    }

    #[tokio::test]
    async fn session_check_reports() {
        ensure_logging();
        let glob = test_glob();

        let r = get_path(&glob, "/session-check", None).await;
        assert_eq!(r.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(r.into_body()).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["success"], false);

        let key = login_as(&glob, Role::Teacher, false).await;
        let r = get_path(&glob, "/session-check", Some(&key)).await;
        let body = hyper::body::to_bytes(r.into_body()).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["success"], true);
    }
}
