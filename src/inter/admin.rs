/*!
Pages for Admin users.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Query},
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::auth::{self, Notice};
use crate::config::Glob;
use crate::course::{Course, CourseForm, EnrollmentListing};
use crate::user::{Actor, FacultyForm, Role, Student};
use super::*;

const RECENT_ON_DASHBOARD: i64 = 5;
const RECENT_ON_ENROLL_PAGE: i64 = 25;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrollForm {
    pub student_id: String,
    pub course_code: String,
}

pub async fn dashboard(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::dashboard() called by {:?}.", &ctx.actor.uname);

    let store = store_of(&glob).await;
    let (counts, recent) = match futures::try_join!(
        store.get_counts(),
        store.get_enrollment_listings(&ctx.actor, RECENT_ON_DASHBOARD),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering admin dashboard data: {}", &e);
            return html_500();
        },
    };

    let data = json!({
        "counts": counts,
        "recent_enrollments": recent,
    });
    render_page(&glob, &ctx, "admin_dashboard", data).await
}

pub async fn students(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<ActionQuery>,
) -> Response {
    log::trace!("admin::students( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    let store = store_of(&glob).await;

    if let Some(id) = q.wants("delete") {
        let notice = match store.delete_student(&ctx.actor, id).await {
            Ok(true) => Notice::success("Student deleted successfully"),
            Ok(false) => Notice::error("Student not found"),
            Err(e) => workflow_notice(&e, "admin::students delete"),
        };
        notify(&glob, &ctx, notice).await;
        return redirect("/admin/students");
    }

    let students = match store.get_student_listings().await {
        Ok(s) => s,
        Err(e) => {
            log::error!("Error retrieving student listings: {}", &e);
            return html_500();
        },
    };

    render_page(&glob, &ctx, "admin_students", json!({ "students": students })).await
}

async fn faculty_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: FacultyForm,
    notice: Option<Notice>,
) -> Response {
    let store = store_of(glob).await;
    let faculty = match store.get_faculty(None).await {
        Ok(f) => f,
        Err(e) => {
            log::error!("Error retrieving faculty: {}", &e);
            return html_500();
        },
    };

    let data = json!({
        "faculty": faculty,
        "form": form,
        "notice": notice,
    });
    render_page(glob, ctx, "admin_faculty", data).await
}

pub async fn faculty(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<ActionQuery>,
) -> Response {
    log::trace!("admin::faculty( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    if let Some(id) = q.wants("delete") {
        let store = store_of(&glob).await;
        let notice = match store.delete_faculty(&ctx.actor, id).await {
            Ok(true) => Notice::success("Faculty member deleted successfully"),
            Ok(false) => Notice::error("Faculty member not found"),
            Err(e) => workflow_notice(&e, "admin::faculty delete"),
        };
        notify(&glob, &ctx, notice).await;
        return redirect("/admin/faculty");
    }

    let form = FacultyForm {
        faculty_id: crate::user::suggest_faculty_id(crate::today().year()),
        role: Role::Teacher.to_string(),
        ..Default::default()
    };
    faculty_page(&glob, &ctx, form, None).await
}

pub async fn add_faculty(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(mut form): Form<FacultyForm>,
) -> Response {
    log::trace!("admin::add_faculty( {:?} ) called by {:?}.", &form.faculty_id, &ctx.actor.uname);

    let (min_length, store) = {
        let glob = glob.read().await;
        (glob.min_password_length, glob.data().clone())
    };
    let new = match form.validate(Role::Teacher, min_length) {
        Ok(new) => new,
        Err(msg) => {
            form.password.clear();
            return faculty_page(&glob, &ctx, form, Some(Notice::error(msg))).await;
        },
    };
    let hash = match auth::hash_password(&new.password) {
        Ok(hash) => hash,
        Err(e) => {
            log::error!("{}", &e);
            return html_500();
        },
    };

    match store.insert_faculty(&ctx.actor, &new, &hash).await {
        Ok(f) => {
            notify(&glob, &ctx, Notice::success(format!(
                "{} added successfully. Faculty ID: {} (password must be changed on first login)",
                match f.role { Role::Principal => "Principal", _ => "Teacher" },
                &f.faculty_id
            ))).await;
            redirect("/admin/faculty")
        },
        Err(e) => {
            let notice = workflow_notice(&e, "admin::add_faculty");
            form.password.clear();
            faculty_page(&glob, &ctx, form, Some(notice)).await
        },
    }
}

async fn courses_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: CourseForm,
    notice: Option<Notice>,
) -> Response {
    let store = store_of(glob).await;
    let (courses, teachers) = match futures::try_join!(
        store.get_course_listings(&ctx.actor, None),
        store.get_faculty(Some(Role::Teacher)),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering course page data: {}", &e);
            return html_500();
        },
    };

    let data = json!({
        "courses": courses,
        "teachers": teachers,
        "form": form,
        "notice": notice,
    });
    render_page(glob, ctx, "admin_courses", data).await
}

pub async fn courses(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::courses() called by {:?}.", &ctx.actor.uname);

    let form = CourseForm {
        credits: "3".to_owned(),
        ..Default::default()
    };
    courses_page(&glob, &ctx, form, None).await
}

pub async fn add_course(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<CourseForm>,
) -> Response {
    log::trace!("admin::add_course( {:?} ) called by {:?}.", &form, &ctx.actor.uname);

    let det = match form.validate() {
        Ok(det) => det,
        Err(msg) => {
            return courses_page(&glob, &ctx, form, Some(Notice::error(msg))).await;
        },
    };

    let store = store_of(&glob).await;
    match store.insert_course(&ctx.actor, &det).await {
        Ok(_) => {
            notify(&glob, &ctx, Notice::success("Course added successfully")).await;
            redirect("/admin/courses")
        },
        Err(e) => {
            let notice = workflow_notice(&e, "admin::add_course");
            courses_page(&glob, &ctx, form, Some(notice)).await
        },
    }
}

/// Where an actor's enrollment page lives.
fn enroll_base(role: Role) -> &'static str {
    match role {
        Role::Admin => "/admin/enroll",
        _ => "/faculty/enroll",
    }
}

/**
The enrollment page shared by admins and faculty: the students and courses
to pick from (with `form`'s picks selected) and the recent enrollments
`actor` can see.
*/
fn enroll_view(
    actor: &Actor,
    form: &EnrollForm,
    notice: Option<Notice>,
    students: Vec<Student>,
    courses: Vec<Course>,
    enrollments: Vec<EnrollmentListing>,
) -> serde_json::Value {
    json!({
        "base": enroll_base(actor.role),
        "students": students,
        "courses": courses,
        "enrollments": enrollments,
        "form": form,
        "notice": notice,
        "may_delete": actor.may_delete_enrollments(),
    })
}

pub(super) async fn enroll_form_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: &EnrollForm,
    notice: Option<Notice>,
) -> Response {
    let store = store_of(glob).await;
    let (students, courses, enrollments) = match futures::try_join!(
        store.get_students(),
        store.courses_for(&ctx.actor),
        store.get_enrollment_listings(&ctx.actor, RECENT_ON_ENROLL_PAGE),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering enrollment page data: {}", &e);
            return html_500();
        },
    };

    let data = enroll_view(&ctx.actor, form, notice, students, courses, enrollments);
    render_page(glob, ctx, "enroll", data).await
}

/**
Handle `?action=unenroll&id=` and `?action=delete&id=` on an enrollment
page; `None` if the query holds no such action.
*/
pub(super) async fn enrollment_action(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    q: &ActionQuery,
) -> Option<Notice> {
    let store = store_of(glob).await;

    if let Some(id) = q.wants("unenroll") {
        let notice = match store.unenroll(&ctx.actor, id).await {
            Ok(true) => Notice::success("Student unenrolled successfully"),
            Ok(false) => Notice::info("Enrollment was already inactive"),
            Err(e) => workflow_notice(&e, "unenroll"),
        };
        Some(notice)
    } else if let Some(id) = q.wants("delete") {
        let notice = match store.delete_enrollment(&ctx.actor, id).await {
            Ok(true) => Notice::success("Enrollment deleted successfully"),
            Ok(false) => Notice::info("Enrollment was already gone"),
            Err(e) => workflow_notice(&e, "delete_enrollment"),
        };
        Some(notice)
    } else {
        None
    }
}

impl EnrollForm {
    /// The trimmed student id and course code, if both were picked.
    fn picks(&self) -> Result<(&str, &str), Notice> {
        let student_id = self.student_id.trim();
        let course_code = self.course_code.trim();
        if student_id.is_empty() || course_code.is_empty() {
            Err(Notice::error("Please select both a student and a course"))
        } else {
            Ok((student_id, course_code))
        }
    }
}

/**
Enroll per `form` on behalf of `ctx.actor`. `Err` holds the notice to show
over the re-rendered form.
*/
async fn do_enroll(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: &EnrollForm,
) -> Result<Notice, Notice> {
    let (student_id, course_code) = form.picks()?;

    let store = store_of(glob).await;
    match store.enroll(&ctx.actor, student_id, course_code).await {
        Ok(enr) => Ok(Notice::success(format!(
            "Successfully enrolled {} in {}", &enr.student, &enr.course
        ))),
        Err(e) => Err(workflow_notice(&e, "enroll")),
    }
}

/// POST handler shared by `/admin/enroll` and `/faculty/enroll`.
pub(super) async fn enroll_submitted(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: EnrollForm,
) -> Response {
    match do_enroll(glob, ctx, &form).await {
        Ok(notice) => {
            notify(glob, ctx, notice).await;
            redirect(enroll_base(ctx.actor.role))
        },
        Err(notice) => enroll_form_page(glob, ctx, &form, Some(notice)).await,
    }
}

pub async fn enroll_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<ActionQuery>,
) -> Response {
    log::trace!("admin::enroll_page( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    if let Some(notice) = enrollment_action(&glob, &ctx, &q).await {
        notify(&glob, &ctx, notice).await;
        return redirect("/admin/enroll");
    }

    enroll_form_page(&glob, &ctx, &EnrollForm::default(), None).await
}

pub async fn enroll(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<EnrollForm>,
) -> Response {
    log::trace!("admin::enroll( {:?} ) called by {:?}.", &form, &ctx.actor.uname);

    enroll_submitted(&glob, &ctx, form).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor {
            id: 1,
            key: "TCH2024001".to_owned(),
            uname: "tch2024001".to_owned(),
            name: "Some Teacher".to_owned(),
            role,
        }
    }

    #[test]
    fn enroll_picks_need_both() {
        let form = EnrollForm {
            student_id: " STU20240001 ".to_owned(),
            course_code: "MTH101".to_owned(),
        };
        assert_eq!(form.picks(), Ok(("STU20240001", "MTH101")));

        let form = EnrollForm {
            student_id: "STU20240001".to_owned(),
            course_code: "  ".to_owned(),
        };
        assert_eq!(
            form.picks(),
            Err(Notice::error("Please select both a student and a course"))
        );
    }

    #[test]
    fn enroll_view_keeps_picks() {
        let form = EnrollForm {
            student_id: "STU20240001".to_owned(),
            course_code: "MTH101".to_owned(),
        };
        let notice = Notice::error("Student is already enrolled in this course");

        let v = enroll_view(
            &actor(Role::Teacher), &form, Some(notice.clone()), vec![], vec![], vec![]
        );
        assert_eq!(v["base"], "/faculty/enroll");
        assert_eq!(v["form"]["student_id"], "STU20240001");
        assert_eq!(v["form"]["course_code"], "MTH101");
        assert_eq!(v["notice"]["message"], notice.message.as_str());
        assert_eq!(v["may_delete"], false);

        let v = enroll_view(
            &actor(Role::Admin), &EnrollForm::default(), None, vec![], vec![], vec![]
        );
        assert_eq!(v["base"], "/admin/enroll");
        assert_eq!(v["form"]["student_id"], "");
        assert!(v["notice"].is_null());
        assert_eq!(v["may_delete"], true);
    }
}
