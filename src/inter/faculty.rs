/*!
Pages for teachers and principals.

Everything here sits behind `/faculty`; the principal-only and
teacher-only corners are fenced off by `access_for()`.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Path, Query},
    http::StatusCode,
    Json,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::attendance::{entries_from_form, Status};
use crate::auth::{self, Notice};
use crate::config::Glob;
use crate::course::CourseForm;
use crate::store::WorkflowError;
use crate::user::{FacultyForm, Role, StudentForm};
use super::*;
use super::admin::{enroll_form_page, enroll_submitted, enrollment_action, EnrollForm};

const RECENT_ON_DASHBOARD: i64 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub search: String,
}

/// The course edit form, which also says which course it edits.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CourseUpdateForm {
    pub course_id: String,
    pub course_code: String,
    pub course_name: String,
    pub description: String,
    pub credits: String,
    pub semester: String,
    pub department: String,
    pub instructor: String,
}

impl CourseUpdateForm {
    fn split(self) -> (Option<i64>, CourseForm) {
        let id = self.course_id.trim().parse().ok();
        let form = CourseForm {
            course_code: self.course_code,
            course_name: self.course_name,
            description: self.description,
            credits: self.credits,
            semester: self.semester,
            department: self.department,
            instructor: self.instructor,
        };
        (id, form)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AttendanceQuery {
    pub course: String,
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkOne {
    pub student_id: String,
    pub course_code: String,
    pub status: String,
}

/// The value of the first field called `name`, if any.
fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim())
}

pub async fn dashboard(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("faculty::dashboard() called by {:?}.", &ctx.actor.uname);

    let store = store_of(&glob).await;
    let (counts, courses, recent, tallies) = match futures::try_join!(
        store.get_counts(),
        store.get_course_listings(&ctx.actor, None),
        store.get_enrollment_listings(&ctx.actor, RECENT_ON_DASHBOARD),
        store.course_tallies(&ctx.actor),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering faculty dashboard data: {}", &e);
            return html_500();
        },
    };

    let my_students: i64 = courses.iter().map(|c| c.enrolled_students).sum();

    let data = json!({
        "counts": counts,
        "courses": courses,
        "my_students": my_students,
        "recent_enrollments": recent,
        "attendance": tallies,
        "is_principal": ctx.actor.role == Role::Principal,
    });
    render_page(&glob, &ctx, "faculty_dashboard", data).await
}

pub async fn students(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<ActionQuery>,
) -> Response {
    log::trace!("faculty::students( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    let store = store_of(&glob).await;

    if let Some(id) = q.wants("delete") {
        let notice = match store.delete_student(&ctx.actor, id).await {
            Ok(true) => Notice::success("Student deleted successfully"),
            Ok(false) => Notice::error("Student not found"),
            Err(e) => workflow_notice(&e, "faculty::students delete"),
        };
        notify(&glob, &ctx, notice).await;
        return redirect("/faculty/students");
    }

    let students = match store.get_student_listings().await {
        Ok(s) => s,
        Err(e) => {
            log::error!("Error retrieving student listings: {}", &e);
            return html_500();
        },
    };

    let data = json!({
        "students": students,
        "may_delete": ctx.actor.may_delete_students(),
    });
    render_page(&glob, &ctx, "faculty_students", data).await
}

async fn student_form_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: StudentForm,
    notice: Option<Notice>,
) -> Response {
    let data = json!({
        "form": form,
        "notice": notice,
    });
    render_page(glob, ctx, "student_form", data).await
}

pub async fn new_student_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("faculty::new_student_page() called by {:?}.", &ctx.actor.uname);

    let form = StudentForm {
        student_id: crate::user::suggest_student_id(crate::today().year()),
        ..Default::default()
    };
    student_form_page(&glob, &ctx, form, None).await
}

pub async fn add_student(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(mut form): Form<StudentForm>,
) -> Response {
    log::trace!("faculty::add_student( {:?} ) called by {:?}.", &form.student_id, &ctx.actor.uname);

    let (min_length, store) = {
        let glob = glob.read().await;
        (glob.min_password_length, glob.data().clone())
    };
    let new = match form.validate_new(min_length) {
        Ok(new) => new,
        Err(msg) => {
            form.password.clear();
            return student_form_page(&glob, &ctx, form, Some(Notice::error(msg))).await;
        },
    };
    let hash = match auth::hash_password(&new.password) {
        Ok(hash) => hash,
        Err(e) => {
            log::error!("{}", &e);
            return html_500();
        },
    };

    match store.insert_student(&ctx.actor, &new, &hash).await {
        Ok(s) => {
            notify(&glob, &ctx, Notice::success(format!(
                "Student added successfully. Student ID: {}, Password: {} (Student will need to change password on first login)",
                &s.student_id, &new.password
            ))).await;
            redirect("/faculty/students")
        },
        Err(e) => {
            let notice = workflow_notice(&e, "faculty::add_student");
            form.password.clear();
            student_form_page(&glob, &ctx, form, Some(notice)).await
        },
    }
}

async fn student_edit_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    id: i64,
    form: StudentForm,
    notice: Option<Notice>,
) -> Response {
    let data = json!({
        "id": id,
        "form": form,
        "notice": notice,
    });
    render_page(glob, ctx, "student_edit", data).await
}

pub async fn edit_student_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Path(id): Path<i64>,
) -> Response {
    log::trace!("faculty::edit_student_page( {} ) called by {:?}.", id, &ctx.actor.uname);

    let store = store_of(&glob).await;
    match store.get_student(id).await {
        Ok(Some(s)) => {
            student_edit_page(&glob, &ctx, id, StudentForm::from_student(&s), None).await
        },
        Ok(None) => {
            notify(&glob, &ctx, Notice::error("Student not found")).await;
            redirect("/faculty/students")
        },
        Err(e) => {
            log::error!("Error retrieving student {}: {}", id, &e);
            html_500()
        },
    }
}

pub async fn edit_student(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Path(id): Path<i64>,
    Form(form): Form<StudentForm>,
) -> Response {
    log::trace!("faculty::edit_student( {} ) called by {:?}.", id, &ctx.actor.uname);

    let details = match form.validate_edit() {
        Ok(d) => d,
        Err(msg) => {
            return student_edit_page(&glob, &ctx, id, form, Some(Notice::error(msg))).await;
        },
    };

    let store = store_of(&glob).await;
    match store.update_student(&ctx.actor, id, &details).await {
        Ok(true) => {
            notify(&glob, &ctx, Notice::success("Student updated successfully")).await;
            redirect("/faculty/students")
        },
        Ok(false) => {
            notify(&glob, &ctx, Notice::error("Student not found")).await;
            redirect("/faculty/students")
        },
        Err(e) => {
            let notice = workflow_notice(&e, "faculty::edit_student");
            student_edit_page(&glob, &ctx, id, form, Some(notice)).await
        },
    }
}

async fn teacher_form_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    form: FacultyForm,
    notice: Option<Notice>,
) -> Response {
    let store = store_of(glob).await;
    let teachers = match store.get_faculty(Some(Role::Teacher)).await {
        Ok(t) => t,
        Err(e) => {
            log::error!("Error retrieving teachers: {}", &e);
            return html_500();
        },
    };

    let data = json!({
        "teachers": teachers,
        "form": form,
        "notice": notice,
    });
    render_page(glob, ctx, "teacher_form", data).await
}

pub async fn new_teacher_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("faculty::new_teacher_page() called by {:?}.", &ctx.actor.uname);

    let form = FacultyForm {
        faculty_id: crate::user::suggest_faculty_id(crate::today().year()),
        ..Default::default()
    };
    teacher_form_page(&glob, &ctx, form, None).await
}

pub async fn add_teacher(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(mut form): Form<FacultyForm>,
) -> Response {
    log::trace!("faculty::add_teacher( {:?} ) called by {:?}.", &form.faculty_id, &ctx.actor.uname);

    form.role.clear();
    let (min_length, store) = {
        let glob = glob.read().await;
        (glob.min_password_length, glob.data().clone())
    };
    let new = match form.validate(Role::Teacher, min_length) {
        Ok(new) => new,
        Err(msg) => {
            form.password.clear();
            return teacher_form_page(&glob, &ctx, form, Some(Notice::error(msg))).await;
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
                "Teacher added successfully. Faculty ID: {}, Password: {} (Teacher will need to change password on first login)",
                &f.faculty_id, &new.password
            ))).await;
            redirect("/faculty/teachers/new")
        },
        Err(e) => {
            let notice = workflow_notice(&e, "faculty::add_teacher");
            form.password.clear();
            teacher_form_page(&glob, &ctx, form, Some(notice)).await
        },
    }
}

async fn courses_page(
    glob: &Arc<RwLock<Glob>>,
    ctx: &Ctx,
    search: &str,
    notice: Option<Notice>,
) -> Response {
    let store = store_of(glob).await;
    let search_term = match search.trim() {
        "" => None,
        s => Some(s),
    };
    let (courses, teachers) = match futures::try_join!(
        store.get_course_listings(&ctx.actor, search_term),
        store.get_faculty(Some(Role::Teacher)),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering course page data: {}", &e);
            return html_500();
        },
    };

    let courses: Vec<serde_json::Value> = courses.iter().map(|c| json!({
        "listing": c,
        "form": CourseForm::from_course(&c.course),
        "editable": ctx.actor.may_edit_course(&c.course),
    })).collect();

    let data = json!({
        "courses": courses,
        "teachers": teachers,
        "search": search,
        "may_reassign": ctx.actor.sees_all_courses(),
        "notice": notice,
    });
    render_page(glob, ctx, "faculty_courses", data).await
}

pub async fn courses(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<SearchQuery>,
) -> Response {
    log::trace!("faculty::courses( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    courses_page(&glob, &ctx, &q.search, None).await
}

pub async fn update_course(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<CourseUpdateForm>,
) -> Response {
    log::trace!("faculty::update_course( {:?} ) called by {:?}.", &form, &ctx.actor.uname);

    let (id, form) = form.split();
    let id = match id {
        Some(id) => id,
        None => {
            return respond_bad_request("Course edit form without a valid course_id.".to_owned());
        },
    };
    let det = match form.validate() {
        Ok(det) => det,
        Err(msg) => {
            return courses_page(&glob, &ctx, "", Some(Notice::error(msg))).await;
        },
    };

    let store = store_of(&glob).await;
    match store.update_course(&ctx.actor, id, &det).await {
        Ok(_) => {
            notify(&glob, &ctx, Notice::success("Course updated successfully")).await;
            redirect("/faculty/courses")
        },
        Err(e) => {
            let notice = workflow_notice(&e, "faculty::update_course");
            courses_page(&glob, &ctx, "", Some(notice)).await
        },
    }
}

/// Courses with their enrollment and attendance figures side by side.
pub async fn overview(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("faculty::overview() called by {:?}.", &ctx.actor.uname);

    let store = store_of(&glob).await;
    let (listings, tallies) = match futures::try_join!(
        store.get_course_listings(&ctx.actor, None),
        store.course_tallies(&ctx.actor),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering course overview data: {}", &e);
            return html_500();
        },
    };

    let courses: Vec<serde_json::Value> = listings.iter().map(|c| {
        let tally = tallies.iter().find(|t| t.course_code == c.course.code);
        json!({
            "listing": c,
            "attendance": tally,
        })
    }).collect();

    render_page(&glob, &ctx, "course_overview", json!({ "courses": courses })).await
}

pub async fn enroll_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<ActionQuery>,
) -> Response {
    log::trace!("faculty::enroll_page( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    if let Some(notice) = enrollment_action(&glob, &ctx, &q).await {
        notify(&glob, &ctx, notice).await;
        return redirect("/faculty/enroll");
    }

    enroll_form_page(&glob, &ctx, &EnrollForm::default(), None).await
}

pub async fn enroll(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<EnrollForm>,
) -> Response {
    log::trace!("faculty::enroll( {:?} ) called by {:?}.", &form, &ctx.actor.uname);

    enroll_submitted(&glob, &ctx, form).await
}

pub async fn attendance_page(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Query(q): Query<AttendanceQuery>,
) -> Response {
    log::trace!("faculty::attendance_page( {:?} ) called by {:?}.", &q, &ctx.actor.uname);

    let day = match q.date.trim() {
        "" => crate::today(),
        s => match crate::parse_date(s) {
            Some(d) => d,
            None => {
                return respond_bad_request(format!("{:?} is not a valid date.", s));
            },
        },
    };

    let store = store_of(&glob).await;
    let courses = match store.courses_for(&ctx.actor).await {
        Ok(c) => c,
        Err(e) => {
            log::error!("Error retrieving courses for {:?}: {}", &ctx.actor.uname, &e);
            return html_500();
        },
    };

    let course_code = q.course.trim();
    let mut notice = None;
    let roster = if course_code.is_empty() {
        Vec::new()
    } else {
        match store.roster(&ctx.actor, course_code, day).await {
            Ok(r) => r,
            Err(e) => {
                notice = Some(workflow_notice(&e, "faculty::attendance_page"));
                Vec::new()
            },
        }
    };

    let data = json!({
        "courses": courses,
        "course_code": course_code,
        "date": crate::format_date(&day),
        "roster": roster,
        "statuses": [Status::Present, Status::Absent, Status::Late],
        "notice": notice,
    });
    render_page(&glob, &ctx, "attendance", data).await
}

pub async fn mark_attendance(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    log::trace!(
        "faculty::mark_attendance( [ {} fields ] ) called by {:?}.",
        fields.len(), &ctx.actor.uname
    );

    let course_code = field(&fields, "course_code").unwrap_or("");
    let date = field(&fields, "date").unwrap_or("");
    if course_code.is_empty() || date.is_empty() {
        return respond_bad_request("Attendance form needs a course_code and date.".to_owned());
    }
    let back = format!(
        "/faculty/attendance?course={}&date={}",
        urlencoding::encode(course_code), urlencoding::encode(date)
    );

    let day = match crate::parse_date(date) {
        Some(d) => d,
        None => {
            notify(&glob, &ctx, Notice::error(format!("{:?} is not a valid date.", date))).await;
            return redirect(&back);
        },
    };
    let entries = match entries_from_form(&fields) {
        Ok(e) => e,
        Err(msg) => {
            notify(&glob, &ctx, Notice::error(msg)).await;
            return redirect(&back);
        },
    };
    if entries.is_empty() {
        notify(&glob, &ctx, Notice::warning("No attendance entries were submitted")).await;
        return redirect(&back);
    }

    let store = store_of(&glob).await;
    let notice = match store.mark_attendance(&ctx.actor, course_code, day, &entries).await {
        Ok(n) => Notice::success(format!(
            "Attendance marked successfully for {} students", n
        )),
        Err(e) => workflow_notice(&e, "faculty::mark_attendance"),
    };
    notify(&glob, &ctx, notice).await;
    redirect(&back)
}

/// Mark one student for today, for the roster page's quick buttons.
pub async fn mark_one(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Json(req): Json<MarkOne>,
) -> Response {
    log::trace!("faculty::mark_one( {:?} ) called by {:?}.", &req, &ctx.actor.uname);

    let status: Status = match req.status.trim().parse() {
        Ok(s) => s,
        Err(msg) => {
            let data = json!({ "success": false, "message": msg });
            return (StatusCode::BAD_REQUEST, Json(data)).into_response();
        },
    };

    let mut entries = std::collections::BTreeMap::new();
    entries.insert(req.student_id.trim().to_owned(), status);

    let store = store_of(&glob).await;
    let (code, message) = match store.mark_attendance(
        &ctx.actor, req.course_code.trim(), crate::today(), &entries
    ).await {
        Ok(_) => (StatusCode::OK, json!({
            "success": true,
            "message": "Attendance marked successfully",
        })),
        Err(e) => {
            e.log("faculty::mark_one");
            let code = match &e {
                WorkflowError::Forbidden => StatusCode::FORBIDDEN,
                WorkflowError::NoSuchCourse | WorkflowError::NotEnrolled(_) => {
                    StatusCode::BAD_REQUEST
                },
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, json!({ "success": false, "message": e.to_string() }))
        },
    };

    (code, Json(message)).into_response()
}

pub async fn stats(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("faculty::stats() called by {:?}.", &ctx.actor.uname);

    let store = store_of(&glob).await;
    match store.school_stats(&ctx.actor).await {
        Ok(stats) => render_page(&glob, &ctx, "stats", json!({ "stats": stats })).await,
        Err(e) => {
            let notice = workflow_notice(&e, "faculty::stats");
            notify(&glob, &ctx, notice).await;
            redirect(ctx.actor.role.dashboard())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_update_form_splits() {
        let form = CourseUpdateForm {
            course_id: " 12 ".to_owned(),
            course_code: "MTH101".to_owned(),
            course_name: "Algebra".to_owned(),
            credits: "4".to_owned(),
            ..Default::default()
        };
        let (id, form) = form.split();
        assert_eq!(id, Some(12));
        let det = form.validate().unwrap();
        assert_eq!(det.code, "MTH101");
        assert_eq!(det.credits, 4);

        let (id, _) = CourseUpdateForm::default().split();
        assert_eq!(id, None);
    }

    #[test]
    fn form_fields_by_name() {
        let fields = vec![
            ("course_code".to_owned(), " MTH101 ".to_owned()),
            ("att:STU20240001".to_owned(), "present".to_owned()),
        ];
        assert_eq!(field(&fields, "course_code"), Some("MTH101"));
        assert_eq!(field(&fields, "date"), None);
    }
}
