/*!
The student's single page.
*/
use std::sync::Arc;

use axum::{extract::Extension, response::Response};
use serde_json::json;
use tokio::sync::RwLock;

use crate::attendance::AttendanceTally;
use crate::config::Glob;
use super::*;

const RECENT_ATTENDANCE: i64 = 10;

pub async fn dashboard(
    Extension(ctx): Extension<Ctx>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("student::dashboard() called by {:?}.", &ctx.actor.uname);

    let store = store_of(&glob).await;
    let student = match store.get_student(ctx.actor.id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            log::warn!("Session for student {:?} outlived its record.", &ctx.actor.uname);
            glob.write().await.sessions.close(&ctx.key);
            return redirect("/login");
        },
        Err(e) => {
            log::error!("Error retrieving student {:?}: {}", &ctx.actor.uname, &e);
            return html_500();
        },
    };

    let (enrollments, recent, tallies) = match futures::try_join!(
        store.enrollments_of(&student.student_id),
        store.recent_attendance(&student.student_id, RECENT_ATTENDANCE),
        store.student_tallies(&student.student_id),
    ) {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error gathering dashboard data for {:?}: {}", &student.student_id, &e);
            return html_500();
        },
    };

    let mut overall = AttendanceTally::default();
    for ca in tallies.iter() {
        overall += ca.tally;
    }
    let total_credits: i64 = enrollments.iter().map(|e| e.credits as i64).sum();

    let data = json!({
        "student": student,
        "enrollments": enrollments,
        "total_credits": total_credits,
        "recent_attendance": recent,
        "course_attendance": tallies,
        "overall": overall,
    });
    render_page(&glob, &ctx, "student_dashboard", data).await
}
