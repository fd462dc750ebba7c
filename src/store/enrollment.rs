/*!
Enrolling students in courses.

A student may have any number of inactive enrollments in a course, but at
most one active one; the `enrollments_one_active` index enforces this, and
`enroll()` turns a violation of it into `WorkflowError::DuplicateEnrollment`.
*/
use tokio_postgres::{Row, types::ToSql};

use super::{DbError, Store, WorkflowError, is_unique_violation};
use crate::course::{Enrollment, EnrollmentListing, EnrollmentStatus};
use crate::user::{Actor, Role};

const ENROLLMENT_COLUMNS: &str = "id, student, course, enrolled, status";

const LISTING_SELECT: &str = "SELECT
        en.id, en.student, en.course, en.enrolled, en.status,
        s.full_name AS student_name, s.email AS student_email,
        c.name AS course_name, c.credits
    FROM enrollments en
    JOIN students s ON s.student_id = en.student
    JOIN courses c ON c.code = en.course";

fn enrollment_from_row(row: &Row) -> Result<Enrollment, DbError> {
    let status: &str = row.try_get("status")?;
    Ok(Enrollment {
        id: row.try_get("id")?,
        student: row.try_get("student")?,
        course: row.try_get("course")?,
        enrolled: row.try_get("enrolled")?,
        status: status.parse()?,
    })
}

fn listing_from_row(row: &Row) -> Result<EnrollmentListing, DbError> {
    Ok(EnrollmentListing {
        enrollment: enrollment_from_row(row)?,
        student_name: row.try_get("student_name")?,
        student_email: row.try_get("student_email")?,
        course_name: row.try_get("course_name")?,
        credits: row.try_get("credits")?,
    })
}

impl Store {
    /**
    Enroll student `student_id` in course `course_code`, dated today.

    Fails with `Forbidden` if `actor` may not enroll students in that
    course, and with `DuplicateEnrollment` if the student already has an
    active enrollment in it.
    */
    pub async fn enroll(
        &self,
        actor: &Actor,
        student_id: &str,
        course_code: &str,
    ) -> Result<Enrollment, WorkflowError> {
        log::trace!(
            "Store::enroll( {:?}, {:?}, {:?} ) called.",
            &actor.uname, student_id, course_code
        );

        if actor.role == Role::Student {
            return Err(WorkflowError::Forbidden);
        }

        let course = self.get_course_by_code(course_code).await?
            .ok_or(WorkflowError::NoSuchCourse)?;
        if !actor.may_enroll_into(&course) {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        if client.query_opt(
            "SELECT FROM students WHERE student_id = $1",
            &[&student_id]
        ).await?.is_none() {
            return Err(WorkflowError::NoSuchStudent);
        }

        let query = format!(
            "INSERT INTO enrollments (student, course, enrolled, status)
                VALUES ($1, $2, $3, $4)
                RETURNING {}",
            ENROLLMENT_COLUMNS
        );
        let status = EnrollmentStatus::Active.to_string();
        match client.query_one(
            &query,
            &[&student_id, &course.code, &crate::today(), &status]
        ).await {
            Ok(row) => Ok(enrollment_from_row(&row)?),
            Err(e) if is_unique_violation(&e) => Err(WorkflowError::DuplicateEnrollment),
            Err(e) => Err(e.into()),
        }
    }

    /**
    Mark an enrollment inactive.

    Returns whether anything changed: unenrolling an already-inactive (or
    nonexistent) enrollment succeeds and returns `false`.
    */
    pub async fn unenroll(&self, actor: &Actor, enrollment_id: i64) -> Result<bool, WorkflowError> {
        log::trace!(
            "Store::unenroll( {:?}, {} ) called.",
            &actor.uname, enrollment_id
        );

        if actor.role == Role::Student {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        let course_code: String = match client.query_opt(
            "SELECT course FROM enrollments WHERE id = $1",
            &[&enrollment_id]
        ).await? {
            Some(row) => row.try_get("course").map_err(DbError::from)?,
            None => { return Ok(false); },
        };
        let course = self.get_course_by_code(&course_code).await?
            .ok_or(WorkflowError::NoSuchCourse)?;
        if !actor.may_enroll_into(&course) {
            return Err(WorkflowError::Forbidden);
        }

        let n = client.execute(
            "UPDATE enrollments SET status = $1 WHERE id = $2 AND status = $3",
            &[
                &EnrollmentStatus::Inactive.to_string(),
                &enrollment_id,
                &EnrollmentStatus::Active.to_string(),
            ]
        ).await?;

        Ok(n > 0)
    }

    /// Remove an enrollment row entirely. Returns `false` if there was no
    /// such row.
    pub async fn delete_enrollment(
        &self,
        actor: &Actor,
        enrollment_id: i64,
    ) -> Result<bool, WorkflowError> {
        log::trace!(
            "Store::delete_enrollment( {:?}, {} ) called.",
            &actor.uname, enrollment_id
        );

        if !actor.may_delete_enrollments() {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        let n = client.execute(
            "DELETE FROM enrollments WHERE id = $1",
            &[&enrollment_id]
        ).await?;

        Ok(n > 0)
    }

    pub async fn get_enrollment(&self, enrollment_id: i64) -> Result<Option<Enrollment>, DbError> {
        log::trace!("Store::get_enrollment( {} ) called.", enrollment_id);

        let query = format!(
            "SELECT {} FROM enrollments WHERE id = $1",
            ENROLLMENT_COLUMNS
        );
        let client = self.connect().await?;
        match client.query_opt(&query, &[&enrollment_id]).await? {
            Some(row) => Ok(Some(enrollment_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /**
    The most recent `limit` enrollments (of either status) in courses
    `actor` can see, newest first.
    */
    pub async fn get_enrollment_listings(
        &self,
        actor: &Actor,
        limit: i64,
    ) -> Result<Vec<EnrollmentListing>, DbError> {
        log::trace!(
            "Store::get_enrollment_listings( {:?}, {} ) called.",
            &actor.uname, limit
        );

        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&limit];
        let scope = match actor.role {
            Role::Admin | Role::Principal => "",
            Role::Teacher => {
                params.push(&actor.key);
                "WHERE c.instructor = $2"
            },
            Role::Student => {
                params.push(&actor.key);
                "WHERE en.student = $2"
            },
        };

        let query = format!(
            "{} {} ORDER BY en.enrolled DESC, en.id DESC LIMIT $1",
            LISTING_SELECT, scope
        );
        let client = self.connect().await?;
        let rows = client.query(&query, &params).await?;
        rows.iter().map(listing_from_row).collect()
    }

    /// A student's active enrollments, ordered by course name.
    pub async fn enrollments_of(&self, student_id: &str) -> Result<Vec<EnrollmentListing>, DbError> {
        log::trace!("Store::enrollments_of( {:?} ) called.", student_id);

        let query = format!(
            "{} WHERE en.student = $1 AND en.status = 'active' ORDER BY c.name",
            LISTING_SELECT
        );
        let client = self.connect().await?;
        let rows = client.query(&query, &[&student_id]).await?;
        rows.iter().map(listing_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::*;

    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn enroll_twice_is_duplicate() {
        let db = test_store().await;
        let teacher = add_teacher(&db, "TCH2024001").await;
        add_course(&db, "MTH101", Some(&teacher)).await;
        let stu = add_student(&db, &teacher, "STU20240001").await;

        let first = db.enroll(&teacher, &stu.student_id, "MTH101").await.unwrap();
        assert_eq!(first.status, EnrollmentStatus::Active);
        assert!(matches!(
            db.enroll(&teacher, &stu.student_id, "MTH101").await,
            Err(WorkflowError::DuplicateEnrollment)
        ));

        let mine = db.enrollments_of(&stu.student_id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].course_name, "Course MTH101");

        // After unenrolling, the student may enroll again.
        assert!(db.unenroll(&teacher, first.id).await.unwrap());
        assert!(!db.unenroll(&teacher, first.id).await.unwrap());
        assert!(!db.unenroll(&teacher, first.id + 100).await.unwrap());
        assert!(db.enrollments_of(&stu.student_id).await.unwrap().is_empty());

        let second = db.enroll(&teacher, &stu.student_id, "MTH101").await.unwrap();
        assert_ne!(first.id, second.id);
        let listings = db.get_enrollment_listings(&teacher, 10).await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].enrollment.id, second.id);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn enrollment_permissions() {
        let db = test_store().await;
        let t1 = add_teacher(&db, "TCH2024001").await;
        let t2 = add_teacher(&db, "TCH2024002").await;
        let principal = add_faculty(&db, "TCH2020001", Role::Principal).await;
        add_course(&db, "MTH101", Some(&t1)).await;
        let stu = add_student(&db, &t1, "STU20240001").await;

        assert!(matches!(
            db.enroll(&t2, &stu.student_id, "MTH101").await,
            Err(WorkflowError::Forbidden)
        ));
        assert!(matches!(
            db.enroll(&stu.actor(), &stu.student_id, "MTH101").await,
            Err(WorkflowError::Forbidden)
        ));
        assert!(matches!(
            db.enroll(&t1, "STU19990001", "MTH101").await,
            Err(WorkflowError::NoSuchStudent)
        ));
        assert!(matches!(
            db.enroll(&t1, &stu.student_id, "NOPE999").await,
            Err(WorkflowError::NoSuchCourse)
        ));

        let enr = db.enroll(&principal, &stu.student_id, "MTH101").await.unwrap();
        assert!(matches!(
            db.unenroll(&t2, enr.id).await,
            Err(WorkflowError::Forbidden)
        ));
        assert!(db.get_enrollment_listings(&t2, 10).await.unwrap().is_empty());

        assert!(matches!(
            db.delete_enrollment(&t1, enr.id).await,
            Err(WorkflowError::Forbidden)
        ));
        assert!(db.delete_enrollment(&principal, enr.id).await.unwrap());
        assert!(!db.delete_enrollment(&admin_actor(), enr.id).await.unwrap());
        assert!(db.get_enrollment(enr.id).await.unwrap().is_none());

        db.nuke_database().await.unwrap();
    }
}
