/*!
`Store` methods for courses.
*/
use tokio_postgres::{Row, types::ToSql};

use super::{DbError, Store, WorkflowError, is_foreign_key_violation, is_unique_violation};
use crate::course::{Course, CourseDetails, CourseListing};
use crate::user::{Actor, Role};

const COURSE_COLUMNS: &str = "id, code, name, description, credits, semester,
    department, instructor";

pub(super) fn course_from_row(row: &Row) -> Result<Course, DbError> {
    Ok(Course {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        credits: row.try_get("credits")?,
        semester: row.try_get("semester")?,
        department: row.try_get("department")?,
        instructor: row.try_get("instructor")?,
    })
}

fn course_write_error(e: tokio_postgres::Error) -> WorkflowError {
    if is_unique_violation(&e) {
        WorkflowError::Taken("Course code already exists".to_owned())
    } else if is_foreign_key_violation(&e) {
        WorkflowError::NoSuchInstructor
    } else {
        e.into()
    }
}

impl Store {
    pub async fn get_course_by_code(&self, code: &str) -> Result<Option<Course>, DbError> {
        log::trace!("Store::get_course_by_code( {:?} ) called.", code);

        let query = format!("SELECT {} FROM courses WHERE code = $1", COURSE_COLUMNS);
        let client = self.connect().await?;
        match client.query_opt(&query, &[&code]).await? {
            Some(row) => Ok(Some(course_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /**
    The courses `actor` gets to see, ordered by name.

    Admins and principals see every course, teachers the courses they
    instruct, and students the courses they're actively enrolled in.
    */
    pub async fn courses_for(&self, actor: &Actor) -> Result<Vec<Course>, DbError> {
        log::trace!("Store::courses_for( {:?} ) called.", &actor.uname);

        let client = self.connect().await?;
        let rows = match actor.role {
            Role::Admin | Role::Principal => {
                let query = format!(
                    "SELECT {} FROM courses ORDER BY name, code",
                    COURSE_COLUMNS
                );
                client.query(&query, &[]).await?
            },
            Role::Teacher => {
                let query = format!(
                    "SELECT {} FROM courses WHERE instructor = $1 ORDER BY name, code",
                    COURSE_COLUMNS
                );
                client.query(&query, &[&actor.key]).await?
            },
            Role::Student => {
                let query = format!(
                    "SELECT {} FROM courses WHERE code IN (
                        SELECT course FROM enrollments
                        WHERE student = $1 AND status = 'active'
                    ) ORDER BY name, code",
                    COURSE_COLUMNS
                );
                client.query(&query, &[&actor.key]).await?
            },
        };

        rows.iter().map(course_from_row).collect()
    }

    /**
    Courses visible to `actor` (as with `courses_for()`), joined with their
    instructor's name and a summary of who is actively enrolled.

    If `search` is given, only courses whose code, name, or description
    contain it (case-insensitively) are returned.
    */
    pub async fn get_course_listings(
        &self,
        actor: &Actor,
        search: Option<&str>,
    ) -> Result<Vec<CourseListing>, DbError> {
        log::trace!(
            "Store::get_course_listings( {:?}, {:?} ) called.",
            &actor.uname, &search
        );

        let pattern = search.map(|s| format!("%{}%", s));
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        match actor.role {
            Role::Admin | Role::Principal => {},
            Role::Teacher => {
                params.push(&actor.key);
                conditions.push(format!("courses.instructor = ${}", params.len()));
            },
            Role::Student => {
                params.push(&actor.key);
                conditions.push(format!(
                    "courses.code IN (SELECT course FROM enrollments
                        WHERE student = ${} AND status = 'active')",
                    params.len()
                ));
            },
        }
        if let Some(pattern) = pattern.as_ref() {
            params.push(pattern);
            let n = params.len();
            conditions.push(format!(
                "(courses.code ILIKE ${n} OR courses.name ILIKE ${n}
                    OR courses.description ILIKE ${n})"
            ));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {},
                f.full_name AS instructor_name,
                COALESCE(e.n, 0) AS enrolled_students,
                COALESCE(e.names, '') AS student_names
            FROM courses
            LEFT JOIN (
                SELECT faculty_id, full_name FROM faculty
            ) f ON f.faculty_id = courses.instructor
            LEFT JOIN (
                SELECT en.course, COUNT(*) AS n,
                    string_agg(s.full_name, ', ' ORDER BY s.full_name) AS names
                FROM enrollments en JOIN students s ON s.student_id = en.student
                WHERE en.status = 'active'
                GROUP BY en.course
            ) e ON e.course = courses.code
            {}
            ORDER BY name, code",
            COURSE_COLUMNS, &where_clause
        );

        let client = self.connect().await?;
        let rows = client.query(&query, &params).await?;

        let mut listings = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            listings.push(CourseListing {
                course: course_from_row(row)?,
                instructor_name: row.try_get("instructor_name")?,
                enrolled_students: row.try_get("enrolled_students")?,
                student_names: row.try_get("student_names")?,
            });
        }
        Ok(listings)
    }

    pub async fn insert_course(
        &self,
        actor: &Actor,
        det: &CourseDetails,
    ) -> Result<Course, WorkflowError> {
        log::trace!(
            "Store::insert_course( {:?}, {:?} ) called.",
            &actor.uname, det
        );

        if !actor.may_add_courses() {
            return Err(WorkflowError::Forbidden);
        }

        let query = format!(
            "INSERT INTO courses (
                code, name, description, credits, semester, department, instructor
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}",
            COURSE_COLUMNS
        );

        let client = self.connect().await?;
        let row = client.query_one(&query, &[
            &det.code, &det.name, &det.description, &det.credits,
            &det.semester, &det.department, &det.instructor,
        ]).await.map_err(course_write_error)?;

        Ok(course_from_row(&row)?)
    }

    /**
    Update a course's details.

    Teachers may only edit the courses they instruct, and can't reassign
    them; the instructor in `det` is ignored unless `actor` is an admin or
    principal. A changed course code carries over to the course's
    enrollments and attendance records.
    */
    pub async fn update_course(
        &self,
        actor: &Actor,
        id: i64,
        det: &CourseDetails,
    ) -> Result<Course, WorkflowError> {
        log::trace!(
            "Store::update_course( {:?}, {}, {:?} ) called.",
            &actor.uname, id, det
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let query = format!(
            "SELECT {} FROM courses WHERE id = $1 FOR UPDATE",
            COURSE_COLUMNS
        );
        let current = match t.query_opt(&query, &[&id]).await? {
            Some(row) => course_from_row(&row)?,
            None => { return Err(WorkflowError::NoSuchCourse); },
        };
        if !actor.may_edit_course(&current) {
            return Err(WorkflowError::Forbidden);
        }

        let instructor = if actor.sees_all_courses() {
            &det.instructor
        } else {
            &current.instructor
        };

        let query = format!(
            "UPDATE courses SET
                code = $1, name = $2, description = $3, credits = $4,
                semester = $5, department = $6, instructor = $7
            WHERE id = $8
            RETURNING {}",
            COURSE_COLUMNS
        );
        let row = t.query_one(&query, &[
            &det.code, &det.name, &det.description, &det.credits,
            &det.semester, &det.department, instructor, &id,
        ]).await.map_err(course_write_error)?;
        let course = course_from_row(&row)?;

        t.commit().await?;
        Ok(course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::*;

    use serial_test::serial;

    fn details(code: &str, instructor: Option<&str>) -> CourseDetails {
        CourseDetails {
            code: code.to_owned(),
            name: format!("Course {}", code),
            description: Some("Numbers and such".to_owned()),
            credits: 4,
            semester: None,
            department: None,
            instructor: instructor.map(str::to_owned),
        }
    }

    #[tokio::test]
    #[serial]
    async fn insert_and_scope_courses() {
        let db = test_store().await;
        let admin = admin_actor();
        let t1 = add_teacher(&db, "TCH2024001").await;
        let t2 = add_teacher(&db, "TCH2024002").await;
        let principal = add_faculty(&db, "TCH2020001", Role::Principal).await;

        db.insert_course(&admin, &details("MTH101", Some("TCH2024001"))).await.unwrap();
        db.insert_course(&admin, &details("PHY101", Some("TCH2024002"))).await.unwrap();
        db.insert_course(&admin, &details("ART101", None)).await.unwrap();

        assert!(matches!(
            db.insert_course(&admin, &details("MTH101", None)).await,
            Err(WorkflowError::Taken(_))
        ));
        assert!(matches!(
            db.insert_course(&admin, &details("BIO101", Some("TCH1999999"))).await,
            Err(WorkflowError::NoSuchInstructor)
        ));
        assert!(matches!(
            db.insert_course(&principal, &details("BIO101", None)).await,
            Err(WorkflowError::Forbidden)
        ));

        assert_eq!(db.courses_for(&admin).await.unwrap().len(), 3);
        assert_eq!(db.courses_for(&principal).await.unwrap().len(), 3);
        let mine = db.courses_for(&t1).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].code, "MTH101");
        assert_eq!(db.courses_for(&t2).await.unwrap()[0].code, "PHY101");

        let found = db.get_course_listings(&principal, Some("phy")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instructor_name.as_deref(), Some("Faculty TCH2024002"));
        assert_eq!(found[0].enrolled_students, 0);

        let found = db.get_course_listings(&t1, Some("numbers")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].course.code, "MTH101");
        assert!(db.get_course_listings(&t1, Some("PHY")).await.unwrap().is_empty());

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn teachers_edit_only_their_courses() {
        let db = test_store().await;
        let t1 = add_teacher(&db, "TCH2024001").await;
        let t2 = add_teacher(&db, "TCH2024002").await;
        let principal = add_faculty(&db, "TCH2020001", Role::Principal).await;
        let crs = add_course(&db, "MTH101", Some(&t1)).await;

        assert!(matches!(
            db.update_course(&t2, crs.id, &details("MTH102", None)).await,
            Err(WorkflowError::Forbidden)
        ));

        // Teachers can't hand their course off.
        let updated = db.update_course(&t1, crs.id, &details("MTH102", Some("TCH2024002")))
            .await.unwrap();
        assert_eq!(updated.code, "MTH102");
        assert_eq!(updated.instructor.as_deref(), Some("TCH2024001"));

        let updated = db.update_course(&principal, crs.id, &details("MTH102", Some("TCH2024002")))
            .await.unwrap();
        assert_eq!(updated.instructor.as_deref(), Some("TCH2024002"));

        assert!(matches!(
            db.update_course(&principal, crs.id + 100, &details("MTH103", None)).await,
            Err(WorkflowError::NoSuchCourse)
        ));

        db.nuke_database().await.unwrap();
    }
}
