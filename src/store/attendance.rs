/*!
Recording and summarizing attendance.
*/
use std::collections::{BTreeMap, HashSet};

use time::Date;
use tokio_postgres::{Row, types::Type};

use super::{DbError, Store, WorkflowError};
use crate::attendance::{
    AttendanceRecord, AttendanceTally, CourseAttendance, RosterEntry, Status,
};
use crate::user::{Actor, Role};

const UPSERT: &str = "INSERT INTO attendance (student, course, day, status, recorded_by)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (student, course, day) DO UPDATE
        SET status = EXCLUDED.status, recorded_by = EXCLUDED.recorded_by";

// Selects per-course counts; expects `a` to be the (left-joined) attendance.
const TALLY_COLUMNS: &str = "c.code, c.name,
    COUNT(DISTINCT a.student) AS students_tracked,
    COUNT(*) FILTER (WHERE a.status = 'present') AS present,
    COUNT(*) FILTER (WHERE a.status = 'absent') AS absent,
    COUNT(*) FILTER (WHERE a.status = 'late') AS late";

fn course_attendance_from_row(row: &Row) -> Result<CourseAttendance, DbError> {
    Ok(CourseAttendance {
        course_code: row.try_get("code")?,
        course_name: row.try_get("name")?,
        students_tracked: row.try_get("students_tracked")?,
        tally: AttendanceTally {
            present: row.try_get("present")?,
            absent: row.try_get("absent")?,
            late: row.try_get("late")?,
        },
    })
}

impl Store {
    /**
    Record the statuses in `entries` (keyed by student id) for course
    `course_code` on `day`, replacing whatever was recorded before.

    Either every entry is written or none is. Only the teacher of the course
    may do this (`Forbidden` otherwise), and every student named must be
    actively enrolled in it (`NotEnrolled` otherwise). Returns the number
    of records written.
    */
    pub async fn mark_attendance(
        &self,
        actor: &Actor,
        course_code: &str,
        day: Date,
        entries: &BTreeMap<String, Status>,
    ) -> Result<usize, WorkflowError> {
        log::trace!(
            "Store::mark_attendance( {:?}, {:?}, {}, [ {} entries ] ) called.",
            &actor.uname, course_code, &day, entries.len()
        );

        let course = self.get_course_by_code(course_code).await?
            .ok_or(WorkflowError::NoSuchCourse)?;
        if !actor.may_mark_attendance_for(&course) {
            return Err(WorkflowError::Forbidden);
        }
        if entries.is_empty() {
            return Ok(0);
        }

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let student_ids: Vec<&str> = entries.keys().map(|k| k.as_str()).collect();
        let enrolled: HashSet<String> = t.query(
            "SELECT student FROM enrollments
                WHERE course = $1 AND status = 'active' AND student = ANY($2)",
            &[&course.code, &student_ids]
        ).await?
            .iter()
            .map(|row| row.try_get("student"))
            .collect::<Result<_, _>>()
            .map_err(DbError::from)?;

        let strays: Vec<String> = student_ids.iter()
            .filter(|sid| !enrolled.contains(**sid))
            .map(|sid| sid.to_string())
            .collect();
        if !strays.is_empty() {
            return Err(WorkflowError::NotEnrolled(strays));
        }

        let upsert = t.prepare_typed(
            UPSERT,
            &[Type::TEXT, Type::TEXT, Type::DATE, Type::TEXT, Type::TEXT]
        ).await.map_err(|e| WorkflowError::AttendanceWriteFailed(
            DbError::from(e).annotate("Error preparing statement").to_string()
        ))?;

        // BTreeMap iteration means rows are written in student id order.
        let mut n_written: usize = 0;
        for (student_id, status) in entries.iter() {
            if let Err(e) = t.execute(
                &upsert,
                &[student_id, &course.code, &day, &status.to_string(), &actor.key]
            ).await {
                let err = DbError::from(e)
                    .annotate(&format!("Error recording {} for {}", status, student_id));
                return Err(WorkflowError::AttendanceWriteFailed(err.to_string()));
            }
            n_written += 1;
        }

        t.commit().await.map_err(|e| WorkflowError::AttendanceWriteFailed(
            DbError::from(e).annotate("Error committing transaction").to_string()
        ))?;

        log::trace!("    ...{} attendance records written.", n_written);
        Ok(n_written)
    }

    /**
    The students actively enrolled in `course_code`, ordered by name, each
    with the status recorded for them on `day` (if any).
    */
    pub async fn roster(
        &self,
        actor: &Actor,
        course_code: &str,
        day: Date,
    ) -> Result<Vec<RosterEntry>, WorkflowError> {
        log::trace!(
            "Store::roster( {:?}, {:?}, {} ) called.",
            &actor.uname, course_code, &day
        );

        let course = self.get_course_by_code(course_code).await?
            .ok_or(WorkflowError::NoSuchCourse)?;
        if !actor.may_mark_attendance_for(&course) {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT s.student_id, s.full_name, en.enrolled, a.status
                FROM enrollments en
                JOIN students s ON s.student_id = en.student
                LEFT JOIN attendance a
                    ON a.student = en.student AND a.course = en.course AND a.day = $2
                WHERE en.course = $1 AND en.status = 'active'
                ORDER BY s.full_name, s.student_id",
            &[&course.code, &day]
        ).await?;

        let mut roster = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let status: Option<&str> = row.try_get("status").map_err(DbError::from)?;
            let status = match status {
                Some(s) => Some(s.parse::<Status>().map_err(DbError::from)?),
                None => None,
            };
            roster.push(RosterEntry {
                student_id: row.try_get("student_id").map_err(DbError::from)?,
                full_name: row.try_get("full_name").map_err(DbError::from)?,
                enrolled: row.try_get("enrolled").map_err(DbError::from)?,
                status,
            });
        }

        Ok(roster)
    }

    /**
    Attendance summaries for each course `actor` can see: every course for
    admins and principals, their own courses for teachers, and, for
    students, their own records in each course they're enrolled in.
    */
    pub async fn course_tallies(&self, actor: &Actor) -> Result<Vec<CourseAttendance>, DbError> {
        log::trace!("Store::course_tallies( {:?} ) called.", &actor.uname);

        let client = self.connect().await?;
        let rows = match actor.role {
            Role::Admin | Role::Principal => {
                let query = format!(
                    "SELECT {} FROM courses c
                        LEFT JOIN attendance a ON a.course = c.code
                        GROUP BY c.code, c.name
                        ORDER BY c.name, c.code",
                    TALLY_COLUMNS
                );
                client.query(&query, &[]).await?
            },
            Role::Teacher => {
                let query = format!(
                    "SELECT {} FROM courses c
                        LEFT JOIN attendance a ON a.course = c.code
                        WHERE c.instructor = $1
                        GROUP BY c.code, c.name
                        ORDER BY c.name, c.code",
                    TALLY_COLUMNS
                );
                client.query(&query, &[&actor.key]).await?
            },
            Role::Student => {
                return self.student_tallies(&actor.key).await;
            },
        };

        rows.iter().map(course_attendance_from_row).collect()
    }

    /// One student's attendance in each course they're actively enrolled in.
    pub async fn student_tallies(&self, student_id: &str) -> Result<Vec<CourseAttendance>, DbError> {
        log::trace!("Store::student_tallies( {:?} ) called.", student_id);

        let query = format!(
            "SELECT {} FROM enrollments en
                JOIN courses c ON c.code = en.course
                LEFT JOIN attendance a
                    ON a.course = en.course AND a.student = en.student
                WHERE en.student = $1 AND en.status = 'active'
                GROUP BY c.code, c.name
                ORDER BY c.name, c.code",
            TALLY_COLUMNS
        );
        let client = self.connect().await?;
        let rows = client.query(&query, &[&student_id]).await?;
        rows.iter().map(course_attendance_from_row).collect()
    }

    /// A student's most recent `limit` attendance records, newest first.
    pub async fn recent_attendance(
        &self,
        student_id: &str,
        limit: i64,
    ) -> Result<Vec<AttendanceRecord>, DbError> {
        log::trace!("Store::recent_attendance( {:?}, {} ) called.", student_id, limit);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT a.course, c.name, a.day, a.status
                FROM attendance a JOIN courses c ON c.code = a.course
                WHERE a.student = $1
                ORDER BY a.day DESC, c.name
                LIMIT $2",
            &[&student_id, &limit]
        ).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let status: &str = row.try_get("status")?;
            records.push(AttendanceRecord {
                course_code: row.try_get("course")?,
                course_name: row.try_get("name")?,
                day: row.try_get("day")?,
                status: status.parse()?,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::*;
    use crate::user::Student;

    use float_cmp::approx_eq;
    use serial_test::serial;
    use time::macros::date;

    struct Fixture {
        teacher: Actor,
        other_teacher: Actor,
        principal: Actor,
        students: Vec<Student>,
        outsider: Student,
    }

    async fn setup(db: &Store) -> Fixture {
        let teacher = add_teacher(db, "TCH2024001").await;
        let other_teacher = add_teacher(db, "TCH2024002").await;
        let principal = add_faculty(db, "TCH2020001", Role::Principal).await;
        add_course(db, "MTH101", Some(&teacher)).await;
        add_course(db, "PHY101", Some(&other_teacher)).await;

        let mut students = Vec::new();
        for sid in ["STU20240001", "STU20240002", "STU20240003"] {
            let s = add_student(db, &teacher, sid).await;
            db.enroll(&teacher, &s.student_id, "MTH101").await.unwrap();
            students.push(s);
        }
        let outsider = add_student(db, &teacher, "STU20240009").await;

        Fixture { teacher, other_teacher, principal, students, outsider }
    }

    fn entries(pairs: &[(&Student, Status)]) -> BTreeMap<String, Status> {
        pairs.iter()
            .map(|(s, st)| (s.student_id.clone(), *st))
            .collect()
    }

    #[tokio::test]
    #[serial]
    async fn resubmission_replaces_statuses() {
        let db = test_store().await;
        let fx = setup(&db).await;
        let day = date!(2024 - 09 - 02);
        let [a, b, c] = [&fx.students[0], &fx.students[1], &fx.students[2]];

        let n = db.mark_attendance(&fx.teacher, "MTH101", day, &entries(&[
            (a, Status::Present), (b, Status::Absent), (c, Status::Late),
        ])).await.unwrap();
        assert_eq!(n, 3);

        db.mark_attendance(&fx.teacher, "MTH101", day, &entries(&[
            (a, Status::Absent), (b, Status::Present),
        ])).await.unwrap();

        let roster = db.roster(&fx.teacher, "MTH101", day).await.unwrap();
        let got: Vec<(&str, Option<Status>)> = roster.iter()
            .map(|r| (r.student_id.as_str(), r.status))
            .collect();
        assert_eq!(got, vec![
            ("STU20240001", Some(Status::Absent)),
            ("STU20240002", Some(Status::Present)),
            ("STU20240003", Some(Status::Late)),
        ]);

        let other_day = db.roster(&fx.teacher, "MTH101", date!(2024 - 09 - 03)).await.unwrap();
        assert!(other_day.iter().all(|r| r.status.is_none()));

        let tallies = db.course_tallies(&fx.teacher).await.unwrap();
        assert_eq!(tallies.len(), 1);
        assert_eq!(tallies[0].tally, AttendanceTally::new(1, 1, 1));
        assert_eq!(tallies[0].students_tracked, 3);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn only_the_instructor_marks() {
        let db = test_store().await;
        let fx = setup(&db).await;
        let day = date!(2024 - 09 - 02);
        let batch = entries(&[(&fx.students[0], Status::Present)]);

        for who in [&fx.other_teacher, &fx.principal, &admin_actor(), &fx.students[0].actor()] {
            assert!(matches!(
                db.mark_attendance(who, "MTH101", day, &batch).await,
                Err(WorkflowError::Forbidden)
            ));
        }
        assert!(matches!(
            db.roster(&fx.other_teacher, "MTH101", day).await,
            Err(WorkflowError::Forbidden)
        ));

        let tallies = db.course_tallies(&fx.principal).await.unwrap();
        assert!(tallies.iter().all(|t| t.tally.total() == 0));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn batch_with_stranger_writes_nothing() {
        let db = test_store().await;
        let fx = setup(&db).await;
        let day = date!(2024 - 09 - 02);

        let res = db.mark_attendance(&fx.teacher, "MTH101", day, &entries(&[
            (&fx.students[0], Status::Present),
            (&fx.outsider, Status::Present),
        ])).await;
        match res {
            Err(WorkflowError::NotEnrolled(ids)) => {
                assert_eq!(ids, vec!["STU20240009".to_owned()]);
            },
            x => panic!("expected NotEnrolled, got {:?}", x),
        }

        // Unenrolled students count as strangers too.
        let listings = db.get_enrollment_listings(&fx.teacher, 10).await.unwrap();
        let third = listings.iter()
            .find(|l| l.enrollment.student == "STU20240003")
            .unwrap();
        db.unenroll(&fx.teacher, third.enrollment.id).await.unwrap();
        assert!(matches!(
            db.mark_attendance(&fx.teacher, "MTH101", day, &entries(&[
                (&fx.students[2], Status::Late),
            ])).await,
            Err(WorkflowError::NotEnrolled(_))
        ));

        let tallies = db.course_tallies(&fx.teacher).await.unwrap();
        assert_eq!(tallies[0].tally.total(), 0);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn student_views_and_cascade() {
        let db = test_store().await;
        let fx = setup(&db).await;
        let stu = &fx.students[0];
        let days = [
            date!(2024 - 09 - 02), date!(2024 - 09 - 03), date!(2024 - 09 - 04),
            date!(2024 - 09 - 05),
        ];
        let statuses = [Status::Present, Status::Late, Status::Absent, Status::Present];
        for (day, st) in days.iter().zip(statuses.iter()) {
            db.mark_attendance(&fx.teacher, "MTH101", *day, &entries(&[(stu, *st)]))
                .await.unwrap();
        }

        let mine = db.course_tallies(&stu.actor()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].tally, AttendanceTally::new(2, 1, 1));
        assert!(approx_eq!(f64, mine[0].tally.rate(), 75.0));

        let recent = db.recent_attendance(&stu.student_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].day, date!(2024 - 09 - 05));
        assert_eq!(recent[1].status, Status::Absent);

        // Deleting the student takes their enrollments and attendance along.
        assert!(db.delete_student(&fx.principal, stu.id).await.unwrap());
        assert!(db.recent_attendance(&stu.student_id, 10).await.unwrap().is_empty());
        assert!(db.enrollments_of(&stu.student_id).await.unwrap().is_empty());
        let tallies = db.course_tallies(&fx.teacher).await.unwrap();
        assert_eq!(tallies[0].tally.total(), 0);

        db.nuke_database().await.unwrap();
    }
}
