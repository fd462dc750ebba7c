/*!
Aggregate numbers for the dashboards and the principal's statistics page.
*/
use serde::Serialize;

use super::{DbError, Store, WorkflowError, users::student_from_row};
use crate::attendance::CourseAttendance;
use crate::course::CourseListing;
use crate::user::{Actor, Student};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub students: i64,
    pub faculty: i64,
    pub teachers: i64,
    pub courses: i64,
    pub active_enrollments: i64,
}

#[derive(Debug, Serialize)]
pub struct GenderCount {
    pub gender: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DepartmentStats {
    pub department: String,
    pub teacher_count: i64,
    pub course_count: i64,
    pub enrolled_students: i64,
    /// Active enrollments per course in the department, one decimal place.
    pub avg_per_course: f64,
}

#[derive(Debug, Serialize)]
pub struct SchoolStats {
    pub counts: Counts,
    pub genders: Vec<GenderCount>,
    pub departments: Vec<DepartmentStats>,
    /// Most-enrolled first.
    pub course_enrollments: Vec<CourseListing>,
    /// Courses with any attendance recorded, best attendance first.
    pub attendance: Vec<CourseAttendance>,
    /// The ten most recently added students.
    pub recent_students: Vec<Student>,
    /// Students with no active enrollment.
    pub unassigned_students: Vec<Student>,
}

fn avg_per_course(enrolled: i64, courses: i64) -> f64 {
    if courses == 0 {
        return 0.0;
    }
    (enrolled as f64 / courses as f64 * 10.0).round() / 10.0
}

impl Store {
    pub async fn get_counts(&self) -> Result<Counts, DbError> {
        log::trace!("Store::get_counts() called.");

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT
                (SELECT COUNT(*) FROM students) AS students,
                (SELECT COUNT(*) FROM faculty) AS faculty,
                (SELECT COUNT(*) FROM faculty WHERE role = 'teacher') AS teachers,
                (SELECT COUNT(*) FROM courses) AS courses,
                (SELECT COUNT(*) FROM enrollments WHERE status = 'active')
                    AS active_enrollments",
            &[]
        ).await?;

        Ok(Counts {
            students: row.try_get("students")?,
            faculty: row.try_get("faculty")?,
            teachers: row.try_get("teachers")?,
            courses: row.try_get("courses")?,
            active_enrollments: row.try_get("active_enrollments")?,
        })
    }

    async fn get_gender_counts(&self) -> Result<Vec<GenderCount>, DbError> {
        log::trace!("Store::get_gender_counts() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT gender, COUNT(*) AS n FROM students
                WHERE gender IS NOT NULL AND gender <> ''
                GROUP BY gender
                ORDER BY gender",
            &[]
        ).await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            counts.push(GenderCount {
                gender: row.try_get("gender")?,
                count: row.try_get("n")?,
            });
        }
        Ok(counts)
    }

    async fn get_department_stats(&self) -> Result<Vec<DepartmentStats>, DbError> {
        log::trace!("Store::get_department_stats() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT f.department,
                COUNT(DISTINCT f.id) AS teacher_count,
                COUNT(DISTINCT c.id) AS course_count,
                COUNT(DISTINCT e.id) AS enrollments,
                COUNT(DISTINCT e.student) AS enrolled_students
            FROM faculty f
            LEFT JOIN courses c ON c.department = f.department
            LEFT JOIN enrollments e ON e.course = c.code AND e.status = 'active'
            WHERE f.role = 'teacher' AND f.department IS NOT NULL AND f.department <> ''
            GROUP BY f.department
            ORDER BY teacher_count DESC, f.department",
            &[]
        ).await?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let course_count: i64 = row.try_get("course_count")?;
            let enrollments: i64 = row.try_get("enrollments")?;
            stats.push(DepartmentStats {
                department: row.try_get("department")?,
                teacher_count: row.try_get("teacher_count")?,
                course_count,
                enrolled_students: row.try_get("enrolled_students")?,
                avg_per_course: avg_per_course(enrollments, course_count),
            });
        }
        Ok(stats)
    }

    async fn get_recent_students(&self, limit: i64) -> Result<Vec<Student>, DbError> {
        log::trace!("Store::get_recent_students( {} ) called.", limit);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT id, student_id, uname, email, full_name, phone, address,
                birth_date, gender, parent_name, parent_phone, first_login,
                created_at::date AS created
            FROM students
            ORDER BY created_at DESC, id DESC
            LIMIT $1",
            &[&limit]
        ).await?;
        rows.iter().map(student_from_row).collect()
    }

    async fn get_unassigned_students(&self) -> Result<Vec<Student>, DbError> {
        log::trace!("Store::get_unassigned_students() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT id, student_id, uname, email, full_name, phone, address,
                birth_date, gender, parent_name, parent_phone, first_login,
                created_at::date AS created
            FROM students
            WHERE student_id NOT IN (
                SELECT student FROM enrollments WHERE status = 'active'
            )
            ORDER BY full_name, student_id",
            &[]
        ).await?;
        rows.iter().map(student_from_row).collect()
    }

    /// Everything on the statistics page. Admins and principals only.
    pub async fn school_stats(&self, actor: &Actor) -> Result<SchoolStats, WorkflowError> {
        log::trace!("Store::school_stats( {:?} ) called.", &actor.uname);

        if !actor.may_view_stats() {
            return Err(WorkflowError::Forbidden);
        }

        let (counts, genders, departments, mut course_enrollments, mut attendance,
            recent_students, unassigned_students) = futures::try_join!(
            self.get_counts(),
            self.get_gender_counts(),
            self.get_department_stats(),
            self.get_course_listings(actor, None),
            self.course_tallies(actor),
            self.get_recent_students(10),
            self.get_unassigned_students(),
        )?;

        course_enrollments.sort_by(|a, b| b.enrolled_students.cmp(&a.enrolled_students)
            .then_with(|| a.course.name.cmp(&b.course.name)));

        attendance.retain(|ca| ca.tally.total() > 0);
        attendance.sort_by(|a, b| b.tally.rate().total_cmp(&a.tally.rate()));

        Ok(SchoolStats {
            counts,
            genders,
            departments,
            course_enrollments,
            attendance,
            recent_students,
            unassigned_students,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::Status;
    use crate::store::tests::*;
    use crate::user::Role;

    use std::collections::BTreeMap;

    use float_cmp::approx_eq;
    use serial_test::serial;
    use time::macros::date;

    #[test]
    fn department_averages() {
        assert!(approx_eq!(f64, avg_per_course(5, 3), 1.7));
        assert!(approx_eq!(f64, avg_per_course(4, 0), 0.0));
    }

    #[tokio::test]
    #[serial]
    async fn principal_stats() {
        let db = test_store().await;
        let teacher = add_teacher(&db, "TCH2024001").await;
        let principal = add_faculty(&db, "TCH2020001", Role::Principal).await;
        add_course(&db, "MTH101", Some(&teacher)).await;
        add_course(&db, "PHY101", Some(&teacher)).await;
        let a = add_student(&db, &teacher, "STU20240001").await;
        let b = add_student(&db, &teacher, "STU20240002").await;
        let loner = add_student(&db, &teacher, "STU20240003").await;

        for s in [&a, &b] {
            db.enroll(&teacher, &s.student_id, "MTH101").await.unwrap();
        }
        db.enroll(&teacher, &a.student_id, "PHY101").await.unwrap();

        let day = date!(2024 - 09 - 02);
        let mut batch = BTreeMap::new();
        batch.insert(a.student_id.clone(), Status::Present);
        db.mark_attendance(&teacher, "PHY101", day, &batch).await.unwrap();
        batch.insert(b.student_id.clone(), Status::Absent);
        db.mark_attendance(&teacher, "MTH101", day, &batch).await.unwrap();

        assert!(matches!(
            db.school_stats(&teacher).await,
            Err(WorkflowError::Forbidden)
        ));

        let stats = db.school_stats(&principal).await.unwrap();
        assert_eq!(stats.counts, Counts {
            students: 3,
            faculty: 2,
            teachers: 1,
            courses: 2,
            active_enrollments: 3,
        });
        assert_eq!(stats.course_enrollments[0].course.code, "MTH101");
        assert_eq!(stats.course_enrollments[0].enrolled_students, 2);

        let rates: Vec<(&str, f64)> = stats.attendance.iter()
            .map(|ca| (ca.course_code.as_str(), ca.tally.rate()))
            .collect();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].0, "PHY101");
        assert!(approx_eq!(f64, rates[1].1, 50.0));

        assert_eq!(stats.unassigned_students.len(), 1);
        assert_eq!(stats.unassigned_students[0].student_id, loner.student_id);
        assert_eq!(stats.recent_students.len(), 3);

        assert_eq!(stats.departments.len(), 1);
        assert_eq!(stats.departments[0].department, "Science");
        assert_eq!(stats.departments[0].course_count, 2);
        assert_eq!(stats.departments[0].enrolled_students, 2);
        assert!(approx_eq!(f64, stats.departments[0].avg_per_course, 1.5));

        db.nuke_database().await.unwrap();
    }
}
