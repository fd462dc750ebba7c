/*!
`Store` methods for the three kinds of users: admins, faculty, and students.
*/
use tokio_postgres::Row;

use super::{DbError, Store, WorkflowError, is_unique_violation};
use crate::user::*;

const ADMIN_COLUMNS: &str = "id, uname, email, full_name";

const FACULTY_COLUMNS: &str = "id, faculty_id, uname, email, full_name, role,
    phone, address, qualification, department, first_login,
    created_at::date AS created";

const STUDENT_COLUMNS: &str = "id, student_id, uname, email, full_name,
    phone, address, birth_date, gender, parent_name, parent_phone,
    first_login, created_at::date AS created";

fn admin_from_row(row: &Row) -> Result<Admin, DbError> {
    Ok(Admin {
        id: row.try_get("id")?,
        uname: row.try_get("uname")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
    })
}

fn faculty_from_row(row: &Row) -> Result<Faculty, DbError> {
    let role_str: &str = row.try_get("role")?;
    Ok(Faculty {
        id: row.try_get("id")?,
        faculty_id: row.try_get("faculty_id")?,
        uname: row.try_get("uname")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        role: role_str.parse()?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        qualification: row.try_get("qualification")?,
        department: row.try_get("department")?,
        first_login: row.try_get("first_login")?,
        created: row.try_get("created")?,
    })
}

pub(super) fn student_from_row(row: &Row) -> Result<Student, DbError> {
    Ok(Student {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        uname: row.try_get("uname")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        birth_date: row.try_get("birth_date")?,
        gender: row.try_get("gender")?,
        parent_name: row.try_get("parent_name")?,
        parent_phone: row.try_get("parent_phone")?,
        first_login: row.try_get("first_login")?,
        created: row.try_get("created")?,
    })
}

fn role_table(role: Role) -> &'static str {
    match role {
        Role::Admin => "admins",
        Role::Principal | Role::Teacher => "faculty",
        Role::Student => "students",
    }
}

/// What a login attempt gets checked against.
#[derive(Debug)]
pub struct Credentials {
    pub actor: Actor,
    pub password_hash: String,
    pub first_login: bool,
}

impl Store {
    /**
    Look up a user of the given type by user name or email address.

    A user name match wins over an email match, so one user's name that is
    also another user's email still logs in exactly one of them.
    */
    pub async fn get_credentials(
        &self,
        user_type: UserType,
        login: &str,
    ) -> Result<Option<Credentials>, DbError> {
        log::trace!("Store::get_credentials( {:?}, {:?} ) called.", &user_type, login);

        let columns = match user_type {
            UserType::Admin => ADMIN_COLUMNS,
            UserType::Faculty => FACULTY_COLUMNS,
            UserType::Student => STUDENT_COLUMNS,
        };
        let query = format!(
            "SELECT {}, password FROM {}
                WHERE uname = $1 OR email = $1
                ORDER BY (uname = $1) DESC, id
                LIMIT 1",
            columns, user_type.table()
        );

        let client = self.connect().await?;
        let row = match client.query_opt(&query, &[&login]).await? {
            Some(row) => row,
            None => { return Ok(None); },
        };

        let (actor, first_login) = match user_type {
            UserType::Admin => (admin_from_row(&row)?.actor(), false),
            UserType::Faculty => {
                let f = faculty_from_row(&row)?;
                (f.actor(), f.first_login)
            },
            UserType::Student => {
                let s = student_from_row(&row)?;
                (s.actor(), s.first_login)
            },
        };

        Ok(Some(Credentials {
            actor,
            password_hash: row.try_get("password")?,
            first_login,
        }))
    }

    /// The stored password hash of the given user, if they still exist.
    pub async fn get_password_hash(&self, actor: &Actor) -> Result<Option<String>, DbError> {
        log::trace!("Store::get_password_hash( {:?} ) called.", &actor.uname);

        let query = format!("SELECT password FROM {} WHERE id = $1", role_table(actor.role));
        let client = self.connect().await?;
        match client.query_opt(&query, &[&actor.id]).await? {
            Some(row) => Ok(Some(row.try_get("password")?)),
            None => Ok(None),
        }
    }

    /// Store a new password hash. Clears the first-login flag for users
    /// who have one.
    pub async fn set_password(&self, actor: &Actor, hash: &str) -> Result<(), DbError> {
        log::trace!("Store::set_password( {:?}, [ hash ] ) called.", &actor.uname);

        let query = if actor.role.has_first_login() {
            format!(
                "UPDATE {} SET password = $1, first_login = FALSE WHERE id = $2",
                role_table(actor.role)
            )
        } else {
            format!("UPDATE {} SET password = $1 WHERE id = $2", role_table(actor.role))
        };

        let client = self.connect().await?;
        match client.execute(&query, &[&hash, &actor.id]).await? {
            0 => Err(DbError(format!("No {} with id {}.", &actor.role, actor.id))),
            _ => Ok(()),
        }
    }

    pub async fn get_admin_by_uname(&self, uname: &str) -> Result<Option<Admin>, DbError> {
        log::trace!("Store::get_admin_by_uname( {:?} ) called.", uname);

        let query = format!("SELECT {} FROM admins WHERE uname = $1", ADMIN_COLUMNS);
        let client = self.connect().await?;
        match client.query_opt(&query, &[&uname]).await? {
            Some(row) => Ok(Some(admin_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn insert_admin(
        &self,
        uname: &str,
        email: &str,
        full_name: &str,
        hash: &str,
    ) -> Result<Admin, DbError> {
        log::trace!(
            "Store::insert_admin( {:?}, {:?}, {:?}, [ hash ] ) called.",
            uname, email, full_name
        );

        let query = format!(
            "INSERT INTO admins (uname, email, full_name, password)
                VALUES ($1, $2, $3, $4)
                RETURNING {}",
            ADMIN_COLUMNS
        );
        let client = self.connect().await?;
        let row = client.query_one(&query, &[&uname, &email, &full_name, &hash]).await
            .map_err(|e| DbError::from(e).annotate("Error inserting admin"))?;
        admin_from_row(&row)
    }

    pub async fn get_student(&self, id: i64) -> Result<Option<Student>, DbError> {
        log::trace!("Store::get_student( {} ) called.", id);

        let query = format!("SELECT {} FROM students WHERE id = $1", STUDENT_COLUMNS);
        let client = self.connect().await?;
        match client.query_opt(&query, &[&id]).await? {
            Some(row) => Ok(Some(student_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// All students, ordered by name.
    pub async fn get_students(&self) -> Result<Vec<Student>, DbError> {
        log::trace!("Store::get_students() called.");

        let query = format!(
            "SELECT {} FROM students ORDER BY full_name, student_id",
            STUDENT_COLUMNS
        );
        let client = self.connect().await?;
        let rows = client.query(&query, &[]).await?;
        rows.iter().map(student_from_row).collect()
    }

    /// All students, each with the names of the courses they're actively
    /// enrolled in.
    pub async fn get_student_listings(&self) -> Result<Vec<StudentListing>, DbError> {
        log::trace!("Store::get_student_listings() called.");

        let query = format!(
            "SELECT {},
                COALESCE(e.n, 0) AS enrolled_courses,
                COALESCE(e.names, '') AS course_names
            FROM students LEFT JOIN (
                SELECT en.student, COUNT(*) AS n,
                    string_agg(c.name, ', ' ORDER BY c.name) AS names
                FROM enrollments en JOIN courses c ON c.code = en.course
                WHERE en.status = 'active'
                GROUP BY en.student
            ) e ON e.student = students.student_id
            ORDER BY full_name, student_id",
            STUDENT_COLUMNS
        );
        let client = self.connect().await?;
        let rows = client.query(&query, &[]).await?;

        let mut listings = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            listings.push(StudentListing {
                student: student_from_row(row)?,
                enrolled_courses: row.try_get("enrolled_courses")?,
                course_names: row.try_get("course_names")?,
            });
        }
        Ok(listings)
    }

    pub async fn insert_student(
        &self,
        actor: &Actor,
        new: &NewStudent,
        hash: &str,
    ) -> Result<Student, WorkflowError> {
        log::trace!(
            "Store::insert_student( {:?}, {:?}, [ hash ] ) called.",
            &actor.uname, &new.student_id
        );

        if !actor.may_add_students() {
            return Err(WorkflowError::Forbidden);
        }

        let d = &new.details;
        let query = format!(
            "INSERT INTO students (
                student_id, uname, email, password, full_name, phone, address,
                birth_date, gender, parent_name, parent_phone
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}",
            STUDENT_COLUMNS
        );

        let client = self.connect().await?;
        match client.query_one(&query, &[
            &new.student_id, &d.uname, &d.email, &hash, &d.full_name,
            &d.phone, &d.address, &d.birth_date, &d.gender,
            &d.parent_name, &d.parent_phone,
        ]).await {
            Ok(row) => Ok(student_from_row(&row)?),
            Err(e) if is_unique_violation(&e) => Err(WorkflowError::Taken(
                "Student ID, username, or email already exists".to_owned()
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Update a student's personal details. Returns `false` if there's no
    /// such student.
    pub async fn update_student(
        &self,
        actor: &Actor,
        id: i64,
        d: &StudentDetails,
    ) -> Result<bool, WorkflowError> {
        log::trace!(
            "Store::update_student( {:?}, {}, {:?} ) called.",
            &actor.uname, id, d
        );

        if !actor.may_edit_students() {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        match client.execute(
            "UPDATE students SET
                uname = $1, email = $2, full_name = $3, phone = $4,
                address = $5, birth_date = $6, gender = $7,
                parent_name = $8, parent_phone = $9
            WHERE id = $10",
            &[
                &d.uname, &d.email, &d.full_name, &d.phone, &d.address,
                &d.birth_date, &d.gender, &d.parent_name, &d.parent_phone,
                &id,
            ]
        ).await {
            Ok(n) => Ok(n > 0),
            Err(e) if is_unique_violation(&e) => Err(WorkflowError::Taken(
                "Username or email already exists for another student".to_owned()
            )),
            Err(e) => Err(e.into()),
        }
    }

    /**
    Delete a student. Their enrollments and attendance records go with them.

    Returns `false` if there was no such student.
    */
    pub async fn delete_student(&self, actor: &Actor, id: i64) -> Result<bool, WorkflowError> {
        log::trace!("Store::delete_student( {:?}, {} ) called.", &actor.uname, id);

        if !actor.may_delete_students() {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM students WHERE id = $1", &[&id]).await?;
        Ok(n > 0)
    }

    pub async fn get_faculty_member(&self, id: i64) -> Result<Option<Faculty>, DbError> {
        log::trace!("Store::get_faculty_member( {} ) called.", id);

        let query = format!("SELECT {} FROM faculty WHERE id = $1", FACULTY_COLUMNS);
        let client = self.connect().await?;
        match client.query_opt(&query, &[&id]).await? {
            Some(row) => Ok(Some(faculty_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Faculty members, optionally only those in `role`, ordered by name.
    pub async fn get_faculty(&self, role: Option<Role>) -> Result<Vec<Faculty>, DbError> {
        log::trace!("Store::get_faculty( {:?} ) called.", &role);

        let client = self.connect().await?;
        let rows = match role {
            Some(role) => {
                let query = format!(
                    "SELECT {} FROM faculty WHERE role = $1 ORDER BY full_name",
                    FACULTY_COLUMNS
                );
                client.query(&query, &[&role.to_string()]).await?
            },
            None => {
                let query = format!(
                    "SELECT {} FROM faculty ORDER BY full_name",
                    FACULTY_COLUMNS
                );
                client.query(&query, &[]).await?
            },
        };

        rows.iter().map(faculty_from_row).collect()
    }

    pub async fn insert_faculty(
        &self,
        actor: &Actor,
        new: &NewFaculty,
        hash: &str,
    ) -> Result<Faculty, WorkflowError> {
        log::trace!(
            "Store::insert_faculty( {:?}, {:?}, [ hash ] ) called.",
            &actor.uname, &new.faculty_id
        );

        if !actor.may_add_faculty(new.role) {
            return Err(WorkflowError::Forbidden);
        }

        let query = format!(
            "INSERT INTO faculty (
                faculty_id, uname, email, password, full_name, role,
                phone, address, qualification, department
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}",
            FACULTY_COLUMNS
        );

        let client = self.connect().await?;
        match client.query_one(&query, &[
            &new.faculty_id, &new.uname, &new.email, &hash, &new.full_name,
            &new.role.to_string(), &new.phone, &new.address,
            &new.qualification, &new.department,
        ]).await {
            Ok(row) => Ok(faculty_from_row(&row)?),
            Err(e) if is_unique_violation(&e) => Err(WorkflowError::Taken(
                "Faculty ID, username, or email already exists".to_owned()
            )),
            Err(e) => Err(e.into()),
        }
    }

    /**
    Delete a faculty member. Courses they taught are left without an
    instructor; attendance they recorded stays, unattributed.
    */
    pub async fn delete_faculty(&self, actor: &Actor, id: i64) -> Result<bool, WorkflowError> {
        log::trace!("Store::delete_faculty( {:?}, {} ) called.", &actor.uname, id);

        if !actor.may_delete_faculty() {
            return Err(WorkflowError::Forbidden);
        }

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM faculty WHERE id = $1", &[&id]).await?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthResult, check_password, hash_password};
    use crate::store::tests::*;

    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn admin_credentials() {
        let db = test_store().await;

        let hash = hash_password("toot").unwrap();
        let admin = db.insert_admin("root", "root@school.edu", "Root", &hash).await.unwrap();
        assert_eq!(db.get_admin_by_uname("root").await.unwrap().unwrap().id, admin.id);

        let creds = db.get_credentials(UserType::Admin, "root@school.edu").await
            .unwrap().unwrap();
        assert_eq!(creds.actor.role, Role::Admin);
        assert!(!creds.first_login);
        assert_eq!(check_password("toot", &creds.password_hash), AuthResult::Ok);

        // Admins don't show up as students.
        assert!(db.get_credentials(UserType::Student, "root").await.unwrap().is_none());

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn student_first_login_and_reset() {
        let db = test_store().await;
        let teacher = add_teacher(&db, "TCH2024001").await;
        let stu = add_student(&db, &teacher, "STU20240001").await;
        assert!(stu.first_login);

        let creds = db.get_credentials(UserType::Student, &stu.uname).await
            .unwrap().unwrap();
        assert!(creds.first_login);
        assert_eq!(creds.actor.key, "STU20240001");

        let hash = hash_password("brand new").unwrap();
        db.set_password(&creds.actor, &hash).await.unwrap();

        let creds = db.get_credentials(UserType::Student, &stu.email).await
            .unwrap().unwrap();
        assert!(!creds.first_login);
        let stored = db.get_password_hash(&creds.actor).await.unwrap().unwrap();
        assert_eq!(check_password("brand new", &stored), AuthResult::Ok);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn uname_match_beats_email_match() {
        let db = test_store().await;
        let teacher = add_teacher(&db, "TCH2024001").await;
        let first = add_student(&db, &teacher, "STU20240001").await;

        let mut second = new_student("STU20240002");
        second.details.uname = first.email.clone();
        let hash = hash_password("password").unwrap();
        let second = db.insert_student(&teacher, &second, &hash).await.unwrap();

        let creds = db.get_credentials(UserType::Student, &first.email).await
            .unwrap().unwrap();
        assert_eq!(creds.actor.id, second.id);
        let creds = db.get_credentials(UserType::Student, &first.uname).await
            .unwrap().unwrap();
        assert_eq!(creds.actor.id, first.id);
        let creds = db.get_credentials(UserType::Student, &second.email).await
            .unwrap().unwrap();
        assert_eq!(creds.actor.id, second.id);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn student_uniqueness_and_permissions() {
        let db = test_store().await;
        let teacher = add_teacher(&db, "TCH2024001").await;
        let admin = add_admin(&db).await;
        let stu = add_student(&db, &teacher, "STU20240001").await;

        let mut dup = new_student("STU20240002");
        dup.details.uname = stu.uname.clone();
        let hash = hash_password("password").unwrap();
        assert!(matches!(
            db.insert_student(&teacher, &dup, &hash).await,
            Err(WorkflowError::Taken(_))
        ));

        // Admins manage students through deletion only.
        assert!(matches!(
            db.insert_student(&admin, &new_student("STU20240003"), &hash).await,
            Err(WorkflowError::Forbidden)
        ));

        let other = add_student(&db, &teacher, "STU20240004").await;
        let mut details = new_student("STU20240004").details;
        details.email = stu.email.clone();
        assert!(matches!(
            db.update_student(&teacher, other.id, &details).await,
            Err(WorkflowError::Taken(_))
        ));

        details.email = "renamed@school.edu".to_owned();
        details.phone = Some("555-0100".to_owned());
        assert!(db.update_student(&teacher, other.id, &details).await.unwrap());
        let other = db.get_student(other.id).await.unwrap().unwrap();
        assert_eq!(other.email, "renamed@school.edu");
        assert_eq!(other.phone.as_deref(), Some("555-0100"));

        assert!(matches!(
            db.delete_student(&teacher, other.id).await,
            Err(WorkflowError::Forbidden)
        ));
        assert!(db.delete_student(&admin, other.id).await.unwrap());
        assert!(!db.delete_student(&admin, other.id).await.unwrap());

        let listings = db.get_student_listings().await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].enrolled_courses, 0);
        assert_eq!(listings[0].course_names, "");

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn faculty_roles() {
        let db = test_store().await;
        let admin = add_admin(&db).await;
        let hash = hash_password("password").unwrap();

        let principal = db.insert_faculty(&admin, &new_faculty("TCH2020001", Role::Principal), &hash)
            .await.unwrap();
        let principal = principal.actor();

        assert!(matches!(
            db.insert_faculty(&principal, &new_faculty("TCH2020002", Role::Principal), &hash).await,
            Err(WorkflowError::Forbidden)
        ));
        let teacher = db.insert_faculty(&principal, &new_faculty("TCH2024001", Role::Teacher), &hash)
            .await.unwrap();
        assert!(matches!(
            db.insert_faculty(&admin, &new_faculty("TCH2024001", Role::Teacher), &hash).await,
            Err(WorkflowError::Taken(_))
        ));

        let teachers = db.get_faculty(Some(Role::Teacher)).await.unwrap();
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].faculty_id, "TCH2024001");
        assert_eq!(db.get_faculty(None).await.unwrap().len(), 2);

        assert!(matches!(
            db.delete_faculty(&principal, teacher.id).await,
            Err(WorkflowError::Forbidden)
        ));
        assert!(db.delete_faculty(&admin, teacher.id).await.unwrap());
        assert!(db.get_faculty_member(teacher.id).await.unwrap().is_none());

        db.nuke_database().await.unwrap();
    }
}
