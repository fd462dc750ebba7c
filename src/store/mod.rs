/*!
Database interaction module.

The Postgres database this connects to holds six tables:

```sql
CREATE TABLE admins (
    id        BIGSERIAL PRIMARY KEY,
    uname     TEXT UNIQUE NOT NULL,
    email     TEXT UNIQUE NOT NULL,
    full_name TEXT NOT NULL,
    password  TEXT NOT NULL     /* argon2 PHC string */
);

CREATE TABLE faculty (
    id            BIGSERIAL PRIMARY KEY,
    faculty_id    TEXT UNIQUE NOT NULL,     /* e.g. 'TCH2024001' */
    uname         TEXT UNIQUE NOT NULL,
    email         TEXT UNIQUE NOT NULL,
    password      TEXT NOT NULL,
    full_name     TEXT NOT NULL,
    role          TEXT NOT NULL,            /* 'teacher' or 'principal' */
    phone         TEXT,
    address       TEXT,
    qualification TEXT,
    department    TEXT,
    first_login   BOOLEAN NOT NULL DEFAULT TRUE,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE students (
    id           BIGSERIAL PRIMARY KEY,
    student_id   TEXT UNIQUE NOT NULL,      /* e.g. 'STU20240001' */
    uname        TEXT UNIQUE NOT NULL,
    email        TEXT UNIQUE NOT NULL,
    password     TEXT NOT NULL,
    full_name    TEXT NOT NULL,
    phone        TEXT,
    address      TEXT,
    birth_date   DATE,
    gender       TEXT,
    parent_name  TEXT,
    parent_phone TEXT,
    first_login  BOOLEAN NOT NULL DEFAULT TRUE,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE courses (
    id          BIGSERIAL PRIMARY KEY,
    code        TEXT UNIQUE NOT NULL,
    name        TEXT NOT NULL,
    description TEXT,
    credits     SMALLINT NOT NULL DEFAULT 0,
    semester    SMALLINT,
    department  TEXT,
    instructor  TEXT REFERENCES faculty(faculty_id)
);

CREATE TABLE enrollments (
    id       BIGSERIAL PRIMARY KEY,
    student  TEXT NOT NULL REFERENCES students(student_id),
    course   TEXT NOT NULL REFERENCES courses(code),
    enrolled DATE NOT NULL,
    status   TEXT NOT NULL    /* 'active' or 'inactive' */
);

CREATE TABLE attendance (
    id          BIGSERIAL PRIMARY KEY,
    student     TEXT NOT NULL REFERENCES students(student_id),
    course      TEXT NOT NULL REFERENCES courses(code),
    day         DATE NOT NULL,
    status      TEXT NOT NULL,  /* 'present', 'absent', or 'late' */
    recorded_by TEXT REFERENCES faculty(faculty_id),
    UNIQUE (student, course, day)
);
```

References to students and courses cascade on update and delete; references
to faculty are set to NULL when the faculty member is deleted. Only one
enrollment per (student, course) pair may be active at a time; this is
enforced by a partial unique index.
*/
use tokio_postgres::{Client, NoTls, error::SqlState};

pub mod attendance;
pub mod courses;
pub mod enrollment;
pub mod stats;
pub mod users;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'admins'",
        "CREATE TABLE admins (
            id        BIGSERIAL PRIMARY KEY,
            uname     TEXT UNIQUE NOT NULL,
            email     TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            password  TEXT NOT NULL
        )",
        "DROP TABLE admins",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'faculty'",
        "CREATE TABLE faculty (
            id            BIGSERIAL PRIMARY KEY,
            faculty_id    TEXT UNIQUE NOT NULL,
            uname         TEXT UNIQUE NOT NULL,
            email         TEXT UNIQUE NOT NULL,
            password      TEXT NOT NULL,
            full_name     TEXT NOT NULL,
            role          TEXT NOT NULL,
            phone         TEXT,
            address       TEXT,
            qualification TEXT,
            department    TEXT,
            first_login   BOOLEAN NOT NULL DEFAULT TRUE,
            created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "DROP TABLE faculty",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'students'",
        "CREATE TABLE students (
            id           BIGSERIAL PRIMARY KEY,
            student_id   TEXT UNIQUE NOT NULL,
            uname        TEXT UNIQUE NOT NULL,
            email        TEXT UNIQUE NOT NULL,
            password     TEXT NOT NULL,
            full_name    TEXT NOT NULL,
            phone        TEXT,
            address      TEXT,
            birth_date   DATE,
            gender       TEXT,
            parent_name  TEXT,
            parent_phone TEXT,
            first_login  BOOLEAN NOT NULL DEFAULT TRUE,
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "DROP TABLE students",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'courses'",
        "CREATE TABLE courses (
            id          BIGSERIAL PRIMARY KEY,
            code        TEXT UNIQUE NOT NULL,
            name        TEXT NOT NULL,
            description TEXT,
            credits     SMALLINT NOT NULL DEFAULT 0,
            semester    SMALLINT,
            department  TEXT,
            instructor  TEXT REFERENCES faculty(faculty_id)
                ON UPDATE CASCADE ON DELETE SET NULL
        )",
        "DROP TABLE courses",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'enrollments'",
        "CREATE TABLE enrollments (
            id       BIGSERIAL PRIMARY KEY,
            student  TEXT NOT NULL REFERENCES students(student_id)
                ON UPDATE CASCADE ON DELETE CASCADE,
            course   TEXT NOT NULL REFERENCES courses(code)
                ON UPDATE CASCADE ON DELETE CASCADE,
            enrolled DATE NOT NULL DEFAULT CURRENT_DATE,
            status   TEXT NOT NULL DEFAULT 'active'
        )",
        "DROP TABLE enrollments",
    ),

    (
        "SELECT FROM pg_indexes WHERE indexname = 'enrollments_one_active'",
        "CREATE UNIQUE INDEX enrollments_one_active
            ON enrollments (student, course) WHERE status = 'active'",
        "DROP INDEX enrollments_one_active",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'attendance'",
        "CREATE TABLE attendance (
            id          BIGSERIAL PRIMARY KEY,
            student     TEXT NOT NULL REFERENCES students(student_id)
                ON UPDATE CASCADE ON DELETE CASCADE,
            course      TEXT NOT NULL REFERENCES courses(code)
                ON UPDATE CASCADE ON DELETE CASCADE,
            day         DATE NOT NULL,
            status      TEXT NOT NULL,
            recorded_by TEXT REFERENCES faculty(faculty_id)
                ON UPDATE CASCADE ON DELETE SET NULL,
            UNIQUE (student, course, day)
        )",
        "DROP TABLE attendance",
    ),
];

#[derive(Debug, PartialEq)]
pub struct DbError(String);

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    fn annotate(self, annotation: &str) -> Self {
        let s = format!("{}: {}", annotation, &self.0);
        Self(s)
    }

    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl std::error::Error for DbError {}

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            s.push_str("; ");
            s.push_str(&dbe.to_string());
        }
        DbError(s)
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError(s) }
}

/// Whether `e` is Postgres refusing a row because of a unique constraint.
pub(crate) fn is_unique_violation(e: &tokio_postgres::error::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

pub(crate) fn is_foreign_key_violation(e: &tokio_postgres::error::Error) -> bool {
    e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION)
}

/**
Failures of the operations that check who is asking before they touch the
database.

The `Display` text of each variant is what gets shown to the user; the
detail inside `Db` and `AttendanceWriteFailed` is only logged.
*/
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("You do not have permission to do that.")]
    Forbidden,
    #[error("Student is already enrolled in this course.")]
    DuplicateEnrollment,
    #[error("Not enrolled in this course: {}", .0.join(", "))]
    NotEnrolled(Vec<String>),
    #[error("Course not found.")]
    NoSuchCourse,
    #[error("Student not found.")]
    NoSuchStudent,
    #[error("Instructor not found.")]
    NoSuchInstructor,
    /// A uniqueness conflict on some other record; carries the message.
    #[error("{0}")]
    Taken(String),
    #[error("Error marking attendance. Please try again.")]
    AttendanceWriteFailed(String),
    #[error("A database error occurred. Please try again.")]
    Db(#[from] DbError),
}

impl From<tokio_postgres::error::Error> for WorkflowError {
    fn from(e: tokio_postgres::error::Error) -> WorkflowError {
        WorkflowError::Db(e.into())
    }
}

impl WorkflowError {
    /// Log the parts of the error the user doesn't get to see.
    pub fn log(&self, context: &str) {
        match self {
            WorkflowError::Db(e) => {
                log::error!("{}: {}", context, e);
            },
            WorkflowError::AttendanceWriteFailed(e) => {
                log::error!("{}: attendance batch rolled back: {}", context, e);
            },
            x => {
                log::trace!("{}: {:?}", context, x);
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Store {
    connection_string: String,
}

impl Store {
    pub fn new(connection_string: String) -> Self {
        log::trace!("Store::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "Store::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(*test_stmt, &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(*create_stmt, &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look at
    the ERROR level log output when testing to ensure this method did its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(*drop_stmt, &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err.display());
            }
        }

        log::trace!("    ....nuking complete.");
        Ok(())
    }
}
