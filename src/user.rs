/*!
Users of the system and what each of them is allowed to do.
*/
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{blank_means_none, course::Course, parse_date};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Principal,
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin     => "admin",
            Role::Principal => "principal",
            Role::Teacher   => "teacher",
            Role::Student   => "student",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin"     => Ok(Role::Admin),
            "principal" => Ok(Role::Principal),
            "teacher"   => Ok(Role::Teacher),
            "student"   => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

impl Role {
    /// Where users in this role land after logging in.
    pub fn dashboard(&self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Principal | Role::Teacher => "/faculty",
            Role::Student => "/student",
        }
    }

    /// Faculty and students must change their initial password; admins don't.
    pub fn has_first_login(&self) -> bool {
        !matches!(self, Role::Admin)
    }
}

/// The three login tables; chosen by the role buttons on the login form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserType {
    Admin,
    Faculty,
    Student,
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin"   => Ok(UserType::Admin),
            "faculty" => Ok(UserType::Faculty),
            "student" => Ok(UserType::Student),
            _ => Err(format!("{:?} is not a valid user type.", s)),
        }
    }
}

impl UserType {
    pub fn table(&self) -> &'static str {
        match self {
            UserType::Admin => "admins",
            UserType::Faculty => "faculty",
            UserType::Student => "students",
        }
    }
}

/**
The authenticated identity a request is made on behalf of.

`key` is the identifier other tables refer to this user by: the student id
for students, the faculty id for teachers and principals, and the user name
for admins.
*/
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Actor {
    pub id: i64,
    pub key: String,
    pub uname: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn is_faculty(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Principal)
    }

    /// Admins and principals see and manage every course; teachers only
    /// the ones they instruct.
    pub fn sees_all_courses(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Principal)
    }

    fn instructs(&self, course: &Course) -> bool {
        self.role == Role::Teacher && course.instructed_by(&self.key)
    }

    pub fn may_enroll_into(&self, course: &Course) -> bool {
        self.sees_all_courses() || self.instructs(course)
    }

    /// Only the teacher of a course marks its attendance.
    pub fn may_mark_attendance_for(&self, course: &Course) -> bool {
        self.instructs(course)
    }

    pub fn may_edit_course(&self, course: &Course) -> bool {
        self.sees_all_courses() || self.instructs(course)
    }

    pub fn may_add_courses(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn may_add_students(&self) -> bool {
        self.is_faculty()
    }

    pub fn may_edit_students(&self) -> bool {
        self.is_faculty()
    }

    pub fn may_delete_students(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Principal)
    }

    /// Principals may only add teachers; admins may add either faculty role.
    pub fn may_add_faculty(&self, role: Role) -> bool {
        match (self.role, role) {
            (Role::Admin, Role::Teacher | Role::Principal) => true,
            (Role::Principal, Role::Teacher) => true,
            _ => false,
        }
    }

    pub fn may_delete_faculty(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn may_delete_enrollments(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Principal)
    }

    pub fn may_view_stats(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Principal)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Admin {
    pub id: i64,
    pub uname: String,
    pub email: String,
    pub full_name: String,
}

impl Admin {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            key: self.uname.clone(),
            uname: self.uname.clone(),
            name: self.full_name.clone(),
            role: Role::Admin,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Student {
    pub id: i64,
    pub student_id: String,
    pub uname: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(with = "crate::ymd::option")]
    pub birth_date: Option<Date>,
    pub gender: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub first_login: bool,
    #[serde(with = "crate::ymd")]
    pub created: Date,
}

impl Student {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            key: self.student_id.clone(),
            uname: self.uname.clone(),
            name: self.full_name.clone(),
            role: Role::Student,
        }
    }
}

/// A student row plus a summary of their active enrollments.
#[derive(Debug, Serialize)]
pub struct StudentListing {
    #[serde(flatten)]
    pub student: Student,
    pub enrolled_courses: i64,
    pub course_names: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Faculty {
    pub id: i64,
    pub faculty_id: String,
    pub uname: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub qualification: Option<String>,
    pub department: Option<String>,
    pub first_login: bool,
    #[serde(with = "crate::ymd")]
    pub created: Date,
}

impl Faculty {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            key: self.faculty_id.clone(),
            uname: self.uname.clone(),
            name: self.full_name.clone(),
            role: self.role,
        }
    }
}

/// Loose email sanity check: one `@`, something before it, and a dotted
/// domain after it.
pub fn valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let (local, domain) = match s.split_once('@') {
        Some(parts) => parts,
        None => { return false; },
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty() && !host.starts_with('.'),
        None => false,
    }
}

/// Suggested id for a new student: `STU`, the year, and four random digits.
pub fn suggest_student_id(year: i32) -> String {
    let n: u32 = rand::thread_rng().gen_range(1..=9999);
    format!("STU{}{:04}", year, n)
}

/// Suggested id for a new teacher: `TCH`, the year, and three random digits.
pub fn suggest_faculty_id(year: i32) -> String {
    let n: u32 = rand::thread_rng().gen_range(1..=999);
    format!("TCH{}{:03}", year, n)
}

/// Personal fields shared by the add and edit student forms.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StudentDetails {
    pub uname: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<Date>,
    pub gender: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewStudent {
    pub student_id: String,
    pub password: String,
    pub details: StudentDetails,
}

/// Raw add/edit student form. Every field may be missing from the POST.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StudentForm {
    pub student_id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub date_of_birth: String,
    pub gender: String,
    pub parent_name: String,
    pub parent_phone: String,
}

impl StudentForm {
    fn details(&self) -> Result<StudentDetails, String> {
        let uname = self.username.trim();
        let email = self.email.trim();
        let full_name = self.full_name.trim();

        if uname.is_empty() || email.is_empty() || full_name.is_empty() {
            return Err("Please fill in all required fields".to_owned());
        }
        if !valid_email(email) {
            return Err("Please enter a valid email address".to_owned());
        }

        Ok(StudentDetails {
            uname: uname.to_owned(),
            email: email.to_owned(),
            full_name: full_name.to_owned(),
            phone: blank_means_none(&self.phone),
            address: blank_means_none(&self.address),
            birth_date: parse_date(&self.date_of_birth),
            gender: blank_means_none(&self.gender),
            parent_name: blank_means_none(&self.parent_name),
            parent_phone: blank_means_none(&self.parent_phone),
        })
    }

    /// Validate as a new student, which also requires an id and password.
    pub fn validate_new(&self, min_password_length: usize) -> Result<NewStudent, String> {
        let student_id = self.student_id.trim();
        if student_id.is_empty() || self.password.is_empty() {
            return Err("Please fill in all required fields including password".to_owned());
        }
        if self.password.chars().count() < min_password_length {
            return Err(format!(
                "Password must be at least {} characters long", min_password_length
            ));
        }

        Ok(NewStudent {
            student_id: student_id.to_owned(),
            password: self.password.clone(),
            details: self.details()?,
        })
    }

    pub fn validate_edit(&self) -> Result<StudentDetails, String> {
        self.details()
    }

    /// Refill the form from a stored student, for the edit page.
    pub fn from_student(s: &Student) -> StudentForm {
        StudentForm {
            student_id: s.student_id.clone(),
            username: s.uname.clone(),
            email: s.email.clone(),
            password: String::new(),
            full_name: s.full_name.clone(),
            phone: s.phone.clone().unwrap_or_default(),
            address: s.address.clone().unwrap_or_default(),
            date_of_birth: s.birth_date
                .and_then(|d| d.format(crate::DATE_FMT).ok())
                .unwrap_or_default(),
            gender: s.gender.clone().unwrap_or_default(),
            parent_name: s.parent_name.clone().unwrap_or_default(),
            parent_phone: s.parent_phone.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewFaculty {
    pub faculty_id: String,
    pub uname: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub qualification: Option<String>,
    pub department: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FacultyForm {
    pub faculty_id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// Only honored on the admin form; principals always add teachers.
    pub role: String,
    pub phone: String,
    pub address: String,
    pub qualification: String,
    pub department: String,
}

impl FacultyForm {
    pub fn validate(
        &self,
        default_role: Role,
        min_password_length: usize,
    ) -> Result<NewFaculty, String> {
        let faculty_id = self.faculty_id.trim();
        let uname = self.username.trim();
        let email = self.email.trim();
        let full_name = self.full_name.trim();

        if faculty_id.is_empty() || uname.is_empty() || email.is_empty()
            || self.password.is_empty() || full_name.is_empty()
        {
            return Err("Please fill in all required fields including password".to_owned());
        }
        if self.password.chars().count() < min_password_length {
            return Err(format!(
                "Password must be at least {} characters long", min_password_length
            ));
        }
        if !valid_email(email) {
            return Err("Please enter a valid email address".to_owned());
        }

        let role = match self.role.trim() {
            "" => default_role,
            s => match s.parse::<Role>() {
                Ok(r @ (Role::Teacher | Role::Principal)) => r,
                _ => { return Err("Faculty role must be teacher or principal".to_owned()); },
            },
        };

        Ok(NewFaculty {
            faculty_id: faculty_id.to_owned(),
            uname: uname.to_owned(),
            email: email.to_owned(),
            password: self.password.clone(),
            full_name: full_name.to_owned(),
            role,
            phone: blank_means_none(&self.phone),
            address: blank_means_none(&self.address),
            qualification: blank_means_none(&self.qualification),
            department: blank_means_none(&self.department),
        })
    }
}
