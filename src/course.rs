/*!
Courses and enrollments in them.
*/
use serde::{Deserialize, Serialize};
use time::Date;

use crate::blank_means_none;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Course {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub credits: i16,
    pub semester: Option<i16>,
    pub department: Option<String>,
    /// Faculty id of the teacher, if one has been assigned.
    pub instructor: Option<String>,
}

impl Course {
    pub fn instructed_by(&self, faculty_id: &str) -> bool {
        self.instructor.as_deref() == Some(faculty_id)
    }
}

/// A course as shown on the list pages.
#[derive(Debug, Serialize)]
pub struct CourseListing {
    #[serde(flatten)]
    pub course: Course,
    pub instructor_name: Option<String>,
    pub enrolled_students: i64,
    pub student_names: String,
}

/// Validated contents of the add/edit course forms.
#[derive(Clone, Debug, PartialEq)]
pub struct CourseDetails {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub credits: i16,
    pub semester: Option<i16>,
    pub department: Option<String>,
    pub instructor: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CourseForm {
    pub course_code: String,
    pub course_name: String,
    pub description: String,
    pub credits: String,
    pub semester: String,
    pub department: String,
    pub instructor: String,
}

impl CourseForm {
    pub fn validate(&self) -> Result<CourseDetails, String> {
        let code = self.course_code.trim();
        let name = self.course_name.trim();
        if code.is_empty() || name.is_empty() {
            return Err("Please fill in all required fields".to_owned());
        }

        let credits: i16 = match self.credits.trim() {
            "" => 0,
            s => match s.parse() {
                Ok(n) if n >= 0 => n,
                _ => { return Err(format!("{:?} is not a valid number of credits", s)); },
            },
        };
        let semester: Option<i16> = match self.semester.trim() {
            "" => None,
            s => match s.parse() {
                Ok(n) if n > 0 => Some(n),
                _ => { return Err(format!("{:?} is not a valid semester", s)); },
            },
        };

        Ok(CourseDetails {
            code: code.to_owned(),
            name: name.to_owned(),
            description: blank_means_none(&self.description),
            credits,
            semester,
            department: blank_means_none(&self.department),
            instructor: blank_means_none(&self.instructor),
        })
    }

    pub fn from_course(crs: &Course) -> CourseForm {
        CourseForm {
            course_code: crs.code.clone(),
            course_name: crs.name.clone(),
            description: crs.description.clone().unwrap_or_default(),
            credits: crs.credits.to_string(),
            semester: crs.semester.map(|n| n.to_string()).unwrap_or_default(),
            department: crs.department.clone().unwrap_or_default(),
            instructor: crs.instructor.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EnrollmentStatus::Active => write!(f, "active"),
            EnrollmentStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "inactive" => Ok(EnrollmentStatus::Inactive),
            _ => Err(format!("{:?} is not a valid enrollment status.", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub student: String,
    pub course: String,
    #[serde(with = "crate::ymd")]
    pub enrolled: Date,
    pub status: EnrollmentStatus,
}

/// An enrollment joined with the names it refers to.
#[derive(Debug, Serialize)]
pub struct EnrollmentListing {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub student_name: String,
    pub student_email: String,
    pub course_name: String,
    pub credits: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_form_validation() {
        let mut form = CourseForm {
            course_code: " CS101 ".to_owned(),
            course_name: "Intro to Computing".to_owned(),
            credits: "3".to_owned(),
            instructor: "TCH2024001".to_owned(),
            ..Default::default()
        };
        let det = form.validate().unwrap();
        assert_eq!(det.code, "CS101");
        assert_eq!(det.credits, 3);
        assert_eq!(det.semester, None);
        assert_eq!(det.instructor.as_deref(), Some("TCH2024001"));

        form.semester = "0".to_owned();
        assert!(form.validate().is_err());
        form.semester = "2".to_owned();
        assert_eq!(form.validate().unwrap().semester, Some(2));

        form.credits = "three".to_owned();
        assert!(form.validate().is_err());

        form.credits = String::new();
        form.course_name = String::new();
        assert_eq!(form.validate().unwrap_err(), "Please fill in all required fields");
    }

    #[test]
    fn instructor_match() {
        let crs = Course {
            id: 3,
            code: "MTH200".to_owned(),
            name: "Linear Algebra".to_owned(),
            description: None,
            credits: 4,
            semester: None,
            department: None,
            instructor: Some("TCH2024001".to_owned()),
        };
        assert!(crs.instructed_by("TCH2024001"));
        assert!(!crs.instructed_by("TCH2024002"));
        assert_eq!(CourseForm::from_course(&crs).credits, "4");
    }

    #[test]
    fn enrollment_status_tokens() {
        assert_eq!("active".parse::<EnrollmentStatus>(), Ok(EnrollmentStatus::Active));
        assert_eq!(EnrollmentStatus::Inactive.to_string(), "inactive");
        assert!("cancelled".parse::<EnrollmentStatus>().is_err());
    }
}
