/*!
Attendance statuses and the summaries computed from them.

Every view that shows an attendance rate (student dashboard, faculty course
overview, principal statistics) goes through `AttendanceTally`, so the rate
is computed the same way everywhere.
*/
use std::collections::BTreeMap;

use serde::{Serialize, Serializer, ser::SerializeStruct};
use time::Date;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Present,
    Absent,
    Late,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Status::Present => "present",
            Status::Absent  => "absent",
            Status::Late    => "late",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Status::Present),
            "absent"  => Ok(Status::Absent),
            "late"    => Ok(Status::Late),
            _ => Err(format!("{:?} is not a valid attendance status.", s)),
        }
    }
}

/// Color band an attendance rate falls in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Standing {
    Good,
    Warning,
    Poor,
}

impl Standing {
    pub fn from_rate(rate: f64) -> Standing {
        if rate >= 75.0 {
            Standing::Good
        } else if rate >= 60.0 {
            Standing::Warning
        } else {
            Standing::Poor
        }
    }

    pub fn badge(&self) -> &'static str {
        match self {
            Standing::Good => "badge-success",
            Standing::Warning => "badge-warning",
            Standing::Poor => "badge-danger",
        }
    }
}

/// Counts of each status over some set of attendance records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttendanceTally {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
}

impl AttendanceTally {
    pub fn new(present: i64, absent: i64, late: i64) -> AttendanceTally {
        AttendanceTally { present, absent, late }
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late
    }

    /**
    Percentage of records where the student showed up (late counts as
    attending), rounded to one decimal place. Zero when there are no records.
    */
    pub fn rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let attended = (self.present + self.late) as f64;
        (attended / total as f64 * 1000.0).round() / 10.0
    }

    pub fn standing(&self) -> Standing {
        Standing::from_rate(self.rate())
    }
}

impl std::ops::AddAssign for AttendanceTally {
    fn add_assign(&mut self, other: AttendanceTally) {
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
    }
}

// Templates get the derived numbers alongside the counts.
impl Serialize for AttendanceTally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AttendanceTally", 6)?;
        s.serialize_field("present", &self.present)?;
        s.serialize_field("absent", &self.absent)?;
        s.serialize_field("late", &self.late)?;
        s.serialize_field("total", &self.total())?;
        s.serialize_field("rate", &self.rate())?;
        s.serialize_field("badge", self.standing().badge())?;
        s.end()
    }
}

/// Attendance summary for one course (optionally restricted to one student).
#[derive(Clone, Debug, Serialize)]
pub struct CourseAttendance {
    pub course_code: String,
    pub course_name: String,
    pub students_tracked: i64,
    pub tally: AttendanceTally,
}

/// One line of the attendance-marking form.
#[derive(Clone, Debug, Serialize)]
pub struct RosterEntry {
    pub student_id: String,
    pub full_name: String,
    #[serde(with = "crate::ymd")]
    pub enrolled: Date,
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AttendanceRecord {
    pub course_code: String,
    pub course_name: String,
    #[serde(with = "crate::ymd")]
    pub day: Date,
    pub status: Status,
}

/// Form fields carrying a student's status are named with this prefix
/// followed by the student id.
pub const ENTRY_PREFIX: &str = "att:";

/**
Pull the per-student statuses out of a submitted roster form.

Fields not starting with `ENTRY_PREFIX` are ignored. The map is ordered by
student id, which is the order the rows get written in.
*/
pub fn entries_from_form(
    fields: &[(String, String)]
) -> Result<BTreeMap<String, Status>, String> {
    let mut entries = BTreeMap::new();
    for (name, value) in fields.iter() {
        let student_id = match name.strip_prefix(ENTRY_PREFIX) {
            Some(s) => s.trim(),
            None => { continue; },
        };
        if student_id.is_empty() {
            return Err("Attendance entry without a student id.".to_owned());
        }
        let status: Status = value.trim().parse()?;
        entries.insert(student_id.to_owned(), status);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn rate_counts_late_as_attended() {
        let t = AttendanceTally::new(7, 2, 1);
        assert_eq!(t.total(), 10);
        assert!(approx_eq!(f64, t.rate(), 80.0));
        assert_eq!(t.standing(), Standing::Good);
    }

    #[test]
    fn rate_rounds_to_one_decimal() {
        let t = AttendanceTally::new(2, 1, 0);
        assert!(approx_eq!(f64, t.rate(), 66.7));
        assert_eq!(t.standing(), Standing::Warning);

        let t = AttendanceTally::new(1, 2, 0);
        assert!(approx_eq!(f64, t.rate(), 33.3));
        assert_eq!(t.standing().badge(), "badge-danger");
    }

    #[test]
    fn empty_rate_is_zero() {
        let t = AttendanceTally::default();
        assert_eq!(t.total(), 0);
        assert!(approx_eq!(f64, t.rate(), 0.0));
    }

    #[test]
    fn standing_boundaries() {
        assert_eq!(Standing::from_rate(75.0), Standing::Good);
        assert_eq!(Standing::from_rate(74.9), Standing::Warning);
        assert_eq!(Standing::from_rate(60.0), Standing::Warning);
        assert_eq!(Standing::from_rate(59.9), Standing::Poor);
    }

    #[test]
    fn tally_serializes_derived_fields() {
        let mut t = AttendanceTally::new(3, 0, 0);
        t += AttendanceTally::new(0, 1, 0);
        let v = serde_json::to_value(t).unwrap();
        assert_eq!(v["total"], 4);
        assert_eq!(v["rate"], 75.0);
        assert_eq!(v["badge"], "badge-success");
    }

    #[test]
    fn roster_form_entries() {
        let fields: Vec<(String, String)> = vec![
            ("course_code".into(), "CS101".into()),
            ("att:STU20240002".into(), "late".into()),
            ("att:STU20240001".into(), "present".into()),
            ("att:STU20240002".into(), "absent".into()),
        ];
        let entries = entries_from_form(&fields).unwrap();
        let got: Vec<(&str, Status)> = entries.iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        assert_eq!(got, vec![
            ("STU20240001", Status::Present),
            ("STU20240002", Status::Absent),
        ]);

        let bad = vec![("att:STU20240001".to_owned(), "excused".to_owned())];
        assert!(entries_from_form(&bad).is_err());
    }
}
