// College admissions: students and their applications

use crate::document::{Document, OnDelete, Relation};
use crate::error::{Refusal, Result};
use crate::store::{Check, Removal, Store};
use crate::views;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const STORAGE_KEY: &str = "college_app";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Submitted,
    UnderReview,
    Accepted,
    Waitlisted,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Submitted,
        ApplicationStatus::UnderReview,
        ApplicationStatus::Accepted,
        ApplicationStatus::Waitlisted,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Waitlisted => "waitlisted",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    /// Accepted and rejected applications are final
    pub fn is_decided(&self) -> bool {
        matches!(self, ApplicationStatus::Accepted | ApplicationStatus::Rejected)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace([' ', '-'], "_");
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| crate::error::ValidationError::OutOfRange {
                field: "status".to_string(),
                expected: "one of submitted, under_review, accepted, waitlisted, rejected".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub student_id: String,
    pub college: String,
    #[serde(default)]
    pub status: ApplicationStatus,
}

crate::impl_record!(Student, "students", append);
crate::impl_record!(Application, "applications", append);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollegeDocument {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

crate::impl_holds!(CollegeDocument {
    Student => students,
    Application => applications,
});

impl Document for CollegeDocument {
    fn storage_key() -> &'static str {
        STORAGE_KEY
    }

    fn collections() -> &'static [&'static str] {
        &["students", "applications"]
    }

    fn seed() -> Self {
        Self::default()
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::new::<Student, Application>(OnDelete::Cascade, |a| a.student_id.as_str())]
    }
}

pub type CollegeStore = Store<CollegeDocument>;

pub fn add_student(store: &mut CollegeStore, name: &str) -> Result<Student> {
    let student = Student {
        id: String::new(),
        created_at: DateTime::default(),
        name: super::required("student name", name)?,
    };
    store.insert_checked(student, &views::unique_name::<Student>(|s| s.name.as_str()))
}

/// File an application; one per student and college
pub fn apply(store: &mut CollegeStore, student_id: &str, college: &str) -> Result<Application> {
    let college = super::required("college", college)?;
    if store.get::<Student>(student_id).is_none() {
        return Err(Refusal::Unavailable {
            collection: "students".to_string(),
            id: student_id.to_string(),
            reason: "not found".to_string(),
        }
        .into());
    }

    let once_per_college: &Check<Application> = &|candidate, existing| {
        let key = views::normalize_name(&candidate.college);
        existing
            .iter()
            .find(|a| a.student_id == candidate.student_id && views::normalize_name(&a.college) == key)
            .map(|a| Refusal::Duplicate {
                collection: "applications".to_string(),
                key: key.clone(),
                existing_id: a.id.clone(),
            })
    };

    let application = Application {
        id: String::new(),
        created_at: DateTime::default(),
        student_id: student_id.to_string(),
        college,
        status: ApplicationStatus::Submitted,
    };
    store.insert_checked(application, once_per_college)
}

pub fn set_status(store: &mut CollegeStore, id: &str, status: ApplicationStatus) -> Result<Option<Application>> {
    store.update_with::<Application>(id, |a| a.status = status)
}

/// Delete a student together with their applications
pub fn delete_student(store: &mut CollegeStore, id: &str) -> Result<Option<Removal<Student>>> {
    store.remove::<Student>(id, None)
}

pub fn withdraw(store: &mut CollegeStore, id: &str) -> Result<Option<Removal<Application>>> {
    store.remove::<Application>(id, None)
}

/// Number of applications in every status, in pipeline order
pub fn status_counts(doc: &CollegeDocument) -> Vec<(ApplicationStatus, usize)> {
    ApplicationStatus::ALL
        .into_iter()
        .map(|status| (status, doc.applications.iter().filter(|a| a.status == status).count()))
        .collect()
}

pub fn applications_of<'a>(doc: &'a CollegeDocument, student_id: &str) -> Vec<&'a Application> {
    doc.applications.iter().filter(|a| a.student_id == student_id).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationRow {
    pub id: String,
    pub student: String,
    pub college: String,
    pub status: ApplicationStatus,
}

pub fn application_rows(doc: &CollegeDocument) -> Vec<ApplicationRow> {
    doc.applications
        .iter()
        .map(|a| ApplicationRow {
            id: a.id.clone(),
            student: views::label(&doc.students, &a.student_id, |s| s.name.as_str()).to_string(),
            college: a.college.clone(),
            status: a.status,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStorage;

    fn open() -> CollegeStore {
        Store::open(MemoryStorage::new()).unwrap()
    }

    #[test]
    fn test_add_student_duplicates() {
        let mut store = open();
        add_student(&mut store, "Grace Hopper").unwrap();
        assert!(matches!(
            add_student(&mut store, "grace  hopper").unwrap_err(),
            Error::Refused(Refusal::Duplicate { .. })
        ));
        assert_eq!(store.len::<Student>(), 1);
    }

    #[test]
    fn test_apply_once_per_college() {
        let mut store = open();
        let grace = add_student(&mut store, "Grace").unwrap();
        let alan = add_student(&mut store, "Alan").unwrap();

        apply(&mut store, &grace.id, "MIT").unwrap();
        assert!(apply(&mut store, &grace.id, " mit ").unwrap_err().is_refusal());
        apply(&mut store, &alan.id, "MIT").unwrap();
        apply(&mut store, &grace.id, "Yale").unwrap();
        assert_eq!(applications_of(store.document(), &grace.id).len(), 2);

        assert!(apply(&mut store, "ghost", "MIT").unwrap_err().is_refusal());
    }

    #[test]
    fn test_status_counts() {
        let mut store = open();
        let grace = add_student(&mut store, "Grace").unwrap();
        let mit = apply(&mut store, &grace.id, "MIT").unwrap();
        apply(&mut store, &grace.id, "Yale").unwrap();

        let updated = set_status(&mut store, &mit.id, ApplicationStatus::Accepted).unwrap().unwrap();
        assert!(updated.status.is_decided());

        let counts = status_counts(store.document());
        assert_eq!(counts.len(), 5);
        assert_eq!(counts[0], (ApplicationStatus::Submitted, 1));
        assert_eq!(counts[2], (ApplicationStatus::Accepted, 1));
    }

    #[test]
    fn test_delete_student_cascades() {
        let mut store = open();
        let grace = add_student(&mut store, "Grace").unwrap();
        let alan = add_student(&mut store, "Alan").unwrap();
        apply(&mut store, &grace.id, "MIT").unwrap();
        apply(&mut store, &alan.id, "MIT").unwrap();

        let removal = delete_student(&mut store, &grace.id).unwrap().unwrap();
        assert_eq!(removal.cascaded, vec![("applications", 1)]);
        assert_eq!(application_rows(store.document())[0].student, "Alan");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Under Review".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::UnderReview);
        assert_eq!("accepted".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::Accepted);
        assert!("maybe".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn test_missing_status_defaults_to_submitted() {
        let app: Application = serde_json::from_str(r#"{"id":"a1","student_id":"s1","college":"MIT"}"#).unwrap();
        assert_eq!(app.status, ApplicationStatus::Submitted);
        assert_eq!(serde_json::to_value(ApplicationStatus::UnderReview).unwrap(), "under_review");
    }

    #[test]
    fn test_withdraw() {
        let mut store = open();
        let grace = add_student(&mut store, "Grace").unwrap();
        let app = apply(&mut store, &grace.id, "MIT").unwrap();
        withdraw(&mut store, &app.id).unwrap().unwrap();
        assert_eq!(store.len::<Application>(), 0);
        assert_eq!(store.len::<Student>(), 1);
    }
}
