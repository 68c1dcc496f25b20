// Healthcare scheduling: patients, doctors, appointments

use crate::document::{Document, OnDelete, Relation};
use crate::error::{Refusal, Result};
use crate::store::{Check, Removal, Store};
use crate::views;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const STORAGE_KEY: &str = "healthcare_app";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Patient ID
    pub patient: String,
    /// Doctor ID
    pub doctor: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

crate::impl_record!(Patient, "patients", append);
crate::impl_record!(Doctor, "doctors", append);
crate::impl_record!(Appointment, "appointments", append);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthcareDocument {
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub doctors: Vec<Doctor>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
}

crate::impl_holds!(HealthcareDocument {
    Patient => patients,
    Doctor => doctors,
    Appointment => appointments,
});

impl Document for HealthcareDocument {
    fn storage_key() -> &'static str {
        STORAGE_KEY
    }

    fn collections() -> &'static [&'static str] {
        &["patients", "doctors", "appointments"]
    }

    fn seed() -> Self {
        Self::default()
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![
            Relation::new::<Patient, Appointment>(OnDelete::Restrict, |a| a.patient.as_str()),
            Relation::new::<Doctor, Appointment>(OnDelete::Restrict, |a| a.doctor.as_str()),
        ]
    }
}

pub type HealthcareStore = Store<HealthcareDocument>;

pub fn add_patient(store: &mut HealthcareStore, name: &str) -> Result<Patient> {
    store.insert(Patient {
        id: String::new(),
        created_at: DateTime::default(),
        name: super::required("patient name", name)?,
    })
}

pub fn add_doctor(store: &mut HealthcareStore, name: &str) -> Result<Doctor> {
    store.insert(Doctor {
        id: String::new(),
        created_at: DateTime::default(),
        name: super::required("doctor name", name)?,
    })
}

fn conflicts(window: Duration) -> impl Fn(&Appointment, &[Appointment]) -> Option<Refusal> {
    move |candidate: &Appointment, existing: &[Appointment]| {
        views::schedule_conflict(existing, candidate, window, |a| a.doctor.as_str(), |a| a.date)
    }
}

fn missing(collection: &str, id: &str) -> Refusal {
    Refusal::Unavailable {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: "not found".to_string(),
    }
}

/// Book a patient with a doctor at `at`.
///
/// Refused when either party is unknown or the doctor already has an
/// appointment less than `window` away.
pub fn book_appointment(
    store: &mut HealthcareStore,
    patient_id: &str,
    doctor_id: &str,
    at: DateTime<Utc>,
    window: Duration,
) -> Result<Appointment> {
    if store.get::<Patient>(patient_id).is_none() {
        return Err(missing("patients", patient_id).into());
    }
    if store.get::<Doctor>(doctor_id).is_none() {
        return Err(missing("doctors", doctor_id).into());
    }

    let candidate = Appointment {
        id: String::new(),
        created_at: DateTime::default(),
        patient: patient_id.to_string(),
        doctor: doctor_id.to_string(),
        date: at,
        notes: String::new(),
    };
    let check: &Check<Appointment> = &conflicts(window);
    let booked = store.insert_checked(candidate, check)?;
    debug!(id = %booked.id, doctor = doctor_id, at = %at, "Appointment booked");
    Ok(booked)
}

/// Move an appointment, applying the same conflict rule as booking.
/// Returns `Ok(None)` when the appointment does not exist.
pub fn reschedule(
    store: &mut HealthcareStore,
    id: &str,
    at: DateTime<Utc>,
    window: Duration,
) -> Result<Option<Appointment>> {
    let Some(current) = store.get::<Appointment>(id) else {
        return Ok(None);
    };

    let mut moved = current.clone();
    moved.date = at;
    if let Some(refusal) = conflicts(window)(&moved, store.list::<Appointment>()) {
        debug!(id, %refusal, "Reschedule refused");
        return Err(refusal.into());
    }

    store.update_with::<Appointment>(id, |a| a.date = at)
}

pub fn cancel_appointment(store: &mut HealthcareStore, id: &str) -> Result<Option<Removal<Appointment>>> {
    store.remove::<Appointment>(id, None)
}

/// Refused while the patient has appointments
pub fn delete_patient(store: &mut HealthcareStore, id: &str) -> Result<Option<Removal<Patient>>> {
    store.remove::<Patient>(id, None)
}

/// Refused while the doctor has appointments
pub fn delete_doctor(store: &mut HealthcareStore, id: &str) -> Result<Option<Removal<Doctor>>> {
    store.remove::<Doctor>(id, None)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub patient: String,
    pub doctor: String,
    pub date: DateTime<Utc>,
}

fn row(doc: &HealthcareDocument, a: &Appointment) -> AppointmentRow {
    AppointmentRow {
        id: a.id.clone(),
        patient: views::label(&doc.patients, &a.patient, |p| p.name.as_str()).to_string(),
        doctor: views::label(&doc.doctors, &a.doctor, |d| d.name.as_str()).to_string(),
        date: a.date,
    }
}

/// One doctor's appointments, earliest first
pub fn doctor_schedule(doc: &HealthcareDocument, doctor_id: &str) -> Vec<AppointmentRow> {
    let mut rows: Vec<AppointmentRow> = doc
        .appointments
        .iter()
        .filter(|a| a.doctor == doctor_id)
        .map(|a| row(doc, a))
        .collect();
    rows.sort_by_key(|r| r.date);
    rows
}

pub fn patient_appointments(doc: &HealthcareDocument, patient_id: &str) -> Vec<AppointmentRow> {
    let mut rows: Vec<AppointmentRow> = doc
        .appointments
        .iter()
        .filter(|a| a.patient == patient_id)
        .map(|a| row(doc, a))
        .collect();
    rows.sort_by_key(|r| r.date);
    rows
}

/// Every appointment at or after `from`, earliest first
pub fn upcoming(doc: &HealthcareDocument, from: DateTime<Utc>) -> Vec<AppointmentRow> {
    let mut rows: Vec<AppointmentRow> = doc
        .appointments
        .iter()
        .filter(|a| a.date >= from)
        .map(|a| row(doc, a))
        .collect();
    rows.sort_by_key(|r| r.date);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFLICT_WINDOW_MINUTES;
    use crate::error::Error;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn window() -> Duration {
        Duration::minutes(CONFLICT_WINDOW_MINUTES)
    }

    fn setup() -> (HealthcareStore, Patient, Doctor) {
        let mut store = Store::open(MemoryStorage::new()).unwrap();
        let patient = add_patient(&mut store, "Pat").unwrap();
        let doctor = add_doctor(&mut store, "Dr. House").unwrap();
        (store, patient, doctor)
    }

    #[test]
    fn test_conflict_window_scenario() {
        let (mut store, pat, doc) = setup();

        book_appointment(&mut store, &pat.id, &doc.id, at(10, 0), window()).unwrap();

        let err = book_appointment(&mut store, &pat.id, &doc.id, at(10, 20), window()).unwrap_err();
        assert!(matches!(err, Error::Refused(Refusal::Conflict { .. })));
        assert_eq!(store.len::<Appointment>(), 1);

        book_appointment(&mut store, &pat.id, &doc.id, at(10, 31), window()).unwrap();
        assert_eq!(store.len::<Appointment>(), 2);
    }

    #[test]
    fn test_other_doctor_not_in_conflict() {
        let (mut store, pat, doc) = setup();
        let other = add_doctor(&mut store, "Dr. Grey").unwrap();

        book_appointment(&mut store, &pat.id, &doc.id, at(10, 0), window()).unwrap();
        book_appointment(&mut store, &pat.id, &other.id, at(10, 0), window()).unwrap();
        assert_eq!(store.len::<Appointment>(), 2);
    }

    #[test]
    fn test_booking_requires_known_parties() {
        let (mut store, pat, doc) = setup();
        assert!(matches!(
            book_appointment(&mut store, "ghost", &doc.id, at(9, 0), window()).unwrap_err(),
            Error::Refused(Refusal::Unavailable { .. })
        ));
        assert!(book_appointment(&mut store, &pat.id, "ghost", at(9, 0), window()).is_err());
    }

    #[test]
    fn test_appointments_append() {
        let (mut store, pat, doc) = setup();
        let first = book_appointment(&mut store, &pat.id, &doc.id, at(11, 0), window()).unwrap();
        book_appointment(&mut store, &pat.id, &doc.id, at(9, 0), window()).unwrap();
        assert_eq!(store.list::<Appointment>()[0].id, first.id);

        // the schedule orders by time regardless
        let schedule = doctor_schedule(store.document(), &doc.id);
        assert_eq!(schedule[0].date, at(9, 0));
        assert_eq!(schedule[1].date, at(11, 0));
        assert_eq!(schedule[0].patient, "Pat");
    }

    #[test]
    fn test_reschedule_excludes_itself() {
        let (mut store, pat, doc) = setup();
        let a = book_appointment(&mut store, &pat.id, &doc.id, at(10, 0), window()).unwrap();
        book_appointment(&mut store, &pat.id, &doc.id, at(12, 0), window()).unwrap();

        let moved = reschedule(&mut store, &a.id, at(10, 15), window()).unwrap().unwrap();
        assert_eq!(moved.date, at(10, 15));
        assert_eq!(moved.created_at, a.created_at);

        assert!(reschedule(&mut store, &a.id, at(11, 45), window()).unwrap_err().is_refusal());
        assert!(reschedule(&mut store, "missing", at(8, 0), window()).unwrap().is_none());
    }

    #[test]
    fn test_delete_restricted_while_booked() {
        let (mut store, pat, doc) = setup();
        let a = book_appointment(&mut store, &pat.id, &doc.id, at(10, 0), window()).unwrap();

        assert!(matches!(
            delete_patient(&mut store, &pat.id).unwrap_err(),
            Error::Refused(Refusal::InUse { .. })
        ));
        assert!(delete_doctor(&mut store, &doc.id).unwrap_err().is_refusal());
        assert_eq!(store.len::<Patient>(), 1);

        cancel_appointment(&mut store, &a.id).unwrap().unwrap();
        delete_patient(&mut store, &pat.id).unwrap().unwrap();
        delete_doctor(&mut store, &doc.id).unwrap().unwrap();
    }

    #[test]
    fn test_dangling_names_resolve_to_unknown() {
        let mut store: HealthcareStore = Store::open(MemoryStorage::new()).unwrap();
        store
            .import_blob(
                r#"{
                "patients": [],
                "doctors": [{"id": "d1", "name": "Dr. Who"}],
                "appointments": [{"id": "a1", "patient": "p9", "doctor": "d1", "date": "2024-05-01T10:00:00.000Z"}]
            }"#,
            )
            .unwrap();

        let rows = patient_appointments(store.document(), "p9");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].patient, views::UNKNOWN);
        assert_eq!(rows[0].doctor, "Dr. Who");
        assert_eq!(upcoming(store.document(), at(10, 1)).len(), 0);
    }

    #[test]
    fn test_blank_patient_rejected() {
        let (mut store, _, _) = setup();
        assert!(add_patient(&mut store, " ").is_err());
        assert_eq!(store.len::<Patient>(), 1);
    }
}
