//! Domain DTOs for the CRM API.
//!
//! # Design
//! These mirror the CRM's JSON but are defined independently of the
//! mock-server crate; integration tests catch schema drift between the two.
//!
//! Outgoing payloads use the CRM's camelCase field names. Incoming records
//! use its snake_case names and default every field the CRM may omit, so a
//! sparse payload still parses.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// `HH:MM` wire format for times of day.
pub(crate) mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Status filter accepted by `GET /consultation-requests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatusFilter {
    #[default]
    Pending,
    Confirmed,
    All,
}

impl RequestStatusFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatusFilter::Pending => "pending",
            RequestStatusFilter::Confirmed => "confirmed",
            RequestStatusFilter::All => "all",
        }
    }
}

/// Consultation request as entered in the scheduling form.
///
/// Priority is not part of the form; it is always sent as `normal`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationSubmission {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance: Option<String>,
    pub preferred_contact: String,
    /// Identifier of the selected service, e.g. `hormone`.
    pub service_type: String,
    pub preferred_date: NaiveDate,
    #[serde(with = "hh_mm")]
    pub preferred_time: NaiveTime,
    pub reason: String,
}

/// Body of `PUT /consultation-requests/{id}/confirm`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmConsultation {
    pub confirmed_date: NaiveDate,
    #[serde(with = "hh_mm")]
    pub confirmed_time: NaiveTime,
    /// Minutes.
    pub duration: u32,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Patient {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub insurance_provider: Option<String>,
    pub preferred_contact_method: Option<String>,
    pub created_at: Option<String>,
    pub status: Option<String>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ConsultationRequest {
    pub id: u64,
    pub patient_id: u64,
    pub patient_name: Option<String>,
    pub service_type: String,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub reason_for_visit: Option<String>,
    pub status: String,
    pub priority: String,
    pub created_at: Option<String>,
    pub confirmed_at: Option<String>,
    pub confirmed_date: Option<String>,
    pub confirmed_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Appointment {
    pub id: u64,
    pub patient_id: u64,
    pub patient_name: Option<String>,
    pub consultation_request_id: Option<u64>,
    pub service_type: String,
    pub appointment_date: String,
    pub appointment_time: String,
    pub duration_minutes: u32,
    pub status: String,
    pub provider: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Pagination {
    pub page: u32,
    pub pages: u32,
    pub per_page: u32,
    pub total: u64,
}

/// Headline counters shown on the admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Stats {
    pub todays_appointments: u64,
    pub pending_requests: u64,
    pub total_patients: u64,
    pub weekly_appointments: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DashboardStats {
    pub stats: Stats,
    pub recent_requests: Vec<ConsultationRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ConsultationRequestPage {
    pub consultation_requests: Vec<ConsultationRequest>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AppointmentPage {
    pub appointments: Vec<Appointment>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PatientPage {
    pub patients: Vec<Patient>,
    pub pagination: Option<Pagination>,
}

/// What the CRM returns after accepting a consultation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SubmissionReceipt {
    pub consultation_request: Option<ConsultationRequest>,
    pub patient: Option<Patient>,
    pub message: Option<String>,
}

/// What the CRM returns after confirming a consultation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Confirmation {
    pub consultation_request: Option<ConsultationRequest>,
    pub appointment: Option<Appointment>,
    pub message: Option<String>,
}

/// Everything the admin dashboard shows on open. Parts that failed to load
/// are left empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DashboardSnapshot {
    pub stats: Option<DashboardStats>,
    pub consultation_requests: Vec<ConsultationRequest>,
    pub appointments: Vec<Appointment>,
}
