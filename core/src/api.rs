//! Typed CRM operations.
//!
//! # Design
//! Each operation is split the same way: a `build_*` function produces a
//! `CrmRequest` against a logical path, `CrmClient::fetch` finds a candidate
//! that answers, and a `parse_*` function turns the winning body into a typed
//! value. The build and parse halves are pure and tested on their own.
//!
//! The CRM answers either with the raw payload or wrapped as
//! `{"success": bool, ...fields}`. `unwrap_envelope` accepts both. A
//! `success` flag that is present and falsy is a business rejection, not a
//! transport failure, and is never retried.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::client::{CrmClient, CrmRequest};
use crate::config::ConfigSource;
use crate::error::ApiError;
use crate::http::{HttpMethod, Transport};
use crate::types::{
    AppointmentPage, Confirmation, ConfirmConsultation, ConsultationRequestPage,
    ConsultationSubmission, DashboardSnapshot, DashboardStats, PatientPage, RequestStatusFilter,
    SubmissionReceipt,
};

/// Priority attached to every consultation request submitted from the site.
pub const SUBMISSION_PRIORITY: &str = "normal";

#[derive(Serialize)]
struct SubmissionPayload<'a> {
    #[serde(flatten)]
    submission: &'a ConsultationSubmission,
    priority: &'static str,
}

fn query(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string(value).map_err(|e| ApiError::SerializationError(e.to_string()))
}

pub fn build_dashboard_stats() -> CrmRequest {
    CrmRequest::get("/dashboard/stats")
}

pub fn build_list_consultation_requests(status: RequestStatusFilter) -> CrmRequest {
    CrmRequest::get(format!(
        "/consultation-requests?{}",
        query(&[("status", status.as_str())])
    ))
}

pub fn build_submit_consultation_request(
    submission: &ConsultationSubmission,
) -> Result<CrmRequest, ApiError> {
    let body = to_json(&SubmissionPayload {
        submission,
        priority: SUBMISSION_PRIORITY,
    })?;
    Ok(CrmRequest::json(
        HttpMethod::Post,
        "/consultation-requests",
        body,
    ))
}

pub fn build_confirm_consultation_request(
    id: u64,
    confirm: &ConfirmConsultation,
) -> Result<CrmRequest, ApiError> {
    Ok(CrmRequest::json(
        HttpMethod::Put,
        format!("/consultation-requests/{id}/confirm"),
        to_json(confirm)?,
    ))
}

pub fn build_list_appointments(start: NaiveDate, end: NaiveDate) -> CrmRequest {
    let start = start.format("%Y-%m-%d").to_string();
    let end = end.format("%Y-%m-%d").to_string();
    CrmRequest::get(format!(
        "/appointments?{}",
        query(&[("start_date", start.as_str()), ("end_date", end.as_str())])
    ))
}

pub fn build_list_patients(search: Option<&str>) -> CrmRequest {
    match search.map(str::trim).filter(|s| !s.is_empty()) {
        Some(term) => CrmRequest::get(format!("/patients?{}", query(&[("search", term)]))),
        None => CrmRequest::get("/patients"),
    }
}

/// JavaScript-style truthiness of a JSON value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn rejection(value: &Value) -> ApiError {
    let message = value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("request was not accepted")
        .to_string();
    ApiError::Rejected { message }
}

/// Accept both the raw payload and the `{success, ...}` envelope.
///
/// With `require_success`, a missing flag is treated like a falsy one.
pub fn unwrap_envelope(data: Value, require_success: bool) -> Result<Value, ApiError> {
    match data.get("success") {
        Some(flag) if !is_truthy(flag) => Err(rejection(&data)),
        None if require_success => Err(rejection(&data)),
        _ => Ok(data),
    }
}

fn parse_payload<T: DeserializeOwned>(data: Value, require_success: bool) -> Result<T, ApiError> {
    let data = unwrap_envelope(data, require_success)?;
    serde_json::from_value(data).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

pub fn parse_dashboard_stats(data: Value) -> Result<DashboardStats, ApiError> {
    parse_payload(data, false)
}

pub fn parse_list_consultation_requests(data: Value) -> Result<ConsultationRequestPage, ApiError> {
    parse_payload(data, false)
}

/// Only a truthy `success` counts as an accepted submission.
pub fn parse_submit_consultation_request(data: Value) -> Result<SubmissionReceipt, ApiError> {
    parse_payload(data, true)
}

pub fn parse_confirm_consultation_request(data: Value) -> Result<Confirmation, ApiError> {
    parse_payload(data, true)
}

pub fn parse_list_appointments(data: Value) -> Result<AppointmentPage, ApiError> {
    parse_payload(data, false)
}

pub fn parse_list_patients(data: Value) -> Result<PatientPage, ApiError> {
    parse_payload(data, false)
}

impl<T: Transport, C: ConfigSource> CrmClient<T, C> {
    pub fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        let outcome = self.fetch(&build_dashboard_stats())?;
        parse_dashboard_stats(outcome.data)
    }

    pub fn list_consultation_requests(
        &self,
        status: RequestStatusFilter,
    ) -> Result<ConsultationRequestPage, ApiError> {
        let outcome = self.fetch(&build_list_consultation_requests(status))?;
        parse_list_consultation_requests(outcome.data)
    }

    /// Send a consultation request from the scheduling form.
    ///
    /// Transport failures across every candidate and a falsy `success` flag
    /// both surface as errors; `ApiError::user_message` gives the text to
    /// show either way.
    pub fn submit_consultation_request(
        &self,
        submission: &ConsultationSubmission,
    ) -> Result<SubmissionReceipt, ApiError> {
        let outcome = self.fetch(&build_submit_consultation_request(submission)?)?;
        parse_submit_consultation_request(outcome.data).inspect_err(|err| {
            warn!(url = %outcome.url, error = %err, "consultation request not accepted");
        })
    }

    pub fn confirm_consultation_request(
        &self,
        id: u64,
        confirm: &ConfirmConsultation,
    ) -> Result<Confirmation, ApiError> {
        let outcome = self.fetch(&build_confirm_consultation_request(id, confirm)?)?;
        parse_confirm_consultation_request(outcome.data)
    }

    pub fn list_appointments(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AppointmentPage, ApiError> {
        let outcome = self.fetch(&build_list_appointments(start, end))?;
        parse_list_appointments(outcome.data)
    }

    pub fn list_patients(&self, search: Option<&str>) -> Result<PatientPage, ApiError> {
        let outcome = self.fetch(&build_list_patients(search))?;
        parse_list_patients(outcome.data)
    }

    /// Load stats, requests with `status`, and appointments for `today`.
    ///
    /// A part that fails is logged with its attempts and left empty; the
    /// snapshot itself never fails.
    pub fn load_dashboard(
        &self,
        status: RequestStatusFilter,
        today: NaiveDate,
    ) -> DashboardSnapshot {
        let stats = self
            .dashboard_stats()
            .inspect_err(|err| log_part_failure("dashboard stats", err))
            .ok();
        let consultation_requests = self
            .list_consultation_requests(status)
            .inspect_err(|err| log_part_failure("consultation requests", err))
            .map(|page| page.consultation_requests)
            .unwrap_or_default();
        let appointments = self
            .list_appointments(today, today)
            .inspect_err(|err| log_part_failure("appointments", err))
            .map(|page| page.appointments)
            .unwrap_or_default();

        DashboardSnapshot {
            stats,
            consultation_requests,
            appointments,
        }
    }
}

fn log_part_failure(part: &str, err: &ApiError) {
    warn!(part, error = %err, "error fetching dashboard data");
    for attempt in err.attempts() {
        warn!(
            part,
            url = %attempt.url,
            status = ?attempt.status,
            failure = %attempt.failure,
            "CRM fetch attempt"
        );
    }
}
