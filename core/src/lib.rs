//! Client core for the practice CRM API.
//!
//! # Overview
//! Resolves which base URL the CRM is reachable under, then sends each
//! request to the candidate URLs in priority order until one answers.
//! Callers get either the winning URL with its parsed body, or one error
//! listing every attempt that was made.
//!
//! # Design
//! - `resolve` is pure: configuration comes from a `ConfigSource`, so tests
//!   need no browser and no real environment.
//! - `client` owns the fallback loop; the network sits behind `Transport`.
//! - `api` splits each CRM operation into `build_*` (produces a request) and
//!   `parse_*` (consumes the winning body).
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod resolve;
pub mod types;

pub use client::{CancellationToken, CrmClient, CrmRequest, FetchOutcome};
pub use config::{ConfigSource, EnvConfig, FetchPolicy, PageContext, StaticConfig};
pub use error::{ApiError, Attempt, AttemptFailure, SUPPORT_MESSAGE};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError, UreqTransport};
pub use resolve::{
    base_url_candidates, build_url, normalize_base_url, path_variants, url_candidates,
};
pub use types::{
    Appointment, AppointmentPage, Confirmation, ConfirmConsultation, ConsultationRequest,
    ConsultationRequestPage, ConsultationSubmission, DashboardSnapshot, DashboardStats, Pagination,
    Patient, PatientPage, RequestStatusFilter, Stats, SubmissionReceipt,
};
