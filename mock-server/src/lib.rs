use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patient {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub insurance_provider: Option<String>,
    pub preferred_contact_method: String,
    pub created_at: NaiveDateTime,
    pub status: String,
}

impl Patient {
    fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub id: u64,
    pub patient_id: u64,
    pub patient_name: Option<String>,
    pub service_type: String,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_time: Option<NaiveTime>,
    pub reason_for_visit: Option<String>,
    pub status: String,
    pub priority: String,
    pub created_at: NaiveDateTime,
    pub confirmed_at: Option<NaiveDateTime>,
    pub confirmed_date: Option<NaiveDate>,
    pub confirmed_time: Option<NaiveTime>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Appointment {
    pub id: u64,
    pub patient_id: u64,
    pub patient_name: Option<String>,
    pub consultation_request_id: Option<u64>,
    pub service_type: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: String,
    pub provider: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPatient {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub insurance: Option<String>,
    pub preferred_contact: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NewConsultationRequest {
    #[serde(flatten)]
    pub patient: NewPatient,
    pub service_type: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub reason: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub confirmed_date: String,
    pub confirmed_time: String,
    pub duration: Option<u32>,
    pub provider: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ListParams {
    pub status: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// In-memory CRM records.
#[derive(Debug, Default)]
pub struct Crm {
    pub patients: Vec<Patient>,
    pub consultation_requests: Vec<ConsultationRequest>,
    pub appointments: Vec<Appointment>,
    next_id: u64,
}

impl Crm {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_or_create_patient(&mut self, input: NewPatient) -> Result<Patient, String> {
        let email = required(input.email, "email")?;
        if let Some(existing) = self.patients.iter().find(|p| p.email == email) {
            return Ok(existing.clone());
        }
        let patient = Patient {
            id: self.next_id(),
            first_name: input.first_name.unwrap_or_default(),
            last_name: input.last_name.unwrap_or_default(),
            email,
            phone: input.phone,
            date_of_birth: parse_date(input.date_of_birth.as_deref())?,
            insurance_provider: input.insurance,
            preferred_contact_method: input
                .preferred_contact
                .unwrap_or_else(|| "email".to_string()),
            created_at: now(),
            status: "active".to_string(),
        };
        self.patients.push(patient.clone());
        Ok(patient)
    }
}

pub type Db = Arc<RwLock<Crm>>;

type ApiResponse = (StatusCode, Json<Value>);

pub fn app() -> Router {
    app_with(Db::default())
}

/// Router over an existing store, so tests can seed or inspect records.
pub fn app_with(db: Db) -> Router {
    let consultations = Router::new()
        .route("/", get(list_consultation_requests).post(create_consultation_request))
        .route("/{id}/confirm", put(confirm_consultation_request));

    Router::new()
        .route("/api/patients", get(list_patients).post(create_patient))
        .route("/api/patients/{id}", get(get_patient))
        .nest("/api/consultation-requests", consultations.clone())
        .nest("/api/patients/consultation-requests", consultations)
        .route("/api/appointments", get(list_appointments))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock CRM listening");
    }
    axum::serve(listener, app()).await
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{field} is required"))
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>, String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|e| format!("invalid date {v:?}: {e}"))
        })
        .transpose()
}

fn parse_time(value: Option<&str>) -> Result<Option<NaiveTime>, String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            NaiveTime::parse_from_str(v, "%H:%M").map_err(|e| format!("invalid time {v:?}: {e}"))
        })
        .transpose()
}

fn failure(status: StatusCode, error: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "success": false, "error": error.into() })))
}

fn page_of<T: Serialize>(
    items: Vec<T>,
    key: &str,
    params: &ListParams,
    default_per_page: usize,
) -> ApiResponse {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(default_per_page).max(1);
    let total = items.len();
    let pages = total.div_ceil(per_page);
    let slice: Vec<T> = items.into_iter().skip((page - 1) * per_page).take(per_page).collect();
    let mut body = json!({
        "success": true,
        "pagination": { "page": page, "pages": pages, "per_page": per_page, "total": total },
    });
    body[key] = json!(slice);
    (StatusCode::OK, Json(body))
}

async fn create_patient(State(db): State<Db>, Json(input): Json<NewPatient>) -> ApiResponse {
    let mut crm = db.write().await;
    let existing = input
        .email
        .as_ref()
        .is_some_and(|email| crm.patients.iter().any(|p| &p.email == email));
    match crm.find_or_create_patient(input) {
        Ok(patient) if existing => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "patient": patient,
                "message": "Patient already exists",
            })),
        ),
        Ok(patient) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "patient": patient,
                "message": "Patient created successfully",
            })),
        ),
        Err(error) => failure(StatusCode::BAD_REQUEST, error),
    }
}

async fn get_patient(State(db): State<Db>, Path(id): Path<u64>) -> ApiResponse {
    let crm = db.read().await;
    let Some(patient) = crm.patients.iter().find(|p| p.id == id) else {
        return failure(StatusCode::NOT_FOUND, format!("patient {id} not found"));
    };
    let requests: Vec<&ConsultationRequest> = crm
        .consultation_requests
        .iter()
        .filter(|r| r.patient_id == id)
        .collect();
    let appointments: Vec<&Appointment> =
        crm.appointments.iter().filter(|a| a.patient_id == id).collect();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "patient": patient,
            "consultation_requests": requests,
            "appointments": appointments,
        })),
    )
}

async fn list_patients(State(db): State<Db>, Query(params): Query<ListParams>) -> ApiResponse {
    let crm = db.read().await;
    let term = params.search.clone().unwrap_or_default().to_lowercase();
    let mut patients: Vec<Patient> = crm
        .patients
        .iter()
        .filter(|p| {
            term.is_empty()
                || p.first_name.to_lowercase().contains(&term)
                || p.last_name.to_lowercase().contains(&term)
                || p.email.to_lowercase().contains(&term)
        })
        .cloned()
        .collect();
    patients.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    page_of(patients, "patients", &params, 20)
}

async fn create_consultation_request(
    State(db): State<Db>,
    Json(input): Json<NewConsultationRequest>,
) -> ApiResponse {
    let mut crm = db.write().await;

    let service_type = match required(input.service_type, "serviceType") {
        Ok(v) => v,
        Err(error) => return failure(StatusCode::BAD_REQUEST, error),
    };
    let (preferred_date, preferred_time) = match (
        parse_date(input.preferred_date.as_deref()),
        parse_time(input.preferred_time.as_deref()),
    ) {
        (Ok(d), Ok(t)) => (d, t),
        (Err(error), _) | (_, Err(error)) => return failure(StatusCode::BAD_REQUEST, error),
    };
    let patient = match crm.find_or_create_patient(input.patient) {
        Ok(p) => p,
        Err(error) => return failure(StatusCode::BAD_REQUEST, error),
    };

    let request = ConsultationRequest {
        id: crm.next_id(),
        patient_id: patient.id,
        patient_name: Some(patient.full_name()),
        service_type,
        preferred_date,
        preferred_time,
        reason_for_visit: input.reason,
        status: "pending".to_string(),
        priority: input.priority.unwrap_or_else(|| "normal".to_string()),
        created_at: now(),
        confirmed_at: None,
        confirmed_date: None,
        confirmed_time: None,
    };
    crm.consultation_requests.push(request.clone());
    info!(id = request.id, patient_id = patient.id, "consultation request created");

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "consultation_request": request,
            "patient": patient,
            "message": "Consultation request submitted successfully",
        })),
    )
}

async fn list_consultation_requests(
    State(db): State<Db>,
    Query(params): Query<ListParams>,
) -> ApiResponse {
    let crm = db.read().await;
    let status = params.status.clone().unwrap_or_else(|| "pending".to_string());
    let mut requests: Vec<ConsultationRequest> = crm
        .consultation_requests
        .iter()
        .filter(|r| status == "all" || r.status == status)
        .cloned()
        .collect();
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    page_of(requests, "consultation_requests", &params, 20)
}

async fn confirm_consultation_request(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<ConfirmRequest>,
) -> ApiResponse {
    let mut crm = db.write().await;

    let (confirmed_date, confirmed_time) = match (
        parse_date(Some(&input.confirmed_date)),
        parse_time(Some(&input.confirmed_time)),
    ) {
        (Ok(Some(d)), Ok(Some(t))) => (d, t),
        (Err(error), _) | (_, Err(error)) => return failure(StatusCode::BAD_REQUEST, error),
        _ => {
            return failure(
                StatusCode::BAD_REQUEST,
                "confirmedDate and confirmedTime are required",
            )
        }
    };

    let appointment_id = crm.next_id();
    let Some(request) = crm.consultation_requests.iter_mut().find(|r| r.id == id) else {
        return failure(StatusCode::NOT_FOUND, format!("consultation request {id} not found"));
    };
    request.status = "confirmed".to_string();
    request.confirmed_at = Some(now());
    request.confirmed_date = Some(confirmed_date);
    request.confirmed_time = Some(confirmed_time);
    let request = request.clone();

    let appointment = Appointment {
        id: appointment_id,
        patient_id: request.patient_id,
        patient_name: request.patient_name.clone(),
        consultation_request_id: Some(request.id),
        service_type: request.service_type.clone(),
        appointment_date: confirmed_date,
        appointment_time: confirmed_time,
        duration_minutes: input.duration.unwrap_or(60),
        status: "scheduled".to_string(),
        provider: input.provider,
        notes: input.notes,
        created_at: now(),
    };
    crm.appointments.push(appointment.clone());
    info!(id, appointment_id, "consultation request confirmed");

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "consultation_request": request,
            "appointment": appointment,
            "message": "Consultation request confirmed and appointment created",
        })),
    )
}

async fn list_appointments(State(db): State<Db>, Query(params): Query<ListParams>) -> ApiResponse {
    let (start, end) = match (
        parse_date(params.start_date.as_deref()),
        parse_date(params.end_date.as_deref()),
    ) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(error), _) | (_, Err(error)) => return failure(StatusCode::BAD_REQUEST, error),
    };
    let status = params.status.clone().unwrap_or_else(|| "all".to_string());

    let crm = db.read().await;
    let mut appointments: Vec<Appointment> = crm
        .appointments
        .iter()
        .filter(|a| start.is_none_or(|s| a.appointment_date >= s))
        .filter(|a| end.is_none_or(|e| a.appointment_date <= e))
        .filter(|a| status == "all" || a.status == status)
        .cloned()
        .collect();
    appointments.sort_by_key(|a| (a.appointment_date, a.appointment_time));
    page_of(appointments, "appointments", &params, 50)
}

async fn dashboard_stats(State(db): State<Db>) -> ApiResponse {
    let crm = db.read().await;
    let today = Local::now().date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let week_end = week_start + Duration::days(6);
    let week_ago = (today - Duration::days(7)).and_time(NaiveTime::MIN);

    let todays_appointments = crm
        .appointments
        .iter()
        .filter(|a| a.appointment_date == today)
        .count();
    let weekly_appointments = crm
        .appointments
        .iter()
        .filter(|a| a.appointment_date >= week_start && a.appointment_date <= week_end)
        .count();
    let pending_requests = crm
        .consultation_requests
        .iter()
        .filter(|r| r.status == "pending")
        .count();

    let mut recent: Vec<&ConsultationRequest> = crm
        .consultation_requests
        .iter()
        .filter(|r| r.created_at >= week_ago)
        .collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    recent.truncate(5);

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "stats": {
                "todays_appointments": todays_appointments,
                "pending_requests": pending_requests,
                "total_patients": crm.patients.len(),
                "weekly_appointments": weekly_appointments,
            },
            "recent_requests": recent,
        })),
    )
}
