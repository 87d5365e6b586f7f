//! Prescription command endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Aggregate, CreatePrescription, Prescription, UpdatePrescription};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{ApiError, ParamError};

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub medication_id: Option<String>,
    pub patient_id: Option<String>,
    pub address: Option<String>,
}

impl CreatePrescriptionRequest {
    fn into_command(self) -> Result<CreatePrescription, ApiError> {
        let mut errors = Vec::new();
        let medication_id = required("medication_id", self.medication_id, &mut errors);
        let patient_id = required("patient_id", self.patient_id, &mut errors);
        let address = required("address", self.address, &mut errors);

        match (medication_id, patient_id, address) {
            (Some(m), Some(p), Some(a)) => Ok(CreatePrescription::new(m, p, a)),
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePrescriptionRequest {
    pub address: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionResponse {
    pub id: String,
    pub patient_id: String,
    pub medication_id: String,
    pub address: String,
    pub state: String,
}

impl PrescriptionResponse {
    fn from_aggregate(prescription: &Prescription) -> Self {
        Self {
            id: prescription.id().map(ToString::to_string).unwrap_or_default(),
            patient_id: prescription.patient_id().unwrap_or_default().to_string(),
            medication_id: prescription.medication_id().unwrap_or_default().to_string(),
            address: prescription.address().unwrap_or_default().to_string(),
            state: prescription.state().to_string(),
        }
    }
}

// -- Handlers --

/// POST /prescriptions: create a prescription.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePrescriptionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PrescriptionResponse>), ApiError> {
    let Json(request) = payload?;
    let command = request.into_command()?;

    let response = state
        .service
        .create_prescription(command, PrescriptionResponse::from_aggregate)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// PATCH /prescriptions/{id}: change the delivery address.
#[tracing::instrument(skip(state, payload))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePrescriptionRequest>, JsonRejection>,
) -> Result<Json<PrescriptionResponse>, ApiError> {
    let Json(request) = payload?;

    let mut errors = Vec::new();
    let Some(address) = required("address", request.address, &mut errors) else {
        return Err(ApiError::Validation(errors));
    };

    let response = state
        .service
        .update_prescription(
            UpdatePrescription::new(id, address),
            PrescriptionResponse::from_aggregate,
        )
        .await?;

    Ok(Json(response))
}

fn required(param: &str, value: Option<String>, errors: &mut Vec<ParamError>) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            errors.push(ParamError::missing(param));
            None
        }
    }
}
