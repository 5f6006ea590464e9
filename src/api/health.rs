use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub gateways: Vec<String>,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let mut gateways: Vec<String> = state
        .orchestrator
        .registry()
        .enabled()
        .iter()
        .map(|g| g.as_str().to_string())
        .collect();
    gateways.sort();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version,
        environment: state.environment.clone(),
        gateways,
    };

    Ok(Json(response))
}
