//! HTTP request handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::BTreeMap;

use super::server::AppState;
use crate::consult::{CircuitSnapshot, CircuitState, ConsultationRequest, ConsultationResult};
use crate::error::Error;
use crate::provider::ProviderId;

/// Handle POST /v1/consult.
///
/// A consultation that fails at the provider level is still a 200: the
/// failure is described in the body.
pub async fn consult(
    State(state): State<AppState>,
    Json(request): Json<ConsultationRequest>,
) -> Result<Json<ConsultationResult>, Error> {
    let result = state.router.consult(request).await?;
    Ok(Json(result))
}

/// Overall health derived from circuit states.
///
/// Returns the status label and whether it should be served as 503.
pub(crate) fn overall_health(circuits: &[CircuitSnapshot]) -> (&'static str, bool) {
    if circuits.is_empty() {
        return ("ok", false);
    }
    let open = circuits
        .iter()
        .filter(|c| c.state == CircuitState::Open)
        .count();
    if open == circuits.len() {
        ("unhealthy", true)
    } else if circuits.iter().any(|c| c.state != CircuitState::Closed) {
        ("degraded", false)
    } else {
        ("ok", false)
    }
}

/// Handle GET /health.
pub async fn health(State(state): State<AppState>) -> Response {
    let circuits = state.router.circuit_breakers().all_states();
    let (status, unavailable) = overall_health(&circuits);

    let providers: BTreeMap<String, serde_json::Value> = circuits
        .iter()
        .map(|c| {
            (
                c.provider.to_string(),
                serde_json::json!({
                    "state": c.state,
                    "failure_count": c.failure_count,
                }),
            )
        })
        .collect();

    let code = if unavailable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "consultr",
            "providers": providers,
        })),
    )
        .into_response()
}

/// Handle GET /v1/status.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.status().await)
}

/// Handle POST /v1/circuits/:provider/reset.
pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Response {
    let id = match provider.parse::<ProviderId>() {
        Ok(id) => id,
        Err(_) => return not_found(&provider),
    };

    if !state.router.reset_circuit(id) {
        return not_found(&provider);
    }

    tracing::info!(provider = %id, "Circuit reset via API");
    Json(serde_json::json!({
        "provider": id,
        "state": CircuitState::Closed,
    }))
    .into_response()
}

/// Handle POST /v1/cache/sweep.
pub async fn sweep_cache(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.router.sweep_cache().await;
    Json(serde_json::json!({
        "removed": report.memory as u64 + report.durable,
        "memory": report.memory,
        "durable": report.durable,
    }))
}

fn not_found(provider: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": {
                "message": format!("Unknown provider '{}'", provider),
                "type": "not_found",
                "code": 404
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(provider: ProviderId, state: CircuitState) -> CircuitSnapshot {
        CircuitSnapshot {
            provider,
            state,
            failure_count: 0,
            trip_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_overall_health() {
        assert_eq!(overall_health(&[]), ("ok", false));
        assert_eq!(
            overall_health(&[
                snapshot(ProviderId::Gemini, CircuitState::Closed),
                snapshot(ProviderId::Llama, CircuitState::Closed),
            ]),
            ("ok", false)
        );
        assert_eq!(
            overall_health(&[
                snapshot(ProviderId::Gemini, CircuitState::Open),
                snapshot(ProviderId::Llama, CircuitState::Closed),
            ]),
            ("degraded", false)
        );
        assert_eq!(
            overall_health(&[
                snapshot(ProviderId::Gemini, CircuitState::HalfOpen),
                snapshot(ProviderId::Llama, CircuitState::Open),
            ]),
            ("degraded", false)
        );
        assert_eq!(
            overall_health(&[
                snapshot(ProviderId::Gemini, CircuitState::Open),
                snapshot(ProviderId::Llama, CircuitState::Open),
            ]),
            ("unhealthy", true)
        );
    }
}
