use axum::{extract::Extension, response::Json, routing::get, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::promo_engine::RunReport;

/// What the status endpoints expose. Written by the run loop after every run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub mode: String,
    pub runs: u64,
    pub last_report: Option<RunReport>,
    pub history: Vec<String>,
}

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<String>,
    pub total: usize,
}

pub fn status_routes(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/history", get(get_history))
        .layer(Extension(status))
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "promo-relay"}))
}

async fn get_status(Extension(status): Extension<SharedStatus>) -> Json<StatusSnapshot> {
    Json(status.read().await.clone())
}

async fn get_history(Extension(status): Extension<SharedStatus>) -> Json<HistoryResponse> {
    let snapshot = status.read().await;
    Json(HistoryResponse {
        total: snapshot.history.len(),
        entries: snapshot.history.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedStatus {
        Arc::new(RwLock::new(StatusSnapshot {
            mode: "test".to_string(),
            runs: 2,
            last_report: None,
            history: vec!["Fone Bluetooth XPTO".to_string(), "Mouse Gamer X".to_string()],
        }))
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_reflects_snapshot() {
        let status = shared();
        let Json(snapshot) = get_status(Extension(status.clone())).await;
        assert_eq!(snapshot.runs, 2);

        status.write().await.runs = 3;
        let Json(snapshot) = get_status(Extension(status)).await;
        assert_eq!(snapshot.runs, 3);
    }

    #[tokio::test]
    async fn test_history_listing() {
        let Json(response) = get_history(Extension(shared())).await;
        assert_eq!(response.total, 2);
        assert_eq!(response.entries[0], "Fone Bluetooth XPTO");
    }

    #[test]
    fn test_router_builds() {
        let _router: Router = status_routes(shared());
    }
}
