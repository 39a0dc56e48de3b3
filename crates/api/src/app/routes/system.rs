use axum::Json;

use crate::app::dto::StatusResponse;

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse { status: "OK" })
}
