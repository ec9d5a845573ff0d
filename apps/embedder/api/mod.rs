mod handlers;

pub use handlers::AppState;

use crate::error::Error;
use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::{error, warn};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/embeddings/generate", post(handlers::generate))
        .route("/posts/lookup", post(handlers::lookup_post))
        .route("/posts/{id}", get(handlers::get_post))
        .route("/posts/{id}/embedding", get(handlers::get_embedding))
        .route("/posts/{id}/similar", get(handlers::similar_posts))
        .route("/kv", post(handlers::set_key))
        .route("/kv/{key}", get(handlers::get_key))
        .with_state(state)
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRecord(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRecord(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::InvalidRecord(rejection.body_text())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, error = %self, "Request failed");
        } else {
            warn!(status = %status, error = %self, "Request rejected");
        }

        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyValue;
    use axum::{
        body::{Body, to_bytes},
        extract::{FromRequest, Query, Request},
        http::{Uri, header::CONTENT_TYPE},
    };
    use serde::Deserialize;

    async fn detail(response: Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        value["detail"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_malformed_json_body_gets_detail() {
        let request = Request::builder()
            .method("POST")
            .uri("/kv")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"key": "a""#))
            .unwrap();
        let rejection = Json::<KeyValue>::from_request(request, &()).await.unwrap_err();

        let response = Error::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(detail(response).await.starts_with("invalid record:"));
    }

    #[tokio::test]
    async fn test_missing_content_type_gets_detail() {
        let request = Request::builder()
            .method("POST")
            .uri("/kv")
            .body(Body::from(r#"{"key": "a", "value": "b"}"#))
            .unwrap();
        let rejection = Json::<KeyValue>::from_request(request, &()).await.unwrap_err();

        let response = Error::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!detail(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_query_gets_detail() {
        #[derive(Debug, Deserialize)]
        struct Params {
            #[allow(dead_code)]
            n_results: usize,
        }

        let uri: Uri = "/posts/1/similar?n_results=many".parse().unwrap();
        let rejection = Query::<Params>::try_from_uri(&uri).unwrap_err();

        let response = Error::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(detail(response).await.starts_with("invalid record:"));
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let response = Error::NotFound("Key 'post:9' not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(detail(response).await, "key not found: Key 'post:9' not found");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::NotFound("k".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::InvalidRecord("k".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::StoreUnavailable("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Model("down".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
