use crate::codec;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::ingest::IngestionCoordinator;
use crate::lookup::Lookup;
use crate::models::{
    EmbeddingRequest, EmbeddingResponse, KeyValue, PostIdResponse, SimilarPostsResponse,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::header::{self, HeaderName},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const DEFAULT_SIMILAR_RESULTS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: IngestionCoordinator,
    pub lookup: Lookup,
    pub embedder: Arc<dyn Embedder>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    #[serde(default = "default_similar_results")]
    pub n_results: usize,
}

fn default_similar_results() -> usize {
    DEFAULT_SIMILAR_RESULTS
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn generate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>> {
    let Json(request) = payload?;
    info!(items = request.items.len(), "Generate embeddings request");
    let response = state
        .ingestion
        .generate_and_store(state.embedder.as_ref(), request.items)
        .await?;
    Ok(Json(response))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<String>> {
    state.lookup.text(&id).await.map(Json)
}

/// Returns the stored array form, so NaN and infinities come back as
/// `NaN`/`Infinity`/`-Infinity` rather than `null`.
pub async fn get_embedding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<([(HeaderName, &'static str); 1], String)> {
    let vector = state.lookup.embedding(&id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        codec::to_json(&vector)?,
    ))
}

pub async fn similar_posts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: std::result::Result<Query<SimilarParams>, QueryRejection>,
) -> Result<Json<SimilarPostsResponse>> {
    let Query(params) = params?;
    info!(post_id = %id, n_results = params.n_results, "Similar posts request");
    state.lookup.similar(&id, params.n_results).await.map(Json)
}

pub async fn lookup_post(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Vec<f32>>, JsonRejection>,
) -> Result<Json<PostIdResponse>> {
    let Json(vector) = payload?;
    if vector.is_empty() {
        return Err(Error::InvalidRecord("Query vector is empty".to_string()));
    }
    let post_id = state.lookup.id_for_vector(&vector).await?;
    Ok(Json(PostIdResponse { post_id }))
}

pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<String>> {
    state.lookup.raw(&key).await.map(Json)
}

pub async fn set_key(
    State(state): State<AppState>,
    payload: std::result::Result<Json<KeyValue>, JsonRejection>,
) -> Result<Json<&'static str>> {
    let Json(kv) = payload?;
    state.lookup.put_raw(&kv.key, &kv.value).await?;
    Ok(Json("Value set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Channel, MemoryBus};
    use crate::embeddings::StaticEmbedder;
    use crate::models::EmbeddingItem;
    use crate::store::{MappingStore, MemoryStore};

    fn state(vectors: Vec<Vec<f32>>) -> (AppState, MemoryStore, MemoryBus) {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let state = AppState {
            ingestion: IngestionCoordinator::new(Arc::new(store.clone()), Arc::new(bus.clone())),
            lookup: Lookup::new(Arc::new(store.clone())),
            embedder: Arc::new(StaticEmbedder::new(vectors)),
        };
        (state, store, bus)
    }

    fn request(
        items: &[(&str, &str)],
    ) -> std::result::Result<Json<EmbeddingRequest>, JsonRejection> {
        Ok(Json(EmbeddingRequest {
            items: items
                .iter()
                .map(|(id, text)| EmbeddingItem {
                    post_id: id.to_string(),
                    text: text.to_string(),
                })
                .collect(),
        }))
    }

    #[tokio::test]
    async fn test_generate_then_read_back() {
        let (state, _store, bus) = state(vec![vec![0.6, 0.8]]);

        let Json(response) = generate(State(state.clone()), request(&[("1", "hello")]))
            .await
            .unwrap();
        assert_eq!(
            response,
            EmbeddingResponse {
                message: "Embeddings stored successfully.".to_string(),
                count: 1,
            }
        );
        assert_eq!(bus.published(Channel::NewEmbedding), vec!["1"]);

        let Json(text) = get_post(State(state.clone()), Path("1".to_string()))
            .await
            .unwrap();
        assert_eq!(text, "hello");

        let (headers, body) = get_embedding(State(state.clone()), Path("1".to_string()))
            .await
            .unwrap();
        assert_eq!(headers[0].1, "application/json");
        assert_eq!(body, "[0.6,0.8]");

        let Json(found) = lookup_post(State(state), Ok(Json(vec![0.6, 0.8])))
            .await
            .unwrap();
        assert_eq!(found.post_id, "1");
    }

    #[tokio::test]
    async fn test_generate_surfaces_store_failure() {
        let (state, store, _bus) = state(vec![vec![1.0], vec![0.5]]);
        store.set_write_budget(Some(3));

        let err = generate(State(state), request(&[("1", "a"), ("2", "b")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(store.get("post:1").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_lookup_rejects_empty_vector() {
        let (state, _store, _bus) = state(vec![]);
        let err = lookup_post(State(state), Ok(Json(vec![]))).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_kv_routes() {
        let (state, _store, _bus) = state(vec![]);

        let Json(message) = set_key(
            State(state.clone()),
            Ok(Json(KeyValue {
                key: "greeting".into(),
                value: "hi".into(),
            })),
        )
        .await
        .unwrap();
        assert_eq!(message, "Value set");

        let Json(value) = get_key(State(state.clone()), Path("greeting".to_string()))
            .await
            .unwrap();
        assert_eq!(value, "hi");

        let err = get_key(State(state), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_embedding_keeps_non_finite_values() {
        let (state, _store, _bus) = state(vec![vec![f32::INFINITY, f32::NAN]]);
        generate(State(state.clone()), request(&[("1", "odd")]))
            .await
            .unwrap();

        let (_, body) = get_embedding(State(state), Path("1".to_string()))
            .await
            .unwrap();
        assert_eq!(body, "[Infinity,NaN]");
    }

    #[tokio::test]
    async fn test_similar_posts() {
        let (state, _store, _bus) = state(vec![vec![1.0, 0.0], vec![0.6, 0.8], vec![0.0, 1.0]]);
        generate(
            State(state.clone()),
            request(&[("a", "alpha"), ("b", "beta"), ("c", "gamma")]),
        )
        .await
        .unwrap();

        let Json(result) = similar_posts(
            State(state.clone()),
            Path("a".to_string()),
            Ok(Query(SimilarParams { n_results: 1 })),
        )
        .await
        .unwrap();
        assert_eq!(result.text, "alpha");
        assert_eq!(result.similar.len(), 1);
        assert_eq!(result.similar[0].post_id, "b");
        assert_eq!(result.similar[0].text, "beta");

        let err = similar_posts(
            State(state),
            Path("zzz".to_string()),
            Ok(Query(SimilarParams { n_results: 1 })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_similar_params_default() {
        let uri: axum::http::Uri = "/posts/a/similar".parse().unwrap();
        let Query(params) = Query::<SimilarParams>::try_from_uri(&uri).unwrap();
        assert_eq!(params.n_results, DEFAULT_SIMILAR_RESULTS);
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "OK");
    }
}
