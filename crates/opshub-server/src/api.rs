//! HTTP and WebSocket routes.
//!
//! The caller's identity comes from headers set by the auth proxy in front
//! of this service: `x-opshub-uid`, `x-opshub-email`, `x-opshub-provider`.
//! A missing or blank uid means an anonymous visitor.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opshub_protocol::{AdminPolicy, Ballot, Identity, ItemId, Session, UserId};
use opshub_store::StoreError;
use opshub_votes::{
    score, sort_items, ErrorKind, ItemSubscription, SortOrder, UserVotesSubscription,
    VoteAggregator, VoteError,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::throttle::VoteThrottle;

pub const UID_HEADER: &str = "x-opshub-uid";
pub const EMAIL_HEADER: &str = "x-opshub-email";
pub const PROVIDER_HEADER: &str = "x-opshub-provider";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<VoteAggregator>,
    pub policy: Arc<dyn AdminPolicy>,
    pub throttle: Arc<Mutex<VoteThrottle>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/session", get(api_session))
        .route("/api/items", get(api_items))
        .route("/api/items/:item_id", get(api_item))
        .route("/api/items/:item_id/vote", post(api_vote))
        .route("/api/items/:item_id/stream", get(api_item_stream))
        .route("/api/votes", get(api_votes))
        .route("/api/votes/stream", get(api_votes_stream))
        .with_state(state)
}

/// Identity asserted by the upstream auth proxy, if any.
pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let mut identity = Identity::new(UserId::new(header(UID_HEADER)?));
    if let Some(email) = header(EMAIL_HEADER) {
        identity = identity.with_email(email);
    }
    if let Some(provider) = header(PROVIDER_HEADER) {
        identity = identity.with_provider(provider);
    }
    Some(identity)
}

/// HTTP status and stable error code for a vote failure.
pub fn error_status(err: &VoteError) -> (StatusCode, &'static str) {
    match err {
        VoteError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        VoteError::InvalidKey(_) => (StatusCode::BAD_REQUEST, "invalid_key"),
        VoteError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        VoteError::MalformedItem(_) => (StatusCode::UNPROCESSABLE_ENTITY, "malformed_item"),
        VoteError::PartialWrite { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "partial_write"),
        VoteError::Store(e) if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        VoteError::Store(StoreError::PermissionDenied { .. }) => (StatusCode::FORBIDDEN, "permission_denied"),
        VoteError::Store(_) => (StatusCode::BAD_REQUEST, "invalid_path"),
    }
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Caller => "caller",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Transient => "transient",
        ErrorKind::PartialWrite => "partial_write",
    }
}

fn error_response(err: &VoteError) -> Response {
    let (status, code) = error_status(err);
    (
        status,
        Json(json!({
            "ok": false,
            "error": code,
            "kind": kind_name(err.kind()),
            "retryable": err.is_retryable(),
            "message": err.to_string(),
        })),
    )
        .into_response()
}

async fn api_health() -> impl IntoResponse {
    Json(json!({"ok": true, "service": "opshub-votes", "time": chrono::Utc::now()}))
}

async fn api_session(State(app): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    Json(Session::resolve(identity.as_ref(), app.policy.as_ref()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemsQuery {
    #[serde(default)]
    pub sort: SortOrder,
}

async fn api_items(State(app): State<AppState>, Query(query): Query<ItemsQuery>) -> Response {
    let mut items = match app.aggregator.list_items().await {
        Ok(items) => items,
        Err(e) => return error_response(&e),
    };
    sort_items(&mut items, query.sort);
    let rows: Vec<_> = items
        .iter()
        .map(|item| json!({"item": item, "score": score(&item.counters)}))
        .collect();
    Json(json!({"ok": true, "sort": query.sort, "items": rows})).into_response()
}

async fn api_item(
    State(app): State<AppState>,
    AxumPath(item_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let item_id = ItemId::new(item_id);
    let item = match app.aggregator.item(&item_id).await {
        Ok(Some(item)) => item,
        Ok(None) => return error_response(&VoteError::NotFound(item_id)),
        Err(e) => return error_response(&e),
    };
    let ballot = match identity_from_headers(&headers) {
        Some(identity) => match app.aggregator.current_ballot(&identity.uid, &item_id).await {
            Ok(ballot) => ballot,
            Err(e) => return error_response(&e),
        },
        None => None,
    };
    Json(json!({
        "ok": true,
        "item": item,
        "score": score(&item.counters),
        "ballot": ballot,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub ballot: Ballot,
}

async fn api_vote(
    State(app): State<AppState>,
    AxumPath(item_id): AxumPath<String>,
    headers: HeaderMap,
    Json(body): Json<VoteBody>,
) -> Response {
    let Some(identity) = identity_from_headers(&headers) else {
        return error_response(&VoteError::Unauthenticated);
    };
    if !app.throttle.lock().await.check(&identity.uid) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"ok": false, "error": "throttled", "kind": "transient", "retryable": true})),
        )
            .into_response();
    }

    let item_id = ItemId::new(item_id);
    match app.aggregator.apply_vote(&identity.uid, &item_id, body.ballot).await {
        Ok(outcome) => Json(json!({
            "ok": true,
            "vote": outcome,
            "score": score(&outcome.counters),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn api_votes(State(app): State<AppState>, headers: HeaderMap) -> Response {
    let Some(identity) = identity_from_headers(&headers) else {
        return error_response(&VoteError::Unauthenticated);
    };
    match app.aggregator.user_votes(&identity.uid).await {
        Ok(votes) => Json(json!({"ok": true, "votes": votes})).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn api_item_stream(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    AxumPath(item_id): AxumPath<String>,
) -> Response {
    match app.aggregator.subscribe_item(&ItemId::new(item_id)) {
        Ok(sub) => ws.on_upgrade(move |socket| item_stream_loop(socket, sub)),
        Err(e) => error_response(&e),
    }
}

async fn item_stream_loop(mut socket: WebSocket, mut sub: ItemSubscription) {
    let id = sub.item().clone();
    tracing::debug!(item = %id, "Item stream opened");
    loop {
        tokio::select! {
            snapshot = sub.next() => {
                let Some(item) = snapshot else { break };
                let payload = json!({
                    "type": "item",
                    "id": id,
                    "exists": item.is_some(),
                    "item": item,
                })
                .to_string();
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(item = %id, "Item stream closed");
    sub.unsubscribe();
}

async fn api_votes_stream(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let Some(identity) = identity_from_headers(&headers) else {
        return error_response(&VoteError::Unauthenticated);
    };
    match app.aggregator.subscribe_user_votes(&identity.uid) {
        Ok(sub) => ws.on_upgrade(move |socket| votes_stream_loop(socket, sub)),
        Err(e) => error_response(&e),
    }
}

async fn votes_stream_loop(mut socket: WebSocket, mut sub: UserVotesSubscription) {
    loop {
        tokio::select! {
            votes = sub.next() => {
                let Some(votes) = votes else { break };
                let payload = json!({"type": "votes", "votes": votes}).to_string();
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    sub.unsubscribe();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use opshub_protocol::{AdminAllowlist, ItemId};
    use opshub_store::{DocumentStore, MemoryStore};
    use opshub_votes::VoteConfig;
    use serde_json::Value;

    fn state_with(store: Arc<MemoryStore>, burst: u32) -> AppState {
        let dyn_store: Arc<dyn DocumentStore> = store;
        AppState {
            aggregator: Arc::new(VoteAggregator::new(dyn_store, VoteConfig::default())),
            policy: Arc::new(AdminAllowlist::new(["editor@opshub.gg"])),
            throttle: Arc::new(Mutex::new(VoteThrottle::new(burst, 0.0))),
        }
    }

    fn headers(uid: &str, email: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(UID_HEADER, HeaderValue::from_str(uid).unwrap());
        if let Some(email) = email {
            h.insert(EMAIL_HEADER, HeaderValue::from_str(email).unwrap());
        }
        h
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn vote(app: &AppState, uid: &str, item: &str, ballot: Ballot) -> Response {
        api_vote(
            State(app.clone()),
            AxumPath(item.to_string()),
            headers(uid, None),
            Json(VoteBody { ballot }),
        )
        .await
    }

    #[test]
    fn test_identity_from_headers() {
        assert!(identity_from_headers(&HeaderMap::new()).is_none());
        assert!(identity_from_headers(&headers("  ", None)).is_none());
        let id = identity_from_headers(&headers("u1", Some("a@b.c"))).unwrap();
        assert_eq!(id.uid, UserId::new("u1"));
        assert_eq!(id.email.as_deref(), Some("a@b.c"));
        assert!(id.provider.is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (VoteError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (VoteError::InvalidKey("a/b".into()), StatusCode::BAD_REQUEST),
            (VoteError::NotFound(ItemId::new("x")), StatusCode::NOT_FOUND),
            (VoteError::MalformedItem("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                VoteError::Store(StoreError::Unavailable("offline".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                VoteError::Store(StoreError::TooManyRetries { path: "posts/x".into(), attempts: 25 }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                VoteError::Store(StoreError::PermissionDenied { path: "posts/x".into() }),
                StatusCode::FORBIDDEN,
            ),
            (
                VoteError::PartialWrite {
                    item: ItemId::new("x"),
                    source: StoreError::Unavailable("offline".into()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(error_status(&err).0, status, "{err}");
        }
    }

    #[tokio::test]
    async fn test_vote_endpoint_applies_and_toggles() {
        let store = Arc::new(MemoryStore::default());
        store.put("posts/ak", serde_json::json!({"title": "AK"})).unwrap();
        let app = state_with(store.clone(), 0);

        let resp = vote(&app, "u1", "ak", Ballot::Up).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["vote"]["current"], "up");
        assert_eq!(body["score"], 1);

        let body = body_json(vote(&app, "u1", "ak", Ballot::Up).await).await;
        assert_eq!(body["vote"]["current"], Value::Null);
        assert_eq!(body["vote"]["counters"]["upvoteCount"], 0);
    }

    #[tokio::test]
    async fn test_vote_endpoint_errors() {
        let store = Arc::new(MemoryStore::default());
        let app = state_with(store.clone(), 0);

        let resp = api_vote(
            State(app.clone()),
            AxumPath("ak".to_string()),
            HeaderMap::new(),
            Json(VoteBody { ballot: Ballot::Up }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = vote(&app, "u1", "missing", Ballot::Down).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["kind"], "not_found");

        store.put("posts/ak", serde_json::json!({"title": "AK"})).unwrap();
        store.set_available(false);
        let resp = vote(&app, "u1", "ak", Ballot::Up).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["retryable"], true);
    }

    #[tokio::test]
    async fn test_vote_endpoint_throttles() {
        let store = Arc::new(MemoryStore::default());
        store.put("posts/ak", serde_json::json!({"title": "AK"})).unwrap();
        let app = state_with(store.clone(), 1);

        assert_eq!(vote(&app, "u1", "ak", Ballot::Up).await.status(), StatusCode::OK);
        assert_eq!(vote(&app, "u1", "ak", Ballot::Up).await.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(vote(&app, "u2", "ak", Ballot::Up).await.status(), StatusCode::OK);
        assert_eq!(store.get("posts/ak").unwrap().unwrap()["upvoteCount"], 2);
    }

    #[tokio::test]
    async fn test_session_endpoint() {
        let app = state_with(Arc::new(MemoryStore::default()), 0);

        let resp = api_session(State(app.clone()), HeaderMap::new()).await.into_response();
        assert_eq!(body_json(resp).await, serde_json::json!({"logged_in": false, "is_admin": false}));

        let resp = api_session(State(app.clone()), headers("u9", Some("Editor@OpsHub.gg")))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["logged_in"], true);
        assert_eq!(body["is_admin"], true);
        assert_eq!(body["uid"], "u9");
    }

    #[tokio::test]
    async fn test_items_and_votes_endpoints() {
        let store = Arc::new(MemoryStore::default());
        store.put("posts/a", serde_json::json!({"title": "A", "createdAt": 200})).unwrap();
        store.put("posts/b", serde_json::json!({"title": "B", "createdAt": 100})).unwrap();
        let app = state_with(store.clone(), 0);
        vote(&app, "u1", "b", Ballot::Up).await;

        let resp = api_items(State(app.clone()), Query(ItemsQuery { sort: SortOrder::MostVoted })).await;
        let body = body_json(resp).await;
        assert_eq!(body["items"][0]["item"]["id"], "b");
        assert_eq!(body["items"][0]["score"], 1);

        let resp = api_items(State(app.clone()), Query(ItemsQuery::default())).await;
        assert_eq!(body_json(resp).await["items"][0]["item"]["id"], "a");

        let resp = api_item(State(app.clone()), AxumPath("b".into()), headers("u1", None)).await;
        assert_eq!(body_json(resp).await["ballot"], "up");

        let body = body_json(api_votes(State(app.clone()), headers("u1", None)).await).await;
        assert_eq!(body["votes"], serde_json::json!({"b": "up"}));

        let resp = api_votes(State(app.clone()), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
