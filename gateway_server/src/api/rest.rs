//! REST control plane: group reads (sync and async), writes, and
//! subscriber management over the driver adapters built in [`crate::adapter`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapter::Adapter;
use crate::tags::tag::Subscriber;
use crate::tags::value::TagValue;

#[derive(Clone)]
pub struct SharedAppState {
    pub adapters: Arc<HashMap<String, Arc<Adapter>>>,
    pub start_time: tokio::time::Instant,
}

#[derive(Serialize)]
pub struct DriverInfo {
    pub id: String,
    pub state: String,
}

#[derive(Serialize)]
pub struct DriversResponse {
    pub drivers: Vec<DriverInfo>,
}

#[derive(Deserialize)]
pub struct ReadGroupQuery {
    #[serde(default)]
    pub sync: bool,
}

#[derive(Serialize)]
pub struct ReportedTagWire {
    pub name: String,
    pub value: TagValue,
}

#[derive(Serialize)]
pub struct ReadGroupResponse {
    pub tags: Vec<ReportedTagWire>,
}

#[derive(Deserialize)]
pub struct WriteTagsRequest {
    pub items: Vec<(String, TagValue)>,
}

#[derive(Serialize)]
pub struct WriteTagsResponse {
    pub request_ids: Vec<Option<u64>>,
    pub errors: Vec<Option<String>>,
}

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub app_name: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub static_tags: Option<String>,
}

pub fn create_api_routes() -> Router<SharedAppState> {
    Router::new()
        .route("/", get(root))
        .route("/api/drivers", get(list_drivers))
        .route("/api/drivers/{driver_id}/groups/{group_name}", get(read_group))
        .route("/api/drivers/{driver_id}/groups/{group_name}/write", post(write_group))
        .route(
            "/api/drivers/{driver_id}/groups/{group_name}/subscribers",
            post(subscribe_group),
        )
}

async fn root() -> &'static str {
    "gateway server running"
}

async fn list_drivers(State(state): State<SharedAppState>) -> impl IntoResponse {
    let mut drivers = Vec::with_capacity(state.adapters.len());
    for (id, adapter) in state.adapters.iter() {
        drivers.push(DriverInfo {
            id: id.clone(),
            state: format!("{:?}", adapter.state().await),
        });
    }
    Json(DriversResponse { drivers })
}

async fn read_group(
    State(state): State<SharedAppState>,
    Path((driver_id, group_name)): Path<(String, String)>,
    Query(query): Query<ReadGroupQuery>,
) -> impl IntoResponse {
    let adapter = match state.adapters.get(&driver_id) {
        Some(a) => a,
        None => return (StatusCode::NOT_FOUND, Json(ReadGroupResponse { tags: vec![] })),
    };
    let Some(group_id) = adapter.group_id(&group_name).await else {
        return (StatusCode::NOT_FOUND, Json(ReadGroupResponse { tags: vec![] }));
    };

    if !query.sync {
        return match adapter.peek_group(group_id).await {
            Some(built) => (
                StatusCode::OK,
                Json(ReadGroupResponse {
                    tags: built.into_iter().map(|t| ReportedTagWire { name: t.name, value: t.value }).collect(),
                }),
            ),
            None => (StatusCode::NOT_FOUND, Json(ReadGroupResponse { tags: vec![] })),
        };
    }

    match adapter.read_group_sync(group_id).await {
        Some(built) => (
            StatusCode::OK,
            Json(ReadGroupResponse {
                tags: built.into_iter().map(|t| ReportedTagWire { name: t.name, value: t.value }).collect(),
            }),
        ),
        None => (StatusCode::NOT_FOUND, Json(ReadGroupResponse { tags: vec![] })),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn write_group(
    State(state): State<SharedAppState>,
    Path((driver_id, group_name)): Path<(String, String)>,
    Json(body): Json<WriteTagsRequest>,
) -> impl IntoResponse {
    let adapter = match state.adapters.get(&driver_id) {
        Some(a) => a,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("driver '{driver_id}' not found"),
                }),
            )
                .into_response()
        }
    };
    let Some(group_id) = adapter.group_id(&group_name).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("group '{group_name}' not found"),
            }),
        )
            .into_response();
    };

    match adapter.write_tags(group_id, &body.items).await {
        Some(results) => {
            let mut request_ids = Vec::with_capacity(results.len());
            let mut errors = Vec::with_capacity(results.len());
            for r in results {
                match r {
                    Ok(id) => {
                        request_ids.push(Some(id));
                        errors.push(None);
                    }
                    Err(e) => {
                        warn!(driver = %driver_id, group = %group_name, error = %e, "write rejected");
                        request_ids.push(None);
                        errors.push(Some(e.to_string()));
                    }
                }
            }
            (StatusCode::ACCEPTED, Json(WriteTagsResponse { request_ids, errors })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "group not found".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn subscribe_group(
    State(state): State<SharedAppState>,
    Path((driver_id, group_name)): Path<(String, String)>,
    Json(body): Json<SubscribeRequest>,
) -> impl IntoResponse {
    let Some(adapter) = state.adapters.get(&driver_id) else {
        return (StatusCode::NOT_FOUND, Json(ErrorBody { error: "driver not found".into() })).into_response();
    };
    let Some(group_id) = adapter.group_id(&group_name).await else {
        return (StatusCode::NOT_FOUND, Json(ErrorBody { error: "group not found".into() })).into_response();
    };

    info!(driver = %driver_id, group = %group_name, app = %body.app_name, "subscribing app to group");
    let subscriber = Subscriber {
        app_name: body.app_name,
        driver_name: driver_id.clone(),
        group_name: group_name.clone(),
        params: body.params,
        static_tags: body.static_tags,
    };
    adapter.add_subscriber(group_id, subscriber).await;
    StatusCode::CREATED.into_response()
}
