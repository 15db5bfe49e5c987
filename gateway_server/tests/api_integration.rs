//! End-to-end REST coverage over the new driver-adapter stack: one
//! in-memory mock plugin wired through `Adapter`, exercised via the
//! same `axum::Router` the server binds.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use gateway_server::adapter::Adapter;
use gateway_server::api::{create_api_routes, SharedAppState};
use gateway_server::drivers::{
    AdapterCallbacks, DriverPlugin, PluginDescriptor, PluginError, PluginGroup, PluginResult,
    WriteRequest,
};
use gateway_server::tags::{Tag, TagAttribute, TagCache, TagType, TagValue};

struct MockPlugin {
    descriptor: PluginDescriptor,
    running: AtomicBool,
    callbacks: tokio::sync::Mutex<Option<Arc<dyn AdapterCallbacks>>>,
}

impl MockPlugin {
    fn new() -> Self {
        MockPlugin {
            descriptor: PluginDescriptor {
                module_name: "mock".into(),
                version: "0".into(),
                kind: "test".into(),
            },
            running: AtomicBool::new(false),
            callbacks: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl DriverPlugin for MockPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
    async fn open(&self, callbacks: Arc<dyn AdapterCallbacks>) -> PluginResult<()> {
        *self.callbacks.lock().await = Some(callbacks);
        Ok(())
    }
    async fn close(&self) -> PluginResult<()> {
        Ok(())
    }
    async fn init(&self, _load_from_db: bool) -> PluginResult<()> {
        Ok(())
    }
    async fn uninit(&self) -> PluginResult<()> {
        Ok(())
    }
    async fn start(&self) -> PluginResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn stop(&self) -> PluginResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn setting(&self, _setting_json: &str) -> PluginResult<()> {
        Ok(())
    }
    async fn validate_tag(&self, _tag: &Tag) -> PluginResult<()> {
        Ok(())
    }
    async fn group_timer(&self, group: &PluginGroup) -> PluginResult<()> {
        let callbacks = self.callbacks.lock().await.clone();
        if let Some(cb) = callbacks {
            for tag in &group.tags {
                cb.update(&group.name, Some(&tag.name), TagValue::Double(42.0)).await;
            }
        }
        Ok(())
    }
    async fn group_sync(&self, _group: &PluginGroup) -> Option<PluginResult<()>> {
        None
    }
    async fn write_tag(&self, _req: &WriteRequest, _tag: &Tag, _value: TagValue) -> PluginResult<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PluginError::NotRunning)
        }
    }
    async fn write_tags(&self, _req: &WriteRequest, _items: &[(Tag, TagValue)]) -> PluginResult<()> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn readable_tag(name: &str) -> Tag {
    Tag {
        name: name.into(),
        address: "x".into(),
        attribute: gateway_server::tags::tag::TagAttrSerde(TagAttribute::READ | TagAttribute::WRITE),
        kind: TagType::Double,
        precision: 0,
        decimal: 0.0,
        bias: 0.0,
        description: String::new(),
        address_option: gateway_server::tags::AddressOption::None,
        meta: Vec::new(),
        format_tokens: Vec::new(),
    }
}

async fn build_app() -> (Router, Arc<Adapter>) {
    let cache = Arc::new(TagCache::new(false));
    let plugin = Arc::new(MockPlugin::new());
    let adapter = Arc::new(Adapter::new("driver1", plugin, cache));
    adapter
        .add_group_with_tags("group1", Duration::from_millis(100), vec![readable_tag("temp")])
        .await;
    adapter.init(false).await.unwrap();
    adapter.start().await.unwrap();

    let mut adapters = std::collections::HashMap::new();
    adapters.insert("driver1".to_string(), adapter.clone());
    let state = SharedAppState {
        adapters: Arc::new(adapters),
        start_time: tokio::time::Instant::now(),
    };
    (create_api_routes().with_state(state), adapter)
}

#[tokio::test]
async fn list_drivers_reports_running_state() {
    let (app, _adapter) = build_app().await;
    let request = Request::builder().uri("/api/drivers").method(Method::GET).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["drivers"][0]["id"], "driver1");
    assert_eq!(parsed["drivers"][0]["state"], "Running");
}

#[tokio::test]
async fn read_group_unknown_driver_is_not_found() {
    let (app, _adapter) = build_app().await;
    let request = Request::builder()
        .uri("/api/drivers/unknown/groups/group1")
        .method(Method::GET)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_group_sync_fallback_reports_unsupported() {
    let (app, _adapter) = build_app().await;
    let request = Request::builder()
        .uri("/api/drivers/driver1/groups/group1?sync=true")
        .method(Method::GET)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["tags"][0]["name"], "temp");
    assert!(parsed["tags"][0]["value"]["Error"].is_number());
}

#[tokio::test]
async fn write_group_accepts_and_assigns_a_request_id() {
    let (app, _adapter) = build_app().await;
    let body = json!({ "items": [["temp", {"Double": 7.5}]] });
    let request = Request::builder()
        .uri("/api/drivers/driver1/groups/group1/write")
        .method(Method::POST)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let resp_body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&resp_body).unwrap();
    assert!(parsed["request_ids"][0].is_number());
    assert!(parsed["errors"][0].is_null());
}

#[tokio::test]
async fn write_group_to_unknown_tag_reports_an_error() {
    let (app, _adapter) = build_app().await;
    let body = json!({ "items": [["does-not-exist", {"Double": 7.5}]] });
    let request = Request::builder()
        .uri("/api/drivers/driver1/groups/group1/write")
        .method(Method::POST)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let resp_body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&resp_body).unwrap();
    assert!(parsed["request_ids"][0].is_null());
    assert!(parsed["errors"][0].is_string());
}

#[tokio::test]
async fn subscribe_then_report_dispatches_without_panicking() {
    let (app, adapter) = build_app().await;
    let body = json!({ "app_name": "app1" });
    let request = Request::builder()
        .uri("/api/drivers/driver1/groups/group1/subscribers")
        .method(Method::POST)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let group_id = adapter.group_id("group1").await.unwrap();
    assert!(adapter.peek_group(group_id).await.is_some());
}
