use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use gateway_server::adapter::Adapter;
use gateway_server::api::{create_api_routes, SharedAppState};
use gateway_server::config::Settings;
use gateway_server::drivers::{DriverPlugin, OpcUaDriver};
use gateway_server::logging;
use gateway_server::tags::tag::TagAttrSerde;
use gateway_server::tags::{AddressOption, Tag, TagAttribute, TagCache, TagType};
use gateway_server::trace::{NullExporter, TraceRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging(None);
    info!("gateway server starting");

    let config_path = Path::new("config.toml");
    let settings = match Settings::load(config_path) {
        Ok(s) => s,
        Err(e) => {
            error!(path = ?config_path, error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    info!(devices = settings.devices.len(), tags = settings.tags.len(), "configuration loaded");

    let pool = gateway_server::persist::open(&settings.db_path, &settings.schema_dir).await?;
    info!(db_path = ?settings.db_path, "persistence store opened");

    let trace_exporter: Arc<dyn gateway_server::trace::SpanExporter> = match &settings.otel.endpoint {
        Some(endpoint) => {
            warn!(%endpoint, "otel exporter not wired up yet, falling back to a null exporter");
            Arc::new(NullExporter)
        }
        None => Arc::new(NullExporter),
    };
    let trace_registry = TraceRegistry::new(trace_exporter);
    trace_registry.clone().spawn_reaper();

    // Tags are grouped by (driver_id, poll_rate_ms): each distinct pair
    // becomes one adapter group, polled at one interval.
    let mut tags_by_group: HashMap<(String, u64), Vec<Tag>> = HashMap::new();
    for tag_config in &settings.tags {
        let tag = Tag {
            name: tag_config.path.clone(),
            address: tag_config.address.clone(),
            attribute: TagAttrSerde(TagAttribute::READ | TagAttribute::SUBSCRIBE),
            kind: TagType::Double,
            precision: 0,
            decimal: 0.0,
            bias: 0.0,
            description: String::new(),
            address_option: AddressOption::None,
            meta: Vec::new(),
            format_tokens: Vec::new(),
        };
        tags_by_group
            .entry((tag_config.driver_id.clone(), tag_config.poll_rate_ms))
            .or_default()
            .push(tag);
    }

    let mut adapters: HashMap<String, Arc<Adapter>> = HashMap::new();
    for driver_config in &settings.devices {
        let cache = Arc::new(TagCache::new(settings.sub_filter_err));
        let plugin: Arc<dyn DriverPlugin> = Arc::new(OpcUaDriver::new(driver_config.clone()));
        let adapter = Arc::new(Adapter::with_socket_dir(
            driver_config.id.clone(),
            plugin,
            cache,
            settings.socket_dir.clone(),
        ));

        for ((driver_id, poll_rate_ms), tags) in &tags_by_group {
            if driver_id != &driver_config.id {
                continue;
            }
            adapter
                .add_group_with_tags(driver_config.id.clone(), Duration::from_millis(*poll_rate_ms), tags.clone())
                .await;
        }

        if let Err(e) = adapter.init(true).await {
            error!(driver = %driver_config.id, error = %e, "driver failed to initialize, skipping");
            continue;
        }
        if let Err(e) = adapter.start().await {
            error!(driver = %driver_config.id, error = %e, "driver failed to start, skipping");
            continue;
        }
        info!(driver = %driver_config.id, "driver initialized and running");
        adapters.insert(driver_config.id.clone(), adapter);
    }

    let app_state = SharedAppState {
        adapters: Arc::new(adapters),
        start_time: tokio::time::Instant::now(),
    };
    let app = create_api_routes().with_state(app_state);

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "api server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    drop(pool);
    Ok(())
}
