mod broadcast;
mod catalog;
mod config;
mod handlers;
mod leader;
mod logging;
mod router;
mod solo;
mod state;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use iris::{IrisClient, WsConfig, WsRunner};
use shared::repositories::kv_store::{KvStore, RedisKvStore};
use shared::repositories::result_repository::{PgResultRepository, ResultRepository};
use shared::services::lobby_service::LobbyService;
use shared::services::match_service::MatchService;
use shared::services::render_service::{BoardRenderer, SvgBoardRenderer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::router::Router;
use crate::solo::SoloService;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(err) = logging::init_from_env() {
        eprintln!("log init error: {}", err);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => fatal(&format!("config error: {}", err)),
    };

    let store: Arc<dyn KvStore> = match RedisKvStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => fatal(&format!("state store init error: {}", err)),
    };

    // Leader lock: at most one instance processes ingress. Losing the lock
    // later terminates the process from the refresh task.
    let instance_id = Uuid::new_v4().to_string();
    match leader::acquire(&store, &instance_id).await {
        Ok(true) => info!("leader lock acquired: instance={}", instance_id),
        Ok(false) => {
            warn!("another instance holds the leader lock, exiting");
            return;
        }
        Err(err) => fatal(&format!("leader acquire error: {}", err)),
    }
    let _refresh = leader::spawn_refresh(store.clone(), instance_id.clone());

    let results: Option<Arc<dyn ResultRepository>> = match &config.database_url {
        Some(url) => match PgResultRepository::connect(url).await {
            Ok(repo) => Some(Arc::new(repo)),
            Err(err) => fatal(&format!("result repository init error: {}", err)),
        },
        None => {
            warn!("DATABASE_URL not set; finished games will not be archived");
            None
        }
    };

    let renderer: Arc<dyn BoardRenderer> = Arc::new(SvgBoardRenderer::new());
    let matches = Arc::new(MatchService::new(store.clone(), renderer, results));
    let lobby = Arc::new(LobbyService::new(store.clone(), matches.clone()));

    // The catalog is the single source of user-facing text: load it and
    // verify every required key renders before accepting traffic.
    let catalog = match Catalog::new(config.template_dir.as_deref()) {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => fatal(&format!("message catalog load error: {}", err)),
    };
    if let Err(err) = catalog::preflight(&catalog) {
        fatal(&format!("message catalog preflight error: {}", err));
    }
    info!(
        "message catalog loaded: override={}",
        config.template_dir.is_some()
    );

    let client = match IrisClient::new(&config.iris_base_url) {
        Ok(client) => client,
        Err(err) => fatal(&format!("iris client init error: {}", err)),
    };

    // The engine subsystem is an external collaborator; without one wired,
    // engine commands answer with the disabled message.
    let solo: Option<Arc<dyn SoloService>> = None;
    if config.pvp_only {
        info!("pvp-only mode: engine commands disabled");
    } else {
        warn!("no engine collaborator configured; engine commands disabled");
    }

    let broadcaster = Broadcaster::new(
        client.clone(),
        catalog.clone(),
        config.start_image_delay,
        config.fanout_image_delay,
    );
    let ws_url = config.iris_ws_url.clone();
    let state = Arc::new(AppState {
        config,
        store: store.clone(),
        matches,
        lobby,
        client,
        catalog,
        broadcaster,
        solo,
        sender_names: Mutex::new(HashMap::new()),
        processed: Mutex::new(HashMap::new()),
    });
    let router = Router::new(state);

    let mut ws_config = WsConfig::new(&ws_url);
    ws_config.reconnect_base_delay = Duration::from_secs(1);
    let runner = WsRunner::new(ws_config);

    tokio::select! {
        result = runner.run(move |frame| router.on_frame(frame)) => {
            if let Err(err) = result {
                error!("websocket loop ended: {}", err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    leader::release(&store, &instance_id).await;
}

fn fatal(message: &str) -> ! {
    error!("{}", message);
    std::process::exit(1);
}
