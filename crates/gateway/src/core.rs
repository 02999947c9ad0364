use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use model::drivers::AssignmentsByBlock;
use model::stop::ApproachSet;
use model::vehicle::PersistedHeading;
use ondemand::{OnDemandClient, OnDemandVehicle};
use overpass::{OverpassClient, SpeedProfile};
use tokio::sync::Mutex;
use transloc::model::{BlockGroup, TranslocStop, VehicleCapacityRecord};
use transloc::TranslocClient;
use whentowork::W2wClient;

use crate::api_log::ApiCallLog;
use crate::cache::{PerKeySwrCache, TtlCache};
use crate::config::Config;
use crate::fullbus::{FullBusStorage, FullBusTracker};
use crate::headway::config::{load_approach_sets, load_headway_config};
use crate::headway::{HeadwayStorage, HeadwayTracker};
use crate::mileage::MILEAGE_FILE;
use crate::pollers::RoutesPayload;
use crate::sse::SseBroadcaster;
use crate::state::{new_shared_state, SharedState};

pub const HEADINGS_FILE: &str = "vehicle_headings.json";

pub type EstimatesById = HashMap<i64, serde_json::Value>;

/// Everything the pollers, the fusion worker and the request surface share.
pub struct Core {
    pub config: Config,
    pub state: SharedState,

    pub transloc: TranslocClient,
    pub overpass: OverpassClient,
    pub w2w: Option<W2wClient>,
    pub ondemand: Option<OnDemandClient>,

    pub api_log: Arc<ApiCallLog>,

    pub routes_cache: TtlCache<RoutesPayload>,
    pub stops_cache: TtlCache<Vec<TranslocStop>>,
    pub capacities_cache: TtlCache<Vec<VehicleCapacityRecord>>,
    pub blocks_cache: TtlCache<Vec<BlockGroup>>,
    pub shifts_cache: TtlCache<AssignmentsByBlock>,
    pub ondemand_cache: TtlCache<Vec<OnDemandVehicle>>,
    /// Batched stop-estimate fetches, keyed by the comma-joined id list so a
    /// burst of dashboard refreshes is absorbed by a slightly stale answer.
    pub estimates_cache: PerKeySwrCache<String, EstimatesById>,
    /// Road metadata per encoded polyline; fetched once per shape.
    pub speed_profiles: Mutex<HashMap<String, SpeedProfile>>,

    pub headway_storage: HeadwayStorage,
    pub headway: Mutex<HeadwayTracker>,
    pub approach_config: HashMap<String, Vec<ApproachSet>>,

    pub fullbus_storage: FullBusStorage,
    pub fullbus: Mutex<FullBusTracker>,

    pub vehicles_broadcast: SseBroadcaster,
}

impl Core {
    pub async fn new(config: Config) -> reqwest::Result<Arc<Self>> {
        let http = crate::http::build_client()?;
        let api_log = Arc::new(ApiCallLog::new());

        let call_hook: transloc::ApiCallHook = {
            let api_log = api_log.clone();
            Arc::new(move |method: &str, url: &str, status: u16| {
                api_log.record(method, url, status);
            })
        };

        let transloc_client =
            TranslocClient::new(&config.transloc_base, &config.transloc_key, http.clone())
                .with_call_hook(call_hook.clone());
        let overpass_client = OverpassClient::new(&config.overpass_ep, http.clone());

        let w2w = config.w2w_key.as_ref().map(|key| {
            let api_log = api_log.clone();
            W2wClient::new(&config.w2w_url, key, http.clone()).with_call_hook(Arc::new(
                move |method: &str, url: &str, status: u16| {
                    api_log.record(method, url, status);
                },
            ))
        });

        let ondemand = if config.ondemand_configured() {
            match OnDemandClient::new(
                config.ondemand_login_url.as_deref().unwrap_or_default(),
                config.ondemand_positions_url.as_deref().unwrap_or_default(),
                config.ondemand_user.clone().unwrap_or_default(),
                config.ondemand_passwd.clone().unwrap_or_default(),
            ) {
                Ok(client) => Some(client),
                Err(why) => {
                    log::error!("[ondemand] client setup failed: {why}");
                    None
                }
            }
        } else {
            log::info!("[ondemand] integration disabled; credentials not configured");
            None
        };

        let state = new_shared_state();

        // Startup state restore is best-effort; missing or corrupt files
        // just mean empty state.
        let bus_days: Option<crate::mileage::BusDays> =
            crate::persist::read_json_any(&config.data_dirs, MILEAGE_FILE).await;
        let headings: Option<HashMap<String, PersistedHeading>> =
            crate::persist::read_json_any(&config.data_dirs, HEADINGS_FILE).await;
        {
            let mut guard = state.write().await;
            if let Some(bus_days) = bus_days {
                guard.bus_days = bus_days;
            }
            if let Some(headings) = headings {
                guard.last_headings = headings
                    .into_iter()
                    .filter_map(|(vid, heading)| vid.parse::<i64>().ok().map(|id| (id, heading)))
                    .collect();
            }
        }

        let headway_config = load_headway_config(&config.data_dirs).await;
        let approach_config = load_approach_sets(&config.data_dirs).await;

        let headway_storage = HeadwayStorage::new(config.data_dirs.clone());
        let headway = HeadwayTracker::new(
            headway_storage.clone(),
            headway_config.route_ids,
            headway_config.stop_ids,
        );

        let fullbus_storage = FullBusStorage::new(config.data_dirs.clone());
        let fullbus = FullBusTracker::new(fullbus_storage.clone());

        let ttl = |seconds: f64| Duration::from_secs_f64(seconds.max(0.5));

        Ok(Arc::new(Self {
            routes_cache: TtlCache::new(ttl(config.route_refresh_s)),
            stops_cache: TtlCache::new(ttl(config.route_refresh_s)),
            capacities_cache: TtlCache::new(ttl(config.veh_refresh_s)),
            blocks_cache: TtlCache::new(ttl(config.block_refresh_s)),
            shifts_cache: TtlCache::new(ttl(config.block_refresh_s)),
            ondemand_cache: TtlCache::new(ttl(config.block_refresh_s)),
            estimates_cache: PerKeySwrCache::new(Duration::from_secs(10), 8),
            speed_profiles: Mutex::new(HashMap::new()),
            headway_storage,
            headway: Mutex::new(headway),
            approach_config,
            fullbus_storage,
            fullbus: Mutex::new(fullbus),
            vehicles_broadcast: SseBroadcaster::new(),
            api_log,
            transloc: transloc_client,
            overpass: overpass_client,
            w2w,
            ondemand,
            state,
            config,
        }))
    }
}
