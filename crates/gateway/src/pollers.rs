use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::task::JoinHandle;
use transloc::model::{RouteCatalogEntry, RouteWithShape};
use utility::time::service_day;
use whentowork::build_driver_assignments;

use crate::cache::FetchError;
use crate::core::Core;
use crate::drivers::block_pairs_for_mileage;
use crate::mileage;
use crate::state::SharedState;

/// Routes-with-shapes plus the plain catalog (the catalog names routes that
/// are configured but not currently on the map).
#[derive(Debug, Clone, Default)]
pub struct RoutesPayload {
    pub with_shapes: Vec<RouteWithShape>,
    pub catalog: Vec<RouteCatalogEntry>,
}

/// One poller iteration loop: fetch, publish into the cache, sleep out the
/// rest of the interval (never less than half a second). Failures bump the
/// shared error note and leave the previous cached value in place.
async fn run_poller<F, Fut>(name: &'static str, interval_s: f64, state: SharedState, iteration: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), FetchError>>,
{
    let interval = interval_s.max(0.5);
    loop {
        let started = Instant::now();
        if let Err(why) = iteration().await {
            log::warn!("[poller] {name}: {why}");
            state.write().await.note_error(format!("{name}: {why}"));
        }
        let remaining = (interval - started.elapsed().as_secs_f64()).max(0.5);
        tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
    }
}

pub fn spawn_all(core: Arc<Core>) -> Vec<JoinHandle<()>> {
    let mut handles = vec![
        spawn_routes_poller(core.clone()),
        spawn_stops_poller(core.clone()),
        spawn_capacities_poller(core.clone()),
        spawn_blocks_poller(core.clone()),
    ];
    if core.w2w.is_some() {
        handles.push(spawn_shifts_poller(core.clone()));
    }
    if core.ondemand.is_some() {
        handles.push(spawn_ondemand_poller(core));
    }
    handles
}

async fn fetch_routes(core: Arc<Core>) -> Result<RoutesPayload, FetchError> {
    let with_shapes = core
        .transloc
        .routes_with_shapes()
        .await
        .map_err(FetchError::new)?;
    // The catalog only enriches the name map; a failure there should not
    // discard the shapes.
    let catalog = match core.transloc.routes_catalog().await {
        Ok(catalog) => catalog,
        Err(why) => {
            log::warn!("[poller] routes catalog fetch failed: {why}");
            Vec::new()
        }
    };
    Ok(RoutesPayload {
        with_shapes,
        catalog,
    })
}

fn spawn_routes_poller(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.route_refresh_s;
        let state = core.state.clone();
        run_poller("routes", interval, state, || {
            let core = core.clone();
            async move {
                core.routes_cache
                    .refresh(fetch_routes(core.clone()))
                    .await
                    .map(|_| ())
            }
        })
        .await
    })
}

fn spawn_stops_poller(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.route_refresh_s;
        let state = core.state.clone();
        run_poller("stops", interval, state, || {
            let core = core.clone();
            async move {
                let fetch_core = core.clone();
                core.stops_cache
                    .refresh(async move {
                        fetch_core.transloc.stops().await.map_err(FetchError::new)
                    })
                    .await
                    .map(|_| ())
            }
        })
        .await
    })
}

fn spawn_capacities_poller(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.veh_refresh_s;
        let state = core.state.clone();
        run_poller("capacities", interval, state, || {
            let core = core.clone();
            async move {
                let fetch_core = core.clone();
                core.capacities_cache
                    .refresh(async move {
                        fetch_core
                            .transloc
                            .vehicle_capacities()
                            .await
                            .map_err(FetchError::new)
                    })
                    .await
                    .map(|_| ())
            }
        })
        .await
    })
}

async fn fetch_block_groups(
    core: Arc<Core>,
) -> Result<Vec<transloc::model::BlockGroup>, FetchError> {
    let service_date = service_day(Local::now());
    let calendar = core
        .transloc
        .schedule_calendar(service_date)
        .await
        .map_err(FetchError::new)?;
    let ids: Vec<i64> = calendar
        .iter()
        .map(|entry| entry.schedule_vehicle_calendar_id)
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let groups = core
        .transloc
        .block_groups(&ids)
        .await
        .map_err(FetchError::new)?;

    // Record today's observed block ids against each bus.
    let pairs = block_pairs_for_mileage(&groups);
    if !pairs.is_empty() {
        let mut guard = core.state.write().await;
        mileage::note_blocks(
            &mut guard.bus_days,
            service_date,
            pairs.iter().map(|(bus, block)| (bus.as_str(), block.as_str())),
        );
    }

    Ok(groups)
}

fn spawn_blocks_poller(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.block_refresh_s;
        let state = core.state.clone();
        run_poller("blocks", interval, state, || {
            let core = core.clone();
            async move {
                core.blocks_cache
                    .refresh(fetch_block_groups(core.clone()))
                    .await
                    .map(|_| ())
            }
        })
        .await
    })
}

fn spawn_shifts_poller(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.block_refresh_s;
        let state = core.state.clone();
        run_poller("shifts", interval, state, || {
            let core = core.clone();
            async move {
                let fetch_core = core.clone();
                core.shifts_cache
                    .refresh(async move {
                        let Some(w2w) = fetch_core.w2w.as_ref() else {
                            return Ok(Default::default());
                        };
                        let now = Local::now();
                        let shifts = w2w
                            .assigned_shifts(service_day(now))
                            .await
                            .map_err(FetchError::new)?;
                        Ok(build_driver_assignments(&shifts, now))
                    })
                    .await
                    .map(|_| ())
            }
        })
        .await
    })
}

fn spawn_ondemand_poller(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.block_refresh_s;
        let state = core.state.clone();
        run_poller("ondemand", interval, state, || {
            let core = core.clone();
            async move {
                let fetch_core = core.clone();
                core.ondemand_cache
                    .refresh(async move {
                        let Some(client) = fetch_core.ondemand.as_ref() else {
                            return Ok(Vec::new());
                        };
                        client.vehicle_positions().await.map_err(FetchError::new)
                    })
                    .await
                    .map(|_| ())
            }
        })
        .await
    })
}
