use gateway::config::Config;
use gateway::core::Core;
use gateway::{fusion, pollers, vehicle_log};
use web::{start_web_server, WebState};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();
    log::info!(
        "[main] starting with data_dirs={:?} veh_refresh={}s",
        config.data_dirs,
        config.veh_refresh_s
    );

    let core = Core::new(config)
        .await
        .expect("could not build the outbound http client.");

    // Background data plane: one task per poller, the fusion worker and the
    // position logger.
    pollers::spawn_all(core.clone());
    tokio::spawn(fusion::run(core.clone()));
    tokio::spawn(vehicle_log::run(core.clone()));

    // The web server owns the main task; a bind failure is fatal.
    start_web_server(WebState { core })
        .await
        .expect("web server failed to start.");
}
