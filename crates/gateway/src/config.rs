use std::env;
use std::path::PathBuf;

/// Runtime configuration, read once from the environment at startup. The
/// dispatcher auth table is the one exception: it is rescanned on every auth
/// check (see `auth::AuthTable::from_env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub transloc_base: String,
    pub transloc_key: String,
    pub overpass_ep: String,

    pub veh_refresh_s: f64,
    pub route_refresh_s: f64,
    pub block_refresh_s: f64,

    pub stale_fix_s: f64,
    pub route_grace_s: f64,
    pub vehicle_stale_threshold_s: f64,

    pub ema_alpha: f64,
    pub min_speed_floor: f64,
    pub max_speed_ceil: f64,
    pub heading_jitter_m: f64,

    pub data_dirs: Vec<PathBuf>,

    pub veh_log_interval_s: f64,
    pub veh_log_min_move_m: f64,
    pub veh_log_retention_ms: i64,

    pub sync_secret: Option<String>,
    pub dispatch_cookie_max_age_s: i64,
    pub dispatch_cookie_secure: bool,

    pub w2w_url: String,
    pub w2w_key: Option<String>,

    pub ondemand_login_url: Option<String>,
    pub ondemand_positions_url: Option<String>,
    pub ondemand_user: Option<String>,
    pub ondemand_passwd: Option<String>,

    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            transloc_base: env_string("TRANSLOC_BASE", "https://feeds.transloc.com"),
            transloc_key: env_string("TRANSLOC_KEY", ""),
            overpass_ep: env_string("OVERPASS_EP", "https://overpass-api.de/api/interpreter"),

            veh_refresh_s: env_f64("VEH_REFRESH_S", 5.0),
            route_refresh_s: env_f64("ROUTE_REFRESH_S", 60.0),
            block_refresh_s: env_f64("BLOCK_REFRESH_S", 30.0),

            stale_fix_s: env_f64("STALE_FIX_S", 90.0),
            route_grace_s: env_f64("ROUTE_GRACE_S", 60.0),
            vehicle_stale_threshold_s: env_f64("VEHICLE_STALE_THRESHOLD_S", 3600.0),

            ema_alpha: env_f64("EMA_ALPHA", 0.40),
            min_speed_floor: env_f64("MIN_SPEED_FLOOR", 1.2),
            max_speed_ceil: env_f64("MAX_SPEED_CEIL", 22.0),
            heading_jitter_m: env_f64("HEADING_JITTER_M", 3.0),

            data_dirs: env_string("DATA_DIRS", "/data")
                .split(':')
                .filter(|part| !part.is_empty())
                .map(PathBuf::from)
                .collect(),

            veh_log_interval_s: env_f64("VEH_LOG_INTERVAL_S", 4.0),
            veh_log_min_move_m: env_f64("VEH_LOG_MIN_MOVE_M", 3.0),
            veh_log_retention_ms: env_i64("VEH_LOG_RETENTION_MS", 7 * 24 * 3600 * 1000),

            sync_secret: env_optional("SYNC_SECRET"),
            dispatch_cookie_max_age_s: env_i64("DISPATCH_COOKIE_MAX_AGE", 7 * 24 * 3600),
            dispatch_cookie_secure: env_bool("DISPATCH_COOKIE_SECURE", false),

            w2w_url: env_string(
                "W2W_URL",
                "https://www3.whentowork.com/cgi-bin/w2w.dll/api/AssignedShiftList",
            ),
            w2w_key: env_optional("W2W_KEY"),

            ondemand_login_url: env_optional("ONDEMAND_LOGIN_URL"),
            ondemand_positions_url: env_optional("ONDEMAND_POSITIONS_URL"),
            ondemand_user: env_optional("ONDEMAND_USER"),
            ondemand_passwd: env_optional("ONDEMAND_PASSWD"),

            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
        }
    }

    /// First configured data directory; the authoritative copy.
    pub fn primary_data_dir(&self) -> PathBuf {
        self.data_dirs
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("/data"))
    }

    pub fn ondemand_configured(&self) -> bool {
        self.ondemand_login_url.is_some()
            && self.ondemand_positions_url.is_some()
            && self.ondemand_user.is_some()
            && self.ondemand_passwd.is_some()
    }
}

fn env_string(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_owned(),
        _ => default.to_owned(),
    }
}

fn env_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
        _ => None,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
