use std::time::Duration;

/// Build the one long-lived outbound client every upstream call shares.
/// Connects are bounded at 5 s, reads at 20 s, with a capped keep-alive pool
/// so a slow provider cannot pile up sockets.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(20))
        .pool_max_idle_per_host(20)
        .build()
}
