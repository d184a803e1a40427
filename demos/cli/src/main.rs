use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use evv_sync_core::clock::SystemClock;
use evv_sync_core::facade::{ClockInInput, EvvFacade};
use evv_sync_core::http_client::HttpClient;
use evv_sync_core::model::evv::{ServiceAddress, VerificationMethod};
use evv_sync_core::network::DebouncedNetworkProbe;
use evv_sync_core::offline_queue::OfflineQueue;
use evv_sync_core::optimistic::OptimisticUpdateManager;
use evv_sync_core::state_rules::StateRulesTable;
use evv_sync_core::store::LocalStore;
use evv_sync_core::sync_manager::SyncManager;
use evv_sync_core::Config;

/// Exercises the sync core end to end: opens a local store, clocks a
/// caregiver in against a fixed set of coordinates, then triggers a
/// manual sync pass and prints the resulting queue and sync state.
#[derive(Parser, Debug)]
#[command(name = "evv-sync-demo", version, about = "EVV sync core demo harness")]
struct Args {
    /// Path to the SQLite database file. Pass ":memory:" for a scratch run.
    #[arg(long, default_value = ":memory:")]
    db_path: String,

    /// Base URL of the sync server to post actions to and pull changes from.
    #[arg(long, env = "API_BASE_URL")]
    api_base_url: String,

    /// Bearer token attached to outbound requests, if the server requires one.
    #[arg(long, env = "API_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Two-letter state code used to resolve EVV validation rules.
    #[arg(long, default_value = "OH")]
    state: String,

    /// Visit identifier to clock in.
    #[arg(long, default_value = "demo-visit-1")]
    visit_id: String,

    /// Report connectivity as offline instead of online.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let cfg = Config::new(&args.api_base_url).context("invalid configuration")?;

    let store = if args.db_path == ":memory:" {
        LocalStore::open_in_memory()?
    } else {
        LocalStore::open(&args.db_path)?
    };

    let clock = SystemClock;
    let state_rules = StateRulesTable::new(cfg.state_rules_overrides.clone());
    let optimistic = OptimisticUpdateManager::new(&store, clock)?;
    let queue = OfflineQueue::new(&store, Box::new(clock))?;

    let mut http = HttpClient::new(&cfg.api_base_url);
    if let Some(token) = &args.auth_token {
        http = http.with_auth_token(token);
    }

    let network: Arc<dyn evv_sync_core::network::NetworkProbe> =
        Arc::new(DebouncedNetworkProbe::new(!args.offline));

    let sync_manager = SyncManager::new(
        &store,
        &queue,
        &optimistic,
        network.clone(),
        http,
        clock,
        cfg.queue_base_delay.as_millis() as u64,
        cfg.queue_max_delay.as_millis() as u64,
    );

    let facade = EvvFacade::new(
        &store,
        &queue,
        &optimistic,
        &sync_manager,
        &state_rules,
        network,
        clock,
        cfg.clock_skew_tolerance.as_secs() as i64,
    );

    let now = clock.now_ms();
    let result = facade
        .clock_in(ClockInInput {
            visit_id: args.visit_id.clone(),
            client_id: "demo-client-1".to_string(),
            caregiver_id: "demo-caregiver-1".to_string(),
            state: args.state.clone(),
            service_date: "2026-07-28".to_string(),
            service_address: ServiceAddress {
                line: "1 Demo St".to_string(),
                city: "Columbus".to_string(),
                state: args.state.clone(),
                latitude: 39.9612,
                longitude: -82.9988,
                geofence_radius_meters: 150.0,
            },
            scheduled_start_ms: now,
            latitude: 39.9612,
            longitude: -82.9988,
            accuracy: 10.0,
            timestamp_ms: now,
            method: VerificationMethod::Gps,
            device_id: "demo-device-1".to_string(),
            device_model: "Pixel 8".to_string(),
            device_os: "Android 15".to_string(),
            app_version: "1.0.0".to_string(),
            is_rooted: false,
            is_jailbroken: false,
            mock_location_detected: false,
            photo_url: None,
            biometric_verified: None,
            supervisor_override_id: None,
        })
        .await
        .context("clock-in failed")?;

    tracing::info!(visit_id = %args.visit_id, verification_level = ?result.evv_record.verification_level, "clocked in");

    let outcome = facade.manual_sync().await.context("sync pass failed")?;
    tracing::info!(success = outcome.success, changes = ?outcome.changes_count, "sync pass complete");

    let snapshot = facade.get_sync_state().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
