//! EVV Facade. The public entry point a caregiver-facing app talks to:
//! clock in/out, complete a task, attach a note or photo, report an
//! incident, and inspect or trigger sync. Every entry point serializes
//! on an in-memory lock keyed by `(kind, id)` so the
//! validate → apply-optimistic → enqueue sequence for one record never
//! interleaves with another call touching the same record; calls on
//! different keys proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::{random_id, Clock};
use crate::error::{CoreError, CoreResult};
use crate::model::evv::{
    EvvRecord, RecordStatus, ServiceAddress, Verification, VerificationLevel, VerificationMethod,
};
use crate::model::optimistic::Operation;
use crate::model::queue_item::QueuedActionKind;
use crate::model::record::EntityKind;
use crate::offline_queue::OfflineQueue;
use crate::optimistic::OptimisticUpdateManager;
use crate::state_rules::StateRulesTable;
use crate::store::LocalStore;
use crate::sync_manager::{SyncManager, SyncOutcome, SyncStats};
use crate::validator;

pub struct ClockInInput {
    pub visit_id: String,
    pub client_id: String,
    pub caregiver_id: String,
    pub state: String,
    pub service_date: String,
    pub service_address: ServiceAddress,
    pub scheduled_start_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp_ms: i64,
    pub method: VerificationMethod,
    pub device_id: String,
    pub device_model: String,
    pub device_os: String,
    pub app_version: String,
    pub is_rooted: bool,
    pub is_jailbroken: bool,
    pub mock_location_detected: bool,
    pub photo_url: Option<String>,
    pub biometric_verified: Option<bool>,
    pub supervisor_override_id: Option<String>,
}

pub struct ClockOutInput {
    pub visit_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp_ms: i64,
    pub method: VerificationMethod,
    pub device_id: String,
    pub mock_location_detected: bool,
    pub photo_url: Option<String>,
    pub biometric_verified: Option<bool>,
    pub supervisor_override_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockResult {
    pub evv_record: EvvRecord,
    pub verification: Verification,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStateSnapshot {
    pub is_online: bool,
    pub queue_size: usize,
    pub queue_stats: SyncStats,
    pub pending_optimistic: usize,
    pub last_sync_at: Option<i64>,
    pub last_sync_success: Option<bool>,
}

struct KeyedLocks {
    locks: DashMap<(EntityKind, String), Arc<AsyncMutex<()>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    fn entry(&self, kind: EntityKind, id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry((kind, id.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct EvvFacade<'a, C: Clock + Clone + 'static> {
    store: &'a LocalStore,
    queue: &'a OfflineQueue<'a>,
    optimistic: &'a OptimisticUpdateManager<'a, C>,
    sync_manager: &'a SyncManager<'a, C>,
    state_rules: &'a StateRulesTable,
    network: Arc<dyn crate::network::NetworkProbe>,
    clock: C,
    clock_skew_tolerance_s: i64,
    locks: KeyedLocks,
}

impl<'a, C: Clock + Clone + 'static> EvvFacade<'a, C> {
    pub fn new(
        store: &'a LocalStore,
        queue: &'a OfflineQueue<'a>,
        optimistic: &'a OptimisticUpdateManager<'a, C>,
        sync_manager: &'a SyncManager<'a, C>,
        state_rules: &'a StateRulesTable,
        network: Arc<dyn crate::network::NetworkProbe>,
        clock: C,
        clock_skew_tolerance_s: i64,
    ) -> Self {
        Self {
            store,
            queue,
            optimistic,
            sync_manager,
            state_rules,
            network,
            clock,
            clock_skew_tolerance_s,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn clock_in(&self, input: ClockInInput) -> CoreResult<ClockResult> {
        let lock = self.locks.entry(EntityKind::EvvRecord, &input.visit_id);
        let _guard = lock.lock().await;

        let now = self.clock.now_ms();
        let structural_errors = validator::validate_location(
            input.latitude,
            input.longitude,
            input.accuracy,
            input.timestamp_ms,
            now,
            true,
            input.mock_location_detected,
            self.clock_skew_tolerance_s,
        );
        let mut errors = structural_errors;
        errors.extend(validator::validate_device(
            &input.device_id,
            &input.device_model,
            &input.device_os,
            &input.app_version,
            input.is_rooted,
            input.is_jailbroken,
        ));
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }

        let rules = self.state_rules.resolve(&input.state);
        let geofence = validator::check_geofence(
            input.latitude,
            input.longitude,
            input.accuracy,
            input.service_address.latitude,
            input.service_address.longitude,
            rules.geofence_radius_meters,
            rules.geofence_tolerance_meters,
        );

        let state_result = validator::validate_state_rules(&validator::StateValidationInput {
            rules: &rules,
            scheduled_start_ms: input.scheduled_start_ms,
            clock_in_time_ms: input.timestamp_ms,
            verification: &provisional_verification(&input, &geofence),
            address: &input.service_address,
            has_signature: false,
            has_photo: input.photo_url.is_some(),
        });

        let hard_violation = state_result.issues.iter().any(|i| !i.overridable && i.flag == "MANUAL_OVERRIDE");
        if hard_violation {
            return Err(CoreError::Compliance(
                state_result.issues.into_iter().map(|i| i.message).collect(),
            ));
        }

        let verification = Verification {
            is_within_geofence: geofence.is_within_geofence,
            distance_from_address: geofence.distance_meters,
            geofence_passed: geofence.is_within_geofence && !geofence.requires_manual_review,
            verification_passed: state_result.verification_level == VerificationLevel::Full,
            ..provisional_verification(&input, &geofence)
        };

        let mut record = EvvRecord {
            visit_id: input.visit_id.clone(),
            client_id: input.client_id,
            caregiver_id: input.caregiver_id,
            service_date: input.service_date,
            service_address: input.service_address,
            clock_in_time: input.timestamp_ms,
            clock_out_time: None,
            clock_in_verification: verification.clone(),
            clock_out_verification: None,
            record_status: RecordStatus::Pending,
            verification_level: state_result.verification_level,
            compliance_flags: state_result.compliance_flags,
            integrity_hash: String::new(),
            integrity_checksum: String::new(),
            total_duration_minutes: None,
        };
        record.integrity_hash = validator::compute_integrity_hash(&record);
        record.integrity_checksum = validator::compute_integrity_checksum(&record);

        let time_entry_id = format!("{}-clock-in", input.visit_id);
        let time_entry_payload = serde_json::json!({
            "visitId": input.visit_id,
            "type": "CLOCK_IN",
            "timestamp": input.timestamp_ms,
        });
        self.optimistic.apply_update(
            random_id(),
            EntityKind::TimeEntry,
            time_entry_id,
            Operation::Create,
            time_entry_payload,
        )?;

        let update_id = random_id();
        let payload = serde_json::to_value(&record)?;
        self.optimistic.apply_update(
            update_id.clone(),
            EntityKind::EvvRecord,
            input.visit_id.clone(),
            Operation::Create,
            payload.clone(),
        )?;

        self.queue.enqueue(
            random_id(),
            QueuedActionKind::VisitCheckIn,
            payload,
            update_id,
        )?;

        Ok(ClockResult {
            evv_record: record,
            verification,
        })
    }

    pub async fn clock_out(&self, input: ClockOutInput) -> CoreResult<ClockResult> {
        let lock = self.locks.entry(EntityKind::EvvRecord, &input.visit_id);
        let _guard = lock.lock().await;

        let existing = self
            .store
            .get(EntityKind::EvvRecord, &input.visit_id)?
            .ok_or_else(|| CoreError::Validation(format!("no pending EVV record for visit {}", input.visit_id)))?;
        let mut record: EvvRecord = serde_json::from_value(existing.payload)?;

        let now = self.clock.now_ms();
        let errors = validator::validate_location(
            input.latitude,
            input.longitude,
            input.accuracy,
            input.timestamp_ms,
            now,
            true,
            input.mock_location_detected,
            self.clock_skew_tolerance_s,
        );
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }

        let rules = self.state_rules.resolve(&record.service_address.state);
        let geofence = validator::check_geofence(
            input.latitude,
            input.longitude,
            input.accuracy,
            record.service_address.latitude,
            record.service_address.longitude,
            rules.geofence_radius_meters,
            rules.geofence_tolerance_meters,
        );

        let has_photo = input.photo_url.is_some();
        let verification = Verification {
            latitude: input.latitude,
            longitude: input.longitude,
            accuracy: input.accuracy,
            timestamp: input.timestamp_ms,
            timestamp_source: "device".to_string(),
            method: input.method,
            location_source: "gps".to_string(),
            is_within_geofence: geofence.is_within_geofence,
            distance_from_address: geofence.distance_meters,
            geofence_passed: geofence.is_within_geofence && !geofence.requires_manual_review,
            device_id: input.device_id,
            mock_location_detected: input.mock_location_detected,
            verification_passed: geofence.is_within_geofence,
            photo_url: input.photo_url,
            biometric_verified: input.biometric_verified,
            supervisor_override_id: input.supervisor_override_id,
        };
        validator::validate_manual_override(&verification).map_err(CoreError::Validation)?;

        // Clock-out timing isn't graded against the scheduled start again (that
        // already happened at clock-in); anchoring both timestamps to the
        // existing clock-in time keeps TIME_GAP from re-firing here while still
        // running geofence, method, mock-location and signature/photo checks.
        let state_result = validator::validate_state_rules(&validator::StateValidationInput {
            rules: &rules,
            scheduled_start_ms: record.clock_in_time,
            clock_in_time_ms: record.clock_in_time,
            verification: &verification,
            address: &record.service_address,
            has_signature: false,
            has_photo,
        });

        let hard_violation = state_result.issues.iter().any(|i| !i.overridable && i.flag == "MANUAL_OVERRIDE");
        if hard_violation {
            return Err(CoreError::Compliance(
                state_result.issues.into_iter().map(|i| i.message).collect(),
            ));
        }

        record.clock_out_time = Some(input.timestamp_ms);
        record.clock_out_verification = Some(verification.clone());
        record.total_duration_minutes = Some((input.timestamp_ms - record.clock_in_time) / 60_000);
        record.record_status = RecordStatus::Complete;

        let mut flags: Vec<String> = record
            .compliance_flags
            .iter()
            .cloned()
            .chain(state_result.compliance_flags.iter().cloned())
            .filter(|f| f != "COMPLIANT")
            .collect();
        flags.sort();
        flags.dedup();
        record.compliance_flags = if flags.is_empty() { vec!["COMPLIANT".to_string()] } else { flags };
        if verification_level_rank(state_result.verification_level) > verification_level_rank(record.verification_level) {
            record.verification_level = state_result.verification_level;
        }
        record.integrity_hash = validator::compute_integrity_hash(&record);
        record.integrity_checksum = validator::compute_integrity_checksum(&record);

        let payload = serde_json::to_value(&record)?;
        let update_id = random_id();
        self.optimistic.apply_update(
            update_id.clone(),
            EntityKind::EvvRecord,
            input.visit_id.clone(),
            Operation::Update,
            payload.clone(),
        )?;
        self.queue.enqueue(
            random_id(),
            QueuedActionKind::VisitCheckOut,
            payload,
            update_id,
        )?;

        Ok(ClockResult {
            evv_record: record,
            verification,
        })
    }

    pub async fn complete_task(&self, task_id: &str, payload: serde_json::Value) -> CoreResult<()> {
        self.apply_and_enqueue(EntityKind::TimeEntry, task_id, Operation::Update, payload, QueuedActionKind::TaskComplete)
            .await
    }

    pub async fn submit_note(&self, note_id: &str, payload: serde_json::Value) -> CoreResult<()> {
        self.apply_and_enqueue(EntityKind::Note, note_id, Operation::Create, payload, QueuedActionKind::CareNote)
            .await
    }

    pub async fn attach_note(&self, visit_id: &str, payload: serde_json::Value) -> CoreResult<()> {
        self.apply_and_enqueue(EntityKind::Visit, visit_id, Operation::Update, payload, QueuedActionKind::VisitNote)
            .await
    }

    pub async fn attach_media(&self, attachment_id: &str, payload: serde_json::Value) -> CoreResult<()> {
        self.apply_and_enqueue(
            EntityKind::Attachment,
            attachment_id,
            Operation::Create,
            payload,
            QueuedActionKind::AttachmentUpload,
        )
        .await
    }

    pub async fn report_incident(&self, visit_id: &str, payload: serde_json::Value) -> CoreResult<()> {
        self.apply_and_enqueue(EntityKind::Visit, visit_id, Operation::Update, payload, QueuedActionKind::IncidentReport)
            .await
    }

    async fn apply_and_enqueue(
        &self,
        kind: EntityKind,
        record_id: &str,
        operation: Operation,
        payload: serde_json::Value,
        action_kind: QueuedActionKind,
    ) -> CoreResult<()> {
        let lock = self.locks.entry(kind, record_id);
        let _guard = lock.lock().await;

        let update_id = random_id();
        self.optimistic
            .apply_update(update_id.clone(), kind, record_id, operation, payload.clone())?;
        self.queue.enqueue(random_id(), action_kind, payload, update_id)?;
        Ok(())
    }

    pub async fn get_sync_state(&self) -> SyncStateSnapshot {
        SyncStateSnapshot {
            is_online: self.network.is_online(),
            queue_size: self.queue.len(),
            queue_stats: self.sync_manager.stats().await,
            pending_optimistic: self.optimistic.pending_count(),
            last_sync_at: self.sync_manager.last_sync_at().await,
            last_sync_success: self.sync_manager.last_sync_success().await,
        }
    }

    pub async fn manual_sync(&self) -> CoreResult<SyncOutcome> {
        self.sync_manager.manual_sync().await
    }

    pub async fn list_exceptions(&self) -> Vec<crate::sync_manager::ExceptionEntry> {
        self.sync_manager.list_exceptions().await
    }

    pub async fn resolve_exception(
        &self,
        record_id: &str,
        decision: &crate::model::conflict::ManualDecision,
    ) -> CoreResult<()> {
        self.sync_manager.resolve_exception(record_id, decision).await
    }
}

fn verification_level_rank(level: VerificationLevel) -> u8 {
    match level {
        VerificationLevel::Full => 0,
        VerificationLevel::Partial => 1,
        VerificationLevel::Exception => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::http_client::HttpClient;
    use crate::network::DebouncedNetworkProbe;
    use crate::state_rules::StateRulesTable;
    use crate::sync_manager::SyncManager;

    fn address() -> ServiceAddress {
        ServiceAddress {
            line: "1 Main St".to_string(),
            city: "Austin".to_string(),
            state: "TX".to_string(),
            latitude: 30.2700,
            longitude: -97.7400,
            geofence_radius_meters: 100.0,
        }
    }

    fn clock_in_input(visit_id: &str, lat: f64, lon: f64, accuracy: f64, timestamp_ms: i64) -> ClockInInput {
        ClockInInput {
            visit_id: visit_id.to_string(),
            client_id: "client-1".to_string(),
            caregiver_id: "caregiver-1".to_string(),
            state: "TX".to_string(),
            service_date: "2025-11-12".to_string(),
            service_address: address(),
            scheduled_start_ms: timestamp_ms,
            latitude: lat,
            longitude: lon,
            accuracy,
            timestamp_ms,
            method: VerificationMethod::Gps,
            device_id: "device-1".to_string(),
            device_model: "Pixel 8".to_string(),
            device_os: "Android 14".to_string(),
            app_version: "1.0.0".to_string(),
            is_rooted: false,
            is_jailbroken: false,
            mock_location_detected: false,
            photo_url: None,
            biometric_verified: None,
            supervisor_override_id: None,
        }
    }

    fn clock_out_input(visit_id: &str, lat: f64, lon: f64, accuracy: f64, timestamp_ms: i64) -> ClockOutInput {
        ClockOutInput {
            visit_id: visit_id.to_string(),
            latitude: lat,
            longitude: lon,
            accuracy,
            timestamp_ms,
            method: VerificationMethod::Gps,
            device_id: "device-1".to_string(),
            mock_location_detected: false,
            photo_url: None,
            biometric_verified: None,
            supervisor_override_id: None,
        }
    }

    #[tokio::test]
    async fn clock_in_then_clock_out_on_time_and_within_geofence_is_fully_compliant() {
        let store = LocalStore::open_in_memory().unwrap();
        let clock = FixedClock::new(1_700_000_000_000);
        let queue = OfflineQueue::new(&store, Box::new(clock.clone())).unwrap();
        let optimistic = OptimisticUpdateManager::new(&store, clock.clone()).unwrap();
        let rules = StateRulesTable::new(None);
        let sync_manager = SyncManager::new(
            &store,
            &queue,
            &optimistic,
            Arc::new(DebouncedNetworkProbe::new(true)),
            HttpClient::new("https://example.test"),
            clock.clone(),
            1_000,
            300_000,
        );
        let facade = EvvFacade::new(
            &store,
            &queue,
            &optimistic,
            &sync_manager,
            &rules,
            Arc::new(DebouncedNetworkProbe::new(true)),
            clock.clone(),
            300,
        );

        let start = clock.now_ms();
        let in_result = facade
            .clock_in(clock_in_input("visit-1", 30.2700, -97.7400, 10.0, start))
            .await
            .unwrap();
        assert_eq!(in_result.evv_record.record_status, RecordStatus::Pending);
        assert_eq!(queue.len(), 1);

        clock.advance_ms(120 * 60_000);
        let out_result = facade
            .clock_out(clock_out_input("visit-1", 30.2700, -97.7400, 10.0, clock.now_ms()))
            .await
            .unwrap();

        assert_eq!(out_result.evv_record.record_status, RecordStatus::Complete);
        assert_eq!(out_result.evv_record.total_duration_minutes, Some(120));
        assert_eq!(out_result.evv_record.verification_level, VerificationLevel::Full);
        assert_eq!(out_result.evv_record.compliance_flags, vec!["COMPLIANT".to_string()]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn clock_in_with_low_accuracy_outside_geofence_is_partial_not_exception() {
        let store = LocalStore::open_in_memory().unwrap();
        let clock = FixedClock::new(1_700_000_000_000);
        let queue = OfflineQueue::new(&store, Box::new(clock.clone())).unwrap();
        let optimistic = OptimisticUpdateManager::new(&store, clock.clone()).unwrap();
        let rules = StateRulesTable::new(None);
        let sync_manager = SyncManager::new(
            &store,
            &queue,
            &optimistic,
            Arc::new(DebouncedNetworkProbe::new(true)),
            HttpClient::new("https://example.test"),
            clock.clone(),
            1_000,
            300_000,
        );
        let facade = EvvFacade::new(
            &store,
            &queue,
            &optimistic,
            &sync_manager,
            &rules,
            Arc::new(DebouncedNetworkProbe::new(true)),
            clock.clone(),
            300,
        );

        let start = clock.now_ms();
        let result = facade
            .clock_in(clock_in_input("visit-2", 30.2672, -97.7431, 150.0, start))
            .await
            .unwrap();

        assert_eq!(result.evv_record.verification_level, VerificationLevel::Partial);
        assert!(result.evv_record.compliance_flags.contains(&"GEOFENCE_VIOLATION".to_string()));
        assert!(!result.verification.geofence_passed);
        assert_eq!(queue.len(), 1);
    }
}

fn provisional_verification(input: &ClockInInput, geofence: &validator::GeofenceResult) -> Verification {
    Verification {
        latitude: input.latitude,
        longitude: input.longitude,
        accuracy: input.accuracy,
        timestamp: input.timestamp_ms,
        timestamp_source: "device".to_string(),
        method: input.method,
        location_source: "gps".to_string(),
        is_within_geofence: geofence.is_within_geofence,
        distance_from_address: geofence.distance_meters,
        geofence_passed: geofence.is_within_geofence && !geofence.requires_manual_review,
        device_id: input.device_id.clone(),
        mock_location_detected: input.mock_location_detected,
        verification_passed: geofence.is_within_geofence,
        photo_url: input.photo_url.clone(),
        biometric_verified: input.biometric_verified,
        supervisor_override_id: input.supervisor_override_id.clone(),
    }
}
