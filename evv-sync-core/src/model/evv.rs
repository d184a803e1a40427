use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationMethod {
    Gps,
    Network,
    Biometric,
    Phone,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Complete,
    Amended,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationLevel {
    Full,
    Partial,
    Exception,
}

/// A single clock-in or clock-out verification block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp: i64,
    pub timestamp_source: String,
    pub method: VerificationMethod,
    pub location_source: String,
    pub is_within_geofence: bool,
    pub distance_from_address: f64,
    pub geofence_passed: bool,
    pub device_id: String,
    pub mock_location_detected: bool,
    pub verification_passed: bool,
    pub photo_url: Option<String>,
    pub biometric_verified: Option<bool>,
    /// Required when `method == Manual`: an override record id approved
    /// by a supervisor.
    pub supervisor_override_id: Option<String>,
}

/// The regulated clock event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvvRecord {
    pub visit_id: String,
    pub client_id: String,
    pub caregiver_id: String,
    pub service_date: String,
    pub service_address: ServiceAddress,
    pub clock_in_time: i64,
    pub clock_out_time: Option<i64>,
    pub clock_in_verification: Verification,
    pub clock_out_verification: Option<Verification>,
    pub record_status: RecordStatus,
    pub verification_level: VerificationLevel,
    pub compliance_flags: Vec<String>,
    pub integrity_hash: String,
    pub integrity_checksum: String,
    pub total_duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub line: String,
    pub city: String,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub geofence_radius_meters: f64,
}
