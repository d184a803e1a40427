//! EVV Validator. Pure, side-effect-free validation and integrity
//! arithmetic — no suspension points, no I/O.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::canonical::canonicalize;
use crate::clock::sha256_hex;
use crate::model::evv::{EvvRecord, ServiceAddress, Verification, VerificationMethod};
use crate::model::state_rules::StateRules;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceResult {
    pub distance_meters: f64,
    pub effective_radius: f64,
    pub is_within_geofence: bool,
    pub requires_manual_review: bool,
    pub reason: Option<String>,
}

/// Haversine distance between two points on a sphere of `EARTH_RADIUS_METERS`.
pub fn haversine_distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// Geofence check. `accuracy` is the reported GPS accuracy radius in
/// meters.
pub fn check_geofence(
    lat: f64,
    lon: f64,
    accuracy: f64,
    center_lat: f64,
    center_lon: f64,
    radius: f64,
    tolerance: f64,
) -> GeofenceResult {
    let distance = haversine_distance_meters(lat, lon, center_lat, center_lon);
    let effective_radius = radius + tolerance;
    let max_possible_distance = distance + accuracy;
    let min_possible_distance = (distance - accuracy).max(0.0);

    let is_within_geofence = min_possible_distance <= effective_radius;
    let requires_manual_review = is_within_geofence && max_possible_distance > effective_radius;

    let reason = if distance > effective_radius + 50.0 {
        Some("significantly outside geofence".to_string())
    } else if !is_within_geofence {
        Some("slightly outside - manual review".to_string())
    } else if requires_manual_review {
        Some("accuracy makes verification uncertain".to_string())
    } else {
        None
    };

    GeofenceResult {
        distance_meters: distance,
        effective_radius,
        is_within_geofence,
        requires_manual_review,
        reason,
    }
}

/// Location-level structural validation. Returns deterministic error
/// strings, one per violation, in a fixed order.
pub fn validate_location(
    lat: f64,
    lon: f64,
    accuracy: f64,
    timestamp_ms: i64,
    now_ms: i64,
    method_present: bool,
    mock_location_detected: bool,
    skew_tolerance_s: i64,
) -> Vec<String> {
    let mut errors = Vec::new();
    if lat.abs() > 90.0 {
        errors.push("latitude out of range".to_string());
    }
    if lon.abs() > 180.0 {
        errors.push("longitude out of range".to_string());
    }
    if !(0.0..=1000.0).contains(&accuracy) {
        errors.push("accuracy out of range".to_string());
    }
    let skew_s = ((now_ms - timestamp_ms).abs()) / 1000;
    if skew_s > skew_tolerance_s {
        errors.push("location timestamp clock skew exceeds tolerance".to_string());
    }
    if !method_present {
        errors.push("verification method is required".to_string());
    }
    if mock_location_detected {
        errors.push("mock location detected".to_string());
    }
    errors
}

/// Device-level structural validation.
pub fn validate_device(
    device_id: &str,
    device_model: &str,
    device_os: &str,
    app_version: &str,
    is_rooted: bool,
    is_jailbroken: bool,
) -> Vec<String> {
    let mut errors = Vec::new();
    if device_id.trim().is_empty() {
        errors.push("device id is required".to_string());
    }
    if device_model.trim().is_empty() {
        errors.push("device model is required".to_string());
    }
    if device_os.trim().is_empty() {
        errors.push("device OS is required".to_string());
    }
    if app_version.trim().is_empty() {
        errors.push("app version is required".to_string());
    }
    if is_rooted {
        errors.push("device is rooted".to_string());
    }
    if is_jailbroken {
        errors.push("device is jailbroken".to_string());
    }
    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateValidationIssue {
    pub flag: String,
    pub severity: IssueSeverity,
    pub overridable: bool,
    pub requires_supervisor: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateValidationResult {
    pub issues: Vec<StateValidationIssue>,
    pub verification_level: crate::model::evv::VerificationLevel,
    pub compliance_flags: Vec<String>,
}

/// Inputs needed for state-specific validation. A thin struct rather
/// than a long parameter list, kept separate from `EvvRecord` since
/// clock-in and clock-out each validate a different subset.
pub struct StateValidationInput<'a> {
    pub rules: &'a StateRules,
    pub scheduled_start_ms: i64,
    pub clock_in_time_ms: i64,
    pub verification: &'a Verification,
    pub address: &'a ServiceAddress,
    pub has_signature: bool,
    pub has_photo: bool,
}

/// State-specific validation dispatch. Geofence distance is computed
/// against `address`'s center and `rules`' radius/tolerance; the caller
/// is expected to have already run `validate_location`/`validate_device`
/// for structural issues.
pub fn validate_state_rules(input: &StateValidationInput) -> StateValidationResult {
    let mut issues = Vec::new();

    let grace_early_ms = input.rules.clock_in_grace_period_minutes * 60_000;
    let grace_late_ms = input.rules.clock_out_grace_period_minutes * 60_000;
    let earliest = input.scheduled_start_ms - grace_early_ms;
    let latest = input.scheduled_start_ms + grace_late_ms;
    if input.clock_in_time_ms < earliest || input.clock_in_time_ms > latest {
        issues.push(StateValidationIssue {
            flag: "TIME_GAP".into(),
            severity: IssueSeverity::Medium,
            overridable: true,
            requires_supervisor: true,
            message: "clock-in time falls outside the scheduled grace period".into(),
        });
    }

    let geofence = check_geofence(
        input.verification.latitude,
        input.verification.longitude,
        input.verification.accuracy,
        input.address.latitude,
        input.address.longitude,
        input.rules.geofence_radius_meters,
        input.rules.geofence_tolerance_meters,
    );
    if !geofence.is_within_geofence {
        issues.push(StateValidationIssue {
            flag: "GEOFENCE_VIOLATION".into(),
            severity: IssueSeverity::High,
            overridable: false,
            requires_supervisor: true,
            message: geofence
                .reason
                .unwrap_or_else(|| "outside geofence".to_string()),
        });
    }

    if !input.rules.allowed_methods.contains(&input.verification.method) {
        issues.push(StateValidationIssue {
            flag: "MANUAL_OVERRIDE".into(),
            severity: IssueSeverity::High,
            overridable: false,
            requires_supervisor: true,
            message: "verification method is not allowed for this state".into(),
        });
    }

    if input.rules.requires_signature && !input.has_signature {
        issues.push(StateValidationIssue {
            flag: "MISSING_SIGNATURE".into(),
            severity: IssueSeverity::High,
            overridable: false,
            requires_supervisor: true,
            message: "state MCO requirements require a signature".into(),
        });
    }
    if input.rules.requires_photo && !input.has_photo {
        issues.push(StateValidationIssue {
            flag: "MISSING_PHOTO_VERIFICATION".into(),
            severity: IssueSeverity::High,
            overridable: false,
            requires_supervisor: true,
            message: "state MCO requirements require a photo".into(),
        });
    }

    if input.verification.mock_location_detected {
        issues.push(StateValidationIssue {
            flag: "LOCATION_SUSPICIOUS".into(),
            severity: IssueSeverity::Critical,
            overridable: false,
            requires_supervisor: true,
            message: "mock location detected".into(),
        });
    }

    let any_critical = issues.iter().any(|i| i.severity == IssueSeverity::Critical);
    let any_high = issues.iter().any(|i| i.severity == IssueSeverity::High);
    let verification_level = if any_critical {
        crate::model::evv::VerificationLevel::Exception
    } else if any_high {
        crate::model::evv::VerificationLevel::Partial
    } else {
        crate::model::evv::VerificationLevel::Full
    };

    let compliance_flags = if issues.is_empty() {
        vec!["COMPLIANT".to_string()]
    } else {
        let mut flags: Vec<String> = issues.iter().map(|i| i.flag.clone()).collect();
        flags.sort();
        flags.dedup();
        flags
    };

    StateValidationResult {
        issues,
        verification_level,
        compliance_flags,
    }
}

/// The subset of `EvvRecord` fields that feed the integrity hash.
fn core_data_json(r: &EvvRecord) -> serde_json::Value {
    json!({
        "visitId": r.visit_id,
        "clientId": r.client_id,
        "caregiverId": r.caregiver_id,
        "serviceDate": r.service_date,
        "clockInTime": crate::canonical::iso8601_utc(r.clock_in_time),
        "clockOutTime": r.clock_out_time.map(crate::canonical::iso8601_utc),
        "serviceAddress": r.service_address,
        "clockInVerification": r.clock_in_verification,
        "clockOutVerification": r.clock_out_verification,
    })
}

pub fn compute_integrity_hash(r: &EvvRecord) -> String {
    sha256_hex(canonicalize(&core_data_json(r)).as_bytes())
}

/// Integrity checksum over the entire record minus the two integrity
/// fields themselves.
pub fn compute_integrity_checksum(r: &EvvRecord) -> String {
    let mut full = serde_json::to_value(r).expect("EvvRecord always serializes");
    if let Some(obj) = full.as_object_mut() {
        obj.remove("integrityHash");
        obj.remove("integrityChecksum");
        obj.remove("integrity_hash");
        obj.remove("integrity_checksum");
    }
    sha256_hex(canonicalize(&full).as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub hash_match: bool,
    pub checksum_match: bool,
    pub tamper_detected: bool,
}

/// Verify a record's stored digests against freshly recomputed ones.
pub fn verify_integrity(r: &EvvRecord) -> IntegrityReport {
    let hash_match = compute_integrity_hash(r) == r.integrity_hash;
    let checksum_match = compute_integrity_checksum(r) == r.integrity_checksum;
    IntegrityReport {
        hash_match,
        checksum_match,
        tamper_detected: !(hash_match && checksum_match),
    }
}

/// Manual verification requires a supervisor-approved override record.
pub fn validate_manual_override(v: &Verification) -> Result<(), String> {
    if v.method == VerificationMethod::Manual && v.supervisor_override_id.is_none() {
        Err("manual verification requires a supervisor-approved override record".to_string())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_accuracy_exact_center_is_within_geofence() {
        let g = check_geofence(30.0, -97.0, 0.0, 30.0, -97.0, 100.0, 50.0);
        assert!(g.is_within_geofence);
        assert_eq!(g.distance_meters, 0.0);
        assert!(!g.requires_manual_review);
    }

    #[test]
    fn accuracy_equals_effective_radius_at_boundary() {
        // Construct a point whose distance equals accuracy equals
        // effective_radius so min_possible == 0 and max_possible == 2x.
        let effective_radius = 150.0;
        // 1 degree of latitude is about 111_320 meters; pick a small delta.
        let delta_deg = effective_radius / 111_320.0;
        let g = check_geofence(
            30.0 + delta_deg,
            -97.0,
            effective_radius,
            30.0,
            -97.0,
            100.0,
            50.0,
        );
        assert!(g.is_within_geofence);
        assert!(g.requires_manual_review);
    }

    #[test]
    fn clock_skew_boundary() {
        let errs_300 = validate_location(30.0, -97.0, 10.0, 1_000_000, 1_300_000, true, false, 300);
        assert!(errs_300.is_empty());
        let errs_301 = validate_location(30.0, -97.0, 10.0, 1_000_000, 1_301_000, true, false, 300);
        assert!(errs_301.iter().any(|e| e.contains("clock skew")));
    }

    #[test]
    fn geofence_failure_on_low_accuracy() {
        let g = check_geofence(30.2672, -97.7431, 150.0, 30.2700, -97.7400, 100.0, 50.0);
        assert!(!g.is_within_geofence);
    }
}
