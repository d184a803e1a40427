use serde::{Deserialize, Serialize};

/// Static, state-parameterized EVV configuration. Keyed by 2-letter
/// state code at the call site; loaded once at startup and optionally
/// patched by `STATE_RULES_OVERRIDES`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRules {
    pub geofence_radius_meters: f64,
    pub geofence_tolerance_meters: f64,
    pub clock_in_grace_period_minutes: i64,
    pub clock_out_grace_period_minutes: i64,
    pub max_accuracy_meters: f64,
    pub allowed_methods: Vec<crate::model::evv::VerificationMethod>,
    pub requires_signature: bool,
    pub requires_photo: bool,
    pub retention_years: u32,
    pub immutable_after_days: u32,
    pub aggregator_kind: String,
}

/// Partial overrides applied on top of the built-in table, keyed by state
/// code. Every field is optional so `STATE_RULES_OVERRIDES` can patch a
/// single knob (e.g. just `geofenceRadiusMeters`) without restating the
/// whole row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateRulesOverride {
    pub geofence_radius_meters: Option<f64>,
    pub geofence_tolerance_meters: Option<f64>,
    pub clock_in_grace_period_minutes: Option<i64>,
    pub clock_out_grace_period_minutes: Option<i64>,
    pub max_accuracy_meters: Option<f64>,
    pub allowed_methods: Option<Vec<crate::model::evv::VerificationMethod>>,
    pub requires_signature: Option<bool>,
    pub requires_photo: Option<bool>,
    pub retention_years: Option<u32>,
    pub immutable_after_days: Option<u32>,
    pub aggregator_kind: Option<String>,
}

pub type StateRulesOverrides = std::collections::HashMap<String, StateRulesOverride>;

impl StateRules {
    pub fn apply_override(&self, o: &StateRulesOverride) -> StateRules {
        StateRules {
            geofence_radius_meters: o.geofence_radius_meters.unwrap_or(self.geofence_radius_meters),
            geofence_tolerance_meters: o
                .geofence_tolerance_meters
                .unwrap_or(self.geofence_tolerance_meters),
            clock_in_grace_period_minutes: o
                .clock_in_grace_period_minutes
                .unwrap_or(self.clock_in_grace_period_minutes),
            clock_out_grace_period_minutes: o
                .clock_out_grace_period_minutes
                .unwrap_or(self.clock_out_grace_period_minutes),
            max_accuracy_meters: o.max_accuracy_meters.unwrap_or(self.max_accuracy_meters),
            allowed_methods: o
                .allowed_methods
                .clone()
                .unwrap_or_else(|| self.allowed_methods.clone()),
            requires_signature: o.requires_signature.unwrap_or(self.requires_signature),
            requires_photo: o.requires_photo.unwrap_or(self.requires_photo),
            retention_years: o.retention_years.unwrap_or(self.retention_years),
            immutable_after_days: o.immutable_after_days.unwrap_or(self.immutable_after_days),
            aggregator_kind: o
                .aggregator_kind
                .clone()
                .unwrap_or_else(|| self.aggregator_kind.clone()),
        }
    }
}
