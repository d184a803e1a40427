//! State Rules. Pure functions returning per-state EVV parameters. No
//! I/O; the table below is compiled in and loaded once at startup.
//! `STATE_RULES_OVERRIDES` patches are applied on top at lookup time via
//! `StateRulesTable::resolve`.

use std::collections::HashMap;

use crate::model::evv::VerificationMethod;
use crate::model::state_rules::{StateRules, StateRulesOverrides};

fn rules(
    geofence_radius_meters: f64,
    geofence_tolerance_meters: f64,
    clock_in_grace_period_minutes: i64,
    clock_out_grace_period_minutes: i64,
    max_accuracy_meters: f64,
    allowed_methods: &[VerificationMethod],
    requires_signature: bool,
    requires_photo: bool,
    retention_years: u32,
    immutable_after_days: u32,
    aggregator_kind: &str,
) -> StateRules {
    StateRules {
        geofence_radius_meters,
        geofence_tolerance_meters,
        clock_in_grace_period_minutes,
        clock_out_grace_period_minutes,
        max_accuracy_meters,
        allowed_methods: allowed_methods.to_vec(),
        requires_signature,
        requires_photo,
        retention_years,
        immutable_after_days,
        aggregator_kind: aggregator_kind.to_string(),
    }
}

/// Built-in table of state-specific geofence radius/tolerance, grace
/// periods, and verification requirements.
fn builtin_table() -> HashMap<&'static str, StateRules> {
    use VerificationMethod::*;
    let mut m = HashMap::new();
    m.insert(
        "TX",
        rules(
            100.0,
            50.0,
            15,
            15,
            150.0,
            &[Gps, Network, Biometric],
            false,
            false,
            6,
            30,
            "hhaexchange",
        ),
    );
    m.insert(
        "OH",
        rules(
            150.0,
            100.0,
            10,
            20,
            150.0,
            &[Gps, Network, Phone],
            true,
            false,
            7,
            45,
            "sandata",
        ),
    );
    m.insert(
        "CA",
        rules(
            125.0,
            75.0,
            20,
            20,
            200.0,
            &[Gps, Network, Biometric, Phone],
            true,
            true,
            7,
            60,
            "hhaexchange",
        ),
    );
    m.insert(
        "FL",
        rules(
            100.0,
            50.0,
            15,
            15,
            150.0,
            &[Gps, Network],
            false,
            true,
            5,
            30,
            "tellus",
        ),
    );
    m
}

/// Default rules applied to any state code absent from the table and not
/// patched by an override — conservative (tight geofence, GPS-only,
/// signature required), so an unrecognized state fails closed rather than
/// open.
fn fallback_rules() -> StateRules {
    rules(
        75.0,
        25.0,
        10,
        10,
        100.0,
        &[VerificationMethod::Gps],
        true,
        true,
        7,
        30,
        "generic",
    )
}

pub struct StateRulesTable {
    builtin: HashMap<&'static str, StateRules>,
    overrides: StateRulesOverrides,
}

impl StateRulesTable {
    pub fn new(overrides: Option<StateRulesOverrides>) -> Self {
        Self {
            builtin: builtin_table(),
            overrides: overrides.unwrap_or_default(),
        }
    }

    /// Resolve the effective rules for a 2-letter state code, applying any
    /// configured override on top of the built-in (or fallback) row.
    pub fn resolve(&self, state_code: &str) -> StateRules {
        let base = self
            .builtin
            .get(state_code)
            .cloned()
            .unwrap_or_else(fallback_rules);
        match self.overrides.get(state_code) {
            Some(o) => base.apply_override(o),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_matches_worked_example() {
        let table = StateRulesTable::new(None);
        let tx = table.resolve("TX");
        assert_eq!(tx.geofence_radius_meters, 100.0);
        assert_eq!(tx.geofence_tolerance_meters, 50.0);
    }

    #[test]
    fn unknown_state_falls_back_closed() {
        let table = StateRulesTable::new(None);
        let zz = table.resolve("ZZ");
        assert_eq!(zz.allowed_methods, vec![VerificationMethod::Gps]);
        assert!(zz.requires_signature);
    }

    #[test]
    fn override_patches_single_field() {
        let mut overrides = StateRulesOverrides::default();
        overrides.insert(
            "TX".into(),
            crate::model::state_rules::StateRulesOverride {
                geofence_radius_meters: Some(200.0),
                ..Default::default()
            },
        );
        let table = StateRulesTable::new(Some(overrides));
        let tx = table.resolve("TX");
        assert_eq!(tx.geofence_radius_meters, 200.0);
        assert_eq!(tx.geofence_tolerance_meters, 50.0);
    }
}
