//! Conflict Resolver. Merges a local record with a server record for
//! the same `(kind, id)` using a generic timestamp-ordering check,
//! falling back to per-kind dispatch when both sides were updated at
//! the same instant.

use serde_json::Value;

use crate::model::conflict::{
    ConflictResolution, ConflictStrategy, FieldConflict, ManualDecision, ManualSelection,
    ResolutionMetadata, Severity,
};
use crate::model::record::{EntityKind, Record};

const VISIT_CRITICAL_FIELDS: &[&str] = &[
    "client_signature",
    "caregiver_signature",
    "clock_in_time",
    "clock_out_time",
    "service_date",
    "service_location",
];

const VISIT_CLIENT_PRIORITY_FIELDS: &[&str] = &[
    "care_notes",
    "tasks_completed",
    "client_mood",
    "client_condition_notes",
    "activities_performed",
    "incident_description",
    "visit_notes",
];

const VISIT_SERVER_PRIORITY_FIELDS: &[&str] = &[
    "scheduled_date",
    "scheduled_start",
    "scheduled_end",
    "client_id",
    "caregiver_id",
    "service_type_code",
    "authorization_id",
];

const EVV_CRITICAL_FIELDS: &[&str] = &[
    "clock_in_time",
    "clock_out_time",
    "service_date",
    "clock_in_verification",
    "clock_out_verification",
];

fn differing_fields(local: &Value, remote: &Value) -> Vec<String> {
    let excluded = ["id", "createdAt", "updatedAt"];
    let (Some(a), Some(b)) = (local.as_object(), remote.as_object()) else {
        return Vec::new();
    };
    let mut keys: std::collections::BTreeSet<&String> = a.keys().collect();
    keys.extend(b.keys());
    keys.into_iter()
        .filter(|k| !excluded.contains(&k.as_str()))
        .filter(|k| a.get(*k) != b.get(*k))
        .cloned()
        .collect()
}

/// Differing field names plus an overall severity rating, independent
/// of whatever strategy ends up chosen.
pub fn detect_potential_conflicts(local: &Value, remote: &Value, critical: &[&str]) -> (Vec<String>, Severity) {
    let fields = differing_fields(local, remote);
    let severity = if fields.iter().any(|f| critical.contains(&f.as_str())) {
        Severity::High
    } else if fields.len() >= 4 {
        Severity::Medium
    } else {
        Severity::Low
    };
    (fields, severity)
}

fn field_conflicts(local: &Value, remote: &Value, fields: &[String], severity: Severity) -> Vec<FieldConflict> {
    fields
        .iter()
        .map(|f| FieldConflict {
            field: f.clone(),
            client_value: local.get(f).cloned().unwrap_or(Value::Null),
            server_value: remote.get(f).cloned().unwrap_or(Value::Null),
            severity,
        })
        .collect()
}

fn manual_resolution(local: &Value, remote: &Value, reason: &str) -> ConflictResolution {
    let (fields, severity) = detect_potential_conflicts(local, remote, EVV_CRITICAL_FIELDS);
    ConflictResolution {
        strategy: ConflictStrategy::Manual,
        resolved_record: remote.clone(),
        field_conflicts: Some(field_conflicts(local, remote, &fields, severity)),
        requires_manual_review: true,
        resolution_metadata: Some(ResolutionMetadata {
            resolved_by: None,
            resolved_at: None,
            reason: Some(reason.to_string()),
        }),
    }
}

fn resolve_visit(local: &Value, remote: &Value) -> ConflictResolution {
    let (critical_diffs, _) = detect_potential_conflicts(local, remote, VISIT_CRITICAL_FIELDS);
    let any_critical = critical_diffs.iter().any(|f| VISIT_CRITICAL_FIELDS.contains(&f.as_str()));
    if any_critical {
        return manual_resolution(local, remote, "visit has conflicting critical fields");
    }

    let mut merged = remote.clone();
    if let (Some(merged_obj), Some(local_obj)) = (merged.as_object_mut(), local.as_object()) {
        for field in VISIT_CLIENT_PRIORITY_FIELDS {
            if let Some(v) = local_obj.get(*field) {
                if !v.is_null() {
                    merged_obj.insert(field.to_string(), v.clone());
                }
            }
        }
        for field in VISIT_SERVER_PRIORITY_FIELDS {
            if let Some(v) = local_obj.get(*field) {
                if merged_obj.get(*field).is_none() {
                    merged_obj.insert(field.to_string(), v.clone());
                }
            }
        }
        let client_has_clock = local_obj.get("clock_in_time").map_or(false, |v| !v.is_null());
        let server_missing_clock = merged_obj
            .get("clock_in_time")
            .map_or(true, |v| v.is_null());
        if client_has_clock && server_missing_clock {
            if let Some(v) = local_obj.get("clock_in_time") {
                merged_obj.insert("clock_in_time".to_string(), v.clone());
            }
            if let Some(v) = local_obj.get("clock_out_time") {
                merged_obj.insert("clock_out_time".to_string(), v.clone());
            }
        }
    }

    ConflictResolution {
        strategy: ConflictStrategy::Merge,
        resolved_record: merged,
        field_conflicts: None,
        requires_manual_review: false,
        resolution_metadata: None,
    }
}

fn resolve_task(local: &Value, remote: &Value) -> ConflictResolution {
    let local_completed = local["status"] == "completed";
    let remote_completed = remote["status"] == "completed";
    if local_completed && !remote_completed {
        return ConflictResolution {
            strategy: ConflictStrategy::ClientWins,
            resolved_record: local.clone(),
            field_conflicts: None,
            requires_manual_review: false,
            resolution_metadata: None,
        };
    }
    if remote_completed && !local_completed {
        return manual_resolution(local, remote, "server-side task completion requires human reconciliation");
    }
    ConflictResolution {
        strategy: ConflictStrategy::ServerWins,
        resolved_record: remote.clone(),
        field_conflicts: None,
        requires_manual_review: false,
        resolution_metadata: None,
    }
}

fn resolve_evv_record(local: &Value, remote: &Value) -> ConflictResolution {
    let (fields, _) = detect_potential_conflicts(local, remote, EVV_CRITICAL_FIELDS);
    let any_critical = fields.iter().any(|f| EVV_CRITICAL_FIELDS.contains(&f.as_str()));
    if any_critical {
        return manual_resolution(local, remote, "regulatory compliance");
    }
    ConflictResolution {
        strategy: ConflictStrategy::ServerWins,
        resolved_record: remote.clone(),
        field_conflicts: None,
        requires_manual_review: false,
        resolution_metadata: None,
    }
}

fn resolve_note(local: &Value, remote: &Value) -> ConflictResolution {
    let local_len = local["note_text"].as_str().unwrap_or_default().chars().count();
    let remote_len = remote["note_text"].as_str().unwrap_or_default().chars().count();
    if local_len >= remote_len {
        ConflictResolution {
            strategy: ConflictStrategy::ClientWins,
            resolved_record: local.clone(),
            field_conflicts: None,
            requires_manual_review: false,
            resolution_metadata: None,
        }
    } else {
        ConflictResolution {
            strategy: ConflictStrategy::ServerWins,
            resolved_record: remote.clone(),
            field_conflicts: None,
            requires_manual_review: false,
            resolution_metadata: None,
        }
    }
}

fn resolve_unknown(remote: &Value) -> ConflictResolution {
    ConflictResolution {
        strategy: ConflictStrategy::ServerWins,
        resolved_record: remote.clone(),
        field_conflicts: None,
        requires_manual_review: true,
        resolution_metadata: None,
    }
}

pub struct ConflictResolver;

impl ConflictResolver {
    pub fn resolve(local: &Record, remote: &Record) -> ConflictResolution {
        if local.updated_at > remote.updated_at {
            return ConflictResolution {
                strategy: ConflictStrategy::ClientWins,
                resolved_record: local.payload.clone(),
                field_conflicts: None,
                requires_manual_review: false,
                resolution_metadata: None,
            };
        }
        if remote.updated_at > local.updated_at {
            return ConflictResolution {
                strategy: ConflictStrategy::ServerWins,
                resolved_record: remote.payload.clone(),
                field_conflicts: None,
                requires_manual_review: false,
                resolution_metadata: None,
            };
        }

        match local.entity_kind {
            EntityKind::Visit => resolve_visit(&local.payload, &remote.payload),
            EntityKind::TimeEntry => resolve_task(&local.payload, &remote.payload),
            EntityKind::EvvRecord => resolve_evv_record(&local.payload, &remote.payload),
            EntityKind::Note => resolve_note(&local.payload, &remote.payload),
            _ => resolve_unknown(&remote.payload),
        }
    }

    /// Applies a human reviewer's decision to a record already sitting
    /// in the exception queue as `requires_manual_review`.
    pub fn apply_manual_resolution(
        local: &Record,
        remote: &Record,
        decision: &ManualDecision,
    ) -> Value {
        match &decision.selected_strategy {
            ManualSelection::Client => local.payload.clone(),
            ManualSelection::Server => remote.payload.clone(),
            ManualSelection::FieldByField(choices) => {
                let mut merged = remote.payload.clone();
                if let Some(obj) = merged.as_object_mut() {
                    for (field, choice) in choices {
                        let value = match choice {
                            crate::model::conflict::FieldChoice::Client => {
                                local.payload.get(field).cloned().unwrap_or(Value::Null)
                            }
                            crate::model::conflict::FieldChoice::Server => {
                                remote.payload.get(field).cloned().unwrap_or(Value::Null)
                            }
                            crate::model::conflict::FieldChoice::Value(v) => v.clone(),
                        };
                        obj.insert(field.clone(), value);
                    }
                }
                merged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: EntityKind, updated_at: i64, payload: Value) -> Record {
        Record::new("r1", kind, "org1", updated_at, payload)
    }

    #[test]
    fn newer_local_wins_regardless_of_kind() {
        let local = record(EntityKind::Note, 200, json!({"note_text": "a"}));
        let remote = record(EntityKind::Note, 100, json!({"note_text": "bbbb"}));
        let res = ConflictResolver::resolve(&local, &remote);
        assert_eq!(res.strategy, ConflictStrategy::ClientWins);
    }

    #[test]
    fn visit_conflict_on_clock_in_time_requires_manual_review() {
        let local = record(
            EntityKind::Visit,
            100,
            json!({"id": "V1", "updatedAt": 100, "care_notes": "client notes", "clock_in_time": "09:00"}),
        );
        let remote = record(
            EntityKind::Visit,
            100,
            json!({"id": "V1", "updatedAt": 100, "care_notes": null, "clock_in_time": "09:05"}),
        );
        let res = ConflictResolver::resolve(&local, &remote);
        assert_eq!(res.strategy, ConflictStrategy::Manual);
        assert!(res.requires_manual_review);
        let conflicts = res.field_conflicts.unwrap();
        assert!(conflicts.iter().any(|c| c.field == "clock_in_time"));
    }

    #[test]
    fn visit_conflict_on_notes_merges_client_priority() {
        let local = record(
            EntityKind::Visit,
            100,
            json!({"id": "V1", "updatedAt": 100, "care_notes": "client notes", "clock_in_time": "09:00"}),
        );
        let remote = record(
            EntityKind::Visit,
            100,
            json!({"id": "V1", "updatedAt": 100, "care_notes": null, "clock_in_time": "09:00"}),
        );
        let res = ConflictResolver::resolve(&local, &remote);
        assert_eq!(res.strategy, ConflictStrategy::Merge);
        assert_eq!(res.resolved_record["care_notes"], "client notes");
    }

    #[test]
    fn task_server_completed_requires_manual() {
        let local = record(EntityKind::TimeEntry, 100, json!({"status": "in-progress"}));
        let remote = record(EntityKind::TimeEntry, 100, json!({"status": "completed"}));
        let res = ConflictResolver::resolve(&local, &remote);
        assert_eq!(res.strategy, ConflictStrategy::Manual);
    }

    #[test]
    fn note_conflict_ties_go_to_client() {
        let local = record(EntityKind::Note, 100, json!({"note_text": "abcd"}));
        let remote = record(EntityKind::Note, 100, json!({"note_text": "abcd"}));
        let res = ConflictResolver::resolve(&local, &remote);
        assert_eq!(res.strategy, ConflictStrategy::ClientWins);
    }

    #[test]
    fn detect_potential_conflicts_on_identical_records_is_empty() {
        let payload = json!({"a": 1, "b": 2});
        let (fields, severity) = detect_potential_conflicts(&payload, &payload, EVV_CRITICAL_FIELDS);
        assert!(fields.is_empty());
        assert_eq!(severity, Severity::Low);
    }
}
