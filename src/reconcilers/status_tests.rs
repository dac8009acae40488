// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{CommunicationHost, Condition, DynaKube, DynaKubeSpec, DynaKubeStatus};
    use crate::reconcilers::status::{
        condition_changed, conditions_equal, create_condition, find_condition,
        update_condition_in_memory, DynaKubeStatusUpdater,
    };
    use crate::status_reasons::{
        CONDITION_TYPE_NAMESPACE_CONFLICT, CONDITION_TYPE_READY, REASON_CONFIGURATION_INVALID,
        REASON_PROGRESSING, REASON_SECRETS_PROPAGATED,
    };

    const OLD_TIME: &str = "2024-01-01T00:00:00+00:00";

    fn dynakube(status: Option<DynaKubeStatus>) -> DynaKube {
        let mut dk = DynaKube::new("dk", DynaKubeSpec::default());
        dk.metadata.namespace = Some("dynatrace".to_string());
        dk.status = status;
        dk
    }

    fn old_condition(condition_type: &str, status: &str, reason: &str, message: &str) -> Condition {
        Condition {
            last_transition_time: Some(OLD_TIME.to_string()),
            ..create_condition(condition_type, status, reason, message)
        }
    }

    #[test]
    fn test_create_condition() {
        let condition = create_condition("Ready", "True", "SecretsPropagated", "ok");
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason.as_deref(), Some("SecretsPropagated"));
        assert_eq!(condition.message.as_deref(), Some("ok"));
        assert!(condition.last_transition_time.unwrap().contains('T'));
    }

    #[test]
    fn test_condition_changed() {
        let existing = Some(create_condition("Ready", "True", "A", "msg"));
        assert!(!condition_changed(&existing, &create_condition("Ready", "True", "B", "msg")));
        assert!(condition_changed(&existing, &create_condition("Ready", "False", "A", "msg")));
        assert!(condition_changed(&existing, &create_condition("Ready", "True", "A", "other")));
        assert!(condition_changed(&None, &create_condition("Ready", "True", "A", "msg")));
    }

    #[test]
    fn test_update_condition_keeps_time_when_status_unchanged() {
        let mut conditions = vec![old_condition("Ready", "True", "A", "old")];
        update_condition_in_memory(&mut conditions, "Ready", "True", "B", "new");
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(OLD_TIME));
        assert_eq!(conditions[0].message.as_deref(), Some("new"));
        assert_eq!(conditions[0].reason.as_deref(), Some("B"));
    }

    #[test]
    fn test_update_condition_moves_time_on_flip() {
        let mut conditions = vec![old_condition("Ready", "True", "A", "old")];
        update_condition_in_memory(&mut conditions, "Ready", "False", "A", "old");
        assert_ne!(conditions[0].last_transition_time.as_deref(), Some(OLD_TIME));
    }

    #[test]
    fn test_update_condition_appends_new_type() {
        let mut conditions = vec![old_condition("Ready", "True", "A", "")];
        update_condition_in_memory(&mut conditions, CONDITION_TYPE_NAMESPACE_CONFLICT, "False", "NoConflict", "");
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, CONDITION_TYPE_NAMESPACE_CONFLICT).is_some());
    }

    #[test]
    fn test_conditions_equal_ignores_time() {
        let a = vec![old_condition("Ready", "True", "A", "m")];
        let b = vec![create_condition("Ready", "True", "A", "m")];
        assert!(conditions_equal(&a, &b));
        assert!(!conditions_equal(&a, &[create_condition("Ready", "True", "B", "m")]));
        assert!(!conditions_equal(&a, &[]));
    }

    #[test]
    fn test_updater_first_status_is_a_change() {
        let updater = DynaKubeStatusUpdater::new(&dynakube(None));
        assert!(updater.has_changes());
    }

    #[test]
    fn test_updater_same_values_are_not_a_change() {
        let status = DynaKubeStatus {
            tenant_uuid: Some("abc123".to_string()),
            phase: Some("Running".to_string()),
            conditions: vec![old_condition(CONDITION_TYPE_READY, "True", REASON_SECRETS_PROPAGATED, "2 namespaces")],
            observed_generation: Some(3),
            ..Default::default()
        };
        let mut updater = DynaKubeStatusUpdater::new(&dynakube(Some(status)));
        updater.set_ready(true, REASON_SECRETS_PROPAGATED, "2 namespaces");
        updater.set_tenant("abc123", Vec::new());
        updater.set_observed_generation(Some(3));
        assert!(!updater.has_changes());
        assert!(updater.is_ready());
    }

    #[test]
    fn test_updater_tenant_change() {
        let mut updater = DynaKubeStatusUpdater::new(&dynakube(Some(DynaKubeStatus::default())));
        updater.set_tenant(
            "abc123",
            vec![CommunicationHost {
                protocol: "https".to_string(),
                host: "abc123.live.dynatrace.com".to_string(),
                port: 443,
            }],
        );
        assert!(updater.has_changes());
        assert_eq!(updater.status().tenant_uuid.as_deref(), Some("abc123"));
        assert_eq!(updater.status().communication_hosts.len(), 1);
    }

    #[test]
    fn test_set_ready_derives_phase() {
        let mut updater = DynaKubeStatusUpdater::new(&dynakube(None));
        updater.set_ready(false, REASON_PROGRESSING, "waiting for tenant");
        assert_eq!(updater.status().phase.as_deref(), Some("Deploying"));
        assert!(!updater.is_ready());

        updater.set_ready(false, REASON_CONFIGURATION_INVALID, "two modes");
        assert_eq!(updater.status().phase.as_deref(), Some("Error"));

        updater.set_ready(true, REASON_SECRETS_PROPAGATED, "1 namespace");
        assert_eq!(updater.status().phase.as_deref(), Some("Running"));
        assert_eq!(updater.status().conditions.len(), 1);
    }

    #[test]
    fn test_updater_version_change() {
        let mut updater = DynaKubeStatusUpdater::new(&dynakube(Some(DynaKubeStatus::default())));
        assert!(!updater.has_changes());
        updater.set_oneagent_version("1.281.0");
        assert!(updater.has_changes());
    }
}
