//! Managed-label helpers
//!
//! Resources placed in member clusters by the federation control plane carry
//! a marker label. Removing it un-adopts the resource: the next sync pass
//! will leave it alone.

use kube::api::DynamicObject;

/// Label marking a remote object as owned by the federation control plane
pub const MANAGED_LABEL: &str = "weft.dev/managed";

/// Value the managed label must carry to count as managed
pub const MANAGED_LABEL_VALUE: &str = "true";

/// Whether the object carries the managed label with the managed value
pub fn has_managed_label(obj: &DynamicObject) -> bool {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_LABEL))
        .map(|v| v == MANAGED_LABEL_VALUE)
        .unwrap_or(false)
}

/// Stamp the managed label onto the object
pub fn set_managed_label(obj: &mut DynamicObject) {
    obj.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(MANAGED_LABEL.to_string(), MANAGED_LABEL_VALUE.to_string());
}

/// Strip the managed label from the object
///
/// Callers mutating a cached object must clone it first; the per-cluster
/// caches hand out clones but the clone passed around a dispatch pass is
/// shared with the submitter.
pub fn remove_managed_label(obj: &mut DynamicObject) {
    if let Some(labels) = obj.metadata.labels.as_mut() {
        labels.remove(MANAGED_LABEL);
        if labels.is_empty() {
            obj.metadata.labels = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn unlabeled() -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("obj".to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn set_then_has_then_remove() {
        let mut obj = unlabeled();
        assert!(!has_managed_label(&obj));

        set_managed_label(&mut obj);
        assert!(has_managed_label(&obj));

        remove_managed_label(&mut obj);
        assert!(!has_managed_label(&obj));
        assert!(obj.metadata.labels.is_none());
    }

    #[test]
    fn other_labels_survive_removal() {
        let mut obj = unlabeled();
        set_managed_label(&mut obj);
        obj.metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("app".to_string(), "nginx".to_string());

        remove_managed_label(&mut obj);
        let labels = obj.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("nginx"));
        assert!(!labels.contains_key(MANAGED_LABEL));
    }

    #[test]
    fn wrong_value_does_not_count_as_managed() {
        let mut obj = unlabeled();
        obj.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(MANAGED_LABEL.to_string(), "false".to_string());
        assert!(!has_managed_label(&obj));
    }
}
