//! MemberCluster Custom Resource Definition
//!
//! A MemberCluster is the registry entry for one cluster participating in the
//! federation. The federated informer watches these resources and runs a
//! target cache loop for every member whose `Ready` condition is true.
//!
//! Weft never writes MemberCluster resources; some controller upstream keeps
//! the registry and readiness conditions up to date.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type signalling a member cluster is reachable and healthy
pub const CLUSTER_READY_CONDITION: &str = "Ready";

/// Specification for a MemberCluster
///
/// Carries the connection information needed to build a client for the
/// member. Credential resolution (reading the referenced secret, building the
/// actual client config) is the responsibility of the injected client
/// factory, not of this crate.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weft.dev",
    version = "v1alpha1",
    kind = "MemberCluster",
    plural = "memberclusters",
    shortname = "mc",
    status = "MemberClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.apiEndpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemberClusterSpec {
    /// URL of the member cluster's API server
    pub api_endpoint: String,

    /// Name of the secret holding credentials for the member cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Skip TLS verification when talking to the member (test clusters only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
}

/// Status for a MemberCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberClusterStatus {
    /// Conditions representing the cluster's health
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,

    /// Region the cluster runs in, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Availability zones the cluster spans, if reported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
}

/// A single condition on a member cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ClusterCondition {
    /// Type of condition (e.g. Ready, Offline)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl ClusterCondition {
    /// Create a new condition with the current timestamp
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: None,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Create a `Ready` condition with the given status
    pub fn ready(status: ConditionStatus) -> Self {
        Self::new(CLUSTER_READY_CONDITION, status)
    }
}

/// Status of a condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition state is unknown
    Unknown,
}

/// Whether the cluster's `Ready` condition is currently true
///
/// Only ready clusters get an active per-cluster cache loop. A cluster with
/// no status or no `Ready` condition is treated as not ready.
pub fn is_cluster_ready(cluster: &MemberCluster) -> bool {
    cluster
        .status
        .as_ref()
        .map(|status| {
            status.conditions.iter().any(|c| {
                c.type_ == CLUSTER_READY_CONDITION && c.status == ConditionStatus::True
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str, conditions: Vec<ClusterCondition>) -> MemberCluster {
        let mut cluster = MemberCluster::new(
            name,
            MemberClusterSpec {
                api_endpoint: format!("https://{name}.example.com:6443"),
                secret_ref: Some(format!("{name}-credentials")),
                insecure_skip_tls_verify: None,
            },
        );
        cluster.status = Some(MemberClusterStatus {
            conditions,
            ..Default::default()
        });
        cluster
    }

    #[test]
    fn ready_condition_true_means_ready() {
        let c = cluster("eu-1", vec![ClusterCondition::ready(ConditionStatus::True)]);
        assert!(is_cluster_ready(&c));
    }

    #[test]
    fn ready_condition_false_or_unknown_means_not_ready() {
        let c = cluster("eu-1", vec![ClusterCondition::ready(ConditionStatus::False)]);
        assert!(!is_cluster_ready(&c));

        let c = cluster(
            "eu-1",
            vec![ClusterCondition::ready(ConditionStatus::Unknown)],
        );
        assert!(!is_cluster_ready(&c));
    }

    #[test]
    fn missing_status_or_conditions_means_not_ready() {
        let mut c = cluster("eu-1", vec![]);
        assert!(!is_cluster_ready(&c));

        c.status = None;
        assert!(!is_cluster_ready(&c));
    }

    #[test]
    fn unrelated_conditions_are_ignored() {
        let c = cluster(
            "eu-1",
            vec![ClusterCondition::new("Offline", ConditionStatus::True)],
        );
        assert!(!is_cluster_ready(&c));
    }

    #[test]
    fn spec_round_trips_through_camel_case() {
        let spec = MemberClusterSpec {
            api_endpoint: "https://example:6443".to_string(),
            secret_ref: Some("creds".to_string()),
            insecure_skip_tls_verify: Some(true),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("apiEndpoint").is_some());
        assert!(json.get("secretRef").is_some());
        let back: MemberClusterSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
