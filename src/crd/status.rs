//! # ArgoCD Status
//!
//! Status projection written back to the `ArgoCD` resource.

use serde::{Deserialize, Serialize};

/// Observed state of an Argo CD installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDStatus {
    /// Available once every core workload is running, otherwise Pending
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub application_controller: Option<ComponentPhase>,
    #[serde(default)]
    pub server: Option<ComponentPhase>,
    #[serde(default)]
    pub repo: Option<ComponentPhase>,
    #[serde(default)]
    pub redis: Option<ComponentPhase>,
    #[serde(default)]
    pub application_set_controller: Option<ComponentPhase>,
    #[serde(default)]
    pub notifications_controller: Option<ComponentPhase>,
    /// Running, Pending, Failed or Unknown
    #[serde(default)]
    pub sso: Option<ComponentPhase>,
    /// External host of the server ingress or route
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ArgoCDStatus {
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == type_)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ComponentPhase {
    Running,
    Pending,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
