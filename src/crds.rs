/* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the Rust data structures corresponding to the
* Configuration Custom Resource Definition. Using the `kube::CustomResource`
* derive macro gives us a strongly-typed representation of the API, enabling
* safe and idiomatic interaction with the Kubernetes API server.
*
* Architecture:
* - `ConfigurationSpec` is the user's desired state: the terraform module to
*   run, optional inputs, and the drift detection opt-in flag consumed by the
*   drift controller.
* - `ConfigurationStatus` is the observed state maintained by the main
*   reconciler. Only the typed conditions matter to the drift controller:
*   `TerraformPlan` and `TerraformApply` describe the last run of each phase,
*   `Ready` aggregates overall readiness.
* - `serde` attributes map between idiomatic Rust `snake_case` and idiomatic
*   Kubernetes `camelCase`; `schemars` generates the OpenAPI v3 schema that is
*   embedded into the CRD manifest for server-side validation.
* - The reserved `terraform.appvia.io/drift` annotation is the hand-off point
*   between the drift controller and the main reconciler: its presence on a
*   Configuration requests a fresh plan on the next reconcile.
*
* SPDX-License-Identifier: Apache-2.0 */

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation whose presence instructs the main reconciler to run a fresh
/// terraform plan. The value is an RFC 3339 timestamp for human inspection;
/// consumers only ever check for presence.
pub const DRIFT_ANNOTATION: &str = "terraform.appvia.io/drift";

// --- Configuration Custom Resource Definition ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "terraform.appvia.io",
    version = "v1alpha1",
    kind = "Configuration",
    namespaced,
    status = "ConfigurationStatus",
    printcolumn = r#"{"name":"Module", "type":"string", "jsonPath":".spec.module"}"#,
    printcolumn = r#"{"name":"Drift Detection", "type":"boolean", "jsonPath":".spec.enableDriftDetection"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "cfg"
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    /// Source of the terraform module to run, e.g. a git or registry URL.
    pub module: String,
    /// Optional override of the terraform version used to execute the module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    /// When true, plans are applied without waiting for approval.
    #[serde(default)]
    pub enable_auto_approval: bool,
    /// Opt-in flag for periodic drift detection on this configuration.
    #[serde(default)]
    pub enable_drift_detection: bool,
    /// Free-form inputs passed to the module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

/// The observed state of a Configuration, written by the main reconciler.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Number of cloud resources under management, as reported by the last
    /// successful plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<i32>,
    /// Terraform version last used to run this configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
}

/// The named conditions tracked on a Configuration.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionType {
    TerraformPlan,
    TerraformApply,
    Ready,
}

/// Condition status values, following Kubernetes API conventions.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable explanation of a condition's current status.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionReason {
    Complete,
    Error,
    InProgress,
    NotDetermined,
    Ready,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Generation of the spec this condition pertains to; a value behind
    /// `metadata.generation` marks the condition as stale.
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    /// True when the phase tracked by this condition is currently executing.
    pub fn is_in_progress(&self) -> bool {
        self.reason == ConditionReason::InProgress
    }
}

impl ConfigurationStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

impl Configuration {
    /// True when the resource has been marked for deletion.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True when a drift detection run has already been requested and not
    /// yet consumed by the main reconciler.
    pub fn has_drift_annotation(&self) -> bool {
        self.annotations().contains_key(DRIFT_ANNOTATION)
    }
}
