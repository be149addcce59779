/* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/metrics.rs
*
* This module defines and registers the custom Prometheus metrics exposed by
* the drift operator. They describe the outcome of each election tick: how
* large the fleet partition was and how many configurations were admitted
* into drift detection.
*
* Using `lazy_static`, the metrics are created once and shared safely across
* the reconcile loop and the metrics web server.
*
* SPDX-License-Identifier: Apache-2.0 */

use lazy_static::lazy_static;
use prometheus::{
    opts, register_int_counter, register_int_gauge, IntCounter, IntGauge, Registry,
};

lazy_static! {
    /// Total number of drift election ticks executed.
    pub static ref DRIFT_TICKS_TOTAL: IntCounter = register_int_counter!(opts!(
        "drift_detection_ticks_total",
        "Total number of drift election ticks executed."
    ))
    .unwrap();

    /// Total number of configurations admitted into drift detection.
    pub static ref DRIFT_TRIGGERED_TOTAL: IntCounter = register_int_counter!(opts!(
        "drift_detection_triggered_total",
        "Total number of configurations admitted into drift detection."
    ))
    .unwrap();

    /// Configurations eligible for drift detection at the last tick.
    pub static ref DRIFT_ELIGIBLE: IntGauge = register_int_gauge!(opts!(
        "drift_detection_eligible",
        "Configurations eligible for drift detection at the last tick."
    ))
    .unwrap();

    /// Configurations with a drift check in flight at the last tick.
    pub static ref DRIFT_RUNNING: IntGauge = register_int_gauge!(opts!(
        "drift_detection_running",
        "Configurations with a drift check in flight at the last tick."
    ))
    .unwrap();
}

/// Creates a new Prometheus registry and registers all custom metrics.
///
/// This function is intended to be called once at operator startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(DRIFT_TICKS_TOTAL.clone()))?;
    r.register(Box::new(DRIFT_TRIGGERED_TOTAL.clone()))?;
    r.register(Box::new(DRIFT_ELIGIBLE.clone()))?;
    r.register(Box::new(DRIFT_RUNNING.clone()))?;
    Ok(r)
}
