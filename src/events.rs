/* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/events.rs
*
* Kubernetes Event emission for the drift controller. Every elected
* Configuration gets exactly one Normal event so operators can see from
* `kubectl describe` when and why a drift plan was scheduled. The sink sits
* behind the `DriftRecorder` trait; production publishes through the
* kube runtime event recorder, while tests collect the rendered events in
* memory.
*
* SPDX-License-Identifier: Apache-2.0 */

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::crds::Configuration;

/// Reason attached to every drift election event.
pub const DRIFT_EVENT_REASON: &str = "DriftDetection";
/// Message attached to every drift election event.
pub const DRIFT_EVENT_MESSAGE: &str = "Triggered drift detection on configuration";

#[async_trait]
pub trait DriftRecorder: Send + Sync {
    async fn publish(
        &self,
        configuration: &Configuration,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), kube::Error>;
}

/// Production recorder publishing Events through the API server.
pub struct KubeRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: "drift-controller".to_string(),
                instance: None,
            },
        }
    }
}

#[async_trait]
impl DriftRecorder for KubeRecorder {
    async fn publish(
        &self,
        configuration: &Configuration,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), kube::Error> {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            configuration.object_ref(&()),
        );

        recorder
            .publish(Event {
                type_: event_type,
                reason: reason.to_string(),
                note: Some(message.to_string()),
                action: "Trigger".to_string(),
                secondary: None,
            })
            .await
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use kube::ResourceExt;
    use std::sync::Mutex;

    /// Test recorder collecting events rendered as
    /// `(namespace/name) Type Reason: message`.
    #[derive(Default)]
    pub struct FakeRecorder {
        events: Mutex<Vec<String>>,
    }

    impl FakeRecorder {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DriftRecorder for FakeRecorder {
        async fn publish(
            &self,
            configuration: &Configuration,
            event_type: EventType,
            reason: &str,
            message: &str,
        ) -> Result<(), kube::Error> {
            let kind = match event_type {
                EventType::Normal => "Normal",
                EventType::Warning => "Warning",
            };
            self.events.lock().unwrap().push(format!(
                "({}/{}) {} {}: {}",
                configuration.namespace().unwrap_or_default(),
                configuration.name_any(),
                kind,
                reason,
                message
            ));

            Ok(())
        }
    }
}
