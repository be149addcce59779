/* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/store.rs
*
* Access to the Configuration fleet behind a small trait. The drift
* controller needs exactly two operations: a cluster-wide list to take a
* consistent snapshot of the fleet, and an optimistic update to write the
* drift annotation back. Routing both through `ConfigurationStore` keeps the
* election logic independent of the live API server, so the test suite can
* drive it against an in-memory fleet.
*
* Updates carry the `metadata.resourceVersion` observed at list time; a
* concurrent writer therefore surfaces as a 409 Conflict, which the
* controller treats as ignorable for the current tick.
*
* SPDX-License-Identifier: Apache-2.0 */

use async_trait::async_trait;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};

use crate::crds::Configuration;

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Lists every Configuration in the cluster.
    async fn list(&self) -> Result<Vec<Configuration>, kube::Error>;

    /// Replaces a Configuration, using the resource version carried on the
    /// object for optimistic concurrency.
    async fn update(&self, configuration: &Configuration) -> Result<Configuration, kube::Error>;
}

/// True when the error is a stale-resource-version conflict, meaning another
/// writer got there first and the update should simply be dropped.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

/// Production store backed by the Kubernetes API server.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigurationStore for KubeStore {
    async fn list(&self) -> Result<Vec<Configuration>, kube::Error> {
        let api: Api<Configuration> = Api::all(self.client.clone());

        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update(&self, configuration: &Configuration) -> Result<Configuration, kube::Error> {
        let namespace = configuration.namespace().unwrap_or_default();
        let api: Api<Configuration> = Api::namespaced(self.client.clone(), &namespace);

        api.replace(&configuration.name_any(), &PostParams::default(), configuration)
            .await
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use kube::core::ErrorResponse;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory fleet with the same optimistic concurrency behaviour as the
    /// API server: updates must carry the stored resource version.
    #[derive(Default)]
    pub struct MemoryStore {
        items: Mutex<BTreeMap<String, Configuration>>,
    }

    fn key(configuration: &Configuration) -> String {
        format!(
            "{}/{}",
            configuration.namespace().unwrap_or_default(),
            configuration.name_any()
        )
    }

    fn conflict(message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        })
    }

    fn not_found(message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        })
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, mut configuration: Configuration) {
            configuration
                .metadata
                .resource_version
                .get_or_insert_with(|| "1".to_string());
            self.items
                .lock()
                .unwrap()
                .insert(key(&configuration), configuration);
        }

        pub fn get(&self, namespace: &str, name: &str) -> Option<Configuration> {
            self.items
                .lock()
                .unwrap()
                .get(&format!("{namespace}/{name}"))
                .cloned()
        }
    }

    #[async_trait]
    impl ConfigurationStore for MemoryStore {
        async fn list(&self) -> Result<Vec<Configuration>, kube::Error> {
            Ok(self.items.lock().unwrap().values().cloned().collect())
        }

        async fn update(&self, configuration: &Configuration) -> Result<Configuration, kube::Error> {
            let key = key(configuration);
            let mut items = self.items.lock().unwrap();

            let existing = items
                .get(&key)
                .ok_or_else(|| not_found(&format!("configuration {key} not found")))?;
            if existing.resource_version() != configuration.resource_version() {
                return Err(conflict(&format!(
                    "configuration {key} was modified concurrently"
                )));
            }

            let next = existing
                .resource_version()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            let mut updated = configuration.clone();
            updated.metadata.resource_version = Some(next.to_string());
            items.insert(key, updated.clone());

            Ok(updated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::crds::ConfigurationSpec;
    use kube::api::ObjectMeta;

    fn configuration(name: &str) -> Configuration {
        Configuration {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ConfigurationSpec {
                module: "https://github.com/appvia/terraform-aws-bucket".to_string(),
                terraform_version: None,
                enable_auto_approval: false,
                enable_drift_detection: true,
                variables: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_configurations() {
        let store = MemoryStore::new();
        store.insert(configuration("first"));
        store.insert(configuration("second"));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(store.get("default", "first").is_some());
    }

    #[tokio::test]
    async fn memory_store_rejects_stale_updates() {
        let store = MemoryStore::new();
        store.insert(configuration("test"));

        let mut stale = store.get("default", "test").unwrap();
        stale.metadata.resource_version = Some("0".to_string());

        let err = store.update(&stale).await.unwrap_err();
        assert!(is_conflict(&err));
    }

    #[tokio::test]
    async fn memory_store_bumps_resource_version_on_update() {
        let store = MemoryStore::new();
        store.insert(configuration("test"));

        let current = store.get("default", "test").unwrap();
        let updated = store.update(&current).await.unwrap();
        assert_eq!(updated.resource_version().as_deref(), Some("2"));
    }

    #[test]
    fn conflict_classification_only_matches_409() {
        let conflict = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "operation cannot be fulfilled".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        });
        let server_error = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        });

        assert!(is_conflict(&conflict));
        assert!(!is_conflict(&server_error));
    }
}
