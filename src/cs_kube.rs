//! A [`CoordinationClient`] backed by Kubernetes `ConfigMap` resources.
//!
//! Kubernetes's `resourceVersion`-preconditioned Server-Side Apply gives the
//! same compare-and-swap semantics the coordination service contract
//! requires: a write whose `resourceVersion` no longer matches the stored
//! object fails with an HTTP 409 Conflict, which this adaptor translates to
//! [`CsError::VersionMismatch`].

use crate::cs::{CoordinationClient, CsError, Record};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube_client::api::{Api, Patch, PatchParams};
use std::time::Duration;

const PAYLOAD_KEY: &str = "payload";
const FIELD_MANAGER: &str = "tso-lease";
const DEADLINE_EXCEEDED: &str = "coordination service call exceeded its deadline";

/// Maps a CS path (e.g. `/omid/tso-lease`) to a Kubernetes object name.
pub fn path_to_configmap_name(path: &str) -> String {
    path.trim_start_matches('/').replace('/', "-")
}

/// A coordination-service gateway backed by `ConfigMap`s in a single
/// namespace.
///
/// Every Kubernetes API call is bounded by `deadline`; a call that exceeds
/// it is surfaced as [`CsError::Transport`] so a hung connection can never
/// prevent the controller from demoting on schedule.
#[derive(Clone, Debug)]
pub struct KubeConfigMapClient {
    api: Api<ConfigMap>,
    deadline: Duration,
}

impl KubeConfigMapClient {
    /// Creates a gateway operating on `ConfigMap`s in `namespace`, bounding
    /// every call by `deadline`.
    pub fn new(client: kube_client::Client, namespace: &str, deadline: Duration) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            deadline,
        }
    }

    fn name(path: &str) -> String {
        path_to_configmap_name(path)
    }

    async fn get(&self, name: &str) -> Result<Result<ConfigMap, kube_client::Error>, CsError> {
        tokio::time::timeout(self.deadline, self.api.get(name))
            .await
            .map_err(|_| CsError::from(DEADLINE_EXCEEDED))
    }
}

#[async_trait]
impl CoordinationClient for KubeConfigMapClient {
    async fn ensure_path(&self, path: &str) -> Result<(), CsError> {
        let name = Self::name(path);
        match self.get(&name).await? {
            Ok(_) => Ok(()),
            Err(kube_client::Error::Api(err)) if err.code == 404 => {
                let cm = ConfigMap {
                    metadata: kube_core::ObjectMeta {
                        name: Some(name.clone()),
                        ..Default::default()
                    },
                    data: Some(Default::default()),
                    ..Default::default()
                };
                let created = tokio::time::timeout(
                    self.deadline,
                    self.api.create(&Default::default(), &cm),
                )
                .await
                .map_err(|_| CsError::from(DEADLINE_EXCEEDED))?;
                match created {
                    Ok(_) => Ok(()),
                    // Another replica raced us to create it: fine, as long
                    // as it now exists.
                    Err(kube_client::Error::Api(err)) if err.code == 409 => self
                        .get(&name)
                        .await?
                        .map(|_| ())
                        .map_err(|_| CsError::EnsureFailed(path.to_string())),
                    Err(e) => Err(CsError::Transport(Box::new(e))),
                }
            }
            Err(e) => Err(CsError::Transport(Box::new(e))),
        }
    }

    async fn read(&self, path: &str) -> Result<Record, CsError> {
        let name = Self::name(path);
        let cm = self.get(&name).await?.map_err(|e| match e {
            kube_client::Error::Api(err) if err.code == 404 => CsError::NotFound,
            e => CsError::Transport(Box::new(e)),
        })?;
        to_record(&cm)
    }

    async fn cas_write(
        &self,
        path: &str,
        payload: &[u8],
        expected_version: i64,
    ) -> Result<i64, CsError> {
        let name = Self::name(path);
        let payload = String::from_utf8_lossy(payload).into_owned();
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "resourceVersion": expected_version.to_string(),
            },
            "data": { PAYLOAD_KEY: payload },
        });

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            force: true,
            ..Default::default()
        };

        let cm = tokio::time::timeout(
            self.deadline,
            self.api.patch(&name, &params, &Patch::Apply(patch)),
        )
        .await
        .map_err(|_| CsError::from(DEADLINE_EXCEEDED))?
        .map_err(|e| match e {
            kube_client::Error::Api(err) if err.code == 409 => CsError::VersionMismatch,
            e => CsError::Transport(Box::new(e)),
        })?;

        cm.metadata
            .resource_version
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| CsError::Transport("missing resourceVersion after write".into()))
    }
}

fn to_record(cm: &ConfigMap) -> Result<Record, CsError> {
    let version = cm
        .metadata
        .resource_version
        .as_ref()
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| CsError::Transport("missing resourceVersion".into()))?;
    let payload = cm
        .data
        .as_ref()
        .and_then(|d| d.get(PAYLOAD_KEY))
        .cloned()
        .unwrap_or_default()
        .into_bytes();
    Ok(Record { payload, version })
}

#[cfg(test)]
mod test {
    use super::path_to_configmap_name;

    #[test]
    fn maps_paths_to_names() {
        assert_eq!(path_to_configmap_name("/omid/tso-lease"), "omid-tso-lease");
        assert_eq!(path_to_configmap_name("omid/current-tso"), "omid-current-tso");
    }
}
