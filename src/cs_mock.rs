//! An in-memory [`CoordinationClient`] used by unit tests and by the demo
//! binary's standalone mode.
//!
//! Supports fault injection so version mismatches and transport errors can
//! be reproduced without a live cluster.

use crate::cs::{CoordinationClient, CsError, Record};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Entry {
    payload: Vec<u8>,
    version: i64,
}

/// An in-memory coordination service.
#[derive(Debug, Default)]
pub struct MockCoordinationClient {
    paths: Mutex<HashMap<String, Entry>>,
    fail_next_write: Mutex<Option<FaultKind>>,
}

/// A fault to inject on the next `cas_write` call.
#[derive(Clone, Copy, Debug)]
pub enum FaultKind {
    /// Simulate another writer racing ahead of the caller.
    VersionMismatch,
    /// Simulate a network/transport failure.
    Transport,
}

impl MockCoordinationClient {
    /// Creates an empty mock coordination service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arranges for the next `cas_write` call to fail with `fault` instead of
    /// applying normally.
    pub fn inject_fault_on_next_write(&self, fault: FaultKind) {
        *self.fail_next_write.lock().unwrap() = Some(fault);
    }

    /// Directly overwrites `path`'s stored payload and bumps its version,
    /// simulating a write made by an external agent or another replica.
    pub fn external_write(&self, path: &str, payload: impl Into<Vec<u8>>) -> i64 {
        let mut paths = self.paths.lock().unwrap();
        let entry = paths.entry(path.to_string()).or_default();
        entry.payload = payload.into();
        entry.version += 1;
        entry.version
    }

    /// Returns the raw stored payload for `path`, if any, for test assertions.
    pub fn peek(&self, path: &str) -> Option<(Vec<u8>, i64)> {
        self.paths
            .lock()
            .unwrap()
            .get(path)
            .map(|e| (e.payload.clone(), e.version))
    }
}

#[async_trait]
impl CoordinationClient for MockCoordinationClient {
    async fn ensure_path(&self, path: &str) -> Result<(), CsError> {
        self.paths
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert_with(Entry::default);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Record, CsError> {
        let paths = self.paths.lock().unwrap();
        let entry = paths.get(path).ok_or(CsError::NotFound)?;
        Ok(Record {
            payload: entry.payload.clone(),
            version: entry.version,
        })
    }

    async fn cas_write(
        &self,
        path: &str,
        payload: &[u8],
        expected_version: i64,
    ) -> Result<i64, CsError> {
        if let Some(fault) = self.fail_next_write.lock().unwrap().take() {
            return match fault {
                FaultKind::VersionMismatch => Err(CsError::VersionMismatch),
                FaultKind::Transport => Err(CsError::Transport("injected fault".into())),
            };
        }

        let mut paths = self.paths.lock().unwrap();
        let entry = paths.entry(path.to_string()).or_default();
        if entry.version != expected_version {
            return Err(CsError::VersionMismatch);
        }
        entry.payload = payload.to_vec();
        entry.version += 1;
        Ok(entry.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn ensure_path_is_idempotent() {
        let cs = MockCoordinationClient::new();
        cs.ensure_path("/a").await.unwrap();
        cs.ensure_path("/a").await.unwrap();
        let rec = cs.read("/a").await.unwrap();
        assert_eq!(rec.version, 0);
        assert!(rec.payload.is_empty());
    }

    #[tokio::test]
    async fn cas_write_rejects_stale_version() {
        let cs = MockCoordinationClient::new();
        cs.ensure_path("/a").await.unwrap();
        let v1 = cs.cas_write("/a", b"one", 0).await.unwrap();
        assert_eq!(v1, 1);
        let err = cs.cas_write("/a", b"two", 0).await.unwrap_err();
        assert!(matches!(err, CsError::VersionMismatch));
    }

    #[tokio::test]
    async fn injected_fault_applies_once() {
        let cs = MockCoordinationClient::new();
        cs.ensure_path("/a").await.unwrap();
        cs.inject_fault_on_next_write(FaultKind::Transport);
        assert!(matches!(
            cs.cas_write("/a", b"x", 0).await.unwrap_err(),
            CsError::Transport(_)
        ));
        // The fault only fires once; the next write proceeds normally.
        let v = cs.cas_write("/a", b"x", 0).await.unwrap();
        assert_eq!(v, 1);
    }
}
