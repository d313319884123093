//! In-process object store.
//!
//! Mirrors the local store's observable behavior (metadata key normalization,
//! digest checking, whole-object replace) and records every call, so the
//! importer can be exercised without disk or network.

use super::{BackendError, BackendResult, ObjectStore, PutObject, normalize_metadata};
use crate::models::object::{ObjectDescriptor, RemoteObject};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (ObjectDescriptor, Bytes)>>,
    failing: Mutex<HashSet<String>>,
    put_log: Mutex<Vec<String>>,
    head_calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it touches state.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Place an object directly, bypassing normalization. Models state left
    /// behind by another writer.
    pub fn seed(&self, descriptor: ObjectDescriptor, body: impl Into<Bytes>) {
        let key = descriptor.key.clone();
        self.lock_objects().insert(key, (descriptor, body.into()));
    }

    /// Make every lookup and write for `key` fail as if the backend were down.
    pub fn fail_key(&self, key: impl Into<String>) {
        lock(&self.failing).insert(key.into());
    }

    pub fn object(&self, key: &str) -> Option<ObjectDescriptor> {
        self.lock_objects().get(key).map(|(desc, _)| desc.clone())
    }

    pub fn body(&self, key: &str) -> Option<Bytes> {
        self.lock_objects().get(key).map(|(_, body)| body.clone())
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        lock(&self.put_log).len()
    }

    /// Keys written, in call order.
    pub fn put_keys(&self) -> Vec<String> {
        lock(&self.put_log).clone()
    }

    fn lock_objects(&self) -> MutexGuard<'_, HashMap<String, (ObjectDescriptor, Bytes)>> {
        lock(&self.objects)
    }

    fn check_available(&self, key: &str) -> BackendResult<()> {
        if lock(&self.failing).contains(key) {
            return Err(BackendError::Unavailable(format!("injected failure for `{}`", key)));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, key: &str) -> BackendResult<RemoteObject> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.check_available(key)?;
        Ok(self.object(key).into())
    }

    async fn put_object(&self, req: PutObject) -> BackendResult<ObjectDescriptor> {
        let PutObject {
            key,
            mut body,
            content_type,
            metadata,
            content_md5,
        } = req;
        lock(&self.put_log).push(key.clone());
        self.simulate_latency().await;
        self.check_available(&key)?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(BackendError::Body)?);
        }
        let digest = md5::compute(&buf);

        if let Some(expected) = content_md5 {
            let actual = general_purpose::STANDARD.encode(digest.0);
            if expected != actual {
                return Err(BackendError::BadDigest {
                    key,
                    expected,
                    actual,
                });
            }
        }

        let descriptor = ObjectDescriptor {
            key: key.clone(),
            content_type: Some(content_type),
            size_bytes: buf.len() as i64,
            etag: Some(format!("{:x}", digest)),
            metadata: normalize_metadata(metadata),
        };
        self.lock_objects()
            .insert(key, (descriptor.clone(), buf.freeze()));
        Ok(descriptor)
    }
}
