//! Mock registry and publisher implementations for testing.
//!
//! This module provides stand-ins for both sides of the reconciler so the
//! control loop can be exercised without a gateway or a smart-home stack.
//!
//! - [`MockRegistry`] replays scripted poll results.
//! - [`MockPublisher`] keeps endpoints in memory and records every command.
//!
//! # Features
//!
//! - **Failure injection**: fail every call, the next N calls, or calls for a
//!   specific handle
//! - **Latency simulation**: add artificial delays to polls
//! - **Call recording**: assert on the exact commands a cycle issued

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use ruuvi_bridge_types::{DeviceHandle, SensorRecord};

use crate::error::{PollError, PublishError};
use crate::publisher::{AttributeDelta, DevicePublisher, EndpointAttributes, PublishedEndpoint};
use crate::registry::{PollBatch, SensorRegistry};

/// One scripted poll result.
#[derive(Debug, Clone)]
enum ScriptedPoll {
    Batch(PollBatch),
    Fail(String),
}

/// A mock sensor registry for testing.
///
/// Scripted results are returned in order; once the script runs out every
/// poll returns the fallback batch (empty by default).
///
/// # Example
///
/// ```
/// use ruuvi_bridge_core::{MockRegistry, SensorRegistry};
/// use ruuvi_bridge_types::SensorRecord;
/// use time::OffsetDateTime;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = MockRegistry::new();
///     registry.push_failure("gateway offline");
///     registry.push_records(vec![
///         SensorRecord::new("AA:BB:CC:DD:EE:FF", OffsetDateTime::now_utc()).with_temperature(24.5),
///     ]);
///
///     assert!(registry.poll().await.is_err());
///     assert_eq!(registry.poll().await.unwrap().records.len(), 1);
///     assert!(registry.poll().await.unwrap().records.is_empty());
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockRegistry {
    script: Mutex<VecDeque<ScriptedPoll>>,
    fallback: Mutex<PollBatch>,
    poll_count: AtomicU32,
    /// Simulated poll latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl MockRegistry {
    /// Create a registry with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful poll returning `records`.
    pub fn push_records(&self, records: Vec<SensorRecord>) {
        self.push_batch(PollBatch::new(records));
    }

    /// Queue a successful poll returning `batch`.
    pub fn push_batch(&self, batch: PollBatch) {
        lock(&self.script).push_back(ScriptedPoll::Batch(batch));
    }

    /// Queue a failed poll.
    pub fn push_failure(&self, message: &str) {
        lock(&self.script).push_back(ScriptedPoll::Fail(message.to_string()));
    }

    /// Set the batch returned once the script is exhausted.
    pub fn set_fallback(&self, records: Vec<SensorRecord>) {
        *lock(&self.fallback) = PollBatch::new(records);
    }

    /// Set simulated poll latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of polls performed so far.
    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorRegistry for MockRegistry {
    async fn poll(&self) -> Result<PollBatch, PollError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.poll_count.fetch_add(1, Ordering::SeqCst);

        let next = lock(&self.script).pop_front();
        match next {
            Some(ScriptedPoll::Batch(batch)) => Ok(batch),
            Some(ScriptedPoll::Fail(message)) => Err(PollError::Unavailable(message)),
            None => Ok(lock(&self.fallback).clone()),
        }
    }
}

/// A command received by [`MockPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherCall {
    Exists(DeviceHandle),
    Create(DeviceHandle, EndpointAttributes),
    Update(DeviceHandle, AttributeDelta),
    Endpoints,
    Remove(DeviceHandle),
}

impl PublisherCall {
    /// Whether the call mutates endpoint state.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            PublisherCall::Create(..) | PublisherCall::Update(..) | PublisherCall::Remove(_)
        )
    }
}

/// A mock device publisher for testing.
///
/// Implements [`DevicePublisher`] with an in-memory endpoint map and records
/// every call, including failed ones.
#[derive(Debug, Default)]
pub struct MockPublisher {
    endpoints: Mutex<BTreeMap<DeviceHandle, PublishedEndpoint>>,
    calls: Mutex<Vec<PublisherCall>>,
    should_fail: AtomicBool,
    /// Number of calls to fail before succeeding again.
    remaining_failures: AtomicU32,
    failing_handles: Mutex<HashSet<DeviceHandle>>,
}

impl MockPublisher {
    /// Create an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that already has endpoints for `handles`.
    pub fn with_endpoints(handles: impl IntoIterator<Item = DeviceHandle>) -> Self {
        let publisher = Self::new();
        {
            let mut endpoints = lock(&publisher.endpoints);
            for handle in handles {
                let attributes = EndpointAttributes {
                    measured_value: None,
                    ..EndpointAttributes::bridged_sensor(&handle, 0, 0)
                };
                endpoints.insert(handle.clone(), endpoint(handle, attributes));
            }
        }
        publisher
    }

    /// Make every call fail until reset.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Fail every call concerning `handle`.
    pub fn fail_handle(&self, handle: DeviceHandle) {
        lock(&self.failing_handles).insert(handle);
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<PublisherCall> {
        lock(&self.calls).clone()
    }

    /// Only the create/update/remove calls received so far.
    pub fn commands(&self) -> Vec<PublisherCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.is_command())
            .cloned()
            .collect()
    }

    /// Forget recorded calls (endpoints are kept).
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// The current endpoint under `handle`.
    pub fn endpoint(&self, handle: &DeviceHandle) -> Option<PublishedEndpoint> {
        lock(&self.endpoints).get(handle).cloned()
    }

    /// Number of endpoints.
    pub fn endpoint_count(&self) -> usize {
        lock(&self.endpoints).len()
    }

    fn record(&self, call: PublisherCall) {
        lock(&self.calls).push(call);
    }

    fn check_should_fail(&self, handle: Option<&DeviceHandle>) -> Result<(), PublishError> {
        if self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PublishError::Unavailable("Mock failure".to_string()));
        }

        if self.should_fail.load(Ordering::Relaxed) {
            return Err(PublishError::Unavailable("Mock failure".to_string()));
        }

        if let Some(handle) = handle
            && lock(&self.failing_handles).contains(handle)
        {
            return Err(PublishError::Rejected {
                handle: handle.clone(),
                message: "Mock failure".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl DevicePublisher for MockPublisher {
    async fn exists(&self, handle: &DeviceHandle) -> Result<bool, PublishError> {
        self.record(PublisherCall::Exists(handle.clone()));
        self.check_should_fail(Some(handle))?;
        Ok(lock(&self.endpoints).contains_key(handle))
    }

    async fn create(
        &self,
        handle: &DeviceHandle,
        attributes: EndpointAttributes,
    ) -> Result<(), PublishError> {
        self.record(PublisherCall::Create(handle.clone(), attributes.clone()));
        self.check_should_fail(Some(handle))?;

        let mut endpoints = lock(&self.endpoints);
        if endpoints.contains_key(handle) {
            return Err(PublishError::AlreadyExists(handle.clone()));
        }
        endpoints.insert(handle.clone(), endpoint(handle.clone(), attributes));
        Ok(())
    }

    async fn update(
        &self,
        handle: &DeviceHandle,
        delta: AttributeDelta,
    ) -> Result<(), PublishError> {
        self.record(PublisherCall::Update(handle.clone(), delta));
        self.check_should_fail(Some(handle))?;

        let mut endpoints = lock(&self.endpoints);
        let endpoint = endpoints
            .get_mut(handle)
            .ok_or_else(|| PublishError::NotFound(handle.clone()))?;
        endpoint.attributes.apply(delta);
        endpoint.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn endpoints(&self) -> Result<Vec<PublishedEndpoint>, PublishError> {
        self.record(PublisherCall::Endpoints);
        self.check_should_fail(None)?;
        Ok(lock(&self.endpoints).values().cloned().collect())
    }

    async fn remove(&self, handle: &DeviceHandle) -> Result<(), PublishError> {
        self.record(PublisherCall::Remove(handle.clone()));
        self.check_should_fail(Some(handle))?;
        lock(&self.endpoints)
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| PublishError::NotFound(handle.clone()))
    }
}

fn endpoint(handle: DeviceHandle, attributes: EndpointAttributes) -> PublishedEndpoint {
    let now = OffsetDateTime::now_utc();
    PublishedEndpoint {
        handle,
        attributes,
        created_at: now,
        updated_at: now,
    }
}

// Poisoning is ignored
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
