//! The reconciliation loop.
//!
//! Every cycle polls the registry once and drives the publisher so that each
//! live tag with a temperature reading has an endpoint carrying that reading.
//! Endpoints for tags that disappear from the registry are left alone.
//!
//! | Endpoint | Temperature | Command | Outcome |
//! |----------|-------------|---------|---------|
//! | absent | present | `create` | [`RecordOutcome::Created`] |
//! | present | present | `update` | [`RecordOutcome::Updated`] |
//! | present | absent | none | [`RecordOutcome::Retained`] |
//! | absent | absent | none | [`RecordOutcome::Withheld`] |
//!
//! Cycles never overlap: the delay before the next poll starts only after the
//! current cycle finishes, and cancellation is checked between cycles.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ruuvi_bridge_types::{DeviceHandle, IdentityResult, SensorRecord};

use crate::error::{PollError, PublishError};
use crate::publisher::{AttributeDelta, DevicePublisher, EndpointAttributes};
use crate::registry::{PollBatch, SensorRegistry};

/// Default delay between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default vendor identifier (test vendor range).
pub const DEFAULT_VENDOR_ID: u16 = 0xFFF1;

/// Consecutive poll failures reported at warn level before escalating.
const WARN_FAILURES: u32 = 3;

/// Restricts which tags are bridged.
///
/// An empty filter allows every tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    allowed: BTreeSet<DeviceHandle>,
}

impl TagFilter {
    /// A filter that allows every tag.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// A filter allowing only the given hardware addresses.
    ///
    /// Addresses are compared by handle, so case and separators don't matter.
    pub fn from_addresses<I, S>(addresses: I) -> IdentityResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = addresses
            .into_iter()
            .map(|a| DeviceHandle::from_address(a.as_ref()))
            .collect::<IdentityResult<BTreeSet<_>>>()?;
        Ok(Self { allowed })
    }

    /// Whether `handle` passes the filter.
    pub fn allows(&self, handle: &DeviceHandle) -> bool {
        self.allowed.is_empty() || self.allowed.contains(handle)
    }

    /// Whether the filter restricts anything.
    pub fn is_restricted(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Number of allowed tags (0 = all).
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// Whether the allowlist is empty.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Vendor identifier stamped on new endpoints.
    pub vendor_id: u16,
    /// Which tags to bridge.
    pub filter: TagFilter,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            vendor_id: DEFAULT_VENDOR_ID,
            filter: TagFilter::allow_all(),
        }
    }
}

impl ReconcilerOptions {
    /// Set the cycle interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the vendor identifier.
    #[must_use]
    pub fn vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    /// Set the tag filter.
    #[must_use]
    pub fn filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// What a cycle did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new endpoint was created.
    Created,
    /// An existing endpoint received a new measured value.
    Updated,
    /// An existing endpoint was left untouched (no temperature).
    Retained,
    /// No endpoint exists and none was created (no temperature).
    Withheld,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Records returned by the poll.
    pub records: usize,
    /// Response elements the poller dropped.
    pub dropped: usize,
    /// Records with an unusable hardware address.
    pub invalid: usize,
    /// Records skipped by the tag filter.
    pub filtered: usize,
    pub created: usize,
    pub updated: usize,
    pub retained: usize,
    pub withheld: usize,
    /// Devices whose publisher call failed.
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Retained => self.retained += 1,
            RecordOutcome::Withheld => self.withheld += 1,
        }
    }

    /// Number of create/update commands that succeeded.
    pub fn commands(&self) -> usize {
        self.created + self.updated
    }
}

/// Observable state of the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilerStatus {
    /// Whether the loop is running.
    pub running: bool,
    /// Cycles attempted, failed polls included.
    pub cycles: u64,
    /// When the last cycle finished.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_cycle_at: Option<OffsetDateTime>,
    /// Counters of the last successful cycle.
    pub last_report: Option<CycleReport>,
    /// Message of the most recent poll failure, cleared by a successful poll.
    pub last_error: Option<String>,
    /// Poll failures since the last successful poll.
    pub consecutive_failures: u32,
}

/// Periodically reconciles registry records into published endpoints.
pub struct Reconciler {
    registry: Arc<dyn SensorRegistry>,
    publisher: Arc<dyn DevicePublisher>,
    options: ReconcilerOptions,
    status: watch::Sender<ReconcilerStatus>,
}

impl Reconciler {
    /// Create a reconciler over the given registry and publisher.
    pub fn new(
        registry: Arc<dyn SensorRegistry>,
        publisher: Arc<dyn DevicePublisher>,
        options: ReconcilerOptions,
    ) -> Self {
        let (status, _) = watch::channel(ReconcilerStatus::default());
        Self {
            registry,
            publisher,
            options,
            status,
        }
    }

    /// The reconciler settings.
    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Subscribe to status updates.
    pub fn status(&self) -> watch::Receiver<ReconcilerStatus> {
        self.status.subscribe()
    }

    /// Run one poll-and-reconcile cycle.
    ///
    /// # Errors
    ///
    /// Returns the [`PollError`] if the poll failed; no publisher call is made
    /// in that case. Publisher failures never fail the cycle, they are counted
    /// in [`CycleReport::failed`].
    pub async fn run_cycle(&self) -> Result<CycleReport, PollError> {
        let batch = match self.registry.poll().await {
            Ok(batch) => batch,
            Err(e) => {
                self.poll_failed(&e);
                return Err(e);
            }
        };

        let report = self.reconcile(batch).await;

        self.status.send_modify(|status| {
            if status.consecutive_failures > 0 {
                info!(
                    "Registry poll recovered after {} failure(s)",
                    status.consecutive_failures
                );
            }
            status.cycles += 1;
            status.last_cycle_at = Some(OffsetDateTime::now_utc());
            status.last_report = Some(report);
            status.last_error = None;
            status.consecutive_failures = 0;
        });

        Ok(report)
    }

    /// Reconcile an already-polled batch.
    pub async fn reconcile(&self, batch: PollBatch) -> CycleReport {
        let mut report = CycleReport {
            records: batch.records.len(),
            dropped: batch.dropped.len(),
            ..CycleReport::default()
        };

        for dropped in &batch.dropped {
            warn!(
                "Skipped registry element #{}: {}",
                dropped.index, dropped.reason
            );
        }

        let pending = self.collapse(batch.records, &mut report);

        for (handle, record) in pending {
            match self.apply(&handle, &record).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!("Failed to reconcile {}: {}", handle, e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Cycle done: {} record(s), {} created, {} updated, {} failed",
            report.records, report.created, report.updated, report.failed
        );

        report
    }

    /// Map records to handles, dropping invalid and filtered ones.
    ///
    /// Records sharing a handle collapse into one; the later record wins but
    /// keeps the position of the first.
    fn collapse(
        &self,
        records: Vec<SensorRecord>,
        report: &mut CycleReport,
    ) -> Vec<(DeviceHandle, SensorRecord)> {
        let mut pending: Vec<(DeviceHandle, SensorRecord)> = Vec::with_capacity(records.len());
        let mut positions: HashMap<DeviceHandle, usize> = HashMap::new();

        for record in records {
            let handle = match record.handle() {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Skipping record: {}", e);
                    report.invalid += 1;
                    continue;
                }
            };

            if !self.options.filter.allows(&handle) {
                debug!("Skipping {}: not in enabled tags", handle);
                report.filtered += 1;
                continue;
            }

            match positions.get(&handle) {
                Some(&index) => {
                    debug!("Duplicate record for {} in one poll, keeping the later", handle);
                    pending[index].1 = record;
                }
                None => {
                    positions.insert(handle.clone(), pending.len());
                    pending.push((handle, record));
                }
            }
        }

        pending
    }

    async fn apply(
        &self,
        handle: &DeviceHandle,
        record: &SensorRecord,
    ) -> Result<RecordOutcome, PublishError> {
        let exists = self.publisher.exists(handle).await?;

        match (exists, record.measured_value()) {
            (false, Some(value)) => {
                let attributes =
                    EndpointAttributes::bridged_sensor(handle, self.options.vendor_id, value);
                self.publisher.create(handle, attributes).await?;
                info!(
                    "Bridged new tag {} ({})",
                    handle.canonical_address(),
                    handle
                );
                Ok(RecordOutcome::Created)
            }
            (true, Some(value)) => {
                self.publisher
                    .update(handle, AttributeDelta::measured_value(value))
                    .await?;
                debug!("Updated {}: measured value {}", handle, value);
                Ok(RecordOutcome::Updated)
            }
            (true, None) => Ok(RecordOutcome::Retained),
            (false, None) => {
                debug!("Not bridging {} yet: no temperature reading", handle);
                Ok(RecordOutcome::Withheld)
            }
        }
    }

    fn poll_failed(&self, e: &PollError) {
        self.status.send_modify(|status| {
            status.cycles += 1;
            status.last_cycle_at = Some(OffsetDateTime::now_utc());
            status.last_error = Some(e.to_string());
            status.consecutive_failures += 1;

            let failures = status.consecutive_failures;
            if failures <= WARN_FAILURES {
                warn!("Failed to poll registry: {} (attempt {})", e, failures);
            } else if failures == WARN_FAILURES + 1 {
                error!(
                    "Registry unreachable after {} consecutive attempts, will keep polling quietly",
                    failures
                );
            } else {
                debug!("Failed to poll registry: {} (attempt {})", e, failures);
            }
        });
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A cycle in progress always completes; cancellation is observed while
    /// waiting for the next one.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Starting reconciler (interval: {:?}, enabled tags: {})",
            self.options.interval,
            if self.options.filter.is_restricted() {
                self.options.filter.len().to_string()
            } else {
                "all".to_string()
            }
        );
        self.status.send_modify(|status| status.running = true);

        while !cancel.is_cancelled() {
            // Poll errors are already logged and recorded in the status
            let _ = self.run_cycle().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }

        self.status.send_modify(|status| status.running = false);
        info!("Reconciler stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPublisher, MockRegistry, PublisherCall};
    use ruuvi_bridge_types::handle;

    fn record(mac: &str, temperature: Option<f64>) -> SensorRecord {
        let record = SensorRecord::new(mac, OffsetDateTime::UNIX_EPOCH);
        match temperature {
            Some(t) => record.with_temperature(t),
            None => record,
        }
    }

    fn reconciler(
        registry: &Arc<MockRegistry>,
        publisher: &Arc<MockPublisher>,
        options: ReconcilerOptions,
    ) -> Reconciler {
        Reconciler::new(registry.clone(), publisher.clone(), options)
    }

    #[test]
    fn test_tag_filter() {
        let filter = TagFilter::from_addresses(["AA:BB:CC:DD:EE:FF"]).unwrap();
        assert!(filter.is_restricted());
        assert!(filter.allows(&handle("aa-bb-cc-dd-ee-ff").unwrap()));
        assert!(!filter.allows(&handle("11:22:33:44:55:66").unwrap()));

        let all = TagFilter::allow_all();
        assert!(!all.is_restricted());
        assert!(all.allows(&handle("11:22:33:44:55:66").unwrap()));

        assert!(TagFilter::from_addresses(["nope"]).is_err());
    }

    #[test]
    fn test_options_builder() {
        let options = ReconcilerOptions::default()
            .interval(Duration::from_secs(30))
            .vendor_id(0x1234);
        assert_eq!(options.interval, Duration::from_secs(30));
        assert_eq!(options.vendor_id, 0x1234);
        assert!(!options.filter.is_restricted());
    }

    #[tokio::test]
    async fn test_create_uses_vendor_id_and_quantized_value() {
        let registry = Arc::new(MockRegistry::new());
        let publisher = Arc::new(MockPublisher::new());
        registry.push_records(vec![record("AA:BB:CC:DD:EE:FF", Some(21.234))]);

        let r = reconciler(
            &registry,
            &publisher,
            ReconcilerOptions::default().vendor_id(0x1234),
        );
        let report = r.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);

        let h = handle("AA:BB:CC:DD:EE:FF").unwrap();
        let attrs = publisher.endpoint(&h).unwrap().attributes;
        assert_eq!(attrs.vendor_id, 0x1234);
        assert_eq!(attrs.measured_value, Some(2123));
    }

    #[tokio::test]
    async fn test_retained_and_withheld() {
        let existing = handle("AA:BB:CC:DD:EE:FF").unwrap();
        let registry = Arc::new(MockRegistry::new());
        let publisher = Arc::new(MockPublisher::with_endpoints([existing]));
        registry.push_records(vec![
            record("AA:BB:CC:DD:EE:FF", None),
            record("11:22:33:44:55:66", None),
        ]);

        let r = reconciler(&registry, &publisher, ReconcilerOptions::default());
        let report = r.run_cycle().await.unwrap();

        assert_eq!(report.retained, 1);
        assert_eq!(report.withheld, 1);
        assert!(publisher.commands().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_collapse_to_later_record() {
        let registry = Arc::new(MockRegistry::new());
        let publisher = Arc::new(MockPublisher::new());
        registry.push_records(vec![
            record("AA:BB:CC:DD:EE:FF", Some(20.0)),
            record("aa-bb-cc-dd-ee-ff", Some(22.0)),
        ]);

        let r = reconciler(&registry, &publisher, ReconcilerOptions::default());
        let report = r.run_cycle().await.unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.created, 1);
        let commands = publisher.commands();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            PublisherCall::Create(_, attrs) => assert_eq!(attrs.measured_value, Some(2200)),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_tracks_failures_and_recovery() {
        let registry = Arc::new(MockRegistry::new());
        let publisher = Arc::new(MockPublisher::new());
        registry.push_failure("down");
        registry.push_failure("down");

        let r = reconciler(&registry, &publisher, ReconcilerOptions::default());
        let status = r.status();

        assert!(r.run_cycle().await.is_err());
        assert!(r.run_cycle().await.is_err());
        {
            let s = status.borrow();
            assert_eq!(s.cycles, 2);
            assert_eq!(s.consecutive_failures, 2);
            assert!(s.last_error.as_deref().unwrap().contains("down"));
            assert!(s.last_report.is_none());
        }

        r.run_cycle().await.unwrap();
        let s = status.borrow();
        assert_eq!(s.cycles, 3);
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.last_error.is_none());
        assert_eq!(s.last_report, Some(CycleReport::default()));
    }

    #[test]
    fn test_status_serialization() {
        let status = ReconcilerStatus {
            running: true,
            cycles: 1,
            last_cycle_at: Some(OffsetDateTime::UNIX_EPOCH),
            last_report: Some(CycleReport::default()),
            last_error: None,
            consecutive_failures: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["last_cycle_at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["last_report"]["created"], 0);
    }
}
