//! The polling arbiter
//!
//! A contender enqueues one ticket and then polls. Only the live head of the
//! queue looks at the device inventory, and it keeps that right across polls
//! until a device shows up, so nobody behind it can jump ahead while it
//! waits. A claim is bind-then-pop: the ticket leaves the queue only once the
//! process is committed to a device.

use gpuq_core::{
    ArbiterConfig, GpuDevice, GpuqConfig, GpuqError, GpuqResult, HolderId, Ticket,
};
use gpuq_queue::TicketQueue;
use std::time::Duration;
use tracing::{debug, info};

use crate::pool::ResourcePool;

/// Lifecycle of a single arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    /// Nothing queued yet
    Idle,
    /// Ticket written, no poll yet
    Enqueued,
    /// Polling for the head position and a free device
    Polling,
    /// A device was bound and the ticket consumed
    Bound,
}

impl std::fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbiterState::Idle => write!(f, "Idle"),
            ArbiterState::Enqueued => write!(f, "Enqueued"),
            ArbiterState::Polling => write!(f, "Polling"),
            ArbiterState::Bound => write!(f, "Bound"),
        }
    }
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Another live holder is at the head
    Waiting {
        /// Holder currently at the head
        head: HolderId,
    },
    /// At the head, but no device is available
    NoResource,
    /// Claimed this device
    Bound(GpuDevice),
}

/// Arbitrates one process's claim on a device
pub struct Arbiter {
    queue: TicketQueue,
    pool: ResourcePool,
    identity: HolderId,
    poll_interval: Duration,
    state: ArbiterState,
    ticket: Option<Ticket>,
    announced_wait: bool,
}

impl Arbiter {
    /// Create an arbiter for the calling process
    pub fn new(queue: TicketQueue, pool: ResourcePool, config: &ArbiterConfig) -> Self {
        Self {
            queue,
            pool,
            identity: HolderId::current(),
            poll_interval: config.poll_interval(),
            state: ArbiterState::Idle,
            ticket: None,
            announced_wait: false,
        }
    }

    /// Host-wide queue, NVML inventory and environment binding per `config`
    pub fn from_config(config: &GpuqConfig) -> GpuqResult<Self> {
        let queue = TicketQueue::open(&config.queue)?;
        let pool = ResourcePool::from_config(&config.selection);
        Ok(Self::new(queue, pool, &config.arbiter))
    }

    /// Contend under a different identity than the calling process
    pub fn with_identity(mut self, identity: HolderId) -> Self {
        self.identity = identity;
        self
    }

    /// Identity this arbiter contends under
    pub fn identity(&self) -> HolderId {
        self.identity
    }

    /// Current lifecycle state
    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// Ticket held while queued
    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    /// Put this process in line.
    ///
    /// Refuses if the process's device context is already set up, since a
    /// later bind could no longer take effect.
    pub fn enqueue(&mut self) -> GpuqResult<&Ticket> {
        match self.state {
            ArbiterState::Idle => {}
            ArbiterState::Bound => {
                return Err(GpuqError::Precondition(
                    "this arbiter already claimed a GPU".to_string(),
                ))
            }
            ArbiterState::Enqueued | ArbiterState::Polling => {
                return Err(GpuqError::Precondition(format!(
                    "holder {} is already queued",
                    self.identity
                )))
            }
        }

        if self.pool.is_bound() {
            return Err(GpuqError::Precondition(
                "the GPU context of this process is already initialized or \
                 restricted; wait for a turn before doing any GPU work"
                    .to_string(),
            ));
        }

        let ticket = self.queue.enqueue(self.identity)?;
        self.state = ArbiterState::Enqueued;
        let ticket: &Ticket = self.ticket.insert(ticket);
        Ok(ticket)
    }

    /// Run one check: am I the live head, and is a device free?
    pub fn poll_once(&mut self) -> GpuqResult<PollOutcome> {
        let ticket = match (self.state, &self.ticket) {
            (ArbiterState::Enqueued | ArbiterState::Polling, Some(ticket)) => ticket.clone(),
            (ArbiterState::Bound, _) => {
                return Err(GpuqError::Precondition(
                    "this arbiter already claimed a GPU".to_string(),
                ))
            }
            _ => {
                return Err(GpuqError::Precondition(format!(
                    "holder {} has not been enqueued",
                    self.identity
                )))
            }
        };
        self.state = ArbiterState::Polling;

        let head = match self.queue.peek_live_head() {
            Ok(head) => head,
            Err(GpuqError::QueueEmpty) => {
                return Err(GpuqError::Storage(format!(
                    "ticket {} of holder {} is no longer in the queue",
                    ticket.id, self.identity
                )))
            }
            Err(e) => return Err(e),
        };

        if !head.is_held_by(&self.identity) {
            if !self.announced_wait {
                self.announced_wait = true;
                info!(holder = %self.identity, head = %head.holder, "Waiting for turn...");
            }
            return Ok(PollOutcome::Waiting { head: head.holder });
        }

        let available = self.pool.list_available()?;
        let Some(device) = self.pool.select_best(&available) else {
            debug!(holder = %self.identity, "At head of queue, no GPU available");
            return Ok(PollOutcome::NoResource);
        };

        // Bind before pop: a failed bind must leave the ticket at the head
        self.pool.bind(&device)?;
        self.queue.pop(&ticket)?;

        self.state = ArbiterState::Bound;
        self.ticket = None;

        info!(
            holder = %self.identity,
            gpu = device.index,
            name = %device.name,
            "Started on GPU"
        );

        Ok(PollOutcome::Bound(device))
    }

    /// Block until this process has claimed a device.
    ///
    /// Enqueues if needed, then sleeps one poll interval before every check.
    ///
    /// Each check runs [`Arbiter::poll_once`] inline, and that blocks on the
    /// queue file lock and on the driver. Drive this from a current-thread
    /// runtime (as `gpuq run` does) or from a thread of its own, not from a
    /// shared worker pool.
    pub async fn wait_for_turn(&mut self) -> GpuqResult<GpuDevice> {
        match self.state {
            ArbiterState::Idle => {
                self.enqueue()?;
            }
            ArbiterState::Bound => {
                return Err(GpuqError::Precondition(
                    "this arbiter already claimed a GPU".to_string(),
                ))
            }
            ArbiterState::Enqueued | ArbiterState::Polling => {}
        }

        loop {
            tokio::time::sleep(self.poll_interval).await;
            if let PollOutcome::Bound(device) = self.poll_once()? {
                return Ok(device);
            }
        }
    }
}

/// Wait for a turn on the host-wide queue described by `config`
pub async fn wait_for_turn(config: &GpuqConfig) -> GpuqResult<GpuDevice> {
    Arbiter::from_config(config)?.wait_for_turn().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::AvailabilityFilter;
    use crate::traits::{Binder, Inventory};
    use gpuq_core::SelectionConfig;
    use gpuq_queue::{LivenessOracle, MemoryQueueStore};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeLiveness {
        dead: Mutex<HashSet<HolderId>>,
    }

    impl FakeLiveness {
        fn kill(&self, pid: u32) {
            self.dead.lock().unwrap().insert(HolderId::new(pid));
        }
    }

    impl LivenessOracle for FakeLiveness {
        fn is_alive(&self, holder: &HolderId) -> bool {
            !self.dead.lock().unwrap().contains(holder)
        }
    }

    /// Devices shared by every contender. Devices never disappear; a device
    /// in use only reads as busy.
    #[derive(Default)]
    struct FakeCluster {
        devices: Mutex<Vec<GpuDevice>>,
        enumerations: AtomicUsize,
    }

    impl FakeCluster {
        /// Add an idle device with `free_capacity` bytes, all of them free
        fn add(&self, index: u32, free_capacity: u64) {
            self.devices.lock().unwrap().push(GpuDevice {
                index,
                uuid: None,
                name: format!("Test GPU {}", index),
                memory_total: free_capacity,
                memory_free: free_capacity,
                utilization: Some(0),
            });
        }

        /// Readings of a device running someone's work
        fn occupy(&self, index: u32) {
            for device in self.devices.lock().unwrap().iter_mut() {
                if device.index == index {
                    device.utilization = Some(100);
                    device.memory_free = device.memory_total / 100;
                }
            }
        }

        fn release(&self, index: u32) {
            for device in self.devices.lock().unwrap().iter_mut() {
                if device.index == index {
                    device.utilization = Some(0);
                    device.memory_free = device.memory_total;
                }
            }
        }

        fn indices(&self) -> Vec<u32> {
            self.devices.lock().unwrap().iter().map(|d| d.index).collect()
        }
    }

    impl Inventory for FakeCluster {
        fn enumerate(&self) -> GpuqResult<Vec<GpuDevice>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            Ok(self.devices.lock().unwrap().clone())
        }
    }

    /// What binding does to the cluster readings
    #[derive(Clone, Copy)]
    enum OnBind {
        /// The claimant's work starts right away and shows up as load
        Occupy,
        /// Readings stay as they were
        Nothing,
        /// The bind itself fails
        Fail,
    }

    /// Per-process binder over the shared cluster
    struct ClaimingBinder {
        cluster: Arc<FakeCluster>,
        bound: Mutex<Option<u32>>,
        context_initialized: AtomicBool,
        on_bind: OnBind,
    }

    impl Binder for ClaimingBinder {
        fn is_initialized(&self) -> bool {
            self.context_initialized.load(Ordering::SeqCst) || self.bound.lock().unwrap().is_some()
        }

        fn apply(&self, device: &GpuDevice) -> GpuqResult<()> {
            match self.on_bind {
                OnBind::Fail => return Err(GpuqError::Bind("driver refused".to_string())),
                OnBind::Occupy => self.cluster.occupy(device.index),
                OnBind::Nothing => {}
            }
            *self.bound.lock().unwrap() = Some(device.index);
            Ok(())
        }
    }

    struct Host {
        queue: TicketQueue,
        liveness: Arc<FakeLiveness>,
        cluster: Arc<FakeCluster>,
    }

    impl Host {
        fn new() -> Self {
            let liveness = Arc::new(FakeLiveness::default());
            let queue = TicketQueue::new(Arc::new(MemoryQueueStore::new()), liveness.clone());
            Self {
                queue,
                liveness,
                cluster: Arc::new(FakeCluster::default()),
            }
        }

        fn contender(&self, pid: u32) -> (Arbiter, Arc<ClaimingBinder>) {
            self.contender_with(pid, false, OnBind::Occupy)
        }

        fn contender_with(
            &self,
            pid: u32,
            context_initialized: bool,
            on_bind: OnBind,
        ) -> (Arbiter, Arc<ClaimingBinder>) {
            let binder = Arc::new(ClaimingBinder {
                cluster: self.cluster.clone(),
                bound: Mutex::new(None),
                context_initialized: AtomicBool::new(context_initialized),
                on_bind,
            });
            let pool = ResourcePool::new(self.cluster.clone(), binder.clone())
                .with_filter(AvailabilityFilter::from(&SelectionConfig::default()));
            let config = ArbiterConfig {
                poll_interval_secs: 2,
            };
            let arbiter = Arbiter::new(self.queue.clone(), pool, &config)
                .with_identity(HolderId::new(pid));
            (arbiter, binder)
        }

        fn queued(&self) -> Vec<u32> {
            self.queue
                .list()
                .unwrap()
                .iter()
                .map(|t| t.holder.pid())
                .collect()
        }
    }

    #[test]
    fn test_state_transitions() {
        let host = Host::new();
        let (mut h1, _) = host.contender(101);
        assert_eq!(h1.state(), ArbiterState::Idle);

        h1.enqueue().unwrap();
        assert_eq!(h1.state(), ArbiterState::Enqueued);
        assert!(h1.ticket().is_some());

        assert_eq!(h1.poll_once().unwrap(), PollOutcome::NoResource);
        assert_eq!(h1.state(), ArbiterState::Polling);

        host.cluster.add(0, 16);
        assert!(matches!(h1.poll_once().unwrap(), PollOutcome::Bound(_)));
        assert_eq!(h1.state(), ArbiterState::Bound);
        assert!(h1.ticket().is_none());
        assert!(host.queued().is_empty());
    }

    #[test]
    fn test_precondition_when_context_initialized() {
        let host = Host::new();
        let (mut h1, _) = host.contender_with(101, true, OnBind::Occupy);

        let err = h1.enqueue().unwrap_err();
        assert!(matches!(err, GpuqError::Precondition(_)));
        assert_eq!(h1.state(), ArbiterState::Idle);
        assert!(host.queued().is_empty());
    }

    #[test]
    fn test_double_enqueue_rejected() {
        let host = Host::new();
        let (mut h1, _) = host.contender(101);
        h1.enqueue().unwrap();

        assert!(matches!(h1.enqueue(), Err(GpuqError::Precondition(_))));
        assert_eq!(host.queued(), vec![101]);
    }

    #[test]
    fn test_poll_before_enqueue_rejected() {
        let host = Host::new();
        let (mut h1, _) = host.contender(101);
        assert!(matches!(h1.poll_once(), Err(GpuqError::Precondition(_))));
    }

    #[test]
    fn test_fairness_under_scarcity() {
        let host = Host::new();
        let (mut h1, b1) = host.contender(101);
        let (mut h2, b2) = host.contender(102);
        h1.enqueue().unwrap();
        h2.enqueue().unwrap();

        for _ in 0..50 {
            assert_eq!(
                h2.poll_once().unwrap(),
                PollOutcome::Waiting {
                    head: HolderId::new(101)
                }
            );
            assert_eq!(h1.poll_once().unwrap(), PollOutcome::NoResource);
        }
        // Only the head ever looked at the inventory
        assert_eq!(host.cluster.enumerations.load(Ordering::SeqCst), 50);
        assert!(h2.announced_wait);

        host.cluster.add(0, 16);
        assert!(matches!(h2.poll_once().unwrap(), PollOutcome::Waiting { .. }));
        assert!(matches!(h1.poll_once().unwrap(), PollOutcome::Bound(ref d) if d.index == 0));
        assert_eq!(*b1.bound.lock().unwrap(), Some(0));
        assert_eq!(*b2.bound.lock().unwrap(), None);
    }

    #[test]
    fn test_two_contenders_end_to_end() {
        let host = Host::new();
        let (mut h1, b1) = host.contender(101);
        let (mut h2, b2) = host.contender(102);
        h1.enqueue().unwrap();
        h2.enqueue().unwrap();

        assert_eq!(h1.poll_once().unwrap(), PollOutcome::NoResource);
        assert!(matches!(h2.poll_once().unwrap(), PollOutcome::Waiting { .. }));

        host.cluster.add(0, 16);
        let claimed = h1.poll_once().unwrap();
        assert!(matches!(claimed, PollOutcome::Bound(ref d) if d.memory_free == 16));
        assert_eq!(host.queued(), vec![102]);

        assert_eq!(h2.poll_once().unwrap(), PollOutcome::NoResource);

        host.cluster.add(1, 8);
        let claimed = h2.poll_once().unwrap();
        assert!(matches!(claimed, PollOutcome::Bound(ref d) if d.memory_free == 8));

        assert_eq!(*b1.bound.lock().unwrap(), Some(0));
        assert_eq!(*b2.bound.lock().unwrap(), Some(1));
        assert!(host.queued().is_empty());
    }

    #[test]
    fn test_busy_device_is_never_claimed() {
        let host = Host::new();
        let (mut h1, b1) = host.contender_with(101, false, OnBind::Nothing);
        host.cluster.add(0, 16);
        host.cluster.occupy(0);
        h1.enqueue().unwrap();

        for _ in 0..3 {
            assert_eq!(h1.poll_once().unwrap(), PollOutcome::NoResource);
        }
        assert_eq!(*b1.bound.lock().unwrap(), None);
        assert_eq!(host.queued(), vec![101]);

        host.cluster.release(0);
        assert!(matches!(h1.poll_once().unwrap(), PollOutcome::Bound(ref d) if d.index == 0));
    }

    #[test]
    fn test_claimed_device_not_offered_to_next_head() {
        let host = Host::new();
        let (mut h1, b1) = host.contender_with(101, false, OnBind::Nothing);
        let (mut h2, b2) = host.contender_with(102, false, OnBind::Nothing);
        let (mut h3, b3) = host.contender_with(103, false, OnBind::Nothing);
        host.cluster.add(0, 16);
        host.cluster.add(1, 8);
        h1.enqueue().unwrap();
        h2.enqueue().unwrap();
        h3.enqueue().unwrap();

        assert!(matches!(h1.poll_once().unwrap(), PollOutcome::Bound(ref d) if d.index == 0));
        // Binding left the inventory alone; the claimant's load does the rest
        assert_eq!(host.cluster.indices(), vec![0, 1]);
        host.cluster.occupy(0);

        assert!(matches!(h2.poll_once().unwrap(), PollOutcome::Bound(ref d) if d.index == 1));
        host.cluster.occupy(1);

        assert_eq!(h3.poll_once().unwrap(), PollOutcome::NoResource);
        assert_eq!(host.cluster.indices(), vec![0, 1]);
        assert_eq!(*b1.bound.lock().unwrap(), Some(0));
        assert_eq!(*b2.bound.lock().unwrap(), Some(1));
        assert_eq!(*b3.bound.lock().unwrap(), None);
        assert_eq!(host.queued(), vec![103]);
    }

    #[test]
    fn test_crashed_head_is_skipped() {
        let host = Host::new();
        let (mut h1, b1) = host.contender(101);
        let (mut h2, b2) = host.contender(102);
        h1.enqueue().unwrap();
        h2.enqueue().unwrap();

        assert!(matches!(h2.poll_once().unwrap(), PollOutcome::Waiting { .. }));
        host.liveness.kill(101);

        assert_eq!(h2.poll_once().unwrap(), PollOutcome::NoResource);
        host.cluster.add(0, 24);
        assert!(matches!(h2.poll_once().unwrap(), PollOutcome::Bound(_)));

        assert_eq!(*b1.bound.lock().unwrap(), None);
        assert_eq!(*b2.bound.lock().unwrap(), Some(0));
        assert!(host.queued().is_empty());
    }

    #[test]
    fn test_failed_bind_keeps_ticket_at_head() {
        let host = Host::new();
        let (mut h1, _) = host.contender_with(101, false, OnBind::Fail);
        h1.enqueue().unwrap();
        host.cluster.add(0, 16);

        assert!(matches!(h1.poll_once(), Err(GpuqError::Bind(_))));
        assert_eq!(host.queued(), vec![101]);
        assert_eq!(h1.state(), ArbiterState::Polling);
    }

    #[test]
    fn test_vanished_ticket_is_a_storage_error() {
        let host = Host::new();
        let (mut h1, _) = host.contender(101);
        h1.enqueue().unwrap();
        host.liveness.kill(101);

        assert!(matches!(h1.poll_once(), Err(GpuqError::Storage(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_turn_sleeps_before_each_check() {
        let host = Host::new();
        let (mut h1, _) = host.contender(101);
        host.cluster.add(0, 16);

        let start = tokio::time::Instant::now();
        let device = h1.wait_for_turn().await.unwrap();

        assert_eq!(device.index, 0);
        // One full interval passes before the first check
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(4));
        assert_eq!(h1.state(), ArbiterState::Bound);
        assert!(matches!(
            h1.wait_for_turn().await,
            Err(GpuqError::Precondition(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_sleeps() {
        let host = Host::new();
        let (h1, _) = host.contender(101);
        let config = ArbiterConfig {
            poll_interval_secs: 0,
        };
        let mut h1 = Arbiter::new(host.queue.clone(), h1.pool, &config)
            .with_identity(HolderId::new(101));

        let cluster = host.cluster.clone();
        let supply = async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            cluster.add(0, 16);
        };

        let start = tokio::time::Instant::now();
        let (device, ()) = tokio::join!(h1.wait_for_turn(), supply);

        assert_eq!(device.unwrap().index, 0);
        // Checks at 1s, 2s, 3s and 4s, not a spin
        assert_eq!(host.cluster.enumerations.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_turn_contenders_in_order() {
        let host = Host::new();
        let (mut h1, _) = host.contender(101);
        let (mut h2, _) = host.contender(102);
        h1.enqueue().unwrap();
        h2.enqueue().unwrap();

        let cluster = host.cluster.clone();
        let supply = async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cluster.add(0, 16);
            tokio::time::sleep(Duration::from_secs(6)).await;
            cluster.add(1, 8);
        };

        let (first, second, ()) = tokio::join!(h1.wait_for_turn(), h2.wait_for_turn(), supply);

        assert_eq!(first.unwrap().memory_free, 16);
        assert_eq!(second.unwrap().memory_free, 8);
        assert!(host.queued().is_empty());
    }
}
