//! In-process gateway
//!
//! `MemoryGateway` keeps an address space of typed tags grouped into scopes.
//! Every value change is appended to a bounded change log; each subscription
//! runs a tokio task that wakes every `interval_ms` and forwards the changes
//! of its tags since its cursor. Device-side updates are injected with
//! [`MemoryGateway::publish`]. [`MemoryGateway::set_link_up`] simulates a lost
//! connection: session operations then fail with `GridError::Connection`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use errors::{GridError, GridResult};
use grid_model::{DeviceSpec, Tag, TagRef, Value};

use super::{check_write_args, ControlGateway, DataCallback, DataChange, SubscriptionHandle};

/// Changes kept for lagging subscriptions
const CHANGE_LOG_CAPACITY: usize = 65_536;

#[derive(Debug, Clone)]
struct Node {
    tag: Tag,
    value: Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AddressSpace {
    nodes: HashMap<TagRef, Node>,
    /// Scope -> references in registration order
    scopes: HashMap<String, Vec<TagRef>>,
    /// Tag name -> reference of its first registration
    by_name: HashMap<String, TagRef>,
    changes: VecDeque<DataChange>,
    /// Sequence number of `changes[0]`
    base_seq: u64,
}

impl AddressSpace {
    fn next_seq(&self) -> u64 {
        self.base_seq + self.changes.len() as u64
    }

    fn set(&mut self, reference: &TagRef, timestamp: DateTime<Utc>, raw: f64) -> GridResult<Value> {
        let node = self
            .nodes
            .get_mut(reference)
            .ok_or_else(|| GridError::UnknownTag(reference.to_string()))?;
        let value = Value::coerce(node.tag.value_type, raw)?;
        node.value = value;
        node.timestamp = timestamp;

        let change = DataChange {
            tag: node.tag.name.clone(),
            reference: reference.clone(),
            timestamp,
            value,
        };
        self.changes.push_back(change);
        if self.changes.len() > CHANGE_LOG_CAPACITY {
            self.changes.pop_front();
            self.base_seq += 1;
        }
        Ok(value)
    }

    /// Changes of `refs` from `cursor` on; advances `cursor` to the log end
    fn changes_since(&self, cursor: &mut u64, refs: &HashSet<TagRef>) -> (Vec<DataChange>, u64) {
        let lost = self.base_seq.saturating_sub(*cursor);
        let start = cursor.saturating_sub(self.base_seq) as usize;
        let batch = self
            .changes
            .iter()
            .skip(start)
            .filter(|c| refs.contains(&c.reference))
            .cloned()
            .collect();
        *cursor = self.next_seq();
        (batch, lost)
    }
}

struct Subscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Client write as seen by the address space
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub tag: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// In-process implementation of [`ControlGateway`]
pub struct MemoryGateway {
    endpoint: String,
    link_up: Arc<AtomicBool>,
    connected: AtomicBool,
    connects: AtomicU64,
    space: Arc<RwLock<AddressSpace>>,
    subscriptions: Mutex<HashMap<SubscriptionHandle, Subscription>>,
    next_handle: AtomicU64,
    writes: Mutex<Vec<WriteRecord>>,
}

impl MemoryGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            link_up: Arc::new(AtomicBool::new(true)),
            connected: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            space: Arc::new(RwLock::new(AddressSpace::default())),
            subscriptions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn ensure_session(&self) -> GridResult<()> {
        if !self.link_up.load(Ordering::Acquire) {
            return Err(GridError::connection(&self.endpoint, "link down"));
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(GridError::NotConnected(self.endpoint.clone()));
        }
        Ok(())
    }

    /// Simulate losing or regaining the connection to the address space
    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Release);
        if up {
            info!(endpoint = %self.endpoint, "Link restored");
        } else {
            warn!(endpoint = %self.endpoint, "Link lost");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.link_up.load(Ordering::Acquire)
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Device-side update with an explicit source timestamp
    ///
    /// Works regardless of the client session.
    pub fn publish(&self, tag: &str, timestamp: DateTime<Utc>, value: f64) -> GridResult<Value> {
        let mut space = self.space.write();
        let reference = space
            .by_name
            .get(tag)
            .cloned()
            .ok_or_else(|| GridError::UnknownTag(tag.to_string()))?;
        space.set(&reference, timestamp, value)
    }

    /// Current value of a tag
    pub fn value_of(&self, tag: &str) -> Option<Value> {
        let space = self.space.read();
        let reference = space.by_name.get(tag)?;
        space.nodes.get(reference).map(|n| n.value)
    }

    /// Client writes to `tag`, oldest first
    pub fn writes_to(&self, tag: &str) -> Vec<Value> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.tag == tag)
            .map(|w| w.value)
            .collect()
    }

    /// All client writes, oldest first
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    fn drop_subscriptions(&self) -> Vec<JoinHandle<()>> {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions
            .drain()
            .map(|(_, sub)| {
                sub.token.cancel();
                sub.task
            })
            .collect()
    }
}

#[async_trait]
impl ControlGateway for MemoryGateway {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> GridResult<()> {
        if !self.link_up.load(Ordering::Acquire) {
            return Err(GridError::connection(&self.endpoint, "connection refused"));
        }
        self.connected.store(true, Ordering::Release);
        self.connects.fetch_add(1, Ordering::Relaxed);
        info!(endpoint = %self.endpoint, "Connected");
        Ok(())
    }

    async fn disconnect(&self) -> GridResult<()> {
        self.connected.store(false, Ordering::Release);
        let tasks = self.drop_subscriptions();
        let dropped = tasks.len();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Subscription task failed: {}", e);
            }
        }
        info!(endpoint = %self.endpoint, subscriptions = dropped, "Disconnected");
        Ok(())
    }

    async fn ping(&self) -> GridResult<()> {
        self.ensure_session()
    }

    async fn register_tags(&self, scope: &str, devices: &[DeviceSpec]) -> GridResult<usize> {
        self.ensure_session()?;

        let mut space = self.space.write();
        let mut created = 0;
        for device in devices {
            let reference = TagRef::new(format!("{}.{}", scope, device.tag));
            if space.nodes.contains_key(&reference) {
                continue;
            }
            let tag = Tag::with_reference(device.tag.clone(), reference.clone(), device.value_type);
            let node = Node {
                value: Value::coerce(device.value_type, 0.0).unwrap_or(Value::Double(0.0)),
                timestamp: Utc::now(),
                tag,
            };
            space.nodes.insert(reference.clone(), node);
            space
                .by_name
                .entry(device.tag.clone())
                .or_insert_with(|| reference.clone());
            space.scopes.entry(scope.to_string()).or_default().push(reference);
            created += 1;
        }

        debug!(scope, created, total = devices.len(), "Tags registered");
        Ok(created)
    }

    async fn read_tags(&self, scope: &str) -> GridResult<Vec<Tag>> {
        self.ensure_session()?;

        let space = self.space.read();
        let tags = space
            .scopes
            .get(scope)
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| space.nodes.get(r).map(|n| n.tag.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(tags)
    }

    async fn write_values(&self, refs: &[TagRef], values: &[f64]) -> GridResult<usize> {
        check_write_args(refs, values)?;
        self.ensure_session()?;

        let now = Utc::now();
        let mut written = Vec::with_capacity(refs.len());
        {
            let mut space = self.space.write();
            for (reference, raw) in refs.iter().zip(values) {
                match space.set(reference, now, *raw) {
                    Ok(value) => {
                        let tag = space
                            .nodes
                            .get(reference)
                            .map(|n| n.tag.name.clone())
                            .unwrap_or_else(|| reference.to_string());
                        written.push(WriteRecord {
                            tag,
                            value,
                            timestamp: now,
                        });
                    },
                    Err(e) => warn!(reference = %reference, "Write skipped: {}", e),
                }
            }
        }

        let count = written.len();
        self.writes.lock().extend(written);
        trace!(count, "Values written");
        Ok(count)
    }

    async fn subscribe(
        &self,
        scope: &str,
        tags: &[Tag],
        interval_ms: u64,
        callback: DataCallback,
    ) -> GridResult<SubscriptionHandle> {
        self.ensure_session()?;

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let refs: HashSet<TagRef> = tags.iter().map(|t| t.reference.clone()).collect();
        let mut cursor = self.space.read().next_seq();

        let token = CancellationToken::new();
        let task_token = token.clone();
        let space = Arc::clone(&self.space);
        let link_up = Arc::clone(&self.link_up);
        let period = Duration::from_millis(interval_ms.max(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {},
                }
                if !link_up.load(Ordering::Acquire) {
                    continue;
                }

                let (batch, lost) = space.read().changes_since(&mut cursor, &refs);
                if lost > 0 {
                    warn!(%handle, lost, "Subscription lagged behind change log");
                }
                for change in batch {
                    callback(change);
                }
            }
            trace!(%handle, "Subscription task stopped");
        });

        self.subscriptions
            .lock()
            .insert(handle, Subscription { token, task });
        debug!(%handle, scope, tags = tags.len(), interval_ms, "Subscription created");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> GridResult<()> {
        let subscription = self
            .subscriptions
            .lock()
            .remove(&handle)
            .ok_or(GridError::SubscriptionNotFound(handle.0))?;
        subscription.token.cancel();
        if let Err(e) = subscription.task.await {
            error!(%handle, "Subscription task failed: {}", e);
        }
        debug!(%handle, "Subscription removed");
        Ok(())
    }
}
