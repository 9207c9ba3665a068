//! Control gateway contract
//!
//! The gateway is the address space the protection service talks to: it
//! delivers measurements and status changes through subscriptions and
//! accepts control writes. Connection management belongs to the gateway;
//! the service only reacts to the error kinds it reports.
//! `GridError::Connection` and `NotConnected` make the manager
//! reconnect and replay its startup sequence.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use errors::{GridError, GridResult};
use grid_model::{DeviceSpec, Tag, TagRef, Value};

pub use memory::MemoryGateway;

/// Handle returned by [`ControlGateway::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// A value change delivered by a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    pub tag: String,
    pub reference: TagRef,
    /// Source timestamp of the value
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// Subscription callback, invoked from gateway tasks
pub type DataCallback = Arc<dyn Fn(DataChange) + Send + Sync>;

#[async_trait]
pub trait ControlGateway: Send + Sync {
    /// Endpoint description used in logs and errors
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> GridResult<()>;

    /// Drop the session and every subscription attached to it
    async fn disconnect(&self) -> GridResult<()>;

    /// Cheap round trip to detect a lost session
    async fn ping(&self) -> GridResult<()>;

    /// Create the scope folder and its tags if missing; returns the number of new tags
    async fn register_tags(&self, scope: &str, devices: &[DeviceSpec]) -> GridResult<usize>;

    /// Tags of a scope with their references and declared value types
    async fn read_tags(&self, scope: &str) -> GridResult<Vec<Tag>>;

    /// Best-effort write of `values[i]` to `refs[i]`
    ///
    /// Each value is converted to the tag's declared type. Unknown references
    /// and values that do not fit the declared type are skipped and logged.
    /// Returns the number of tags written.
    async fn write_values(&self, refs: &[TagRef], values: &[f64]) -> GridResult<usize>;

    /// Deliver changes of `tags` to `callback`, sampled every `interval_ms`
    ///
    /// Delivery is at-least-once. Only changes after the subscription was
    /// created are delivered.
    async fn subscribe(
        &self,
        scope: &str,
        tags: &[Tag],
        interval_ms: u64,
        callback: DataCallback,
    ) -> GridResult<SubscriptionHandle>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> GridResult<()>;
}

/// Write the same value to every tag in `tags`
///
/// An empty tag list is a no-op.
pub async fn write_all(
    gateway: &dyn ControlGateway,
    tags: &[Tag],
    value: f64,
) -> GridResult<usize> {
    if tags.is_empty() {
        return Ok(0);
    }
    let refs: Vec<TagRef> = tags.iter().map(|t| t.reference.clone()).collect();
    let values = vec![value; refs.len()];
    gateway.write_values(&refs, &values).await
}

/// Validate the parallel slices passed to `write_values`
pub(crate) fn check_write_args(refs: &[TagRef], values: &[f64]) -> GridResult<()> {
    if refs.len() != values.len() {
        return Err(GridError::InvalidParameter {
            param: "values".to_string(),
            reason: format!("{} references but {} values", refs.len(), values.len()),
        });
    }
    Ok(())
}
