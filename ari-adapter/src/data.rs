//! Data provider session.
//!
//! Subscribe and unsubscribe requests are serialized per item: only the
//! oldest pending request of an item is handed to the user, the others wait
//! in arrival order. Replies for one item therefore leave in the order their
//! requests arrived.

use crate::config::SessionConfig;
use crate::error::AdapterError;
use crate::outbound::StreamMode;
use crate::response::Response;
use crate::session::{Phase, SessionCore};
use ari_protocol::data::{
    self, DataFamily, DataMessage, DataRequest, DiffAlgorithm, FieldValue, DATA_INIT, SUBSCRIBE,
    SUBSCRIBE_TOO_LATE, UNSUBSCRIBE,
};
use ari_protocol::{Exception, ExceptionKind};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub type InitHandler = Arc<dyn Fn(HashMap<String, Option<String>>, Response<()>) + Send + Sync>;
pub type ItemHandler = Arc<dyn Fn(String, Response<()>) + Send + Sync>;
pub type SnapshotPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Subscribe,
    Unsubscribe,
}

impl RequestKind {
    fn verb(&self) -> &'static str {
        match self {
            RequestKind::Subscribe => SUBSCRIBE,
            RequestKind::Unsubscribe => UNSUBSCRIBE,
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    id: String,
    kind: RequestKind,
}

#[derive(Default)]
struct ItemState {
    /// item -> id of the request that subscribed it
    subscriptions: HashMap<String, String>,
    /// item -> pending requests; the head is the one handed to the user
    queues: HashMap<String, VecDeque<Pending>>,
}

struct Inner {
    core: Arc<SessionCore>,
    init: Option<InitHandler>,
    subscribe: ItemHandler,
    unsubscribe: ItemHandler,
    snapshot_available: SnapshotPredicate,
    items: Mutex<ItemState>,
}

/// Builder for [`DataProvider`].
#[derive(Default)]
pub struct DataProviderBuilder {
    config: SessionConfig,
    init: Option<InitHandler>,
    subscribe: Option<ItemHandler>,
    unsubscribe: Option<ItemHandler>,
    snapshot_available: Option<SnapshotPredicate>,
}

impl DataProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Handler for the init request; without one init succeeds at once.
    pub fn on_init<F>(mut self, handler: F) -> Self
    where
        F: Fn(HashMap<String, Option<String>>, Response<()>) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(handler));
        self
    }

    pub fn on_subscribe<F>(mut self, handler: F) -> Self
    where
        F: Fn(String, Response<()>) + Send + Sync + 'static,
    {
        self.subscribe = Some(Arc::new(handler));
        self
    }

    pub fn on_unsubscribe<F>(mut self, handler: F) -> Self
    where
        F: Fn(String, Response<()>) + Send + Sync + 'static,
    {
        self.unsubscribe = Some(Arc::new(handler));
        self
    }

    /// Whether an item has a snapshot. Items without one get an
    /// end-of-snapshot right after their subscription is acknowledged.
    /// Every item has one unless set.
    pub fn snapshot_available<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.snapshot_available = Some(Arc::new(predicate));
        self
    }

    /// Builds the session and writes the credentials handshake.
    pub fn build(self, streams: StreamMode) -> Result<DataProvider, AdapterError> {
        let subscribe = self
            .subscribe
            .ok_or(AdapterError::MissingHandler("subscribe"))?;
        let unsubscribe = self
            .unsubscribe
            .ok_or(AdapterError::MissingHandler("unsubscribe"))?;

        let core = Arc::new(SessionCore::new(streams, self.config));
        core.send_credentials()?;
        tracing::info!(
            "[{}] data provider started ({})",
            core.log_id,
            if core.streams.is_dual() { "dual stream" } else { "single stream" }
        );

        Ok(DataProvider {
            inner: Arc::new(Inner {
                core,
                init: self.init,
                subscribe,
                unsubscribe,
                snapshot_available: self
                    .snapshot_available
                    .unwrap_or_else(|| Arc::new(|_: &str| true)),
                items: Mutex::new(ItemState::default()),
            }),
        })
    }
}

/// A data provider session.
#[derive(Clone)]
pub struct DataProvider {
    inner: Arc<Inner>,
}

impl DataProvider {
    pub fn builder() -> DataProviderBuilder {
        DataProviderBuilder::new()
    }

    /// Session id used in log lines.
    pub fn log_id(&self) -> &str {
        &self.inner.core.log_id
    }

    pub fn phase(&self) -> Phase {
        self.inner.core.phase()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Whether `item` currently has an acknowledged subscription.
    pub fn is_subscribed(&self, item: &str) -> bool {
        self.inner.items.lock().subscriptions.contains_key(item)
    }

    /// Handles one inbound message.
    ///
    /// Errors are fatal for the session.
    pub fn handle(&self, message: DataMessage) -> Result<(), AdapterError> {
        let core = &self.inner.core;
        tracing::debug!("[{}] << {} {:?}", core.log_id, message.id, message.body);

        match message.body {
            DataRequest::Keepalive => Ok(()),
            DataRequest::Close(close) => Err(core.close_by_peer(close.reason)),
            DataRequest::Init(init) => {
                core.begin_init(&init)?;
                let response = core.init_response(message.id, DATA_INIT, &init);
                match self.inner.init {
                    Some(ref handler) => {
                        handler(init.params, response);
                        Ok(())
                    }
                    None => response.success(()),
                }
            }
            DataRequest::Subscribe { item } => {
                core.check_operational(SUBSCRIBE)?;
                self.enqueue(item, message.id, RequestKind::Subscribe);
                Ok(())
            }
            DataRequest::Unsubscribe { item } => {
                core.check_operational(UNSUBSCRIBE)?;
                self.enqueue(item, message.id, RequestKind::Unsubscribe);
                Ok(())
            }
        }
    }

    fn enqueue(&self, item: String, id: String, kind: RequestKind) {
        let pending = Pending { id, kind };
        let dispatch_now = {
            let mut items = self.inner.items.lock();
            let queue = items.queues.entry(item.clone()).or_default();
            queue.push_back(pending.clone());
            queue.len() == 1
        };
        if dispatch_now {
            self.dispatch(item, pending);
        } else {
            tracing::debug!(
                "[{}] {} {} queued for {}",
                self.log_id(),
                kind.verb(),
                pending.id,
                item
            );
        }
    }

    /// Hands a queue head to the user. Runs without any lock held.
    fn dispatch(&self, item: String, pending: Pending) {
        let provider = self.clone();
        let resolved_item = item.clone();
        let Pending { id, kind } = pending;
        let response = Response::new(move |outcome| {
            provider.complete(&resolved_item, &id, kind, outcome)
        });
        let handler = match kind {
            RequestKind::Subscribe => &self.inner.subscribe,
            RequestKind::Unsubscribe => &self.inner.unsubscribe,
        };
        handler(item, response);
    }

    /// Applies the outcome of a queue head and hands the next head to the user.
    fn complete(
        &self,
        item: &str,
        id: &str,
        kind: RequestKind,
        outcome: Result<(), Exception>,
    ) -> Result<(), AdapterError> {
        let core = &self.inner.core;
        core.ensure_open()?;

        let emit_end_of_snapshot = kind == RequestKind::Subscribe
            && outcome.is_ok()
            && !(self.inner.snapshot_available)(item);

        let mut written = Ok(());
        let mut note = |result: Result<(), AdapterError>| {
            if written.is_ok() {
                written = result;
            }
        };

        let next = {
            let mut items = self.inner.items.lock();
            let ItemState {
                subscriptions,
                queues,
            } = &mut *items;
            let Some(queue) = queues.get_mut(item) else {
                return Err(AdapterError::SessionClosed);
            };

            match (kind, outcome) {
                (RequestKind::Subscribe, Ok(())) => {
                    note(core.write_reply(data::write_subscribe_reply(id)));
                    subscriptions.insert(item.to_string(), id.to_string());
                    if emit_end_of_snapshot {
                        note(core.write_all(data::write_end_of_snapshot(
                            &push_id(),
                            item,
                            id,
                        )));
                    }
                    queue.pop_front();
                }
                (RequestKind::Unsubscribe, Ok(())) => {
                    note(core.write_reply(data::write_unsubscribe_reply(id)));
                    subscriptions.remove(item);
                    queue.pop_front();
                    // requests that arrived before this unsubscribe was
                    // answered come in subscribe/unsubscribe pairs
                    while queue.len() > 1 {
                        for late in queue.drain(..2) {
                            note(core.write_reply(answer_late(&late)));
                        }
                    }
                }
                (kind, Err(exception)) => {
                    let frame = match kind {
                        RequestKind::Subscribe => data::write_subscribe_exception(id, &exception),
                        RequestKind::Unsubscribe => {
                            data::write_unsubscribe_exception(id, &exception)
                        }
                    };
                    note(core.write_reply(frame));
                    queue.pop_front();
                }
            }

            let next = queue.front().cloned();
            if next.is_none() {
                queues.remove(item);
            }
            next
        };

        if let Some(next) = next {
            self.dispatch(item.to_string(), next);
        }
        written
    }

    /// Writes the frame built from the subscription id of `item`, under the
    /// item lock so the push cannot overtake the unsubscribe reply.
    fn push_for_item<F>(&self, item: &str, frame: F) -> Result<(), AdapterError>
    where
        F: FnOnce(&str, &str) -> String,
    {
        let core = &self.inner.core;
        core.ensure_open()?;
        let items = self.inner.items.lock();
        let subscription_id = items
            .subscriptions
            .get(item)
            .ok_or_else(|| AdapterError::ItemNotSubscribed(item.to_string()))?;
        core.write_all(frame(&push_id(), subscription_id))
    }

    /// Pushes an update for a subscribed item.
    pub fn update<I, K>(&self, item: &str, is_snapshot: bool, fields: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: AsRef<str>,
    {
        self.push_for_item(item, |push_id, subscription_id| {
            data::write_update(push_id, item, subscription_id, is_snapshot, fields)
        })
    }

    /// Signals that the snapshot of a subscribed item is complete.
    pub fn end_of_snapshot(&self, item: &str) -> Result<(), AdapterError> {
        self.push_for_item(item, |push_id, subscription_id| {
            data::write_end_of_snapshot(push_id, item, subscription_id)
        })
    }

    /// Asks clients to drop the current state of a subscribed item.
    pub fn clear_snapshot(&self, item: &str) -> Result<(), AdapterError> {
        self.push_for_item(item, |push_id, subscription_id| {
            data::write_clear_snapshot(push_id, item, subscription_id)
        })
    }

    /// Declares the diff algorithms each field of a subscribed item accepts.
    pub fn declare_field_diff_order<I, K, A>(&self, item: &str, fields: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = (K, A)>,
        K: AsRef<str>,
        A: AsRef<[DiffAlgorithm]>,
    {
        self.push_for_item(item, |push_id, subscription_id| {
            data::write_field_diff_order(push_id, item, subscription_id, fields)
        })
    }

    /// Reports a failure of the whole data feed.
    pub fn failure(&self, exception: &Exception) -> Result<(), AdapterError> {
        let core = &self.inner.core;
        core.ensure_open()?;
        core.write_all(data::write_failure(&push_id(), exception))
    }

    /// Closes the session; pending requests are abandoned.
    pub fn shutdown(&self) {
        self.inner.core.shutdown();
        let mut items = self.inner.items.lock();
        items.queues.clear();
        items.subscriptions.clear();
    }

    #[cfg(test)]
    fn keepalive_period(&self) -> Option<std::time::Duration> {
        self.inner.core.keepalive_period()
    }
}

fn answer_late(late: &Pending) -> String {
    match late.kind {
        RequestKind::Subscribe => data::write_subscribe_exception(
            &late.id,
            &Exception::new(ExceptionKind::Subscription, SUBSCRIBE_TOO_LATE),
        ),
        RequestKind::Unsubscribe => data::write_unsubscribe_reply(&late.id),
    }
}

/// Pseudo-id of push frames.
fn push_id() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

impl crate::connection::InboundSession for DataProvider {
    type Family = DataFamily;

    fn handle(&self, message: DataMessage) -> Result<(), AdapterError> {
        DataProvider::handle(self, message)
    }

    fn shutdown(&self) {
        DataProvider::shutdown(self)
    }

    fn log_id(&self) -> &str {
        DataProvider::log_id(self)
    }
}
