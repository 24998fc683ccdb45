//! Event and reverse-request subscriptions.
//! - subscribe_event/publish_event: per-event-name fan out in registration order
//! - subscribe_requests/publish_request: reverse requests to the first live handler
//! - EventSubscription/RequestSubscription: unsubscribe on drop

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use smol_str::SmolStr;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::protocol::{Event, Request};

type EventSender = UnboundedSender<Event<Value>>;
type RequestSender = UnboundedSender<Request<Value>>;

#[derive(Debug, Default)]
struct SubscriberTable {
    next_id: u64,
    closed: bool,
    events: FxHashMap<SmolStr, Vec<(u64, EventSender)>>,
    requests: Vec<(u64, RequestSender)>,
}

impl SubscriberTable {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub(super) struct Subscribers {
    inner: Mutex<SubscriberTable>,
}

impl Subscribers {
    pub(super) fn subscribe_event(self: &Arc<Self>, event: &str) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name = SmolStr::new(event);
        let mut table = self.inner.lock();
        let id = table.allocate_id();
        if !table.closed {
            table
                .events
                .entry(name.clone())
                .or_default()
                .push((id, sender));
        }
        EventSubscription {
            id,
            event: name,
            receiver,
            owner: Arc::downgrade(self),
        }
    }

    pub(super) fn subscribe_requests(self: &Arc<Self>) -> RequestSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut table = self.inner.lock();
        let id = table.allocate_id();
        if !table.closed {
            table.requests.push((id, sender));
        }
        RequestSubscription {
            id,
            receiver,
            owner: Arc::downgrade(self),
        }
    }

    /// Fan an event out to every live subscriber. Returns the delivery count.
    pub(super) fn publish_event(&self, event: &Event<Value>) -> usize {
        let mut table = self.inner.lock();
        let Some(subscribers) = table.events.get_mut(event.event.as_str()) else {
            return 0;
        };
        subscribers.retain(|(_, sender)| sender.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Hand a reverse request to the first live handler.
    /// Returns the request back when nobody can answer it.
    pub(super) fn publish_request(&self, request: Request<Value>) -> Option<Request<Value>> {
        let mut table = self.inner.lock();
        let mut request = request;
        while let Some((_, sender)) = table.requests.first() {
            match sender.send(request) {
                Ok(()) => return None,
                Err(mpsc::error::SendError(returned)) => {
                    request = returned;
                    table.requests.remove(0);
                }
            }
        }
        Some(request)
    }

    /// Drop every sender so subscription streams end.
    pub(super) fn close(&self) {
        let mut table = self.inner.lock();
        table.closed = true;
        table.events.clear();
        table.requests.clear();
    }

    fn unsubscribe_event(&self, event: &str, id: u64) {
        let mut table = self.inner.lock();
        if let Some(subscribers) = table.events.get_mut(event) {
            subscribers.retain(|(existing, _)| *existing != id);
            if subscribers.is_empty() {
                table.events.remove(event);
            }
        }
    }

    fn unsubscribe_requests(&self, id: u64) {
        self.inner
            .lock()
            .requests
            .retain(|(existing, _)| *existing != id);
    }
}

/// A stream of one named event. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    event: SmolStr,
    receiver: UnboundedReceiver<Event<Value>>,
    owner: Weak<Subscribers>,
}

impl EventSubscription {
    /// Next event, or `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<Event<Value>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event<Value>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.unsubscribe_event(&self.event, self.id);
        }
    }
}

/// A stream of reverse requests issued by the adapter. Dropping it unsubscribes.
#[derive(Debug)]
pub struct RequestSubscription {
    id: u64,
    receiver: UnboundedReceiver<Request<Value>>,
    owner: Weak<Subscribers>,
}

impl RequestSubscription {
    pub async fn recv(&mut self) -> Option<Request<Value>> {
        self.receiver.recv().await
    }
}

impl Drop for RequestSubscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.unsubscribe_requests(self.id);
        }
    }
}
