// queued.rs — Run a handler on its own worker.
//
// Inline handlers run on the producer's thread. Wrapping a slow handler
// (an external sink, a network hook) in a QueuedHandler moves the work to
// a dedicated worker fed by an unbounded tokio channel: the producer only
// pays for a clone and a send, and the handler still sees events in
// append order. The worker is a plain thread draining the channel with
// `blocking_recv`, so a queue works with or without a running runtime.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use keel_events::Event;

use crate::error::HandlerError;
use crate::handler::EventHandler;
use crate::router::panic_message;

enum Message {
    Event(Box<Event>),
    Flush(oneshot::Sender<()>),
}

pub struct QueuedHandler {
    name: String,
    sender: Mutex<Option<UnboundedSender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedHandler {
    pub fn spawn(inner: Arc<dyn EventHandler>) -> Self {
        let name = inner.name().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = std::thread::Builder::new()
            .name(format!("keel-handler-{}", name))
            .spawn(move || run_worker(inner, receiver));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(handler = %name, error = %e, "failed to spawn handler thread");
                None
            }
        };
        let sender = worker.as_ref().map(|_| sender);
        Self {
            name,
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
        }
    }

    /// Block until every event queued so far has been handled.
    ///
    /// Blocks the calling thread; inside an async runtime use
    /// [`QueuedHandler::flush_async`].
    pub fn flush(&self) -> Result<(), HandlerError> {
        let (ack, done) = oneshot::channel();
        self.send(Message::Flush(ack))?;
        done.blocking_recv().map_err(|_| self.disconnected())
    }

    /// Resolves once every event queued so far has been handled.
    pub async fn flush_async(&self) -> Result<(), HandlerError> {
        let (ack, done) = oneshot::channel();
        self.send(Message::Flush(ack))?;
        done.await.map_err(|_| self.disconnected())
    }

    fn send(&self, message: Message) -> Result<(), HandlerError> {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.as_ref() {
            Some(sender) => sender.send(message).map_err(|_| self.disconnected()),
            None => Err(self.disconnected()),
        }
    }

    fn disconnected(&self) -> HandlerError {
        HandlerError::Disconnected {
            handler: self.name.clone(),
        }
    }
}

impl EventHandler for QueuedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.send(Message::Event(Box::new(event.clone())))
    }
}

impl Drop for QueuedHandler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!(handler = %self.name, "handler thread exited abnormally");
            }
        }
    }
}

fn run_worker(inner: Arc<dyn EventHandler>, mut receiver: UnboundedReceiver<Message>) {
    while let Some(message) = receiver.blocking_recv() {
        match message {
            Message::Event(event) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| inner.handle(&event)))
                    .unwrap_or_else(|p| Err(HandlerError::Panicked(panic_message(p))));
                if let Err(e) = result {
                    tracing::warn!(
                        handler = inner.name(),
                        event_id = %event.event_id,
                        error = %e,
                        "queued event handler failed"
                    );
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use keel_events::{EventDraft, EventId, EventIdGenerator};

    #[test]
    fn preserves_order_off_thread() {
        let seen: Arc<Mutex<Vec<EventId>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let producer_thread = std::thread::current().id();
        let inner = FnHandler::new("slow", move |e: &Event| {
            assert_ne!(std::thread::current().id(), producer_thread);
            sink.lock().unwrap().push(e.event_id);
            Ok(())
        });
        let queued = QueuedHandler::spawn(Arc::new(inner));

        let mut ids = EventIdGenerator::with_origin(5);
        let mut expected = Vec::new();
        for _ in 0..50 {
            let (id, ts) = ids.next(chrono::Utc::now());
            expected.push(id);
            queued
                .handle(&EventDraft::new("git", "commit", "a").into_event(id, ts))
                .unwrap();
        }
        queued.flush().unwrap();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn worker_survives_handler_panics() {
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let inner = FnHandler::new("flaky", move |e: &Event| {
            if e.kind == "boom" {
                panic!("boom");
            }
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        let queued = QueuedHandler::spawn(Arc::new(inner));
        let mut ids = EventIdGenerator::new();
        for kind in ["ok", "boom", "ok"] {
            let (id, ts) = ids.next(chrono::Utc::now());
            queued
                .handle(&EventDraft::new("git", kind, "a").into_event(id, ts))
                .unwrap();
        }
        queued.flush().unwrap();
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flush_async_waits_inside_a_runtime() {
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let inner = FnHandler::new("async", move |_: &Event| {
            std::thread::sleep(std::time::Duration::from_millis(2));
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        let queued = QueuedHandler::spawn(Arc::new(inner));
        let mut ids = EventIdGenerator::new();
        for _ in 0..10 {
            let (id, ts) = ids.next(chrono::Utc::now());
            queued
                .handle(&EventDraft::new("git", "commit", "a").into_event(id, ts))
                .unwrap();
        }
        queued.flush_async().await.unwrap();
        assert_eq!(*count.lock().unwrap(), 10);
    }
}
