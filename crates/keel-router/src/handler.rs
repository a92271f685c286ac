// handler.rs — The handler trait and a closure adapter.

use keel_events::Event;

use crate::error::HandlerError;

/// Receives copies of written events.
///
/// Implementations decide what to do with each event: index it, mirror it
/// to an external sink, aggregate metrics. Errors are logged by the router
/// and don't stop the system.
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and statistics.
    fn name(&self) -> &str;

    fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Adapts a closure into a handler.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event)
    }
}
