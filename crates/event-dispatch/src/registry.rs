//! Route → handler mapping.
//!
//! A route is a destination plus an optional event type. Lookup tries the
//! exact `(destination, event_type)` pair first, then the destination's
//! catch-all, so one sink can take every event addressed to it while a
//! specific type still gets its own handler.

use crate::{Delivery, EventHandler, FnHandler, HandlerError, HandlerResult, TypedHandler};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Destination of events that do not name one.
pub const DEFAULT_DESTINATION: &str = "default";

/// Where a handler is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub destination: String,
    /// `None` matches every event type sent to `destination`.
    pub event_type: Option<String>,
}

impl Route {
    pub fn new(destination: impl Into<String>, event_type: Option<String>) -> Self {
        Self {
            destination: destination.into(),
            event_type,
        }
    }

    /// One event type at the default destination.
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self::new(DEFAULT_DESTINATION, Some(event_type.into()))
    }

    /// Every event type sent to `destination`.
    pub fn destination(destination: impl Into<String>) -> Self {
        Self::new(destination, None)
    }

    /// `destination` with `event_type`.
    pub fn exact(destination: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self::new(destination, Some(event_type.into()))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event_type {
            Some(event_type) => write!(f, "{}/{}", self.destination, event_type),
            None => write!(f, "{}/*", self.destination),
        }
    }
}

/// Explicitly constructed handler table, handed to the worker.
///
/// ```ignore
/// let mut registry = DispatchRegistry::new();
/// registry.register_typed("review.imported", |review: ReviewImported, delivery| async move {
///     reviews_api.push(&delivery.event_id, review).await
/// });
/// registry.register_route(Route::destination("TELEGRAM"), WebhookHandler::new(telegram)?);
/// let worker = OutboxWorker::new(store, Arc::new(registry), worker_config);
/// ```
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    handlers: HashMap<Route, Arc<dyn EventHandler>>,
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("routes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type` at the default destination,
    /// replacing any previous one.
    pub fn register<H>(&mut self, event_type: impl Into<String>, handler: H) -> &mut Self
    where
        H: EventHandler + 'static,
    {
        self.register_route(Route::event_type(event_type), handler)
    }

    /// Register `handler` for an explicit route, replacing any previous one.
    pub fn register_route<H>(&mut self, route: Route, handler: H) -> &mut Self
    where
        H: EventHandler + 'static,
    {
        self.register_arc(route, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&mut self, route: Route, handler: Arc<dyn EventHandler>) -> &mut Self {
        let key = route.to_string();
        if self.handlers.insert(route, handler).is_some() {
            warn!(route = %key, "Replacing previously registered handler");
        }
        self
    }

    /// Register an async closure over the raw delivery.
    pub fn register_fn<F, Fut>(&mut self, event_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(event_type, FnHandler::new(f))
    }

    /// Register an async closure over a JSON-decoded payload.
    pub fn register_typed<T, F, Fut>(&mut self, event_type: impl Into<String>, f: F) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(event_type, TypedHandler::new(f))
    }

    /// Handler for `event_type` at the default destination.
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.lookup(DEFAULT_DESTINATION, event_type)
    }

    /// Exact route first, then the destination's catch-all.
    pub fn lookup(&self, destination: &str, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .get(&Route::exact(destination, event_type))
            .or_else(|| self.handlers.get(&Route::destination(destination)))
            .cloned()
    }

    /// Like [`lookup`](Self::lookup), but a missing route is a fatal handler
    /// error: no later attempt will find a handler that is not registered now.
    pub fn resolve(
        &self,
        destination: &str,
        event_type: &str,
    ) -> Result<Arc<dyn EventHandler>, HandlerError> {
        self.lookup(destination, event_type).ok_or_else(|| {
            HandlerError::fatal(format!(
                "no handler registered for event type {} at destination {}",
                event_type, destination
            ))
        })
    }

    pub fn contains(&self, route: &Route) -> bool {
        self.handlers.contains_key(route)
    }

    /// Registered routes, sorted.
    pub fn routes(&self) -> Vec<&Route> {
        let mut routes: Vec<&Route> = self.handlers.keys().collect();
        routes.sort_unstable();
        routes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
