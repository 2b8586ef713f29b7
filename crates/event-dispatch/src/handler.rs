//! The handler contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use thiserror::Error;

/// What a handler receives for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stable across attempts; use it as the downstream idempotency key.
    pub event_id: String,
    pub event_type: String,
    /// Downstream system the event was addressed to.
    pub destination: String,
    /// Opaque payload exactly as the producer stored it.
    pub payload: String,
    /// 1 for the first attempt, incremented per retry.
    pub attempt: u32,
}

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Transient: network error, downstream 5xx, timeout. Rescheduled with
    /// backoff until the attempt budget runs out.
    #[error("{0}")]
    Retryable(String),

    /// Permanent: malformed payload, downstream rejected the request.
    /// Dead-lettered immediately.
    #[error("{0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Performs the side effect for one route.
///
/// Delivery is at least once: the same event can arrive again after a
/// crash between the side effect and the outcome being recorded, or after
/// a timeout that fired while the downstream call still went through.
/// Implementations must make a repeated delivery of one `event_id` produce
/// the same downstream effect as a single one, typically by sending
/// `event_id` as an idempotency key. The worker does not check this.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> HandlerResult;
}

/// Boxed async closure.
pub type HandlerFn =
    Box<dyn Fn(Delivery) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// Adapts an async closure to [`EventHandler`].
pub struct FnHandler {
    f: HandlerFn,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            f: Box::new(move |delivery| Box::pin(f(delivery))),
        }
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerResult {
        (self.f)(delivery.clone()).await
    }
}

/// Decodes the JSON payload into `T` before calling `f`.
///
/// A payload that does not decode is a [`HandlerError::Fatal`]: retrying
/// the same bytes cannot succeed.
pub struct TypedHandler<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> TypedHandler<T, F> {
    pub fn new<Fut>(f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> EventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> HandlerResult {
        let payload: T = serde_json::from_str(&delivery.payload).map_err(|e| {
            HandlerError::fatal(format!(
                "malformed {} payload: {}",
                delivery.event_type, e
            ))
        })?;
        (self.f)(payload, delivery.clone()).await
    }
}
