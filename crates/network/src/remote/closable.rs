use crate::error::ConnectionError;
use async_trait::async_trait;
use log::{debug, warn};

/// Capability of a remote channel to release its resources.
///
/// Implementations must be idempotent: closing an already closed channel is a
/// no-op. Types that hold nothing worth releasing keep the default.
#[async_trait]
pub trait Closable: Send {
    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[async_trait]
impl<T: Closable> Closable for Option<T> {
    async fn close(&mut self) -> Result<(), ConnectionError> {
        match self {
            Some(inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T: Closable + ?Sized> Closable for Box<T> {
    async fn close(&mut self) -> Result<(), ConnectionError> {
        (**self).close().await
    }
}

/// Closes every client in order.
///
/// A failing client is logged and skipped so the rest still get released;
/// calling this again on the same clients is harmless.
pub async fn close_clients(clients: &mut [&mut dyn Closable]) {
    for (index, client) in clients.iter_mut().enumerate() {
        match client.close().await {
            Ok(()) => debug!("Closed client #{index}"),
            Err(e) => warn!("Failed to close client #{index}: {e}"),
        }
    }
}
