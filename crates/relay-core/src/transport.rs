//! Transport seam between a communicator and the coordinator

use async_trait::async_trait;
use std::sync::Arc;

use crate::{Message, Result};

/// One request/reply exchange with the coordinator.
///
/// Implementations send exactly one envelope and return the coordinator's reply list.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: Message) -> Result<Vec<Message>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn exchange(&self, request: Message) -> Result<Vec<Message>> {
        (**self).exchange(request).await
    }
}
