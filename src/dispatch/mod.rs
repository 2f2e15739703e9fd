//! Destination dispatchers.
//!
//! One implementation per destination kind, selected by the task's
//! `destination_kind`. A dispatcher attempts a single delivery and classifies
//! the outcome; retry scheduling stays in the worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::models::{DestinationKind, NotificationTask};
use crate::error::DeliveryFailure;

pub mod discord;
pub mod telegram;

pub use discord::DiscordDispatcher;
pub use telegram::TelegramDispatcher;

/// `Ok(())` on delivery; failures carry their retry classification.
pub type DispatchResult = Result<(), DeliveryFailure>;

#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn send(&self, task: &NotificationTask) -> DispatchResult;
}

/// Registry of configured dispatchers, keyed by destination kind.
///
/// Integrations are optional (a deployment may run Telegram-only), so a
/// lookup can miss; the worker treats that as a transient condition rather
/// than dead-lettering tasks for a bot that may come up on the next deploy.
#[derive(Default)]
pub struct DispatcherSet {
    dispatchers: HashMap<DestinationKind, Arc<dyn Dispatcher>>,
}

impl DispatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: DestinationKind, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.insert(kind, dispatcher);
    }

    pub fn get(&self, kind: DestinationKind) -> Option<Arc<dyn Dispatcher>> {
        self.dispatchers.get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}
