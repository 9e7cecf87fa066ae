//! Delivery handlers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use agent_bus_types::{BusError, BusResult, Message, MessageType};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;

/// Receives delivered messages of the types it is registered for.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str {
        "handler"
    }

    /// Handle a delivered message, optionally producing a response.
    async fn handle(&self, message: &Message) -> BusResult<Option<Message>>;
}

#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: RwLock<HashMap<MessageType, Vec<Arc<dyn MessageHandler>>>>,
}

impl HandlerTable {
    pub(crate) fn register(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    pub(crate) fn count(&self, message_type: MessageType) -> usize {
        self.handlers
            .read()
            .get(&message_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Run every handler for the message's type in registration order.
    /// The first response wins; the first failure stops delivery.
    pub(crate) async fn invoke(&self, message: &Message) -> BusResult<Option<Message>> {
        let handlers = self
            .handlers
            .read()
            .get(&message.message_type)
            .cloned()
            .unwrap_or_default();

        let mut response = None;
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
            match outcome {
                Ok(Ok(reply)) => {
                    if response.is_none() {
                        response = reply;
                    }
                }
                Ok(Err(e @ BusError::HandlerExecution { .. })) => return Err(e),
                Ok(Err(e)) => {
                    return Err(BusError::HandlerExecution {
                        handler: handler.name().to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(BusError::HandlerExecution {
                        handler: handler.name().to_string(),
                        reason: "handler panicked".into(),
                    })
                }
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, message: &Message) -> BusResult<Option<Message>> {
            let reply = Message::builder(message.to_agent.clone(), message.from_agent.clone(), message.tenant_id.clone())
                .message_type(MessageType::Response)
                .conversation(message.conversation_id)
                .constitutional_hash(message.constitutional_hash.clone())
                .build();
            Ok(Some(reply))
        }
    }

    struct Panics;

    #[async_trait]
    impl MessageHandler for Panics {
        async fn handle(&self, _message: &Message) -> BusResult<Option<Message>> {
            panic!("boom")
        }
    }

    fn query() -> Message {
        Message::builder("planner", "executor", "tenant-a")
            .message_type(MessageType::Query)
            .constitutional_hash("cdd01ef066bc6cf2")
            .build()
    }

    #[tokio::test]
    async fn first_response_is_returned() {
        let table = HandlerTable::default();
        table.register(MessageType::Query, Arc::new(Echo));
        let reply = table.invoke(&query()).await.unwrap().unwrap();
        assert_eq!(reply.to_agent.as_str(), "planner");
        assert_eq!(reply.message_type, MessageType::Response);
    }

    #[tokio::test]
    async fn unhandled_type_has_no_response() {
        let table = HandlerTable::default();
        table.register(MessageType::Event, Arc::new(Echo));
        assert!(table.invoke(&query()).await.unwrap().is_none());
        assert_eq!(table.count(MessageType::Query), 0);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_an_error() {
        let table = HandlerTable::default();
        table.register(MessageType::Query, Arc::new(Panics));
        let err = table.invoke(&query()).await.unwrap_err();
        assert_eq!(err.error_code(), "HANDLER_EXECUTION_FAILED");
    }
}
