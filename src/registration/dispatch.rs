//! Event dispatch loop
//!
//! Each inbound event is handled on its own task so a slow store call for
//! one chat does not hold up the others.

use super::Registration;
use crate::channels::{ChatConnector, ChatEvent};
use crate::context::CallContext;
use crate::logging::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Consume `events` until the channel closes or `shutdown` fires.
///
/// Replies are sent through `connector`; send failures are logged and
/// dropped. In-flight handlers are awaited before returning, and they see
/// `shutdown` through their call contexts.
pub async fn dispatch_events(
    registration: Arc<Registration>,
    connector: Arc<dyn ChatConnector>,
    mut events: mpsc::Receiver<ChatEvent>,
    shutdown: CancellationToken,
    event_timeout: Duration,
    log: Logger,
) {
    let mut handlers = JoinSet::new();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        // Reap finished handlers so the set does not grow unbounded
        while handlers.try_join_next().is_some() {}

        let registration = registration.clone();
        let connector = connector.clone();
        let log = log.clone();
        let ctx = CallContext::new(shutdown.child_token()).with_timeout(event_timeout);
        handlers.spawn(async move {
            let replies = registration.handle(&ctx, &event).await;
            for reply in replies {
                if let Err(e) = connector.send_message(&ctx, reply).await {
                    log.warn(format_args!(
                        "Failed to reply to chat {}: {}",
                        event.chat_id, e
                    ));
                }
            }
        });
    }

    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            log.error(format_args!("Event handler panicked: {}", e));
        }
    }
    log.debug("Event dispatch stopped");
}
