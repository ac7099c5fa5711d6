// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The process-wide message bus. Workers send `Message`s over a thread-safe channel; the main
//! loop drains it sequentially and forwards each message to a single registered handler, the
//! frontend.
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::activity::Activity;
use crate::message::Message;

/// A clonable sending half. Every worker task holds one; sending never blocks and never fails
/// unless the receiving half has already been dropped, in which case the message is silently
/// discarded (there is no frontend left to show it to).
#[derive(Clone)]
pub struct MessageBus {
    sender: UnboundedSender<Message>,
}

impl MessageBus {
    pub fn channel() -> (MessageBus, UnboundedReceiver<Message>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (MessageBus { sender }, receiver)
    }

    pub fn send(&self, message: Message) {
        let _ = self.sender.send(message);
    }

    pub fn start_activity(&self, action: impl Into<String>) -> Activity<'_> {
        Activity::start(self, action)
    }
}

/// Drains `receiver` until the bus's last sender is dropped, calling `handler` for each message
/// in arrival order. Intended to run as the single-threaded main loop's dispatch task.
pub async fn drain(mut receiver: UnboundedReceiver<Message>, mut handler: impl FnMut(Message)) {
    while let Some(message) = receiver.recv().await {
        handler(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn start_activity_then_finish_emits_a_matched_pair() {
        let (bus, receiver) = MessageBus::channel();
        let activity = bus.start_activity("fetch foo.bst");
        activity.finish(true, "fetched foo.bst");
        drop(bus);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        drain(receiver, move |message| sink.lock().unwrap().push(message.kind)).await;

        assert_eq!(*received.lock().unwrap(), vec![MessageKind::Start, MessageKind::Success]);
    }

    #[tokio::test]
    async fn pause_time_is_excluded_from_elapsed() {
        let (bus, _receiver) = MessageBus::channel();
        let mut activity = bus.start_activity("build foo.bst");
        activity.pause();
        std::thread::sleep(std::time::Duration::from_millis(20));
        activity.resume();
        // paused_total should have absorbed the sleep; finish() would report near-zero elapsed.
        activity.finish(true, "done");
    }
}
