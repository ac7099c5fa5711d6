// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Timed activities: `start_activity(name) → <work> → end_activity(name, success|failure)`
//! guarantees a matched Start/Success or Start/Fail pair with an elapsed time that excludes any
//! time the scheduler spent suspended.
use std::time::{Duration, Instant};

use crate::bus::MessageBus;
use crate::message::{Message, MessageKind};

/// A single in-flight timed activity. Dropping it without calling `finish` records nothing
/// further; callers are expected to always call `finish`.
pub struct Activity<'a> {
    bus: &'a MessageBus,
    element_id: Option<String>,
    action: String,
    started: Instant,
    paused_total: Duration,
    paused_since: Option<Instant>,
}

impl<'a> Activity<'a> {
    pub(crate) fn start(bus: &'a MessageBus, action: impl Into<String>) -> Activity<'a> {
        let action = action.into();
        bus.send(Message::new(MessageKind::Start, action.clone(), format!("Starting {action}")));
        Activity {
            bus,
            element_id: None,
            action,
            started: Instant::now(),
            paused_total: Duration::ZERO,
            paused_since: None,
        }
    }

    pub fn for_element(mut self, element_id: impl Into<String>) -> Activity<'a> {
        self.element_id = Some(element_id.into());
        self
    }

    /// Call when the scheduler suspends; the time between this and the matching `resume` is
    /// subtracted from the reported elapsed time.
    pub fn pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        let mut paused = self.paused_total;
        if let Some(since) = self.paused_since {
            paused += since.elapsed();
        }
        self.started.elapsed().saturating_sub(paused)
    }

    /// Ends the activity, emitting a `Success` or `Fail` message carrying the paused-adjusted
    /// elapsed time.
    pub fn finish(self, success: bool, text: impl Into<String>) {
        let kind = if success { MessageKind::Success } else { MessageKind::Fail };
        let mut message = Message::new(kind, self.action.clone(), text).with_elapsed(self.elapsed());
        if let Some(element_id) = self.element_id {
            message = message.for_element(element_id);
        }
        self.bus.send(message);
    }
}
