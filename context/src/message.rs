// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Messages flowing from workers to the frontend over the message bus.
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Status,
    Info,
    Warn,
    Fail,
    Bug,
    Start,
    Success,
}

/// One event on the message bus. `detail` carries a longer multi-line body (e.g. a command's
/// stderr tail) that a frontend may choose to elide at low verbosity.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub element_id: Option<String>,
    pub action: String,
    pub text: String,
    pub detail: Option<String>,
    pub elapsed: Option<Duration>,
    pub logfile: Option<String>,
}

impl Message {
    pub fn new(kind: MessageKind, action: impl Into<String>, text: impl Into<String>) -> Message {
        Message {
            kind,
            element_id: None,
            action: action.into(),
            text: text.into(),
            detail: None,
            elapsed: None,
            logfile: None,
        }
    }

    pub fn for_element(mut self, element_id: impl Into<String>) -> Message {
        self.element_id = Some(element_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Message {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Message {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn with_logfile(mut self, logfile: impl Into<String>) -> Message {
        self.logfile = Some(logfile.into());
        self
    }
}
