// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Suspend/cancel control, shared by every queue's workers via a `watch` channel. On SIGTSTP or
//! a programmatic suspend the scheduler stops dispatching new work; on a cancel it additionally
//! tells in-flight workers to give up and mark their element Failed.
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Suspended,
    Cancelled,
}

#[derive(Clone)]
pub struct Control {
    sender: watch::Sender<ControlState>,
}

pub struct ControlWatch {
    receiver: watch::Receiver<ControlState>,
}

impl Control {
    pub fn new() -> (Control, ControlWatch) {
        let (sender, receiver) = watch::channel(ControlState::Running);
        (Control { sender }, ControlWatch { receiver })
    }

    pub fn suspend(&self) {
        let _ = self.sender.send(ControlState::Suspended);
    }

    pub fn resume(&self) {
        let _ = self.sender.send(ControlState::Running);
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(ControlState::Cancelled);
    }

    pub fn state(&self) -> ControlState {
        *self.sender.borrow()
    }
}

impl ControlWatch {
    pub fn state(&self) -> ControlState {
        *self.receiver.borrow()
    }

    /// Blocks while suspended; returns immediately (in either direction) once cancelled or
    /// resumed.
    pub async fn wait_while_suspended(&mut self) {
        while *self.receiver.borrow() == ControlState::Suspended {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn clone_receiver(&self) -> ControlWatch {
        ControlWatch {
            receiver: self.receiver.clone(),
        }
    }
}

/// Resolves once `watch` reaches `Cancelled`, for racing against an in-flight job future so a
/// cancel can interrupt work that is already running rather than only blocking new dispatch.
pub async fn wait_for_cancel(watch: &mut ControlWatch) {
    loop {
        if *watch.receiver.borrow() == ControlState::Cancelled {
            return;
        }
        if watch.receiver.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn suspend_blocks_wait_until_resumed() {
        let (control, mut watch) = Control::new();
        control.suspend();
        let waiter = tokio::spawn(async move {
            watch.wait_while_suspended().await;
            watch.state()
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        control.resume();
        assert_eq!(waiter.await.unwrap(), ControlState::Running);
    }

    #[test]
    fn cancel_overrides_suspend() {
        let (control, watch) = Control::new();
        control.suspend();
        control.cancel();
        assert_eq!(watch.state(), ControlState::Cancelled);
    }
}
