// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The process-wide `Context`: resolved configuration, the CAS handle, and the message bus.
//! Its lifetime spans one CLI invocation.
use std::sync::Arc;

use cas::Store;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::error::Result;

pub struct Context {
    pub config: Config,
    pub store: Arc<Store>,
    pub bus: MessageBus,
}

impl Context {
    /// Opens the CAS store at `config.cache_dir` and wires up a fresh message bus. Returns the
    /// receiving half so the caller can run the dispatch loop (typically on the frontend).
    pub async fn new(config: Config) -> Result<(Context, tokio::sync::mpsc::UnboundedReceiver<crate::message::Message>)> {
        let store = Store::new(config.cache_dir.join("cas"), 0, 0).await?;
        let (bus, receiver) = MessageBus::channel();
        Ok((
            Context {
                config,
                store: Arc::new(store),
                bus,
            },
            receiver,
        ))
    }
}
