// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#![deny(clippy::all)]

mod activity;
mod bus;
mod config;
mod context;
mod error;
mod message;

pub use activity::Activity;
pub use bus::{drain, MessageBus};
pub use config::{Config, LogFormat, OnErrorPolicy};
pub use context::Context;
pub use error::{ContextError, Result};
pub use message::{Message, MessageKind};
