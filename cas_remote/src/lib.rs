// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(clippy::all)]
#![allow(clippy::len_without_is_empty, clippy::too_many_arguments)]

mod client;
mod error;
mod retry;
mod server;

pub use client::RemoteStore;
pub use error::{RemoteError, Result};
pub use server::CasServer;
