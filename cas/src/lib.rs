// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(clippy::all)]
#![allow(clippy::len_without_is_empty, clippy::too_many_arguments)]

mod error;
mod store;
mod tree;

pub use error::{CasError, Result};
pub use store::Store;
pub use tree::{decode_directory, encode_directory, TreeEntry};

pub use hashing::Digest;
