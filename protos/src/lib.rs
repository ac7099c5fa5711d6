// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

pub mod gen {
    #![allow(clippy::all)]
    tonic::include_proto!("buildstream.v1");
}

mod conversions;
pub use conversions::require_digest;
