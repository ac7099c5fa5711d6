// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use prost_build::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::new();
    // Let large blobs move through the wire layer as `bytes::Bytes` instead of `Vec<u8>`.
    config.bytes(["."]);

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_with_config(
            config,
            &[
                "proto/buildstream/digest.proto",
                "proto/buildstream/capabilities.proto",
                "proto/buildstream/cas.proto",
                "proto/buildstream/bytestream.proto",
                "proto/buildstream/reference.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
