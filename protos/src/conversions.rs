// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::gen::Digest;

impl<'a> From<&'a hashing::Digest> for Digest {
    fn from(d: &'a hashing::Digest) -> Self {
        Self {
            hash: d.hash.to_hex(),
            size_bytes: d.size_bytes as i64,
        }
    }
}

impl From<hashing::Digest> for Digest {
    fn from(d: hashing::Digest) -> Self {
        Self {
            hash: d.hash.to_hex(),
            size_bytes: d.size_bytes as i64,
        }
    }
}

impl<'a> TryFrom<&'a Digest> for hashing::Digest {
    type Error = String;

    fn try_from(d: &Digest) -> Result<Self, Self::Error> {
        hashing::Fingerprint::from_hex_string(&d.hash)
            .map_err(|err| format!("Bad fingerprint in Digest {:?}: {:?}", &d.hash, err))
            .map(|fingerprint| hashing::Digest::new(fingerprint, d.size_bytes as usize))
    }
}

impl TryFrom<Digest> for hashing::Digest {
    type Error = String;

    fn try_from(d: Digest) -> Result<Self, Self::Error> {
        hashing::Digest::try_from(&d)
    }
}

/// Unwrap an `Option<&Digest>` as the remote-execution protocol requires: a missing Digest in a
/// place the contract requires one is a protocol violation, not an absent value.
pub fn require_digest<'a, D: Into<Option<&'a Digest>>>(digest_opt: D) -> Result<hashing::Digest, String> {
    match digest_opt.into() {
        Some(digest) => hashing::Digest::try_from(digest),
        None => Err("Protocol violation: Digest missing from a CAS protobuf message.".to_string()),
    }
}
