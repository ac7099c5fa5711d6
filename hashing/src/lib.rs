// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(clippy::all)]
#![allow(clippy::len_without_is_empty, clippy::too_many_arguments)]

use std::fmt;
use std::io::{self, Error, Write};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use byteorder::ByteOrder;
use digest::consts::U32;
use generic_array::GenericArray;
use serde::de::{MapAccess, Visitor};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::{Deserialize, Deserializer};
use sha2::{Digest as Sha256Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};

pub const FINGERPRINT_SIZE: usize = 32;

pub const EMPTY_FINGERPRINT: Fingerprint = Fingerprint([
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
]);

pub const EMPTY_DIGEST: Digest = Digest {
    hash: EMPTY_FINGERPRINT,
    size_bytes: 0,
};

/// A SHA-256 fingerprint: the hash half of a [`Digest`].
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub fn from_bytes_unsafe(bytes: &[u8]) -> Fingerprint {
        if bytes.len() != FINGERPRINT_SIZE {
            panic!(
                "Input value was not a fingerprint; had length: {}",
                bytes.len()
            );
        }
        let mut fingerprint = [0; FINGERPRINT_SIZE];
        fingerprint.clone_from_slice(&bytes[0..FINGERPRINT_SIZE]);
        Fingerprint(fingerprint)
    }

    pub fn from_bytes(bytes: GenericArray<u8, U32>) -> Fingerprint {
        Fingerprint(bytes.into())
    }

    pub fn from_hex_string(hex_string: &str) -> Result<Fingerprint, String> {
        <[u8; FINGERPRINT_SIZE] as hex::FromHex>::from_hex(hex_string)
            .map(Fingerprint)
            .map_err(|e| format!("{e:?}"))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        let mut s = String::new();
        for &byte in &self.0 {
            fmt::Write::write_fmt(&mut s, format_args!("{byte:02x}")).unwrap();
        }
        s
    }

    /// A strong but short hash value derived from a prefix of this fingerprint, useful as a
    /// sharding/bucketing key without needing the full 32 bytes.
    pub fn prefix_hash(&self) -> u64 {
        byteorder::BigEndian::read_u64(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_hex().as_str())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FingerprintVisitor;

        impl<'de> Visitor<'de> for FingerprintVisitor {
            type Value = Fingerprint;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct Fingerprint")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Fingerprint::from_hex_string(v).map_err(|err| {
                    serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(&format!("{v:?}: {err}")),
                        &format!("a hex representation of a {FINGERPRINT_SIZE} byte value")
                            .as_str(),
                    )
                })
            }
        }

        deserializer.deserialize_string(FingerprintVisitor)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::from_hex_string(s)
    }
}

impl TryFrom<&str> for Fingerprint {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Fingerprint::from_hex_string(s)
    }
}

/// A pair `(hash, size)` identifying an immutable CAS object. Equality is by value; ordering is
/// total by hash, so that digests can be used as BTree keys for stable sorts (e.g. the sorted
/// strong keys of build dependencies that feed into a cache key).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Digest {
    pub hash: Fingerprint,
    pub size_bytes: usize,
}

impl Digest {
    pub fn new(hash: Fingerprint, size_bytes: usize) -> Digest {
        Digest { hash, size_bytes }
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::default();
        hasher.update(bytes);
        Digest::new(Fingerprint::from_bytes(hasher.finalize()), bytes.len())
    }

    /// The canonical textual form `"<hex>/<size>"`, used as resource names in the remote
    /// protocol and as the on-disk reference-file content.
    pub fn to_canonical_string(&self) -> String {
        format!("{}/{}", self.hash, self.size_bytes)
    }

    pub fn from_canonical_string(s: &str) -> Result<Digest, String> {
        let (hash, size) = s
            .split_once('/')
            .ok_or_else(|| format!("not a canonical digest: {s:?}"))?;
        let hash = Fingerprint::from_hex_string(hash)?;
        let size_bytes = size
            .parse::<usize>()
            .map_err(|e| format!("invalid digest size in {s:?}: {e}"))?;
        Ok(Digest::new(hash, size_bytes))
    }
}

impl PartialOrd for Digest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Digest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut obj = serializer.serialize_struct("digest", 2)?;
        obj.serialize_field("fingerprint", &self.hash)?;
        obj.serialize_field("size_bytes", &self.size_bytes)?;
        obj.end()
    }
}

#[derive(Deserialize)]
#[serde(field_identifier, rename_all = "snake_case")]
enum Field {
    Fingerprint,
    SizeBytes,
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DigestVisitor;

        impl<'de> Visitor<'de> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct digest")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Digest, V::Error>
            where
                V: MapAccess<'de>,
            {
                use serde::de;

                let mut fingerprint = None;
                let mut size_bytes = None;
                while let Some(key) = map.next_key()? {
                    match key {
                        Field::Fingerprint => {
                            if fingerprint.is_some() {
                                return Err(de::Error::duplicate_field("fingerprint"));
                            }
                            fingerprint = Some(map.next_value()?);
                        }
                        Field::SizeBytes => {
                            if size_bytes.is_some() {
                                return Err(de::Error::duplicate_field("size_bytes"));
                            }
                            size_bytes = Some(map.next_value()?);
                        }
                    }
                }
                let fingerprint =
                    fingerprint.ok_or_else(|| de::Error::missing_field("fingerprint"))?;
                let size_bytes = size_bytes.ok_or_else(|| de::Error::missing_field("size_bytes"))?;
                Ok(Digest::new(fingerprint, size_bytes))
            }
        }

        const FIELDS: &[&str] = &["fingerprint", "size_bytes"];
        deserializer.deserialize_struct("digest", FIELDS, DigestVisitor)
    }
}

/// A `Write` instance that fingerprints all data that passes through it.
pub struct WriterHasher<T> {
    hasher: Sha256,
    byte_count: usize,
    inner: T,
}

impl<T> WriterHasher<T> {
    pub fn new(inner: T) -> WriterHasher<T> {
        WriterHasher {
            hasher: Sha256::default(),
            byte_count: 0,
            inner,
        }
    }

    /// Returns the result of fingerprinting this stream, and drops the stream.
    pub fn finish(self) -> (Digest, T) {
        (
            Digest::new(
                Fingerprint::from_bytes(self.hasher.finalize()),
                self.byte_count,
            ),
            self.inner,
        )
    }
}

impl<W: Write> Write for WriterHasher<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[0..written]);
        self.byte_count += written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<AW: ?Sized + AsyncWrite + Unpin> AsyncWrite for WriterHasher<&mut AW> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, Error>> {
        let inner = Pin::new(&mut *self.inner);
        let result = inner.poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = result {
            self.hasher.update(&buf[0..written]);
            self.byte_count += written;
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let inner = Pin::new(&mut *self.inner);
        inner.poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let inner = Pin::new(&mut *self.inner);
        inner.poll_shutdown(cx)
    }
}

/// Copy the data from reader to writer and hash the bytes in one pass.
pub fn sync_copy_and_hash<R: ?Sized, W: ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> io::Result<Digest>
where
    R: io::Read,
    W: io::Write,
{
    let mut hasher = WriterHasher::new(writer);
    let _ = io::copy(reader, &mut hasher)?;
    Ok(hasher.finish().0)
}

/// Copy from reader to writer and return whether the copied data matches `expected_digest`.
///
/// If `data_is_immutable`, only the byte count is checked (the caller is trusted not to have
/// mutated the source between when its digest was computed and now).
pub fn sync_verified_copy<R: ?Sized, W: ?Sized>(
    expected_digest: Digest,
    data_is_immutable: bool,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<bool>
where
    R: io::Read,
    W: io::Write,
{
    if data_is_immutable {
        let copied = io::copy(reader, writer)?;
        Ok(copied as usize == expected_digest.size_bytes)
    } else {
        Ok(expected_digest == sync_copy_and_hash(reader, writer)?)
    }
}

/// Copy the data from reader to writer and hash the bytes in one pass, asynchronously.
pub async fn async_copy_and_hash<R, W>(reader: &mut R, writer: &mut W) -> tokio::io::Result<Digest>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = WriterHasher::new(writer);
    let _ = tokio::io::copy(reader, &mut hasher).await?;
    Ok(hasher.finish().0)
}

pub async fn async_verified_copy<R, W>(
    expected_digest: Digest,
    data_is_immutable: bool,
    reader: &mut R,
    writer: &mut W,
) -> tokio::io::Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if data_is_immutable {
        let copied = tokio::io::copy(reader, writer).await?;
        Ok(copied as usize == expected_digest.size_bytes)
    } else {
        Ok(expected_digest == async_copy_and_hash(reader, writer).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_bytes_matches_sha256() {
        let digest = Digest::of_bytes(b"hello\n");
        assert_eq!(digest.size_bytes, 6);
        assert_eq!(
            digest.hash.to_hex(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn empty_digest_is_sha256_of_empty_string() {
        assert_eq!(Digest::of_bytes(b""), EMPTY_DIGEST);
    }

    #[test]
    fn canonical_string_round_trips() {
        let digest = Digest::of_bytes(b"round trip me");
        let s = digest.to_canonical_string();
        assert_eq!(Digest::from_canonical_string(&s).unwrap(), digest);
    }

    #[test]
    fn fingerprint_from_hex_round_trips() {
        let digest = Digest::of_bytes(b"abc");
        let hex = digest.hash.to_hex();
        assert_eq!(Fingerprint::from_hex_string(&hex).unwrap(), digest.hash);
    }

    #[test]
    fn digest_total_order_by_hash() {
        let a = Digest::of_bytes(b"a");
        let b = Digest::of_bytes(b"b");
        let mut v = vec![b, a];
        v.sort();
        assert!(v[0].hash <= v[1].hash);
    }

    #[tokio::test]
    async fn async_verified_copy_detects_mismatch() {
        let wrong_digest = Digest::of_bytes(b"not the same bytes");
        let mut reader: &[u8] = b"hello\n";
        let mut writer = Vec::new();
        let matches = async_verified_copy(wrong_digest, false, &mut reader, &mut writer)
            .await
            .unwrap();
        assert!(!matches);
    }
}
