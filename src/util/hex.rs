//! Serde adapter rendering byte buffers as lowercase hex strings
// (c) 2025 the llrpd contributors
//
// The host boundary is JSON; raw LLRP parameter bytes travel through
// it as hex so that a human can paste them into other tooling.

use bytes::Bytes;
use serde::{Deserialize as _, Deserializer, Serializer};

pub(crate) fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(&s)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
