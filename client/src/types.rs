//! Wire payload shapes and the signature-to-local-type mapping: the
//! signature element pair, the runtime-measure and rel-data wire-form
//! tables, and the row-delta/batch-notification payloads.
//!
//! A decoder-closure-per-row approach makes sense in a language without
//! compile-time generics, but Rust's generics are exactly that mechanism
//! made static, so `ResultSet<T>`, `PreparedQuery<T>`, etc. use a real
//! `T: DeserializeOwned` bound instead of a closure — the same choice the
//! teacher's `jsonrpc_client!` macro makes for its generated call
//! signatures. A row `T` is free to be a tuple/`Vec<Value>` matching the
//! server's positional tuple encoding, or a named struct with its own
//! `Deserialize` impl bridging the two — this crate doesn't prescribe one.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Local type category a server signature type is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalType {
    /// `integer` — 64-bit signed integer.
    Int64,
    /// `double` — 64-bit float (32-bit also accepted on the wire).
    Float64,
    /// `number` — any numeric representation.
    Number,
    /// `boolean`.
    Boolean,
    /// `stringcase`, `stringnocase`, `stringagnostic`.
    String,
    /// `date`, `time`, `timestamp`.
    DateTime,
    /// `interval`.
    Duration,
    /// Empty or unrecognized server type name.
    Any,
}

impl LocalType {
    /// Maps a server-reported type name to its local category. Unknown type
    /// names fall back to `Any` rather than erroring, matching the empty/
    /// unknown case in the server's own type table.
    pub fn from_server_type(name: &str) -> LocalType {
        match name {
            "integer" => LocalType::Int64,
            "double" => LocalType::Float64,
            "number" => LocalType::Number,
            "boolean" => LocalType::Boolean,
            "stringcase" | "stringnocase" | "stringagnostic" => LocalType::String,
            "date" | "time" | "timestamp" => LocalType::DateTime,
            "interval" => LocalType::Duration,
            _ => LocalType::Any,
        }
    }
}

/// One (attribute name, server type name) pair from a query's output
/// signature or a prepared query's input signature.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureElement {
    /// Attribute / parameter name.
    pub name: String,
    /// Server-reported type name (see [`LocalType::from_server_type`]).
    #[serde(rename = "type")]
    pub server_type: String,
}

impl SignatureElement {
    /// The local type category this element maps to.
    pub fn local_type(&self) -> LocalType {
        LocalType::from_server_type(&self.server_type)
    }
}

/// The ordered output signature of a query or result set.
pub type Signature = Vec<SignatureElement>;

/// Wire payload returned by `execute-query`, `create-resultset`, and
/// `next-resultset-batch`. Batch-only fetches omit `signature`.
#[derive(Debug, Deserialize)]
pub struct ExecuteQueryResult<T> {
    /// Server handle for the result set, absent when the whole result fit in
    /// the initial batch.
    pub handle: Option<i64>,
    /// The rows in this batch, already shaped as `T`.
    pub tuples: Vec<T>,
    /// True once the server has nothing further to send.
    pub exhausted: bool,
    /// Output signature; present on the initial `execute-query`/
    /// `create-resultset` response, absent on subsequent batch fetches.
    #[serde(default)]
    pub signature: Option<Signature>,
}

/// Optional row-count/time bound passed to `execute-query`/`create-resultset`
/// and, split into its two fields, to `next-resultset-batch`/`poll-now`.
/// Milliseconds is an implementation choice for `timelimit`'s units — the
/// server-side unit isn't otherwise specified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Restriction {
    /// Maximum row count the server should return, unbounded if absent.
    pub limit: Option<u64>,
    /// Maximum server-side processing time in milliseconds, unbounded if
    /// absent.
    pub timelimit: Option<u64>,
}

/// The input parameter signature of a prepared query.
#[derive(Debug, Clone, Deserialize)]
pub struct InputSignature {
    /// Declared parameter names, in slot order.
    pub names: Vec<String>,
    /// Acceptable server type names for each slot, in slot order.
    pub types: Vec<Vec<String>>,
}

/// Wire payload returned by `prepare-query`.
#[derive(Debug, Deserialize)]
pub struct PreparedQueryRegistration {
    /// Server handle for the prepared query.
    pub handle: i64,
    /// Declared input parameter signature.
    #[serde(rename = "inputSignature")]
    pub input_signature: InputSignature,
    /// Declared output signature.
    #[serde(rename = "outputSignature")]
    pub output_signature: Signature,
    /// Whether parameters must be set by name rather than by position.
    #[serde(rename = "usesNamedParameters")]
    pub uses_named_parameters: bool,
}

/// Wire payload returned by `create-polled-query`.
#[derive(Debug, Deserialize)]
pub struct PolledQueryRegistration {
    /// Server handle for the polled query.
    pub handle: i64,
}

/// A server-detected change between successive polls of a `PolledQuery`.
#[derive(Debug, Deserialize)]
pub struct RowsDelta<T> {
    /// Rows newly present since the previous poll.
    pub added: Vec<T>,
    /// Rows no longer present since the previous poll.
    pub deleted: Vec<T>,
    /// Server-provided timestamp of this poll.
    pub timestamp: DateTime<Utc>,
}

/// Payload of a polled-query error notification.
#[derive(Debug, Deserialize)]
pub struct PolledQueryErrorNotice {
    /// Server-reported error message.
    pub message: String,
    /// Server-provided timestamp.
    pub timestamp: DateTime<Utc>,
}

/// One member entry inside a batch subscription notification.
#[derive(Debug, Deserialize)]
pub struct BatchMatch {
    /// The member subscription's label.
    pub label: String,
    /// The raw tuples for that member; decoded by the batch once it knows
    /// which member (and therefore which `T`) they belong to.
    pub tuples: Vec<Value>,
}

/// Payload of a batch-subscription notification.
#[derive(Debug, Deserialize)]
pub struct BatchNotice {
    /// Monotonic update counter from the server.
    #[serde(rename = "update#")]
    pub update_number: u64,
    /// Per-member coalesced tuples.
    pub matches: Vec<BatchMatch>,
}

/// `[runTime, gcTime, bytes]`, serialized as a plain 3-element JSON array.
/// A shorter array is rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwRuntimeMeasure {
    /// Server-side execution time, in seconds.
    pub run_time: f64,
    /// Server-side garbage-collection time, in seconds.
    pub gc_time: f64,
    /// Bytes allocated while servicing the request.
    pub bytes: u64,
}

impl Serialize for TwRuntimeMeasure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.run_time, self.gc_time, self.bytes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TwRuntimeMeasure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TripleVisitor;
        impl<'de> Visitor<'de> for TripleVisitor {
            type Value = TwRuntimeMeasure;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 3-element array [runTime, gcTime, bytes]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let run_time: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &"3-element array"))?;
                let gc_time: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &"3-element array"))?;
                let bytes: u64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &"3-element array"))?;
                Ok(TwRuntimeMeasure { run_time, gc_time, bytes })
            }
        }
        deserializer.deserialize_seq(TripleVisitor)
    }
}

/// One catalog element inside a `RelGroup`: `[name, signatureNames[],
/// signatureTypes[], usage, extra[], description]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelElement {
    /// Element (table/relation) name.
    pub name: String,
    /// Column names, in order.
    pub signature_names: Vec<String>,
    /// Column server-type names, in order, parallel to `signature_names`.
    pub signature_types: Vec<String>,
    /// Server-reported usage note.
    pub usage: String,
    /// Opaque extra metadata, left undecoded.
    pub extra: Vec<Value>,
    /// Human-readable description.
    pub description: String,
}

impl Serialize for RelElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.name,
            &self.signature_names,
            &self.signature_types,
            &self.usage,
            &self.extra,
            &self.description,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RelElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, signature_names, signature_types, usage, extra, description) =
            Deserialize::deserialize(deserializer)?;
        Ok(RelElement { name, signature_names, signature_types, usage, extra, description })
    }
}

/// A named group of [`RelElement`]s: `[name, symbol, [element...]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelGroup {
    /// Group name.
    pub name: String,
    /// Group symbol.
    pub symbol: String,
    /// Elements in this group.
    pub elements: Vec<RelElement>,
}

impl Serialize for RelGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.name, &self.symbol, &self.elements).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RelGroup {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, symbol, elements) = Deserialize::deserialize(deserializer)?;
        Ok(RelGroup { name, symbol, elements })
    }
}

/// The full payload of the `reldata2017` RPC: an array of [`RelGroup`]s.
pub type RelData = Vec<RelGroup>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_type_mapping_matches_table() {
        assert_eq!(LocalType::from_server_type("integer"), LocalType::Int64);
        assert_eq!(LocalType::from_server_type("stringnocase"), LocalType::String);
        assert_eq!(LocalType::from_server_type("timestamp"), LocalType::DateTime);
        assert_eq!(LocalType::from_server_type("interval"), LocalType::Duration);
        assert_eq!(LocalType::from_server_type(""), LocalType::Any);
        assert_eq!(LocalType::from_server_type("mystery"), LocalType::Any);
    }

    #[test]
    fn runtime_measure_rejects_short_array() {
        let err = serde_json::from_value::<TwRuntimeMeasure>(json!([1.0, 2.0])).unwrap_err();
        assert!(err.to_string().contains("3-element array") || err.is_data());
    }

    #[test]
    fn runtime_measure_round_trips() {
        let measure = TwRuntimeMeasure { run_time: 0.5, gc_time: 0.1, bytes: 1024 };
        let value = serde_json::to_value(measure).unwrap();
        assert_eq!(value, json!([0.5, 0.1, 1024]));
        let back: TwRuntimeMeasure = serde_json::from_value(value).unwrap();
        assert_eq!(back, measure);
    }

    #[test]
    fn rel_group_decodes_nested_tuple_arrays() {
        let wire = json!([
            "finance",
            "$",
            [["inflation", ["y1", "y2", "x"], ["integer", "integer", "number"], "rw", [], "inflation rate"]]
        ]);
        let group: RelGroup = serde_json::from_value(wire).unwrap();
        assert_eq!(group.name, "finance");
        assert_eq!(group.elements[0].name, "inflation");
        assert_eq!(group.elements[0].signature_types[2], "number");
    }
}
