//! The language-agnostic data model crossing the host/guest boundary.
//!
//! Events, dependencies, and results are restricted to primitives, strings,
//! ordered lists, and string-keyed maps; live host references never cross
//! the boundary beyond the explicit `net`/`platform` proxies. Marshalling
//! in and out happens at the edges, eagerly, so a [`HostValue`] outlives the
//! guest context it came from.

mod json;

pub use json::{
    json_to_host,
    host_to_json,
};

use indexmap::IndexMap;

/// A host-native value. Maps preserve insertion order.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Array(Vec<HostValue>),
    Map(IndexMap<String, HostValue>),
}

impl HostValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, HostValue>> {
        match self {
            HostValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Empty map; the shape of an absent or unparseable event body.
    pub fn empty_map() -> Self {
        HostValue::Map(IndexMap::new())
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Int64(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl serde::Serialize for HostValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        host_to_json(self).serialize(serializer)
    }
}
