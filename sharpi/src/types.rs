use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A record as delivered by the tap: field names to arbitrary JSON values.
pub type InputRecord = Map<String, Value>;

/// The payload sent to the partner API. Its field set is fixed per [`EntityKind`].
pub type CanonicalRecord = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Product,
    Price,
    Customer,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Product, EntityKind::Price, EntityKind::Customer];

    /// Collection path of this kind below the partner API base URL.
    pub const fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Price => "prices",
            EntityKind::Customer => "customers",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unsupported stream {0:?}, supported streams are: products, prices, customers")]
pub struct UnsupportedStream(pub String);

impl FromStr for EntityKind {
    type Err = UnsupportedStream;

    fn from_str(stream: &str) -> Result<Self, Self::Err> {
        match stream {
            "products" => Ok(EntityKind::Product),
            "prices" => Ok(EntityKind::Price),
            // Older taps still name the customer stream "clients".
            "customers" | "clients" => Ok(EntityKind::Customer),
            other => Err(UnsupportedStream(other.to_string())),
        }
    }
}

/// Identity of a resource on the partner side, in path order.
///
/// A `None` component means the record did not carry that field; such a key cannot
/// address an existing resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaturalKey(Vec<Option<String>>);

impl NaturalKey {
    pub fn new(parts: Vec<Option<String>>) -> Self {
        NaturalKey(parts)
    }

    pub fn single(part: Option<String>) -> Self {
        NaturalKey(vec![part])
    }

    pub fn parts(&self) -> &[Option<String>] {
        &self.0
    }

    /// Path segments of the key, or `None` when a component is missing.
    pub fn segments(&self) -> Option<Vec<&str>> {
        self.0.iter().map(|part| part.as_deref()).collect()
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(part.as_deref().unwrap_or("<missing>"))?;
        }
        Ok(())
    }
}
