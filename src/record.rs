// Generic record trait for any storable type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

/// Core trait that any storable record must implement
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Unique identifier for this record within its collection
    fn id(&self) -> &str;

    /// When this record was first inserted
    fn created_at(&self) -> DateTime<Utc>;

    /// Collection name for this record type (e.g., "expenses", "books").
    /// Matches the key the collection is stored under in the document.
    fn collection_name() -> &'static str
    where
        Self: Sized;

    /// Overwrite identity fields. Only the store calls this, on insert and
    /// when restoring identity after a patch.
    fn assign_identity(&mut self, id: String, created_at: DateTime<Utc>);

    /// Whether new records go to the front of the collection (newest first)
    fn prepend() -> bool
    where
        Self: Sized,
    {
        true
    }
}

/// Implements [`Record`] for a struct with `id: String` and
/// `created_at: DateTime<Utc>` fields.
///
/// `impl_record!(Expense, "expenses")` prepends new records;
/// `impl_record!(Appointment, "appointments", append)` appends them.
#[macro_export]
macro_rules! impl_record {
    (@impl $ty:ty, $collection:literal, $prepend:literal) => {
        impl $crate::record::Record for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn created_at(&self) -> $crate::chrono::DateTime<$crate::chrono::Utc> {
                self.created_at
            }

            fn collection_name() -> &'static str {
                $collection
            }

            fn assign_identity(&mut self, id: String, created_at: $crate::chrono::DateTime<$crate::chrono::Utc>) {
                self.id = id;
                self.created_at = created_at;
            }

            fn prepend() -> bool {
                $prepend
            }
        }
    };
    ($ty:ty, $collection:literal) => {
        $crate::impl_record!(@impl $ty, $collection, true);
    };
    ($ty:ty, $collection:literal, append) => {
        $crate::impl_record!(@impl $ty, $collection, false);
    };
}

/// Generate a fresh record identifier (time-ordered UUID)
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// A monetary or quantity value that is always finite.
///
/// Deserializes from numbers, numeric strings, `null` or garbage; anything
/// that is not a finite number reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Amount(f64);

impl Amount {
    pub const ZERO: Amount = Amount(0.0);

    pub fn new(value: f64) -> Self {
        if value.is_finite() { Amount(value) } else { Amount::ZERO }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Coerce an arbitrary JSON value to a finite number
    pub fn coerce(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => Amount::new(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Amount::new(s.trim().parse::<f64>().unwrap_or(0.0)),
            _ => Amount::ZERO,
        }
    }
}

impl From<f64> for Amount {
    fn from(value: f64) -> Self {
        Amount::new(value)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount::new(value as f64)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Amount::coerce(&raw))
    }
}

/// `deserialize_with` helper for whole-number counts.
///
/// Goes through [`Amount`] coercion, so numeric strings are accepted and
/// anything else reads as 0. Fractions truncate, negatives become 0, and
/// values past `u32::MAX` saturate.
pub fn coerce_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let amount = Amount::deserialize(deserializer)?;
    Ok(amount.value().max(0.0) as u32)
}
