//! Serde helper for partial updates.

use serde::{Deserialize, Deserializer};

/// Deserialize a field so that a missing key stays `None` (via
/// `#[serde(default)]`) while an explicit `null` becomes `Some(None)`.
pub fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
