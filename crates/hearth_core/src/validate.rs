//! Range helpers for [`Entity::normalize`](crate::Entity::normalize).
//!
//! Out-of-range field values are clamped, not rejected. Each domain type
//! documents the range of every field it clamps.

use std::fmt::Debug;

/// Clamps `value` into `min..=max`.
///
/// An adjustment is logged at `debug` level under the field name.
///
/// ```rust
/// use hearth_core::validate::clamp;
///
/// assert_eq!(clamp("balance", -20, 0, i64::MAX), 0);
/// assert_eq!(clamp("score", 420, 300, 850), 420);
/// ```
pub fn clamp<T>(field: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + Debug,
{
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        tracing::debug!(field, from = ?value, to = ?clamped, "value clamped");
    }
    clamped
}
