//! Topic names and filters
//!
//! Validation and matching rules for MQTT topics:
//! - `/` separates levels
//! - `+` matches exactly one level and must occupy a whole level
//! - `#` matches the remaining levels and must be the last level
//! - topics starting with `$` are not matched by filters starting with a wildcard
//!
//! The bridge stores filters verbatim; these rules are used to warn about
//! filters a broker will refuse and by the in-process broker for routing.

pub mod validation;

pub use validation::{topic_matches_filter, validate_topic_filter, validate_topic_name};
