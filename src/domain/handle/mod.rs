//! Handle context - binds caller identities to opaque contact handles

pub mod phone_number;
pub mod resolver;

pub use resolver::{BasicNormalizer, HandleResolver, NumberNormalizer, SELF_IDENTITY};
