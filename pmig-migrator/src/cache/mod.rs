//! Identity cache and business keys

pub mod business_key;
pub mod identity_cache;

pub use identity_cache::{CacheStats, CacheValidation, EntityType, IdentityCache};
