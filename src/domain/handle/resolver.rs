//! Contact handle table

use super::phone_number;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::Handle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Identity bound to [`Handle::SELF`]
pub const SELF_IDENTITY: &str = "<SelfHandle>";

/// Canonicalizes caller identities before they are bound to handles
#[cfg_attr(test, mockall::automock)]
pub trait NumberNormalizer: Send + Sync {
    /// Canonical form of the identity
    fn normalize(&self, identity: &str) -> String;

    /// Whether the identity should be compared as a phone number
    fn is_phone_number(&self, identity: &str) -> bool;
}

/// Locale-independent normalizer: strips formatting from phone numbers
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicNormalizer;

impl NumberNormalizer for BasicNormalizer {
    fn normalize(&self, identity: &str) -> String {
        phone_number::normalize(identity)
    }

    fn is_phone_number(&self, identity: &str) -> bool {
        phone_number::is_phone_number(identity)
    }
}

/// Append-only table binding normalized identities to handles.
///
/// Handles are allocated monotonically starting at 1 (the self handle) and
/// are never reused.
pub struct HandleResolver {
    identities: Vec<String>,
    by_identity: HashMap<String, Handle>,
    normalizer: Arc<dyn NumberNormalizer>,
}

impl HandleResolver {
    pub fn new() -> Self {
        Self::with_normalizer(Arc::new(BasicNormalizer))
    }

    pub fn with_normalizer(normalizer: Arc<dyn NumberNormalizer>) -> Self {
        let mut resolver = Self {
            identities: Vec::new(),
            by_identity: HashMap::new(),
            normalizer,
        };
        resolver.allocate(SELF_IDENTITY.to_string());
        resolver
    }

    /// Handle for the identity, allocating one on first sight
    pub fn resolve(&mut self, identity: &str) -> Handle {
        let normalized = self.normalize(identity);
        match self.by_identity.get(&normalized) {
            Some(handle) => *handle,
            None => self.allocate(normalized),
        }
    }

    /// Identity bound to the handle
    pub fn reverse_lookup(&self, handle: Handle) -> Result<&str> {
        let index = (handle.as_u32() as usize).checked_sub(1);
        index
            .and_then(|i| self.identities.get(i))
            .map(String::as_str)
            .ok_or_else(|| CallError::InvalidHandle(format!("handle {} not found", handle)))
    }

    pub fn normalize(&self, identity: &str) -> String {
        self.normalizer.normalize(identity)
    }

    /// Phone numbers match loosely, anything else by exact string
    pub fn loose_equals(&self, a: &str, b: &str) -> bool {
        if self.normalizer.is_phone_number(a) && self.normalizer.is_phone_number(b) {
            return phone_number::compare_loosely(a, b);
        }
        a == b
    }

    /// First handle whose identity loosely equals the given one
    pub fn find_loose(&self, identity: &str) -> Option<Handle> {
        self.identities
            .iter()
            .position(|known| self.loose_equals(known, identity))
            .map(|i| Handle::from_raw(i as u32 + 1))
    }

    pub fn self_handle(&self) -> Handle {
        Handle::SELF
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    fn allocate(&mut self, identity: String) -> Handle {
        self.identities.push(identity.clone());
        let handle = Handle::from_raw(self.identities.len() as u32);
        debug!("Allocated handle {} for {}", handle, identity);
        self.by_identity.insert(identity, handle);
        handle
    }
}

impl Default for HandleResolver {
    fn default() -> Self {
        Self::new()
    }
}
