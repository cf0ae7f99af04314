//! Index store trait definition.
//!
//! [`IndexStore`] defines the storage contract for the catalogue of known
//! batches. Lookups and upserts operate on the loaded
//! [`IndexCatalogue`](crate::IndexCatalogue); the store only loads and
//! persists it as a whole.

use crate::catalogue::IndexCatalogue;
use crate::error;

/// Storage contract for the index catalogue.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn IndexStore>`.
pub trait IndexStore: Send + Sync {
    /// Load the persisted catalogue.
    ///
    /// A store with nothing persisted yet yields an empty catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`](crate::StateError::Corrupt) when the
    /// persisted form cannot be trusted, and other
    /// [`StateError`](crate::StateError) variants on storage failure.
    fn load(&self) -> error::Result<IndexCatalogue>;

    /// Persist the catalogue atomically: readers observe either the previous
    /// or the new catalogue, never a partial write.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn save(&self, catalogue: &IndexCatalogue) -> error::Result<()>;

    /// Problems the last [`load`](IndexStore::load) tolerated, such as a
    /// derived form out of step with the authoritative one. Draining; the
    /// next [`save`](IndexStore::save) repairs them.
    fn take_warnings(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn IndexStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn IndexStore) {}
    }
}
