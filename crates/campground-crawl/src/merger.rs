use std::collections::HashMap;

use crate::crawl_types::RawListing;

/// Deduplicates listings by identifier across cells.
///
/// Later listings replace earlier ones with the same identifier, while the
/// output keeps the order in which identifiers were first seen. Feeding
/// cells in cell-index order therefore gives a reproducible winner for
/// campgrounds that sit on a shared cell edge.
#[derive(Debug, Default)]
pub struct ResultMerger {
    order: Vec<String>,
    by_id: HashMap<String, RawListing>,
    observed: usize,
}

impl ResultMerger {
    /// Creates an empty merger
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one batch of listings, typically one cell's worth
    pub fn extend<I>(&mut self, listings: I)
    where
        I: IntoIterator<Item = RawListing>,
    {
        for listing in listings {
            self.observed += 1;
            if !self.by_id.contains_key(&listing.id) {
                self.order.push(listing.id.clone());
            }
            self.by_id.insert(listing.id.clone(), listing);
        }
    }

    /// Listings fed so far, duplicates included
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// One listing per identifier, in first-seen order
    pub fn finish(mut self) -> Vec<RawListing> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.remove(id))
            .collect()
    }
}
