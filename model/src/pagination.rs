//! Windowed list pagination.

use serde::{Deserialize, Serialize};

/// A 1-based page number.
///
/// Pages below 1 are clamped to the first page, so a missing or nonsensical `page` query parameter
/// always yields the first window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(from = "u32", into = "u32")]
pub struct Page(u32);

impl Page {
    pub const FIRST: Self = Self(1);

    pub fn new(page: Option<u32>) -> Self {
        page.map(Self::from).unwrap_or_default()
    }

    /// The number of rows preceding this page when there are `size` rows per page.
    pub fn offset(self, size: usize) -> usize {
        (self.0 as usize - 1).saturating_mul(size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::FIRST
    }
}

impl From<u32> for Page {
    fn from(page: u32) -> Self {
        Self(page.max(1))
    }
}

impl From<Page> for u32 {
    fn from(page: Page) -> Self {
        page.0
    }
}
