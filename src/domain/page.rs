use serde::{Deserialize, Serialize};

pub const MIN_PAGE_SIZE: i64 = 1;
pub const MAX_PAGE_SIZE: i64 = 100;

/// A page request whose bounds have already been clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    page_size: i64,
}

impl PageRequest {
    /// Coerce raw caller input into a valid request:
    /// page < 1 becomes 1, page_size is held to `1..=100`.
    pub fn clamp(page: i64, page_size: i64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// One row more than the page holds, to detect a following page
    /// without a count query.
    pub fn fetch_limit(&self) -> i64 {
        self.page_size + 1
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::clamp(1, 20)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with `request.fetch_limit()`.
    pub fn from_probe(mut rows: Vec<T>, request: PageRequest) -> Self {
        let size = request.page_size() as usize;
        let has_more = rows.len() > size;
        rows.truncate(size);
        Self {
            items: rows,
            has_more,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
