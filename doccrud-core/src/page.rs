//! Pagination parameters and paginated responses.
//!
//! [`Pagination`] is the normalized page/size pair a query runs with, and [`Paginated`] is the
//! response shape returned by every listing operation:
//!
//! ```json
//! { "page": 1, "totalPages": 3, "totalCount": 250, "data": [] }
//! ```

use serde::{Deserialize, Serialize};

/// Normalized pagination for one query.
///
/// Pages are 1-indexed. The size always lies in `[1, max_page_size]`.
///
/// # Example
///
/// ```ignore
/// use doccrud::page::Pagination;
///
/// let params = Pagination::new(0, 0, 100);
/// assert_eq!(params.page(), 1);
/// assert_eq!(params.size(), 100);
/// assert_eq!(params.skip(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u64,
    size: u64,
}

impl Pagination {
    /// Creates pagination from caller-supplied values.
    ///
    /// # Arguments
    ///
    /// * `page` - The requested page; `0` means the first page
    /// * `size` - The requested page size; `0` or anything above `max_page_size` means `max_page_size`
    /// * `max_page_size` - Upper bound on the page size; treated as `1` when `0`
    pub fn new(page: u64, size: u64, max_page_size: u64) -> Self {
        let max_page_size = max_page_size.max(1);

        Self {
            page: page.max(1),
            size: if size == 0 || size > max_page_size { max_page_size } else { size },
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Calculates the number of items to skip for this page.
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.size)
    }

    /// Number of pages needed to show `total_count` items.
    pub fn total_pages(&self, total_count: u64) -> u64 {
        total_count.div_ceil(self.size)
    }
}

/// A single page of results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    /// The page number (1-indexed).
    pub page: u64,
    /// Number of pages available at the page size used.
    pub total_pages: u64,
    /// Number of matching items across all pages.
    pub total_count: u64,
    /// The items contained in this page.
    pub data: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(pagination: Pagination, total_count: u64, data: Vec<T>) -> Self {
        Self {
            page: pagination.page(),
            total_pages: pagination.total_pages(total_count),
            total_count,
            data,
        }
    }

    /// Converts the items of this page, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            page: self.page,
            total_pages: self.total_pages,
            total_count: self.total_count,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_default_to_first_full_page() {
        let pagination = Pagination::new(0, 0, 100);

        assert_eq!(pagination.page(), 1);
        assert_eq!(pagination.size(), 100);
        assert_eq!(pagination.skip(), 0);
        assert_eq!(pagination.total_pages(250), 3);
    }

    #[test]
    fn oversized_page_is_clamped() {
        let pagination = Pagination::new(3, 5_000, 100);

        assert_eq!(pagination.size(), 100);
        assert_eq!(pagination.skip(), 200);
    }

    #[test]
    fn skip_is_page_offset_times_size() {
        for page in 1..20u64 {
            for size in 1..=50u64 {
                let pagination = Pagination::new(page, size, 50);
                assert_eq!(pagination.skip(), (page - 1) * size);
            }
        }
    }

    #[test]
    fn response_serializes_camel_case() {
        let page = Paginated::new(Pagination::new(1, 10, 100), 0, Vec::<u8>::new());
        let json = serde_json::to_value(&page).unwrap();

        assert_eq!(json, serde_json::json!({ "page": 1, "totalPages": 0, "totalCount": 0, "data": [] }));
    }
}
