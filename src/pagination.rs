//! Page requests and paged results.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Query parameters for a paged listing. Out-of-range values are clamped.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            page_number: self.page_number.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Row offset of the first item on this page.
    pub fn offset(&self) -> i64 {
        (i64::from(self.page_number) - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

/// One page of items plus the totals needed to navigate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total_items: u64,
    pub page_number: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total_items: u64, request: PageRequest) -> Self {
        let request = request.clamped();
        Self {
            items,
            total_items,
            page_number: request.page_number,
            page_size: request.page_size,
            total_pages: total_items.div_ceil(u64::from(request.page_size)),
        }
    }

    /// Convert the items, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total_items: self.total_items,
            page_number: self.page_number,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
