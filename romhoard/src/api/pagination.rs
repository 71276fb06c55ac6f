//! Page/page_size query handling shared by listing endpoints

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub page_size: Option<String>,
}

impl PageParams {
    /// Requested page size, defaulted and capped; unparsable values use the default
    pub fn page_size(&self) -> i64 {
        self.page_size
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    pub fn requested_page(&self) -> i64 {
        self.page
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(1)
    }
}

/// 1-based page clamped to `[1, total_pages]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(requested_page: i64, page_size: i64, total_items: i64) -> Self {
        let page_size = page_size.max(1);
        let total_pages = ((total_items + page_size - 1) / page_size).max(1);
        Self {
            page: requested_page.clamp(1, total_pages),
            page_size,
            total_items,
            total_pages,
        }
    }

    pub fn from_params(params: &PageParams, total_items: i64) -> Self {
        Self::new(params.requested_page(), params.page_size(), total_items)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}
