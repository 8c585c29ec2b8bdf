use serde::{Deserialize, Serialize};

use crate::utils::errors::{AppError, AppResult};

/// Row offset step per page. Deliberately independent of `take`.
pub const PAGE_WINDOW: u64 = 10;

/// Offset for a 1-based page number, `None` when it does not fit a SQL OFFSET
pub fn skip_from_page(page: u64) -> Option<u64> {
    page.saturating_sub(1)
        .checked_mul(PAGE_WINDOW)
        .filter(|skip| i64::try_from(*skip).is_ok())
}

/// Page request coming from a listing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationRequest {
    pub page: u64,
    pub take: u64,
}

impl PaginationRequest {
    pub fn new(page: u64, take: u64) -> Self {
        Self { page, take }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.page < 1 {
            return Err(AppError::validation("page must be at least 1"));
        }
        if self.take < 1 {
            return Err(AppError::validation("take must be at least 1"));
        }
        if i64::try_from(self.take).is_err() {
            return Err(AppError::validation("take is too large"));
        }
        if skip_from_page(self.page).is_none() {
            return Err(AppError::validation("page is too large"));
        }
        Ok(())
    }

    /// Saturates for pages that [`Self::validate`] rejects
    pub fn skip(&self) -> u64 {
        skip_from_page(self.page).unwrap_or(i64::MAX as u64)
    }
}

/// Uniform paginated envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub results_count: u64,
    pub all_results_count: u64,
    pub all_pages: u64,
    pub page: u64,
}

impl<T> PaginatedResult<T> {
    pub fn new(data: Vec<T>, all_results_count: u64, page: u64, take: u64) -> Self {
        Self {
            results_count: data.len() as u64,
            all_pages: all_results_count / take.max(1) + 1,
            data,
            all_results_count,
            page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResult<U> {
        PaginatedResult {
            data: self.data.into_iter().map(f).collect(),
            results_count: self.results_count,
            all_results_count: self.all_results_count,
            all_pages: self.all_pages,
            page: self.page,
        }
    }
}
