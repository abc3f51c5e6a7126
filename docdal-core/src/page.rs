//! Page windows for paginated retrieval.
//!
//! Pages are 1-indexed: page 1 is the first page. A [`PageWindow`] can only be constructed
//! from a positive page and page size, so every window in circulation is valid.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DataAccessError, DataAccessResult};

/// Which slice of an ordered result set to return.
///
/// # Example
///
/// ```ignore
/// use docdal::page::PageWindow;
///
/// let window = PageWindow::new(3, 20)?;
/// assert_eq!(window.skip(), 40);  // Skip 40 documents for page 3
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "RawPageWindow")]
pub struct PageWindow {
    page: u64,
    pagesize: u64,
}

impl PageWindow {
    /// Creates a window after checking that both values are positive.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::IllegalQueryParameter`] if `page` or `pagesize` is below 1.
    pub fn new(page: i64, pagesize: i64) -> DataAccessResult<Self> {
        if page < 1 {
            return Err(DataAccessError::IllegalQueryParameter(format!(
                "page must be >= 1, got {page}"
            )));
        }
        if pagesize < 1 {
            return Err(DataAccessError::IllegalQueryParameter(format!(
                "pagesize must be >= 1, got {pagesize}"
            )));
        }

        Ok(Self {
            page: page as u64,
            pagesize: pagesize as u64,
        })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn pagesize(&self) -> u64 {
        self.pagesize
    }

    /// Number of documents to skip to reach this page.
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.pagesize)
    }

    /// The window right after this one.
    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            pagesize: self.pagesize,
        }
    }

    /// The window with the same size at another page.
    pub fn at_page(&self, page: u64) -> Option<Self> {
        (page >= 1).then_some(Self {
            page,
            pagesize: self.pagesize,
        })
    }

    /// Rejects windows whose page size exceeds `max_pagesize`.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::IllegalQueryParameter`] if the page size is too large.
    pub fn ensure_pagesize_at_most(&self, max_pagesize: u64) -> DataAccessResult<()> {
        if self.pagesize > max_pagesize {
            return Err(DataAccessError::IllegalQueryParameter(format!(
                "pagesize must be <= {max_pagesize}, got {}",
                self.pagesize
            )));
        }

        Ok(())
    }
}

impl Default for PageWindow {
    fn default() -> Self {
        Self { page: 1, pagesize: 100 }
    }
}

impl fmt::Display for PageWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} (pagesize {})", self.page, self.pagesize)
    }
}

#[derive(Deserialize)]
struct RawPageWindow {
    page: i64,
    pagesize: i64,
}

impl TryFrom<RawPageWindow> for PageWindow {
    type Error = DataAccessError;

    fn try_from(raw: RawPageWindow) -> Result<Self, Self::Error> {
        PageWindow::new(raw.page, raw.pagesize)
    }
}
