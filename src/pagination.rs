//! Page views over instance collections and their `Link` headers.

use crate::error::ApiError;
use crate::Item;

#[derive(Clone, Debug, PartialEq)]
pub struct Pagination {
    pub items: Vec<Item>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

impl Pagination {
    pub fn new(items: Vec<Item>, page: u64, per_page: u64, total: u64) -> Self {
        Pagination { items, page, per_page, total }
    }

    /// Slices `items[(page-1)*per_page .. page*per_page]` out of a full list.
    pub fn from_list(items: Vec<Item>, page: u64, per_page: u64) -> Self {
        let total = items.len() as u64;
        let start = page.saturating_sub(1).saturating_mul(per_page);
        let items = items
            .into_iter()
            .skip(start as usize)
            .take(per_page as usize)
            .collect();
        Pagination::new(items, page, per_page, total)
    }

    /// Number of pages; an empty collection still has one (empty) page.
    pub fn pages(&self) -> u64 {
        if self.per_page == 0 {
            return 1;
        }
        self.total.div_ceil(self.per_page).max(1)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    /// Fails with `PageNotFound` when the page lies past the last one.
    pub fn ensure_exists(self) -> Result<Self, ApiError> {
        if self.page > self.pages() {
            Err(ApiError::PageNotFound)
        } else {
            Ok(self)
        }
    }

    /// `(rel, page)` pairs: self, first/prev when there is a previous page, next when there is one, and last.
    pub fn links(&self) -> Vec<(&'static str, u64)> {
        let mut links = vec![("self", self.page)];
        if self.has_prev() {
            links.push(("first", 1));
            links.push(("prev", self.page - 1));
        }
        if self.has_next() {
            links.push(("next", self.page + 1));
        }
        links.push(("last", self.pages()));
        links
    }

    pub fn link_header(&self, path: &str) -> String {
        self.links()
            .into_iter()
            .map(|(rel, page)| format!("<{}?page={}&per_page={}>; rel=\"{}\"", path, page, self.per_page, rel))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
