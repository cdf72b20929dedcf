use std::cell::RefCell;
use std::collections::HashMap;

/// Resolved font CSS by absolute font URL.
///
/// A URL maps to `Some(css)` once embedded and to `None` once it failed; either way it is never
/// fetched again. Entries are never evicted. Shared by every conversion of one exporter until
/// [`FontCache::reset`].
#[derive(Debug, Default)]
pub struct FontCache {
    entries: RefCell<HashMap<String, Option<String>>>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if the URL was never resolved, otherwise the stored entry.
    pub fn lookup(&self, url: &str) -> Option<Option<String>> {
        self.entries.borrow().get(url).cloned()
    }

    /// The first entry for a URL wins.
    pub fn store(&self, url: &str, css: Option<String>) {
        self.entries
            .borrow_mut()
            .entry(url.to_string())
            .or_insert(css);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.entries.borrow_mut().clear();
    }
}
