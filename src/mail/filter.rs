//! Post-fetch filtering.
//!
//! A [`FilterChain`] keeps a record only if every filter accepts it. Filters
//! are pure, so evaluation order does not matter.

use tracing::debug;

use crate::mail::EmailRecord;

/// A predicate over decoded records.
pub trait EmailFilter: Send + Sync {
    fn should_include(&self, email: &EmailRecord) -> bool;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Keeps only messages known to be unread.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreadFilter;

impl EmailFilter for UnreadFilter {
    fn should_include(&self, email: &EmailRecord) -> bool {
        email.is_unread()
    }

    fn name(&self) -> &str {
        "unread"
    }
}

/// Keeps messages whose subject starts with a prefix (case-sensitive).
///
/// An empty prefix disables the filter.
#[derive(Debug, Clone, Default)]
pub struct PrefixFilter {
    prefix: String,
}

impl PrefixFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.prefix.is_empty()
    }
}

impl EmailFilter for PrefixFilter {
    fn should_include(&self, email: &EmailRecord) -> bool {
        if self.is_disabled() {
            return true;
        }
        email.subject.starts_with(&self.prefix)
    }

    fn name(&self) -> &str {
        "prefix"
    }
}

/// Ordered set of filters, AND-ed together.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn EmailFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain for one fetch: unread filter if requested, prefix filter unless
    /// the prefix is empty.
    pub fn for_fetch(only_unread: bool, prefix: &str) -> Self {
        let mut chain = Self::new();
        if only_unread {
            chain.add_filter(UnreadFilter);
        }
        if !prefix.is_empty() {
            chain.add_filter(PrefixFilter::new(prefix));
        }
        chain
    }

    pub fn add_filter(&mut self, filter: impl EmailFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Records accepted by every filter, in their original order.
    pub fn filter_emails(&self, emails: Vec<EmailRecord>) -> Vec<EmailRecord> {
        if self.filters.is_empty() {
            return emails;
        }

        let before = emails.len();
        let kept: Vec<EmailRecord> = emails
            .into_iter()
            .filter(|email| self.filters.iter().all(|f| f.should_include(email)))
            .collect();

        debug!(
            filters = ?self.filters.iter().map(|f| f.name()).collect::<Vec<_>>(),
            before,
            after = kept.len(),
            "Applied filter chain"
        );
        kept
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}
