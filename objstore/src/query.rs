//! Query descriptions accumulated by the [`Store`](crate::Store) builder.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::range::KeyRange;

/// Caller-supplied record predicate. Records for which it returns true are kept.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Offset and length applied to a traversal. Zero length means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub offset: u32,
    pub length: u32,
}

impl Window {
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    /// True when neither an offset nor a length is set.
    pub fn is_unbounded(&self) -> bool {
        self.offset == 0 && self.length == 0
    }
}

/// Everything a terminal call needs besides the container and direction.
///
/// Each builder call replaces the corresponding field, so the last call
/// wins.
#[derive(Clone, Default)]
pub struct QuerySpec {
    /// Index to traverse; `None` walks primary keys.
    pub index: Option<String>,
    /// Key range to traverse; `None` covers everything.
    pub range: Option<KeyRange>,
    pub filter: Option<Predicate>,
    pub window: Window,
}

impl fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("index", &self.index)
            .field("range", &self.range)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("window", &self.window)
            .finish()
    }
}

/// Shape of a terminal call's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// Every retained record, in cursor order.
    Rows,
    /// The first retained record, if any.
    Single,
    /// Number of positions visited inside the window.
    Count,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_treat_default_window_as_unbounded() {
        assert!(Window::default().is_unbounded());
        assert!(!Window::new(0, 5).is_unbounded());
        assert!(!Window::new(2, 0).is_unbounded());
    }

    #[test]
    fn should_hide_filter_body_in_debug_output() {
        let spec = QuerySpec {
            filter: Some(Arc::new(|_: &Value| true)),
            ..QuerySpec::default()
        };

        let debug = format!("{:?}", spec);

        assert!(debug.contains("<fn>"));
    }
}
