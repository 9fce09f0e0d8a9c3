//! Logging and debugging facilities for Trellis.
//!
//! This module provides:
//! - Target names for filtering the `tracing` output of each subsystem
//! - Debug visualization for object trees
//! - Performance tracing hooks for profiling
//!
//! # Tracing Integration
//!
//! Trellis uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("trellis_core::timer=trace,info")
//!     .init();
//! ```
//!
//! # Debug Visualization
//!
//! ```
//! use trellis_core::{ObjectTree, PlainObject};
//! use trellis_core::logging::ObjectTreeDebug;
//!
//! let mut tree = ObjectTree::default();
//! tree.set_name(tree.root(), "app").unwrap();
//! let child = tree.insert_child(tree.root(), PlainObject).unwrap();
//! tree.set_name(child, "status").unwrap();
//!
//! let output = ObjectTreeDebug::new(&tree).format_subtree(tree.root()).unwrap();
//! assert!(output.contains("status"));
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::error::ObjectError;
use crate::object::{ObjectId, ObjectResult, ObjectTree};

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "trellis_core";
    /// Dispatch loop and event queue.
    pub const EVENT_LOOP: &str = "trellis_core::event_loop";
    /// Event routing and propagation.
    pub const DISPATCH: &str = "trellis_core::dispatch";
    /// Timer system target.
    pub const TIMER: &str = "trellis_core::timer";
    /// Thread pool target.
    pub const THREADPOOL: &str = "trellis_core::threadpool";
    /// Object tree target.
    pub const OBJECT: &str = "trellis_core::object";
    /// Messages sent through [`TracingSink`](crate::TracingSink).
    pub const APP: &str = "trellis::app";
    /// Performance spans.
    pub const PERF: &str = "trellis::perf";
}

/// Style options for object tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Indentation only.
    Compact,
}

impl TreeStyle {
    /// (continuing branch, tee, last corner)
    fn glyphs(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Ascii => ("|   ", "+-- ", "`-- "),
            Self::Unicode => ("\u{2502}   ", "\u{251c}\u{2500}\u{2500} ", "\u{2514}\u{2500}\u{2500} "),
            Self::Compact => ("  ", "  ", "  "),
        }
    }
}

/// Configuration for object tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show object IDs.
    pub show_ids: bool,
    /// Whether to show handler type names.
    pub show_types: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_types: true,
            max_depth: None,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_types: false,
            ..Default::default()
        }
    }
}

/// Renders an [`ObjectTree`] for humans.
#[derive(Debug, Clone)]
pub struct ObjectTreeDebug<'a> {
    tree: &'a ObjectTree,
    options: TreeFormatOptions,
}

impl<'a> ObjectTreeDebug<'a> {
    /// Create a visualizer with default options.
    pub fn new(tree: &'a ObjectTree) -> Self {
        Self {
            tree,
            options: TreeFormatOptions::default(),
        }
    }

    /// Create a visualizer with custom options.
    pub fn with_options(tree: &'a ObjectTree, options: TreeFormatOptions) -> Self {
        Self { tree, options }
    }

    /// Format the rooted tree followed by any detached subtrees.
    pub fn format_all(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Object Tree ({} total objects):", self.tree.len());
        for top in self.tree.top_level() {
            let mut prefix = String::new();
            self.write_node(top, 0, true, &mut prefix, &mut output);
        }
        output
    }

    /// Format a subtree starting from a specific object.
    pub fn format_subtree(&self, id: ObjectId) -> ObjectResult<String> {
        if !self.tree.contains(id) {
            return Err(ObjectError::InvalidObjectId(id));
        }
        let mut output = String::new();
        let mut prefix = String::new();
        self.write_node(id, 0, true, &mut prefix, &mut output);
        Ok(output)
    }

    fn write_node(
        &self,
        id: ObjectId,
        depth: usize,
        is_last: bool,
        prefix: &mut String,
        output: &mut String,
    ) {
        if self.options.max_depth.is_some_and(|max| depth > max) {
            return;
        }
        let (branch, tee, corner) = self.options.style.glyphs();

        output.push_str(prefix);
        if depth > 0 {
            output.push_str(if is_last { corner } else { tee });
        }

        let name = self.tree.name(id).unwrap_or_default();
        output.push_str(if name.is_empty() { "(unnamed)" } else { name });
        if self.options.show_ids {
            let _ = write!(output, " [{id:?}]");
        }
        if self.options.show_types
            && let Ok(type_name) = self.tree.type_name(id)
        {
            let short = type_name.rsplit("::").next().unwrap_or(type_name);
            let _ = write!(output, " ({short})");
        }
        output.push('\n');

        let children = self.tree.children(id).map(<[_]>::to_vec).unwrap_or_default();
        let restore = prefix.len();
        if depth > 0 {
            prefix.push_str(if is_last { "    " } else { branch });
        }
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.write_node(child, depth + 1, i + 1 == count, prefix, output);
        }
        prefix.truncate(restore);
    }
}

impl fmt::Display for ObjectTreeDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_all())
    }
}

/// A guard that keeps a tracing span entered until dropped.
///
/// This is useful for tracking the duration of operations.
#[derive(Debug)]
pub struct PerfSpan {
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "trellis::perf", "perf", operation = name);
        Self {
            _span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainObject;

    struct Widget;
    impl crate::object::Object for Widget {}

    fn sample_tree() -> ObjectTree {
        let mut tree = ObjectTree::default();
        let root = tree.root();
        tree.set_name(root, "window").unwrap();
        let panel = tree.insert_child(root, Widget).unwrap();
        tree.set_name(panel, "panel").unwrap();
        let ok = tree.insert_child(panel, Widget).unwrap();
        tree.set_name(ok, "ok_button").unwrap();
        let status = tree.insert_child(root, PlainObject).unwrap();
        tree.set_name(status, "status").unwrap();
        tree
    }

    #[test]
    fn test_tree_format_hierarchy() {
        let tree = sample_tree();
        let output = ObjectTreeDebug::with_options(
            &tree,
            TreeFormatOptions {
                style: TreeStyle::Ascii,
                ..TreeFormatOptions::minimal()
            },
        )
        .format_subtree(tree.root())
        .unwrap();

        let expected = "window\n+-- panel\n|   `-- ok_button\n`-- status\n";
        assert_eq!(output, expected);
    }

    #[test]
    fn test_tree_format_types_and_ids() {
        let tree = sample_tree();
        let output = ObjectTreeDebug::new(&tree).format_subtree(tree.root()).unwrap();
        assert!(output.contains("(Widget)"));
        assert!(output.contains("(PlainObject)"));
        assert!(output.contains('['));
    }

    #[test]
    fn test_tree_format_max_depth() {
        let tree = sample_tree();
        let options = TreeFormatOptions {
            max_depth: Some(1),
            ..TreeFormatOptions::minimal()
        };
        let output = ObjectTreeDebug::with_options(&tree, options)
            .format_subtree(tree.root())
            .unwrap();
        assert!(output.contains("panel"));
        assert!(!output.contains("ok_button"));
    }

    #[test]
    fn test_format_all_includes_detached() {
        let mut tree = sample_tree();
        let floating = tree.insert(PlainObject);
        tree.set_name(floating, "floating").unwrap();

        let output = ObjectTreeDebug::new(&tree).to_string();
        assert!(output.starts_with("Object Tree (5 total objects):"));
        assert!(output.contains("floating"));
    }

    #[test]
    fn test_unknown_subtree() {
        let mut tree = ObjectTree::default();
        let gone = tree.insert(PlainObject);
        tree.destroy(gone).unwrap();
        assert!(ObjectTreeDebug::new(&tree).format_subtree(gone).is_err());
    }

    #[test]
    fn test_perf_span() {
        let _span = PerfSpan::new("test_operation");
    }
}
