//! Virtual category tree mapping paths like `gather/system/sysinfo` to modules.

use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
struct Node {
    children: BTreeMap<String, Node>,
    module: Option<String>,
}

/// Hierarchy of category paths ending in module names.
#[derive(Debug, Default, Clone)]
pub struct CategoryTree {
    root: Node,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl CategoryTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `module` under `category`.
    pub fn insert(&mut self, category: &str, module: &str) {
        let mut node = &mut self.root;
        for segment in segments(category).chain(std::iter::once(module)) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.module = Some(module.to_string());
    }

    fn node(&self, path: &str) -> Option<&Node> {
        segments(path).try_fold(&self.root, |node, segment| node.children.get(segment))
    }

    /// Module name at `path`, if the path ends on a module.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.node(path)?.module.as_deref()
    }

    /// Names directly below `path`, for completion.
    #[must_use]
    pub fn children(&self, path: &str) -> Vec<String> {
        self.node(path)
            .map(|node| node.children.keys().cloned().collect())
            .unwrap_or_default()
    }
}
