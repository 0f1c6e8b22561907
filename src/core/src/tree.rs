//! Trie-based permission lookup with nearest-ancestor fallback

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
struct Node {
    value: Option<i32>,
    children: HashMap<String, Node>,
}

/// Permission values keyed by dot-delimited hierarchical names
///
/// Each dot-separated segment is one trie level; a node may carry an
/// explicit value. Lookups return the value of the deepest visited node
/// that carries one, so `a.b` answers queries for `a.b.c`.
///
/// Sign convention: negative = explicit deny, positive = explicit
/// allow, zero = undefined (callers map `> 0` to true, `< 0` to false,
/// `0` to the surrounding default policy).
///
/// A key whose trailing segment is the literal `*` assigns its value to
/// the node at the preceding prefix, so `foo.*` answers `foo.bar`
/// through ordinary ancestor fallback.
///
/// Immutable after construction; rebuilt wholesale per bake.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTree {
    root: Node,
    default_value: i32,
}

impl NodeTree {
    /// Build a tree from a flat permission map
    pub fn of(entries: &HashMap<String, i32>, default_value: i32) -> Self {
        let mut root = Node::default();

        // Sorted insertion keeps overlapping keys deterministic.
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();

        for key in keys {
            let value = entries[key];
            let mut node = &mut root;
            for segment in key.split('.') {
                if segment == "*" {
                    break;
                }
                node = node.children.entry(segment.to_string()).or_default();
            }
            node.value = Some(value);
        }

        Self {
            root,
            default_value,
        }
    }

    /// An empty tree carrying only a default value
    pub fn empty(default_value: i32) -> Self {
        Self {
            root: Node::default(),
            default_value,
        }
    }

    /// Look up a permission, falling back to the nearest ancestor value
    pub fn get(&self, permission: &str) -> i32 {
        let mut node = &self.root;
        let mut result = node.value;

        for segment in permission.split('.') {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    if let Some(value) = node.value {
                        result = Some(value);
                    }
                }
                None => break,
            }
        }

        result.unwrap_or(self.default_value)
    }

    /// The tree's fallback verdict when no key matches
    pub fn default_value(&self) -> i32 {
        self.default_value
    }
}
