//! Disjoint-set structure for label equivalence resolution.

/// Union-find over dense `usize` keys with path compression.
///
/// Unions keep the smaller root, so the root of a set is always its
/// lowest-numbered member. Both the in-block connected-component pass and
/// the cross-block merge rely on that for deterministic final ids.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    /// Creates a structure with `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    /// Adds a new singleton set and returns its key.
    pub fn make_set(&mut self) -> usize {
        let key = self.parent.len();
        self.parent.push(key);
        key
    }

    /// Number of keys (not sets).
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether the structure holds no keys.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Finds the root of `key`, compressing the path on the way.
    pub fn find(&mut self, key: usize) -> usize {
        let mut current = key;
        while current != self.parent[current] {
            // point the parent at the grandparent
            self.parent[current] = self.parent[self.parent[current]];
            current = self.parent[current];
        }
        current
    }

    /// Unions the sets of `a` and `b`; the smaller root becomes the parent.
    /// Returns the root of the merged set.
    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return root_a;
        }
        if root_a < root_b {
            self.parent[root_b] = root_a;
            root_a
        } else {
            self.parent[root_a] = root_b;
            root_b
        }
    }
}
