//! Nested numeric structures.
//!
//! Records and sample states are trees whose leaves are `f32` arrays. A
//! tree flattens into an ordered list of leaves (depth-first, sequences by
//! index, maps by key) and packs back from such a list given a template
//! with the same topology.
//!
//! Positions inside a tree are reported as paths: `$` is the root, `[i]` a
//! sequence element and `.key` a map entry, e.g. `$.dense[1]`.

use std::collections::BTreeMap;

use ndarray::{arr0, Array, ArrayD, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Path of the root node.
pub const ROOT_PATH: &str = "$";

/// An arbitrarily nested structure of `f32` arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Nested {
    /// A single array of any shape (a 0-d array is a scalar).
    Leaf(ArrayD<f32>),
    /// Ordered subtrees.
    Seq(Vec<Nested>),
    /// Named subtrees, iterated in key order.
    Map(BTreeMap<String, Nested>),
}

impl Default for Nested {
    fn default() -> Self {
        Nested::Seq(Vec::new())
    }
}

impl<D: Dimension> From<Array<f32, D>> for Nested {
    fn from(array: Array<f32, D>) -> Self {
        Nested::Leaf(array.into_dyn())
    }
}

impl From<Vec<Nested>> for Nested {
    fn from(items: Vec<Nested>) -> Self {
        Nested::Seq(items)
    }
}

fn seq_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

fn map_path(parent: &str, key: &str) -> String {
    format!("{}.{}", parent, key)
}

impl Nested {
    /// Wrap an array of any dimensionality as a leaf.
    pub fn leaf<D: Dimension>(array: Array<f32, D>) -> Self {
        Nested::Leaf(array.into_dyn())
    }

    /// A 0-d leaf holding one value.
    pub fn scalar(value: f32) -> Self {
        Nested::Leaf(arr0(value).into_dyn())
    }

    /// Build a sequence node.
    pub fn seq<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Nested>,
    {
        Nested::Seq(items.into_iter().collect())
    }

    /// Build a map node.
    ///
    /// Keys are unique: when `entries` repeats a key, the later entry
    /// replaces the earlier one. Use [`Nested::try_map`] to reject
    /// duplicates instead.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Nested)>,
    {
        Nested::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a map node, failing on a repeated key.
    pub fn try_map<K, I>(entries: I) -> Result<Self, QueryError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Nested)>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            if map.contains_key(&key) {
                let path = map_path(ROOT_PATH, &key);
                return Err(QueryError::mismatch(&path, "duplicate map key"));
            }
            map.insert(key, value);
        }
        Ok(Nested::Map(map))
    }

    /// The array if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&ArrayD<f32>> {
        match self {
            Nested::Leaf(array) => Some(array),
            _ => None,
        }
    }

    /// Child of a map node by key.
    pub fn get(&self, key: &str) -> Option<&Nested> {
        match self {
            Nested::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Child of a sequence node by position.
    pub fn get_index(&self, index: usize) -> Option<&Nested> {
        match self {
            Nested::Seq(items) => items.get(index),
            _ => None,
        }
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Nested::Leaf(_) => 1,
            Nested::Seq(items) => items.iter().map(Nested::leaf_count).sum(),
            Nested::Map(entries) => entries.values().map(Nested::leaf_count).sum(),
        }
    }

    /// Total number of scalar elements across all leaves.
    pub fn element_count(&self) -> usize {
        self.flatten().iter().map(|leaf| leaf.len()).sum()
    }

    /// Whether the tree has no leaves at all.
    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// Borrow every leaf in flatten order.
    pub fn flatten(&self) -> Vec<&ArrayD<f32>> {
        let mut out = Vec::with_capacity(self.leaf_count());
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ArrayD<f32>>) {
        match self {
            Nested::Leaf(array) => out.push(array),
            Nested::Seq(items) => items.iter().for_each(|item| item.collect_leaves(out)),
            Nested::Map(entries) => entries.values().for_each(|v| v.collect_leaves(out)),
        }
    }

    fn flatten_mut(&mut self) -> Vec<&mut ArrayD<f32>> {
        let mut out = Vec::new();
        self.collect_leaves_mut(&mut out);
        out
    }

    fn collect_leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut ArrayD<f32>>) {
        match self {
            Nested::Leaf(array) => out.push(array),
            Nested::Seq(items) => items.iter_mut().for_each(|item| item.collect_leaves_mut(out)),
            Nested::Map(entries) => entries.values_mut().for_each(|v| v.collect_leaves_mut(out)),
        }
    }

    /// Consume the tree and return its leaves in flatten order.
    pub fn into_leaves(self) -> Vec<ArrayD<f32>> {
        match self {
            Nested::Leaf(array) => vec![array],
            Nested::Seq(items) => items.into_iter().flat_map(Nested::into_leaves).collect(),
            Nested::Map(entries) => entries.into_values().flat_map(Nested::into_leaves).collect(),
        }
    }

    /// Rebuild a tree with `template`'s topology from a flat list of leaves.
    ///
    /// The number of leaves and each leaf's shape must match the template.
    pub fn pack_as(template: &Nested, leaves: Vec<ArrayD<f32>>) -> Result<Nested, QueryError> {
        let expected = template.leaf_count();
        if leaves.len() != expected {
            return Err(QueryError::mismatch(
                ROOT_PATH,
                format!("expected {} leaves, got {}", expected, leaves.len()),
            ));
        }
        let mut iter = leaves.into_iter();
        template.pack_at(&mut iter, ROOT_PATH)
    }

    fn pack_at(
        &self,
        leaves: &mut dyn Iterator<Item = ArrayD<f32>>,
        path: &str,
    ) -> Result<Nested, QueryError> {
        match self {
            Nested::Leaf(template) => {
                let leaf = leaves
                    .next()
                    .ok_or_else(|| QueryError::mismatch(path, "ran out of leaves"))?;
                if leaf.shape() != template.shape() {
                    return Err(QueryError::mismatch(
                        path,
                        format!(
                            "expected leaf of shape {:?}, got {:?}",
                            template.shape(),
                            leaf.shape()
                        ),
                    ));
                }
                Ok(Nested::Leaf(leaf))
            }
            Nested::Seq(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.pack_at(leaves, &seq_path(path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Nested::Seq),
            Nested::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok::<_, QueryError>((k.clone(), v.pack_at(leaves, &map_path(path, k))?)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Nested::Map),
        }
    }

    /// Same topology and leaf shapes, every element zero.
    pub fn zeros_like(&self) -> Nested {
        self.map_leaves(|leaf| ArrayD::zeros(leaf.raw_dim()))
    }

    /// Apply `f` to every leaf, keeping the topology.
    pub fn map_leaves<F>(&self, mut f: F) -> Nested
    where
        F: FnMut(&ArrayD<f32>) -> ArrayD<f32>,
    {
        self.map_leaves_ref(&mut f)
    }

    fn map_leaves_ref(&self, f: &mut dyn FnMut(&ArrayD<f32>) -> ArrayD<f32>) -> Nested {
        match self {
            Nested::Leaf(array) => Nested::Leaf(f(array)),
            Nested::Seq(items) => Nested::Seq(items.iter().map(|item| item.map_leaves_ref(f)).collect()),
            Nested::Map(entries) => Nested::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_leaves_ref(f)))
                    .collect(),
            ),
        }
    }

    /// Mutate every leaf in place, in flatten order.
    pub fn for_each_leaf_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut ArrayD<f32>),
    {
        for leaf in self.flatten_mut() {
            f(leaf);
        }
    }

    /// Check that `other` has exactly this tree's topology and leaf shapes.
    ///
    /// The error names the first mismatching path.
    pub fn check_same_structure(&self, other: &Nested) -> Result<(), QueryError> {
        self.check_at(other, ROOT_PATH)
    }

    fn check_at(&self, other: &Nested, path: &str) -> Result<(), QueryError> {
        match (self, other) {
            (Nested::Leaf(a), Nested::Leaf(b)) => {
                if a.shape() != b.shape() {
                    return Err(QueryError::mismatch(
                        path,
                        format!("expected leaf of shape {:?}, got {:?}", a.shape(), b.shape()),
                    ));
                }
                Ok(())
            }
            (Nested::Seq(a), Nested::Seq(b)) => {
                if a.len() != b.len() {
                    return Err(QueryError::mismatch(
                        path,
                        format!("expected sequence of length {}, got {}", a.len(), b.len()),
                    ));
                }
                a.iter()
                    .zip(b)
                    .enumerate()
                    .try_for_each(|(i, (x, y))| x.check_at(y, &seq_path(path, i)))
            }
            (Nested::Map(a), Nested::Map(b)) => {
                if let Some(key) = a.keys().find(|k| !b.contains_key(*k)) {
                    return Err(QueryError::mismatch(path, format!("missing key `{}`", key)));
                }
                if let Some(key) = b.keys().find(|k| !a.contains_key(*k)) {
                    return Err(QueryError::mismatch(path, format!("unexpected key `{}`", key)));
                }
                a.iter()
                    .zip(b.values())
                    .try_for_each(|((k, x), y)| x.check_at(y, &map_path(path, k)))
            }
            _ => Err(QueryError::mismatch(
                path,
                format!("expected {}, got {}", self.kind(), other.kind()),
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Nested::Leaf(_) => "a leaf",
            Nested::Seq(_) => "a sequence",
            Nested::Map(_) => "a map",
        }
    }

    pub(crate) fn ensure_non_empty(&self) -> Result<(), QueryError> {
        if self.is_empty() {
            return Err(QueryError::mismatch(ROOT_PATH, "structure contains no leaves"));
        }
        Ok(())
    }

    /// Elementwise `self += other`.
    ///
    /// Structure is checked first; on error `self` is left unchanged.
    pub fn add_assign_nested(&mut self, other: &Nested) -> Result<(), QueryError> {
        self.check_same_structure(other)?;
        for (acc, leaf) in self.flatten_mut().into_iter().zip(other.flatten()) {
            *acc += leaf;
        }
        Ok(())
    }

    /// Elementwise `self += scale * other`, with the product taken in `f64`.
    ///
    /// Structure is checked first; on error `self` is left unchanged. A
    /// scale of `1.0` adds `other` exactly.
    pub fn add_scaled_nested(&mut self, scale: f64, other: &Nested) -> Result<(), QueryError> {
        self.check_same_structure(other)?;
        for (acc, leaf) in self.flatten_mut().into_iter().zip(other.flatten()) {
            acc.zip_mut_with(leaf, |a, &x| *a += (f64::from(x) * scale) as f32);
        }
        Ok(())
    }

    /// Divide every element of every leaf by `denominator`.
    pub fn div_scalar(mut self, denominator: f32) -> Nested {
        self.for_each_leaf_mut(|leaf| leaf.mapv_inplace(|x| x / denominator));
        self
    }
}
