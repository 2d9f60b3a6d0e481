//! Nested parameter trees addressed by `/`-joined names.
//!
//! Two leaf orders matter here. The *native* order is the one a framework
//! flattens in: dict keys sorted, struct fields in definition order, sequence
//! items by index. The *named* order used by [`traverse_with_names`] is fully
//! alphabetical, which differs for structs. [`tree_flatten_with_names`]
//! reconciles the two.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BigVisionError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tree<T> {
    Leaf(T),
    /// Keyed children, always visited in sorted key order.
    Dict(BTreeMap<String, Tree<T>>),
    /// Lists and tuples.
    Seq(Vec<Tree<T>>),
    /// Dataclass-like node whose fields keep their definition order.
    Struct(Vec<(String, Tree<T>)>),
}

/// The shape of a tree with the leaves removed.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeDef {
    skeleton: Tree<()>,
    num_leaves: usize,
}

impl<T> Tree<T> {
    pub fn leaf(value: T) -> Self {
        Tree::Leaf(value)
    }

    pub fn dict<K, I>(items: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Tree<T>)>,
    {
        Tree::Dict(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn seq<I: IntoIterator<Item = Tree<T>>>(items: I) -> Self {
        Tree::Seq(items.into_iter().collect())
    }

    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Tree<T>)>,
    {
        Tree::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Leaves in native order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Tree::Leaf(v) => out.push(v),
            Tree::Dict(children) => children.values().for_each(|c| c.collect_leaves(out)),
            Tree::Seq(children) => children.iter().for_each(|c| c.collect_leaves(out)),
            Tree::Struct(fields) => fields.iter().for_each(|(_, c)| c.collect_leaves(out)),
        }
    }

    pub fn num_leaves(&self) -> usize {
        match self {
            Tree::Leaf(_) => 1,
            Tree::Dict(children) => children.values().map(Tree::num_leaves).sum(),
            Tree::Seq(children) => children.iter().map(Tree::num_leaves).sum(),
            Tree::Struct(fields) => fields.iter().map(|(_, c)| c.num_leaves()).sum(),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Tree<U> {
        self.map_inner(&mut f)
    }

    fn map_inner<U>(&self, f: &mut impl FnMut(&T) -> U) -> Tree<U> {
        match self {
            Tree::Leaf(v) => Tree::Leaf(f(v)),
            Tree::Dict(children) => Tree::Dict(
                children
                    .iter()
                    .map(|(k, c)| (k.clone(), c.map_inner(f)))
                    .collect(),
            ),
            Tree::Seq(children) => Tree::Seq(children.iter().map(|c| c.map_inner(f)).collect()),
            Tree::Struct(fields) => Tree::Struct(
                fields
                    .iter()
                    .map(|(k, c)| (k.clone(), c.map_inner(f)))
                    .collect(),
            ),
        }
    }

    /// Structure of this tree, for rebuilding with [`TreeDef::unflatten`].
    pub fn treedef(&self) -> TreeDef {
        TreeDef {
            skeleton: self.map(|_| ()),
            num_leaves: self.num_leaves(),
        }
    }

    /// Lookup by `/`-joined name. Sequence items are addressed by index.
    pub fn get(&self, name: &str) -> Option<&Tree<T>> {
        if name.is_empty() {
            return Some(self);
        }
        let (head, rest) = match name.split_once('/') {
            Some((h, r)) => (h, r),
            None => (name, ""),
        };
        let child = match self {
            Tree::Leaf(_) => None,
            Tree::Dict(children) => children.get(head),
            Tree::Seq(children) => head.parse::<usize>().ok().and_then(|i| children.get(i)),
            Tree::Struct(fields) => fields.iter().find(|(k, _)| k == head).map(|(_, c)| c),
        }?;
        child.get(rest)
    }

    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Tree::Leaf(v) => Some(v),
            _ => None,
        }
    }
}

impl TreeDef {
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Rebuilds a tree from leaves given in native order.
    pub fn unflatten<U>(&self, values: Vec<U>) -> Result<Tree<U>> {
        if values.len() != self.num_leaves {
            return Err(BigVisionError::Structure(format!(
                "tree has {} leaves, got {} values",
                self.num_leaves,
                values.len()
            )));
        }
        let mut values = values.into_iter();
        fill(&self.skeleton, &mut values)
            .ok_or_else(|| BigVisionError::Structure("ran out of leaf values".to_string()))
    }
}

fn fill<U>(skeleton: &Tree<()>, values: &mut impl Iterator<Item = U>) -> Option<Tree<U>> {
    let filled = match skeleton {
        Tree::Leaf(()) => Tree::Leaf(values.next()?),
        Tree::Dict(children) => Tree::Dict(
            children
                .iter()
                .map(|(k, c)| Some((k.clone(), fill(c, values)?)))
                .collect::<Option<_>>()?,
        ),
        Tree::Seq(children) => Tree::Seq(
            children
                .iter()
                .map(|c| fill(c, values))
                .collect::<Option<_>>()?,
        ),
        Tree::Struct(fields) => Tree::Struct(
            fields
                .iter()
                .map(|(k, c)| Some((k.clone(), fill(c, values)?)))
                .collect::<Option<_>>()?,
        ),
    };
    Some(filled)
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

/// Yields `(name, leaf)` pairs in alphabetical order of the path segments.
///
/// A bare leaf at the root is named `""`.
pub fn traverse_with_names<T>(tree: &Tree<T>) -> Vec<(String, &T)> {
    let mut out = Vec::new();
    traverse_inner(tree, String::new(), &mut out);
    out
}

fn traverse_inner<'a, T>(tree: &'a Tree<T>, prefix: String, out: &mut Vec<(String, &'a T)>) {
    match tree {
        Tree::Leaf(v) => out.push((prefix, v)),
        Tree::Dict(children) => {
            for (k, c) in children {
                traverse_inner(c, join(&prefix, k), out);
            }
        }
        Tree::Seq(children) => {
            for (i, c) in children.iter().enumerate() {
                traverse_inner(c, join(&prefix, &i.to_string()), out);
            }
        }
        Tree::Struct(fields) => {
            let mut sorted: Vec<_> = fields.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (k, c) in sorted {
                traverse_inner(c, join(&prefix, k), out);
            }
        }
    }
}

/// Flattens in native order and pairs every leaf with its name.
pub fn tree_flatten_with_names<T>(tree: &Tree<T>) -> (Vec<(String, &T)>, TreeDef) {
    let leaves = tree.leaves();

    // Label every leaf with its native position, then read the labels back
    // in named order to get the permutation between the two orders.
    let mut counter = 0usize;
    let positions = tree.map(|_| {
        counter += 1;
        counter - 1
    });
    let mut names = vec![String::new(); leaves.len()];
    for (name, &pos) in traverse_with_names(&positions) {
        names[pos] = name;
    }

    let named = names.into_iter().zip(leaves).collect();
    (named, tree.treedef())
}

/// Maps every leaf with `f(name, leaf)`.
pub fn tree_map_with_names<T, U>(tree: &Tree<T>, mut f: impl FnMut(&str, &T) -> U) -> Tree<U> {
    map_named(tree, "", &mut f)
}

fn map_named<T, U>(tree: &Tree<T>, prefix: &str, f: &mut impl FnMut(&str, &T) -> U) -> Tree<U> {
    match tree {
        Tree::Leaf(v) => Tree::Leaf(f(prefix, v)),
        Tree::Dict(children) => Tree::Dict(
            children
                .iter()
                .map(|(k, c)| (k.clone(), map_named(c, &join(prefix, k), f)))
                .collect(),
        ),
        Tree::Seq(children) => Tree::Seq(
            children
                .iter()
                .enumerate()
                .map(|(i, c)| map_named(c, &join(prefix, &i.to_string()), f))
                .collect(),
        ),
        Tree::Struct(fields) => Tree::Struct(
            fields
                .iter()
                .map(|(k, c)| (k.clone(), map_named(c, &join(prefix, k), f)))
                .collect(),
        ),
    }
}

/// Maps two trees of identical structure with `f(name, a, b)`.
pub fn tree_map2_with_names<A, B, U>(
    a: &Tree<A>,
    b: &Tree<B>,
    mut f: impl FnMut(&str, &A, &B) -> U,
) -> Result<Tree<U>> {
    map2_named(a, b, "", &mut f)
}

fn map2_named<A, B, U>(
    a: &Tree<A>,
    b: &Tree<B>,
    prefix: &str,
    f: &mut impl FnMut(&str, &A, &B) -> U,
) -> Result<Tree<U>> {
    let mismatch = || BigVisionError::Structure(format!("trees differ at `{}`", prefix));
    let mapped = match (a, b) {
        (Tree::Leaf(x), Tree::Leaf(y)) => Tree::Leaf(f(prefix, x, y)),
        (Tree::Dict(xs), Tree::Dict(ys)) => {
            if xs.len() != ys.len() || xs.keys().ne(ys.keys()) {
                return Err(mismatch());
            }
            let mut out = BTreeMap::new();
            for ((k, x), y) in xs.iter().zip(ys.values()) {
                out.insert(k.clone(), map2_named(x, y, &join(prefix, k), f)?);
            }
            Tree::Dict(out)
        }
        (Tree::Seq(xs), Tree::Seq(ys)) => {
            if xs.len() != ys.len() {
                return Err(mismatch());
            }
            let mut out = Vec::with_capacity(xs.len());
            for (i, (x, y)) in xs.iter().zip(ys).enumerate() {
                out.push(map2_named(x, y, &join(prefix, &i.to_string()), f)?);
            }
            Tree::Seq(out)
        }
        (Tree::Struct(xs), Tree::Struct(ys)) => {
            if xs.len() != ys.len() || xs.iter().zip(ys).any(|(x, y)| x.0 != y.0) {
                return Err(mismatch());
            }
            let mut out = Vec::with_capacity(xs.len());
            for ((k, x), (_, y)) in xs.iter().zip(ys) {
                out.push((k.clone(), map2_named(x, y, &join(prefix, k), f)?));
            }
            Tree::Struct(out)
        }
        _ => return Err(mismatch()),
    };
    Ok(mapped)
}

/// Rebuilds nested dicts from `/`-separated names.
pub fn recover_tree<T, K: AsRef<str>>(keys: &[K], values: Vec<T>) -> Result<Tree<T>> {
    if keys.len() != values.len() {
        return Err(BigVisionError::Structure(format!(
            "{} keys but {} values",
            keys.len(),
            values.len()
        )));
    }
    let mut root: BTreeMap<String, Tree<T>> = BTreeMap::new();
    for (key, value) in keys.iter().zip(values) {
        insert_path(&mut root, key.as_ref(), key.as_ref(), value)?;
    }
    Ok(Tree::Dict(root))
}

fn insert_path<T>(node: &mut BTreeMap<String, Tree<T>>, rest: &str, full: &str, value: T) -> Result<()> {
    let conflict = || BigVisionError::Structure(format!("conflicting entries at `{}`", full));
    match rest.split_once('/') {
        None => {
            if node.contains_key(rest) {
                return Err(conflict());
            }
            node.insert(rest.to_string(), Tree::Leaf(value));
            Ok(())
        }
        Some((head, tail)) => {
            let child = node
                .entry(head.to_string())
                .or_insert_with(|| Tree::Dict(BTreeMap::new()));
            match child {
                Tree::Dict(children) => insert_path(children, tail, full, value),
                _ => Err(conflict()),
            }
        }
    }
}

/// Builds one boolean mask per pattern. A leaf is `true` only in the mask of
/// the first pattern that fully matches its name.
pub fn make_mask_trees<T>(tree: &Tree<T>, patterns: &[&str]) -> Result<Vec<Tree<bool>>> {
    let compiled = patterns
        .iter()
        .map(|p| Regex::new(&format!("^(?:{})$", p)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let first_match = tree_map_with_names(tree, |name, _| compiled.iter().position(|re| re.is_match(name)));

    Ok((0..patterns.len())
        .map(|idx| first_match.map(|m| *m == Some(idx)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    fn leaf(v: i64) -> Tree<i64> {
        Tree::leaf(v)
    }

    /// {'w1': 1, 'w2': 2, 'w34': (3, 4)}
    fn d1() -> Tree<i64> {
        Tree::dict([
            ("w1", leaf(1)),
            ("w2", leaf(2)),
            ("w34", Tree::seq([leaf(3), leaf(4)])),
        ])
    }

    /// {'conv1': {'kernel': 0, 'bias': 1}, 'conv2': {'kernel': 2, 'bias': 3}}
    fn d2() -> Tree<i64> {
        Tree::dict([
            ("conv1", Tree::dict([("kernel", leaf(0)), ("bias", leaf(1))])),
            ("conv2", Tree::dict([("kernel", leaf(2)), ("bias", leaf(3))])),
        ])
    }

    /// {'a': 0, 'flax': Struct(v3=2.0, v2=1, v1='s')}
    fn d3() -> Tree<ConfigValue> {
        Tree::dict([
            ("a", Tree::leaf(ConfigValue::from(0))),
            (
                "flax",
                Tree::record([
                    ("v3", Tree::leaf(ConfigValue::from(2.0))),
                    ("v2", Tree::leaf(ConfigValue::from(1))),
                    ("v1", Tree::leaf(ConfigValue::from("s"))),
                ]),
            ),
        ])
    }

    fn owned<T: Clone>(pairs: Vec<(String, &T)>) -> Vec<(String, T)> {
        pairs.into_iter().map(|(n, v)| (n, v.clone())).collect()
    }

    fn named<T>(pairs: Vec<(&str, T)>) -> Vec<(String, T)> {
        pairs.into_iter().map(|(n, v)| (n.to_string(), v)).collect()
    }

    #[test]
    fn test_traverse_with_names() {
        assert_eq!(
            owned(traverse_with_names(&d1())),
            named(vec![("w1", 1), ("w2", 2), ("w34/0", 3), ("w34/1", 4)])
        );
        assert_eq!(
            owned(traverse_with_names(&d2())),
            named(vec![("conv1/bias", 1), ("conv1/kernel", 0), ("conv2/bias", 3), ("conv2/kernel", 2)])
        );
        assert_eq!(
            owned(traverse_with_names(&d3())),
            named(vec![
                ("a", ConfigValue::from(0)),
                ("flax/v1", ConfigValue::from("s")),
                ("flax/v2", ConfigValue::from(1)),
                ("flax/v3", ConfigValue::from(2.0)),
            ])
        );
    }

    #[test]
    fn test_bare_leaf_is_unnamed() {
        assert_eq!(owned(traverse_with_names(&leaf(7))), named(vec![("", 7)]));
    }

    #[test]
    fn test_tree_flatten_with_names_follows_native_order() {
        let tree = d2();
        let (names_and_vals, _) = tree_flatten_with_names(&tree);
        assert_eq!(
            owned(names_and_vals.clone()),
            named(vec![("conv1/bias", 1), ("conv1/kernel", 0), ("conv2/bias", 3), ("conv2/kernel", 2)])
        );
        let values: Vec<i64> = names_and_vals.iter().map(|(_, v)| **v).collect();
        assert_eq!(values, tree.leaves().into_iter().copied().collect::<Vec<_>>());

        // Struct fields keep definition order here, unlike the named traversal.
        let tree = d3();
        let (names_and_vals, treedef) = tree_flatten_with_names(&tree);
        assert_eq!(
            owned(names_and_vals),
            named(vec![
                ("a", ConfigValue::from(0)),
                ("flax/v3", ConfigValue::from(2.0)),
                ("flax/v2", ConfigValue::from(1)),
                ("flax/v1", ConfigValue::from("s")),
            ])
        );
        assert_eq!(treedef.num_leaves(), 4);
    }

    #[test]
    fn test_unflatten_roundtrip_and_count_check() {
        let tree = d3();
        let (flat, treedef) = tree_flatten_with_names(&tree);
        let values: Vec<ConfigValue> = flat.into_iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(treedef.unflatten(values).unwrap(), tree);
        assert!(treedef.unflatten(vec![1, 2]).is_err());
    }

    #[test]
    fn test_tree_map_with_names() {
        let mapped = tree_map_with_names(&d1(), |name, x| if name.contains("w2") { -x } else { *x });
        assert_eq!(
            mapped,
            Tree::dict([("w1", leaf(1)), ("w2", leaf(-2)), ("w34", Tree::seq([leaf(3), leaf(4)]))])
        );

        let mapped = tree_map2_with_names(&d1(), &d1(), |name, x1, x2| {
            if name.contains("w2") {
                x1 + x2
            } else {
                *x1
            }
        })
        .unwrap();
        assert_eq!(
            mapped,
            Tree::dict([("w1", leaf(1)), ("w2", leaf(4)), ("w34", Tree::seq([leaf(3), leaf(4)]))])
        );
    }

    #[test]
    fn test_tree_map2_rejects_structure_mismatch() {
        assert!(tree_map2_with_names(&d1(), &d2(), |_, a, b| a + b).is_err());
        let short = Tree::dict([("w1", leaf(1)), ("w2", leaf(2)), ("w34", Tree::seq([leaf(3)]))]);
        assert!(tree_map2_with_names(&d1(), &short, |_, a, b| a + b).is_err());
    }

    #[test]
    fn test_recover_tree() {
        let keys = ["a/b", "a/c/x", "a/c/y", "d"];
        let tree = recover_tree(&keys, vec![0, 1, 2, 3]).unwrap();
        let expected = Tree::dict([
            (
                "a",
                Tree::dict([("b", leaf(0)), ("c", Tree::dict([("x", leaf(1)), ("y", leaf(2))]))]),
            ),
            ("d", leaf(3)),
        ]);
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_recover_tree_conflicts() {
        assert!(recover_tree(&["a", "a/b"], vec![0, 1]).is_err());
        assert!(recover_tree(&["a/b", "a"], vec![0, 1]).is_err());
        assert!(recover_tree(&["a"], vec![0, 1]).is_err());
    }

    #[test]
    fn test_make_mask_trees() {
        let tree = Tree::dict([
            ("a", Tree::dict([("b", leaf(0)), ("x", leaf(1))])),
            ("b", Tree::dict([("x", leaf(2)), ("y", leaf(3))])),
        ]);
        let (f, t) = (false, true);
        let msk1 = Tree::dict([
            ("a", Tree::dict([("b", Tree::leaf(f)), ("x", Tree::leaf(t))])),
            ("b", Tree::dict([("x", Tree::leaf(t)), ("y", Tree::leaf(f))])),
        ]);
        let msk2 = Tree::dict([
            ("a", Tree::dict([("b", Tree::leaf(f)), ("x", Tree::leaf(f))])),
            ("b", Tree::dict([("x", Tree::leaf(f)), ("y", Tree::leaf(t))])),
        ]);
        // `b/x` goes to the first pattern only; `b` does not match `.*/b`.
        assert_eq!(make_mask_trees(&tree, &[".*/x", "b/.*"]).unwrap(), vec![msk1, msk2]);
    }

    #[test]
    fn test_make_mask_trees_bad_pattern() {
        assert!(make_mask_trees(&d1(), &["w(1"]).is_err());
    }

    #[test]
    fn test_get_by_name() {
        let tree = d1();
        assert_eq!(tree.get("w34/1").and_then(Tree::as_leaf), Some(&4));
        assert!(tree.get("w34/2").is_none());
        assert!(tree.get("w9").is_none());
    }
}
