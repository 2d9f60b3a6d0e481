//! Checkpoints as flat lists of named leaves.
//!
//! A checkpoint file holds `(name, value)` pairs in native leaf order,
//! written with bincode. Loading without a template rebuilds nested dicts
//! from the names; [`load_checkpoint_like`] restores the exact structure of
//! a template tree instead.

use std::collections::HashMap;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{BigVisionError, Result};
use crate::tree::{recover_tree, tree_flatten_with_names, Tree};
use crate::utils::io;

/// Saves a tree, creating parent directories if needed.
pub fn save_checkpoint<T: Serialize>(path: impl AsRef<Path>, tree: &Tree<T>) -> Result<()> {
    let path = path.as_ref();
    let (named, _) = tree_flatten_with_names(tree);
    debug!(path = %path.display(), leaves = named.len(), "saving checkpoint");
    io::serialize_to_file(path, &named)
}

/// Loads a checkpoint as nested dicts. Sequence indices come back as keys.
pub fn load_checkpoint<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Tree<T>> {
    let (names, values) = read_named(path.as_ref())?;
    recover_tree(&names, values)
}

/// Loads a checkpoint into the structure of `template`.
///
/// Every leaf name of the template must be present in the file. Extra
/// entries in the file are ignored.
pub fn load_checkpoint_like<T, U>(path: impl AsRef<Path>, template: &Tree<U>) -> Result<Tree<T>>
where
    T: DeserializeOwned,
{
    let (names, values) = read_named::<T>(path.as_ref())?;
    let mut by_name: HashMap<String, T> = names.into_iter().zip(values).collect();

    let (wanted, treedef) = tree_flatten_with_names(template);
    let mut ordered = Vec::with_capacity(wanted.len());
    for (name, _) in wanted {
        let value = by_name
            .remove(&name)
            .ok_or_else(|| BigVisionError::MissingKey(format!("checkpoint entry `{}`", name)))?;
        ordered.push(value);
    }
    if !by_name.is_empty() {
        debug!(unused = by_name.len(), "checkpoint has entries not in template");
    }
    treedef.unflatten(ordered)
}

fn read_named<T: DeserializeOwned>(path: &Path) -> Result<(Vec<String>, Vec<T>)> {
    let named: Vec<(String, T)> = io::deserialize_from_file(path)?;
    debug!(path = %path.display(), leaves = named.len(), "loaded checkpoint");
    Ok(named.into_iter().unzip())
}
