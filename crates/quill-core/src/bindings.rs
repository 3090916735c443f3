//! Binding sets and combinatorial for-each expansion.
//!
//! The resolver classifies each dependency into one of three sources; this
//! module folds them into concrete binding sets:
//! - a scalar contributes the same value to every binding,
//! - a for-each axis multiplies the running bindings by its elements
//!   (declaration order = axis order, first axis varies slowest),
//! - an aligned field pairs element `i` with driver index `i` instead of
//!   contributing its own axis.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// A concrete map from dependency name to one resolved value, used for a
/// single evaluation. Values may be absent (unrun literal, failed branch).
pub type BindingSet = IndexMap<String, Option<Value>>;

/// A dependency's resolved source, before expansion.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// One value shared by every binding.
    Scalar(Option<Value>),
    /// An independent for-each axis; the first axis is the expansion driver.
    Axis(Vec<Option<Value>>),
    /// Positionally aligned with the driver axis: element `i` pairs with
    /// driver index `i`.
    Aligned(Vec<Option<Value>>),
}

/// Fold resolved dependencies, in declaration order, into binding sets.
///
/// With no axis present this returns exactly one binding set. Each axis
/// clones every partial binding once per element, so the first axis varies
/// slowest in the returned order. Aligned sources are substituted per
/// driver index after every axis has folded, so they may be declared
/// anywhere relative to the driver; they require a driver axis to exist
/// and enough elements to cover every driver index.
pub fn expand(entries: Vec<(String, Resolved)>) -> Result<Vec<BindingSet>> {
    // Each partial carries the driver index it was cloned from, if any.
    let mut partials: Vec<(BindingSet, Option<usize>)> = vec![(BindingSet::new(), None)];
    let mut have_driver = false;
    let mut aligned: Vec<(String, Vec<Option<Value>>)> = Vec::new();

    for (name, resolved) in entries {
        match resolved {
            Resolved::Scalar(v) => {
                for (binding, _) in &mut partials {
                    binding.insert(name.clone(), v.clone());
                }
            }
            Resolved::Axis(elements) => {
                let is_driver = !have_driver;
                have_driver = true;
                let mut next = Vec::with_capacity(partials.len() * elements.len());
                for (binding, idx) in &partials {
                    for (i, element) in elements.iter().enumerate() {
                        let mut grown = binding.clone();
                        grown.insert(name.clone(), element.clone());
                        next.push((grown, if is_driver { Some(i) } else { *idx }));
                    }
                }
                partials = next;
            }
            Resolved::Aligned(elements) => {
                // Placeholder keeps the declaration position; the value is
                // filled in once the driver axis has folded.
                for (binding, _) in &mut partials {
                    binding.insert(name.clone(), None);
                }
                aligned.push((name, elements));
            }
        }
    }

    for (name, elements) in aligned {
        for (binding, idx) in &mut partials {
            let i = idx.ok_or_else(|| {
                Error::InvalidPositionalAlignment(format!(
                    "dependency '{name}' aligns with a for-each driver, but no for-each dependency is declared"
                ))
            })?;
            let element = elements.get(i).ok_or_else(|| {
                Error::InvalidPositionalAlignment(format!(
                    "dependency '{name}' has {} aligned values but driver index {i} is required",
                    elements.len()
                ))
            })?;
            binding.insert(name.clone(), element.clone());
        }
    }

    Ok(partials.into_iter().map(|(binding, _)| binding).collect())
}
