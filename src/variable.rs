//! Variable descriptors, and the registry that hands out their ids.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Deserialize, Serialize};
use crate::centering::Centering;
use crate::error::{Error, Result};
use crate::int_vector::IntVector;




/// Identifies a registered variable. Ids are dense, in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableId(pub usize);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}




/// A named array quantity defined on every patch of a level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable<const D: usize> {
    pub name: String,
    pub centering: Centering,
    pub depth: usize,
    pub ghost_width: IntVector<D>,
}




/**
 * Registry of variables. Registration order determines the ids, so every
 * process that registers the same variables in the same order agrees on
 * them.
 */
#[derive(Clone, Debug, Default)]
pub struct VariableDatabase<const D: usize> {
    variables: Vec<Variable<D>>,
}




// ============================================================================
impl<const D: usize> VariableDatabase<D> {


    pub fn new() -> Self {
        Self { variables: Vec::new() }
    }


    /**
     * Register a variable. Outer centerings store no ghost data, so their
     * ghost width is recorded as zero whatever is requested.
     */
    pub fn register(&mut self, name: &str, centering: Centering, depth: usize, ghost_width: IntVector<D>) -> Result<VariableId> {
        if depth == 0 {
            return Err(Error::Configuration(format!("variable {} must have positive depth", name)))
        }
        if !ghost_width.is_non_negative() {
            return Err(Error::Configuration(format!("variable {} has negative ghost width {:?}", name, ghost_width)))
        }
        if self.find(name).is_some() {
            return Err(Error::Configuration(format!("variable {} is already registered", name)))
        }
        let ghost_width = if centering.is_outer() { IntVector::zero() } else { ghost_width };

        self.variables.push(Variable {
            name: name.to_string(),
            centering,
            depth,
            ghost_width,
        });
        Ok(VariableId(self.variables.len() - 1))
    }


    pub fn get(&self, id: VariableId) -> Result<&Variable<D>> {
        self.variables
            .get(id.0)
            .ok_or_else(|| Error::Configuration(format!("{} is not registered", id)))
    }


    pub fn find(&self, name: &str) -> Option<VariableId> {
        self.variables.iter().position(|v| v.name == name).map(VariableId)
    }


    pub fn len(&self) -> usize {
        self.variables.len()
    }


    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}




/**
 * A set of variable ids, used to select which patch data an operation
 * touches.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentSelector {
    ids: BTreeSet<VariableId>,
}

impl ComponentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: VariableId) {
        self.ids.insert(id);
    }

    pub fn clear(&mut self, id: VariableId) {
        self.ids.remove(&id);
    }

    pub fn is_set(&self, id: VariableId) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.ids.iter().copied()
    }
}

impl core::iter::FromIterator<VariableId> for ComponentSelector {
    fn from_iter<I: IntoIterator<Item = VariableId>>(iter: I) -> Self {
        Self { ids: iter.into_iter().collect() }
    }
}
