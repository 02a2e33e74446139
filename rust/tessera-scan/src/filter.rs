// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Row filters evaluated during a block scan.

use std::fmt::Debug;

use snafu::location;
use tessera_core::datatypes::Value;
use tessera_core::{Error, Result};

/// A compiled filter.
///
/// `row` is the logical row of a query: the query dimensions followed by the
/// query measures, with dictionary values already resolved and defaults
/// filled in for columns missing from the block.
pub trait FilterExecutor: Debug + Send + Sync {
    fn matches(&self, row: &[Value]) -> Result<bool>;
}

/// A predicate tree over logical row slots.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    DimensionEquals { slot: usize, value: String },
    DimensionIn { slot: usize, values: Vec<String> },
    /// Inclusive bounds; a missing bound is unbounded. Nulls never match.
    MeasureRange {
        slot: usize,
        min: Option<f64>,
        max: Option<f64>,
    },
    IsNull { slot: usize },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(slot: usize, value: impl Into<String>) -> Self {
        Self::DimensionEquals {
            slot,
            value: value.into(),
        }
    }

    pub fn is_in<S: Into<String>>(slot: usize, values: impl IntoIterator<Item = S>) -> Self {
        Self::DimensionIn {
            slot,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn between(slot: usize, min: Option<f64>, max: Option<f64>) -> Self {
        Self::MeasureRange { slot, min, max }
    }

    pub fn is_null(slot: usize) -> Self {
        Self::IsNull { slot }
    }

    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            _ => Self::And(vec![self, other]),
        }
    }

    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            _ => Self::Or(vec![self, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Largest slot referenced, if any.
    pub fn max_slot(&self) -> Option<usize> {
        match self {
            Self::DimensionEquals { slot, .. }
            | Self::DimensionIn { slot, .. }
            | Self::MeasureRange { slot, .. }
            | Self::IsNull { slot } => Some(*slot),
            Self::And(children) | Self::Or(children) => {
                children.iter().filter_map(Self::max_slot).max()
            }
            Self::Not(child) => child.max_slot(),
        }
    }
}

fn slot_value(row: &[Value], slot: usize) -> Result<&Value> {
    row.get(slot).ok_or_else(|| {
        Error::invalid_input(
            format!("filter references slot {} of a {} column row", slot, row.len()),
            location!(),
        )
    })
}

impl FilterExecutor for Predicate {
    fn matches(&self, row: &[Value]) -> Result<bool> {
        match self {
            Self::DimensionEquals { slot, value } => {
                Ok(slot_value(row, *slot)?.as_str() == Some(value.as_str()))
            }
            Self::DimensionIn { slot, values } => Ok(slot_value(row, *slot)?
                .as_str()
                .is_some_and(|v| values.iter().any(|candidate| candidate == v))),
            Self::MeasureRange { slot, min, max } => {
                let Some(value) = slot_value(row, *slot)?.as_f64() else {
                    return Ok(false);
                };
                Ok(min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max))
            }
            Self::IsNull { slot } => Ok(slot_value(row, *slot)?.is_null()),
            Self::And(children) => {
                for child in children {
                    if !child.matches(row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(children) => {
                for child in children {
                    if child.matches(row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(child) => Ok(!child.matches(row)?),
        }
    }
}
