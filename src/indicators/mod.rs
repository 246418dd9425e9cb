//! Indicator definitions, parameters and the catalog.
//!
//! The engine is decoupled from specific clinical rules: a definition is a
//! pair of declarative cohort queries, and program constants arrive as
//! [`params::IndicatorParams`].

pub mod catalog;
pub mod defs;
pub mod params;
pub mod query;

pub use catalog::{
    CohortIndicator, IndicatorCatalog, IndicatorCompute, IndicatorDefinition, IndicatorFlagStore,
};
pub use params::IndicatorParams;
pub use query::{CohortFilter, CohortQuery};
