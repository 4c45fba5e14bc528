mod dimensions;
mod matcher;
pub mod time;

pub use dimensions::{ActivityDimensions, CatalogDimensions, UnplaceableInstant};
pub use matcher::{CatalogEntry, CatalogIndex, FactMatcher, MatchPolicy, MatchStats};
