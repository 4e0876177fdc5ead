pub mod driver;
pub mod locator;
pub mod regex;
pub mod smith_waterman;
pub mod types;

pub use driver::{BatchDriver, DriverError, PrimerPassStats};
pub use locator::PrimerLocator;
pub use smith_waterman::SmithWaterman;
pub use types::{LocatedPair, MatchResult, SpecimenRecord, matching_flag, length_flag};
