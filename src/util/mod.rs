//! Pattern matching, path enumeration, `Link` parsing and bounded fan-out

pub mod glob;
pub mod link;
pub mod path;
pub mod runner;

pub use glob::matches;
pub use link::{Link, next_link, parse_links};
pub use path::{is_specific_path, is_specific_path_component};
pub use runner::{CancelHandle, LimitedConcurrentRunner};
