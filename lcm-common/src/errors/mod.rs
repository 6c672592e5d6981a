//! Error catalog and error normalization for the end-to-end helpers.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                               |
//! |------------|-------------|-------------------------------------------|
//! | E001-E099  | Config      | Environment and credential configuration  |
//! | E100-E199  | Driver      | Browser automation driver failures        |
//! | E200-E299  | Session     | Login flow, hydration and redirect issues |
//! | E300-E399  | Api         | Backend HTTP API responses                |

pub mod catalog;
pub mod normalize;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
pub use normalize::{ErrorKind, NormalizedError};
