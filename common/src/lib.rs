//! SimpleBank Common Types
//!
//! Shared types used across the SimpleBank workspace: identifiers,
//! currency and money, timestamps, and the error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
