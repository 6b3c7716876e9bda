//! Style Enforcement Tests
//!
//! Scans the workspace's production sources for patterns clippy does not
//! reject on its own.
//!
//! - `production_code` - No panicking shortcuts or dead code allowances
//!   outside test code

#[path = "style/production_code.rs"]
mod production_code;
