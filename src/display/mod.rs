//! Human-readable rendering of program trees and search reports.
pub mod trace;
