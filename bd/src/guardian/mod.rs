//! Guardian: security interceptor and cost tracker
//!
//! Unlike the worker roles, the guardian is not delegated to. It watches
//! every row on the message bus, scans for secrets, injection, and budget
//! violations, and can PASS, FLAG, or BLOCK any message.

pub mod budget;
mod interceptor;
pub mod patterns;
mod review;

pub use budget::BudgetTracker;
pub use interceptor::Guardian;
pub use patterns::{Issue, Severity, Verdict, determine_verdict};
pub use review::security_review;
