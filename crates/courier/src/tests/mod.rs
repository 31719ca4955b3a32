//! Test suites for the dispatch core.

mod session;
mod session_behaviour;
pub(crate) mod support;
