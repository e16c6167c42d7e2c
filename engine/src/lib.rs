//! Automated implement-and-verify pipeline engine.
//!
//! Given a sprint plan of requirement stories, the engine decomposes each
//! story into tasks, invokes an external generation service per task, merges
//! results into the project tree, generates and runs tests, analyzes
//! failures, and retries with cumulative learning, all under a closed-world
//! contract on which files and dependencies a story may touch. A full
//! project snapshot is taken before execution and can be rolled back on
//! demand. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (contract, merge, report
//!   parsing, status projection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (sandbox, document store, event
//!   journal, snapshots, service transport). Isolated to enable scripting in
//!   tests.
//!
//! Orchestration modules ([`decompose`], [`generate`], [`testing`],
//! [`analyze`], [`story`], [`sprint`]) coordinate core logic with I/O.

pub mod analyze;
pub mod core;
pub mod decompose;
pub mod generate;
pub mod io;
pub mod logging;
pub mod model;
pub mod sprint;
pub mod story;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod testing;
