//! Root crate: exists to host the workspace's black-box integration test
//! suites under `tests/integration/`, mirroring how the teacher's root
//! package doubles as its end-to-end test harness.

pub use gw_core as core;
pub use gw_protocol as protocol;
