//! End-to-end harness: a fake studio backend plus fixtures that attach real
//! engines to it. The scenarios themselves live in `tests/`.

pub mod backend;
pub mod fixtures;
