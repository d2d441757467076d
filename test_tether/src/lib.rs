//! System tests for the `tether` crate live in `tests/`.
