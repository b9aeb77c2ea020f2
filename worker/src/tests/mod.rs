//! Test modules for the worker crate
