//! Use cases: the engine facade that wires the adapters together.

pub mod engine;

pub use engine::MockEngine;
