//! Shared fixtures for unit tests, integration tests and benchmarks.

pub mod doubles;
pub mod fixture_source;

pub use doubles::{MemoryReader, RecordingUi, ScriptedExtractor};
pub use fixture_source::{generate_source, FixtureConfig};
