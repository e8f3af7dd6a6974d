//
// lib.rs
//
// Project code intelligence: positional element indexes, cross-project
// symbol resolution, background reindexing and safe multi-file rename.
//

pub mod config;
pub mod element;
pub mod error_ring;
pub mod extract;
pub mod index_queue;
pub mod interaction;
pub mod line_index;
pub mod navigation;
pub mod project;
pub mod registry;
pub mod rename;
pub mod source_index;
pub mod store;
pub mod store_set;
pub mod symbol_store;
pub mod uses;

// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
