//
// interaction.rs
//
// User-facing collaborator for confirmations, status messages and navigation
//

use crate::line_index::Location;
use crate::store::Store;

/// Whatever presents results to the user: an editor, a terminal, a test double.
pub trait Interaction: Send + Sync {
    /// Asks a yes/no question. Returning `false` aborts the operation that asked.
    fn confirm(&self, question: &str) -> bool;

    /// Shows a transient status message.
    fn status(&self, message: &str);

    /// Shows `store` with the cursor at `location`.
    fn visit(&self, store: &Store, location: Location);

    /// Shows `store` with the cursor at a character offset.
    fn visit_offset(&self, store: &Store, offset: usize);
}

/// Non-interactive sessions: confirms everything and logs the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInteraction;

impl Interaction for LogInteraction {
    fn confirm(&self, question: &str) -> bool {
        log::info!("{} (assuming yes)", question);
        true
    }

    fn status(&self, message: &str) {
        log::info!("{}", message);
    }

    fn visit(&self, store: &Store, location: Location) {
        log::info!("{}:{}", store, location);
    }

    fn visit_offset(&self, store: &Store, offset: usize) {
        log::info!("{}@{}", store, offset);
    }
}
