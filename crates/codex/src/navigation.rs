//
// navigation.rs
//
// Point-based navigation: definition under the cursor and enclosing definitions
//

use crate::element::Definition;
use crate::interaction::Interaction;
use crate::line_index::Location;
use crate::source_index::SourceIndex;
use crate::store_set::StoreSet;

/// Definition of the element spanning `loc`.
pub fn definition_at(index: &SourceIndex, loc: Location, set: &StoreSet) -> Option<Definition> {
    let elem = index.element_at(loc)?;
    set.resolve_ref(&elem.to_ref())
}

/// Innermost container (module, type or function) enclosing `offset`.
///
/// Starts from the nearest element at or before the offset and follows
/// parents until a container is reached.
pub fn encloser_at(index: &SourceIndex, set: &StoreSet, offset: usize) -> Option<Definition> {
    let loc = index.lines().location_of(offset)?;
    let nearest = index.nearest_at_or_before(loc)?;
    let mut def = set.resolve_ref(&nearest.to_ref())?;
    while !def.kind().is_container() {
        def = set.parent(&def)?;
    }
    Some(def)
}

/// Shows the declaration of `def`, with its signature when it has one.
pub fn visit_definition(def: &Definition, ui: &dyn Interaction) {
    ui.visit_offset(&def.store, def.element.offset);
    match &def.element.signature {
        Some(signature) => ui.status(signature),
        None => ui.status(&def.to_ref().to_string()),
    }
}
