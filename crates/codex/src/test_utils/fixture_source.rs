//! Deterministic synthetic sources with matching element streams.
//!
//! The output is ASCII, so byte and character offsets agree.

use std::fmt::Write;

use crate::element::{Element, Kind};

#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub types: usize,
    pub funcs_per_type: usize,
    /// Statements in each function body
    pub body_lines: usize,
}

impl FixtureConfig {
    pub fn small() -> Self {
        Self {
            types: 5,
            funcs_per_type: 5,
            body_lines: 3,
        }
    }

    pub fn large() -> Self {
        Self {
            types: 100,
            funcs_per_type: 20,
            body_lines: 10,
        }
    }
}

/// A Java-like source text and the elements an extractor would report for it,
/// in reverse source order.
pub fn generate_source(config: &FixtureConfig) -> (String, Vec<Element>) {
    let mut text = String::new();
    let mut elements = Vec::new();

    for t in 0..config.types {
        let type_name = format!("Type{t}");
        text.push_str("class ");
        elements.push(Element::new(Kind::Type, &type_name, text.len()));
        let _ = writeln!(text, "{type_name} {{");

        for f in 0..config.funcs_per_type {
            let func_name = format!("func{f}");
            text.push_str("  void ");
            elements.push(Element::new(Kind::Func, &func_name, text.len()).within([&type_name]));
            let _ = writeln!(text, "{func_name}() {{");

            for l in 0..config.body_lines {
                text.push_str("    int ");
                let local = format!("v{l}");
                elements.push(
                    Element::new(Kind::Term, &local, text.len()).within([&func_name, &type_name]),
                );
                let _ = writeln!(text, "{local} = {l};");
            }
            text.push_str("  }\n");
        }
        text.push_str("}\n");
    }

    elements.reverse();
    (text, elements)
}
