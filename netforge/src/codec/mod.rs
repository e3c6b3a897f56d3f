//! Structural Codec
//!
//! Rewrites raw footprint definitions without reformatting them. Every edit
//! is located with the balanced-bracket scanner in [`crate::parser::blocks`]
//! and applied as a splice, so text outside the edited clause survives byte
//! for byte. Edits that target a clause (`at`, `layer`, `uuid`, reference
//! fields) only look at *direct* children of the top-level block; pads carry
//! their own `(at ..)` and `(layers ..)` which must never move.

use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;

use crate::parser::blocks::{
    self, atoms, block_keyword, child_blocks, first_argument, quote, BlockError, Span,
};

/// Pin number -> (net id, net name).
pub type PinNetMap = BTreeMap<String, (u32, String)>;

const PAD_MARKER: &str = "(pad ";

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("Definition has no top-level block")]
    NoRootBlock,

    #[error("Malformed definition: {0}")]
    Block(#[from] BlockError),
}

/// Append ` (net <id> "<name>")` to every pad whose number is in `pins`.
///
/// Pads already carrying a net clause are left alone, so binding twice with
/// the same map changes nothing. Pins missing from the text are ignored.
pub fn bind_pad_nets(definition: &str, pins: &PinNetMap) -> Result<String, CodecError> {
    let pads = blocks::scan_blocks(definition, PAD_MARKER)?;
    let mut edits = Vec::new();

    for pad in pads {
        let Some((number, _)) = first_argument(definition, pad) else {
            continue;
        };
        let Some((id, name)) = pins.get(&number) else {
            continue;
        };
        if direct_child(definition, pad, "net").is_some() {
            tracing::debug!("Pad {} already bound, skipping", number);
            continue;
        }
        let close = pad.close();
        edits.push((close..close, format!(" (net {} {})", id, quote(name))));
    }

    Ok(apply_edits(definition, edits))
}

/// Net bindings found on pads, in text order: `(pad number, net id, net name)`.
pub fn pad_nets(definition: &str) -> Result<Vec<(String, u32, String)>, CodecError> {
    let mut out = Vec::new();
    for pad in blocks::scan_blocks(definition, PAD_MARKER)? {
        let Some((number, _)) = first_argument(definition, pad) else {
            continue;
        };
        let Some(net) = direct_child(definition, pad, "net") else {
            continue;
        };
        let args = atoms(definition, net);
        if let (Some((id, _)), Some((name, _))) = (args.first(), args.get(1)) {
            if let Ok(id) = id.parse() {
                out.push((number, id, name.clone()));
            }
        }
    }
    Ok(out)
}

/// Replace the top-level `(at ..)` with `(at x y)`, keeping any rotation.
/// A definition without one gets it inserted after its layer clause.
pub fn set_position(definition: &str, x: f64, y: f64) -> Result<String, CodecError> {
    let root = root(definition)?;

    let edit = match direct_child(definition, root, "at") {
        Some(at) => {
            let rotation = atoms(definition, at)
                .get(2)
                .map(|(r, _)| format!(" {}", r))
                .unwrap_or_default();
            let clause = format!("(at {} {}{})", format_coord(x), format_coord(y), rotation);
            (at.range(), clause)
        }
        None => {
            let pos = insertion_point(definition, root);
            (pos..pos, format!(" (at {} {})", format_coord(x), format_coord(y)))
        }
    };

    Ok(apply_edits(definition, vec![edit]))
}

/// Read the top-level `(at x y)`.
pub fn position(definition: &str) -> Option<(f64, f64)> {
    let root = blocks::root_block(definition).ok()?;
    let at = direct_child(definition, root, "at")?;
    let args = atoms(definition, at);
    let x = args.first()?.0.parse().ok()?;
    let y = args.get(1)?.0.parse().ok()?;
    Some((x, y))
}

/// Attach `(uuid "<id>")` right after the top-level layer clause. An existing
/// top-level `uuid` or legacy `tstamp` is replaced instead.
pub fn attach_uuid(definition: &str, id: &str) -> Result<String, CodecError> {
    let root = root(definition)?;
    let clause = format!("(uuid {})", quote(id));

    let existing = child_blocks(definition, root)
        .into_iter()
        .find(|c| matches!(block_keyword(definition, *c), "uuid" | "tstamp"));

    let edit = match existing {
        Some(old) => (old.range(), clause),
        None => {
            let pos = insertion_point(definition, root);
            (pos..pos, format!(" {}", clause))
        }
    };
    Ok(apply_edits(definition, vec![edit]))
}

/// Set the reference designator shown on the footprint.
pub fn set_reference(definition: &str, reference: &str) -> Result<String, CodecError> {
    set_field(definition, "Reference", reference)
}

pub fn set_value(definition: &str, value: &str) -> Result<String, CodecError> {
    set_field(definition, "Value", value)
}

/// Read the reference designator, from either field style.
pub fn reference(definition: &str) -> Option<String> {
    let root = blocks::root_block(definition).ok()?;
    let range = field_value(definition, root, "Reference")?;
    atoms_in(definition, range)
}

/// Rename the top-level block, e.g. `(footprint "R_0805" ..)` to
/// `(footprint "Resistor_SMD:R_0805" ..)`.
pub fn rename_head(definition: &str, name: &str) -> Result<String, CodecError> {
    let root = root(definition)?;
    let edit = match first_argument(definition, root) {
        Some((_, range)) => (range, quote(name)),
        None => {
            let keyword = block_keyword(definition, root);
            let pos = definition[root.start..]
                .find(keyword)
                .map(|i| root.start + i + keyword.len())
                .unwrap_or(root.start + 1);
            (pos..pos, format!(" {}", quote(name)))
        }
    };
    Ok(apply_edits(definition, vec![edit]))
}

/// Format a coordinate the way KiCad writes them: up to four decimals,
/// trailing zeros dropped.
pub fn format_coord(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" || text.is_empty() {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn root(definition: &str) -> Result<Span, CodecError> {
    blocks::root_block(definition).map_err(|_| CodecError::NoRootBlock)
}

fn direct_child(text: &str, parent: Span, keyword: &str) -> Option<Span> {
    blocks::find_child(text, parent, keyword)
}

/// Just after the top-level layer clause, else after the block's name.
fn insertion_point(text: &str, root: Span) -> usize {
    if let Some(layer) = direct_child(text, root, "layer") {
        return layer.end;
    }
    match first_argument(text, root) {
        Some((_, range)) => range.end,
        None => root.start + 1 + block_keyword(text, root).len(),
    }
}

/// Range of the value atom of `(property "<field>" "<value>" ..)` or
/// `(fp_text <field> "<value>" ..)`.
fn field_value(text: &str, root: Span, field: &str) -> Option<Range<usize>> {
    child_blocks(text, root).into_iter().find_map(|child| {
        let keyword = block_keyword(text, child);
        let args = atoms(text, child);
        let matches = match keyword {
            "property" => args.first().is_some_and(|(name, _)| name == field),
            "fp_text" => args
                .first()
                .is_some_and(|(name, _)| name.eq_ignore_ascii_case(field)),
            _ => false,
        };
        if matches {
            args.get(1).map(|(_, range)| range.clone())
        } else {
            None
        }
    })
}

fn atoms_in(text: &str, range: Range<usize>) -> Option<String> {
    let raw = &text[range];
    let wrapped = format!("(v {})", raw);
    atoms(&wrapped, Span { start: 0, end: wrapped.len() })
        .into_iter()
        .next()
        .map(|(value, _)| value)
}

fn set_field(definition: &str, field: &str, value: &str) -> Result<String, CodecError> {
    let root = root(definition)?;
    match field_value(definition, root, field) {
        Some(range) => Ok(apply_edits(definition, vec![(range, quote(value))])),
        None => {
            tracing::debug!("Definition has no {} field to rewrite", field);
            Ok(definition.to_string())
        }
    }
}

/// Splice non-overlapping edits into `text`, keeping everything else.
fn apply_edits(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(text.len() + edits.len() * 24);
    let mut cursor = 0;
    for (range, replacement) in edits {
        out.push_str(&text[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    out
}
