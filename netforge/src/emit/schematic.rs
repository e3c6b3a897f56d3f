//! Schematic emitter
//!
//! Components sit on a fixed grid (left to right, wrapping every
//! [`SLOTS_PER_ROW`]), which keeps the default sheet readable. Nets with two
//! or more nodes become a chain of straight wires between consecutive pins;
//! single-node nets get a floating label on their pin.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::catalog::Catalog;
use crate::codec::{self, format_coord};
use crate::ir::{parse_node, Circuit, Component};
use crate::parser::blocks::quote;
use crate::parser::parse_str;
use crate::placement::Point;

use super::{new_uuid, today};

pub const ORIGIN: Point = Point { x: 50.8, y: 50.8 };
pub const PITCH: f64 = 30.48;
pub const SLOTS_PER_ROW: usize = 8;

const FONT: &str = "(effects (font (size 1.27 1.27)))";

const BUILTIN_RESISTOR: &str = r#"(symbol "R" (pin_numbers hide) (pin_names (offset 0)) (in_bom yes) (on_board yes)
      (property "Reference" "R" (at 2.032 0 90) (effects (font (size 1.27 1.27))))
      (property "Value" "R" (at 0 0 90) (effects (font (size 1.27 1.27))))
      (symbol "R_0_1"
        (rectangle (start -1.016 -2.54) (end 1.016 2.54) (stroke (width 0.254) (type default)) (fill (type none)))
      )
      (symbol "R_1_1"
        (pin passive line (at 0 3.81 270) (length 1.27) (name "~" (effects (font (size 1.27 1.27)))) (number "1" (effects (font (size 1.27 1.27)))))
        (pin passive line (at 0 -3.81 90) (length 1.27) (name "~" (effects (font (size 1.27 1.27)))) (number "2" (effects (font (size 1.27 1.27)))))
      )
    )"#;

const BUILTIN_LED: &str = r#"(symbol "LED" (pin_numbers hide) (pin_names (offset 1.016) hide) (in_bom yes) (on_board yes)
      (property "Reference" "D" (at 0 2.54 0) (effects (font (size 1.27 1.27))))
      (property "Value" "LED" (at 0 -2.54 0) (effects (font (size 1.27 1.27))))
      (symbol "LED_0_1"
        (polyline (pts (xy -1.27 -1.27) (xy -1.27 1.27)) (stroke (width 0.254) (type default)) (fill (type none)))
        (polyline (pts (xy 1.27 -1.27) (xy 1.27 1.27) (xy -1.27 0) (xy 1.27 -1.27)) (stroke (width 0.254) (type default)) (fill (type none)))
      )
      (symbol "LED_1_1"
        (pin passive line (at -3.81 0 0) (length 2.54) (name "K" (effects (font (size 1.27 1.27)))) (number "1" (effects (font (size 1.27 1.27)))))
        (pin passive line (at 3.81 0 180) (length 2.54) (name "A" (effects (font (size 1.27 1.27)))) (number "2" (effects (font (size 1.27 1.27)))))
      )
    )"#;

/// Minimal symbols used when the catalog has no entry for these refs.
pub fn builtin_symbol(full_name: &str) -> Option<&'static str> {
    match full_name {
        "Device:R" => Some(BUILTIN_RESISTOR),
        "Device:LED" => Some(BUILTIN_LED),
        _ => None,
    }
}

/// Grid slot of the `index`-th component.
pub fn slot_position(index: usize) -> Point {
    Point::new(
        ORIGIN.x + (index % SLOTS_PER_ROW) as f64 * PITCH,
        ORIGIN.y + (index / SLOTS_PER_ROW) as f64 * PITCH,
    )
}

/// Pin number -> connection point offset in symbol space (Y up).
pub fn pin_offsets(symbol_text: &str) -> HashMap<String, Point> {
    let Ok(tree) = parse_str(symbol_text) else {
        return HashMap::new();
    };
    tree.find_all("pin")
        .into_iter()
        .filter_map(|pin| {
            let number = pin.child("number")?.atom(1)?.to_string();
            let (x, y) = pin.position()?;
            Some((number, Point::new(x, y)))
        })
        .collect()
}

/// A component instance on the sheet.
struct Placed<'a> {
    component: &'a Component,
    at: Point,
    pins: HashMap<String, Point>,
}

impl Placed<'_> {
    /// Sheet coordinate of a pin; schematic Y grows downward.
    fn pin(&self, number: &str) -> Point {
        match self.pins.get(number) {
            Some(offset) => Point::new(self.at.x + offset.x, self.at.y - offset.y),
            None => self.at,
        }
    }
}

pub struct SchematicEmitter<'a> {
    catalog: &'a Catalog,
}

impl<'a> SchematicEmitter<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Symbol definition for a library ref: catalog first, then built-ins.
    fn resolve_symbol(&self, library_ref: &str) -> Option<String> {
        if let Some(text) = self.catalog.lookup_symbol(library_ref) {
            return Some(text.to_string());
        }
        match builtin_symbol(library_ref) {
            Some(text) => {
                tracing::debug!("No catalog symbol for {}, using built-in", library_ref);
                Some(text.to_string())
            }
            None => {
                tracing::warn!("No symbol definition for {}", library_ref);
                None
            }
        }
    }

    pub fn emit(&self, circuit: &Circuit) -> String {
        let sheet_uuid = new_uuid();

        // lib_symbols carries each referenced definition once, renamed to its
        // qualified name
        let mut lib_symbols: BTreeMap<&str, String> = BTreeMap::new();
        let mut pins_by_ref: HashMap<&str, HashMap<String, Point>> = HashMap::new();
        for component in &circuit.components {
            let key = component.library_ref.as_str();
            if pins_by_ref.contains_key(key) {
                continue;
            }
            match self.resolve_symbol(key) {
                Some(text) => {
                    pins_by_ref.insert(key, pin_offsets(&text));
                    let renamed = codec::rename_head(&text, key).unwrap_or(text);
                    lib_symbols.insert(key, renamed);
                }
                None => {
                    pins_by_ref.insert(key, HashMap::new());
                }
            }
        }

        let placed: Vec<Placed> = circuit
            .components
            .iter()
            .enumerate()
            .map(|(i, component)| Placed {
                component,
                at: slot_position(i),
                pins: pins_by_ref
                    .get(component.library_ref.as_str())
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();
        let by_id: HashMap<&str, &Placed> =
            placed.iter().map(|p| (p.component.id.as_str(), p)).collect();

        let mut out = String::new();
        let _ = writeln!(out, "(kicad_sch (version 20230121) (generator netforge)");
        let _ = writeln!(out, "  (uuid {})", quote(&sheet_uuid));
        let _ = writeln!(out, "  (paper \"A4\")");
        let _ = writeln!(
            out,
            "  (title_block (title {}) (date {}) (comment 1 {}))",
            quote(&circuit.project_name),
            quote(&today()),
            quote(&circuit.description)
        );

        let _ = writeln!(out, "  (lib_symbols");
        for text in lib_symbols.values() {
            let _ = writeln!(out, "    {}", text.trim());
        }
        let _ = writeln!(out, "  )");

        for p in &placed {
            self.write_instance(&mut out, p, &circuit.project_name, &sheet_uuid);
        }

        let mut wires = 0;
        let mut labels = 0;
        for net in &circuit.nets {
            let points: Vec<Point> = net
                .nodes
                .iter()
                .filter_map(|node| parse_node(node))
                .filter_map(|(id, pin)| by_id.get(id).map(|p| p.pin(pin)))
                .collect();

            if net.nodes.len() >= 2 {
                for pair in points.windows(2) {
                    let _ = writeln!(
                        out,
                        "  (wire (pts (xy {} {}) (xy {} {})) (stroke (width 0) (type default)) (uuid {}))",
                        format_coord(pair[0].x),
                        format_coord(pair[0].y),
                        format_coord(pair[1].x),
                        format_coord(pair[1].y),
                        quote(&new_uuid())
                    );
                    wires += 1;
                }
            } else if let Some(at) = points.first() {
                let _ = writeln!(
                    out,
                    "  (label {} (at {} {} 0) (effects (font (size 1.27 1.27)) (justify left bottom)) (uuid {}))",
                    quote(&net.name),
                    format_coord(at.x),
                    format_coord(at.y),
                    quote(&new_uuid())
                );
                labels += 1;
            }
        }

        let _ = writeln!(out, "  (sheet_instances (path \"/\" (page \"1\")))");
        out.push_str(")\n");

        tracing::debug!(
            "Schematic: {} symbols, {} wires, {} labels",
            placed.len(),
            wires,
            labels
        );
        out
    }

    fn write_instance(&self, out: &mut String, p: &Placed, project: &str, sheet_uuid: &str) {
        let c = p.component;
        let (x, y) = (format_coord(p.at.x), format_coord(p.at.y));
        let _ = writeln!(
            out,
            "  (symbol (lib_id {}) (at {} {} 0) (unit 1) (in_bom yes) (on_board yes) (dnp no)",
            quote(&c.library_ref),
            x,
            y
        );
        let _ = writeln!(out, "    (uuid {})", quote(&new_uuid()));
        let _ = writeln!(
            out,
            "    (property \"Reference\" {} (at {} {} 0) {})",
            quote(&c.id),
            format_coord(p.at.x + 2.54),
            format_coord(p.at.y - 1.27),
            FONT
        );
        let _ = writeln!(
            out,
            "    (property \"Value\" {} (at {} {} 0) {})",
            quote(&c.value),
            format_coord(p.at.x + 2.54),
            format_coord(p.at.y + 1.27),
            FONT
        );
        if let Some(footprint) = &c.footprint {
            let _ = writeln!(
                out,
                "    (property \"Footprint\" {} (at {} {} 0) (effects (font (size 1.27 1.27)) hide))",
                quote(footprint),
                x,
                y
            );
        }

        let mut numbers: Vec<&String> = p.pins.keys().collect();
        numbers.sort();
        for number in numbers {
            let _ = writeln!(out, "    (pin {} (uuid {}))", quote(number), quote(&new_uuid()));
        }

        let _ = writeln!(
            out,
            "    (instances (project {} (path {} (reference {}) (unit 1))))",
            quote(project),
            quote(&format!("/{}", sheet_uuid)),
            quote(&c.id)
        );
        let _ = writeln!(out, "  )");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Net, PinConnection};
    use crate::parser::SExp;

    fn component(id: &str, library_ref: &str, value: &str) -> Component {
        Component {
            id: id.to_string(),
            kind: "Part".to_string(),
            value: value.to_string(),
            library_ref: library_ref.to_string(),
            footprint: None,
            connections: vec![PinConnection {
                pin_number: "1".to_string(),
                net_name: "N".to_string(),
            }],
        }
    }

    fn blink() -> Circuit {
        Circuit {
            project_name: "Blink".to_string(),
            description: "LED".to_string(),
            mermaid: None,
            components: vec![
                component("R1", "Device:R", "10k"),
                component("D1", "Device:LED", "Red"),
            ],
            nets: vec![
                Net { name: "VCC".to_string(), nodes: vec!["R1:1".to_string()] },
                Net {
                    name: "LED_NET".to_string(),
                    nodes: vec!["R1:2".to_string(), "D1:1".to_string()],
                },
                Net { name: "GND".to_string(), nodes: vec!["D1:2".to_string()] },
            ],
        }
    }

    fn count(tree: &SExp, key: &str) -> usize {
        tree.children(key).count()
    }

    #[test]
    fn test_builtin_pin_offsets() {
        let pins = pin_offsets(BUILTIN_RESISTOR);
        assert_eq!(pins["1"], Point::new(0.0, 3.81));
        assert_eq!(pins["2"], Point::new(0.0, -3.81));
        assert_eq!(pin_offsets(BUILTIN_LED).len(), 2);
        assert!(pin_offsets("(broken").is_empty());
    }

    #[test]
    fn test_slot_grid_wraps() {
        assert_eq!(slot_position(0), ORIGIN);
        assert_eq!(slot_position(1).x, ORIGIN.x + PITCH);
        assert_eq!(slot_position(8), Point::new(ORIGIN.x, ORIGIN.y + PITCH));
    }

    #[test]
    fn test_blink_schematic_structure() {
        let catalog = Catalog::new();
        let text = SchematicEmitter::new(&catalog).emit(&blink());
        let tree = parse_str(&text).unwrap();

        assert_eq!(tree.head(), Some("kicad_sch"));
        assert_eq!(count(&tree, "symbol"), 2);
        assert_eq!(count(&tree, "wire"), 1);
        assert_eq!(count(&tree, "label"), 2);

        let lib = tree.child("lib_symbols").unwrap();
        let names: Vec<_> = lib.children("symbol").filter_map(|s| s.atom(1)).collect();
        assert_eq!(names, vec!["Device:LED", "Device:R"]);
    }

    #[test]
    fn test_wire_connects_pin_positions() {
        let catalog = Catalog::new();
        let text = SchematicEmitter::new(&catalog).emit(&blink());
        let tree = parse_str(&text).unwrap();

        let wire = tree.child("wire").unwrap();
        let pts: Vec<(f64, f64)> = wire
            .child("pts")
            .unwrap()
            .children("xy")
            .map(|xy| (xy.number(1).unwrap(), xy.number(2).unwrap()))
            .collect();
        // R1 pin 2 is 3.81 below R1; D1 pin 1 is 3.81 left of D1
        let close = |a: (f64, f64), b: (f64, f64)| (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6;
        assert!(close(pts[0], (50.8, 54.61)), "{:?}", pts[0]);
        assert!(close(pts[1], (77.47, 50.8)), "{:?}", pts[1]);
    }

    #[test]
    fn test_unknown_symbol_still_placed() {
        let catalog = Catalog::new();
        let mut circuit = blink();
        circuit.components.push(component("U1", "MCU:Mystery", "X"));
        circuit.nets.push(Net { name: "IO".to_string(), nodes: vec!["U1:4".to_string()] });

        let text = SchematicEmitter::new(&catalog).emit(&circuit);
        let tree = parse_str(&text).unwrap();
        assert_eq!(count(&tree, "symbol"), 3);
        assert_eq!(count(&tree, "label"), 3);
        assert_eq!(tree.child("lib_symbols").unwrap().children("symbol").count(), 2);
    }
}
