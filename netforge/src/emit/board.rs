//! Board emitter
//!
//! Resolves a footprint per component (explicit ref, then the catalog's
//! suggestion, then a two-pad placeholder), moves it to its placement
//! coordinate, stamps reference/value/uuid, binds pad nets through the
//! structural codec, and closes the board with an Edge.Cuts outline around
//! the placement bounding box.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::catalog::Catalog;
use crate::codec::{self, format_coord, CodecError, PinNetMap};
use crate::ir::{parse_node, Circuit, Component};
use crate::parser::blocks::quote;
use crate::placement::{BoundingBox, Placement};

use super::{new_uuid, today, EmitError};

pub const PLACEHOLDER_FOOTPRINT: &str = "netforge:Placeholder_2Pad";

const PLACEHOLDER: &str = r#"(footprint "Placeholder_2Pad" (version 20221018) (generator netforge)
    (layer "F.Cu")
    (attr smd)
    (property "Reference" "REF**" (at 0 -2 0) (layer "F.SilkS") (effects (font (size 1 1) (thickness 0.15))))
    (property "Value" "VAL**" (at 0 2 0) (layer "F.Fab") (effects (font (size 1 1) (thickness 0.15))))
    (fp_rect (start -2 -1) (end 2 1) (stroke (width 0.05) (type default)) (fill none) (layer "F.CrtYd"))
    (pad "1" smd rect (at -1 0) (size 1.2 1.4) (layers "F.Cu" "F.Paste" "F.Mask"))
    (pad "2" smd rect (at 1 0) (size 1.2 1.4) (layers "F.Cu" "F.Paste" "F.Mask"))
  )"#;

const LAYERS: &[&str] = &[
    r#"(0 "F.Cu" signal)"#,
    r#"(31 "B.Cu" signal)"#,
    r#"(34 "B.Paste" user)"#,
    r#"(35 "F.Paste" user)"#,
    r#"(36 "B.SilkS" user "B.Silkscreen")"#,
    r#"(37 "F.SilkS" user "F.Silkscreen")"#,
    r#"(38 "B.Mask" user)"#,
    r#"(39 "F.Mask" user)"#,
    r#"(44 "Edge.Cuts" user)"#,
    r#"(46 "B.CrtYd" user "B.Courtyard")"#,
    r#"(47 "F.CrtYd" user "F.Courtyard")"#,
    r#"(48 "B.Fab" user)"#,
    r#"(49 "F.Fab" user)"#,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Added around the placement bounding box for the outline.
    pub margin: f64,
    /// Centroids closer than this are reported as overlapping by DRC.
    pub collision_radius: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            margin: 10.0,
            collision_radius: 5.0,
        }
    }
}

/// Net name -> id, numbered 1.. over the sorted distinct names.
///
/// Depends only on the set of names, so reordering nets or connections never
/// changes an id.
pub fn assign_net_ids(circuit: &Circuit) -> BTreeMap<String, u32> {
    circuit
        .net_names()
        .into_iter()
        .filter(|name| !name.is_empty())
        .enumerate()
        .map(|(i, name)| (name.to_string(), i as u32 + 1))
        .collect()
}

/// Pin -> net for one component: its connection list, plus any net node
/// naming one of its pins that the connection list left out.
pub fn pin_net_map(
    circuit: &Circuit,
    component: &Component,
    net_ids: &BTreeMap<String, u32>,
) -> PinNetMap {
    let mut pins = PinNetMap::new();
    for connection in &component.connections {
        if let Some(&id) = net_ids.get(&connection.net_name) {
            pins.insert(connection.pin_number.clone(), (id, connection.net_name.clone()));
        }
    }
    for net in &circuit.nets {
        let Some(&id) = net_ids.get(&net.name) else {
            continue;
        };
        for (comp, pin) in net.nodes.iter().filter_map(|n| parse_node(n)) {
            if comp == component.id {
                pins.entry(pin.to_string())
                    .or_insert_with(|| (id, net.name.clone()));
            }
        }
    }
    pins
}

/// Rendered board plus the data exporters and DRC need alongside it.
#[derive(Debug, Clone)]
pub struct EmittedBoard {
    pub text: String,
    pub net_ids: BTreeMap<String, u32>,
    pub outline: Option<BoundingBox>,
    /// Footprint full name used per component id, in component order.
    pub footprints: Vec<(String, String)>,
}

pub struct BoardEmitter<'a> {
    catalog: &'a Catalog,
    config: BoardConfig,
}

impl<'a> BoardEmitter<'a> {
    pub fn new(catalog: &'a Catalog, config: BoardConfig) -> Self {
        Self { catalog, config }
    }

    /// Footprint full name and text for a component. Misses fall back to the
    /// placeholder without failing.
    fn resolve_footprint(&self, component: &Component) -> (String, String) {
        if let Some(name) = &component.footprint {
            if let Some(text) = self.catalog.lookup_footprint(name) {
                return (name.clone(), text.to_string());
            }
            tracing::debug!("Footprint {} not in catalog", name);
        }
        if let Some(name) = self.catalog.suggest_footprint(&component.library_ref) {
            if let Some(text) = self.catalog.lookup_footprint(&name) {
                return (name, text.to_string());
            }
        }
        tracing::warn!(
            "No footprint for {} ({}), using placeholder",
            component.id,
            component.library_ref
        );
        let name = component
            .footprint
            .clone()
            .unwrap_or_else(|| PLACEHOLDER_FOOTPRINT.to_string());
        (name, PLACEHOLDER.to_string())
    }

    fn place_footprint(
        &self,
        component: &Component,
        name: &str,
        text: &str,
        at: (f64, f64),
        pins: &PinNetMap,
    ) -> Result<String, CodecError> {
        let text = codec::rename_head(text, name)?;
        let text = codec::set_position(&text, at.0, at.1)?;
        let text = codec::attach_uuid(&text, &new_uuid())?;
        let text = codec::set_reference(&text, &component.id)?;
        let text = codec::set_value(&text, &component.value)?;
        codec::bind_pad_nets(&text, pins)
    }

    pub fn emit(&self, circuit: &Circuit, placement: &Placement) -> Result<EmittedBoard, EmitError> {
        let net_ids = assign_net_ids(circuit);
        let outline = placement.bounding_box(self.config.margin);

        let mut out = String::new();
        let _ = writeln!(out, "(kicad_pcb (version 20221018) (generator netforge)");
        let _ = writeln!(out, "  (general (thickness 1.6))");
        let _ = writeln!(out, "  (paper \"A4\")");
        let _ = writeln!(
            out,
            "  (title_block (title {}) (date {}))",
            quote(&circuit.project_name),
            quote(&today())
        );
        let _ = writeln!(out, "  (layers");
        for layer in LAYERS {
            let _ = writeln!(out, "    {}", layer);
        }
        let _ = writeln!(out, "  )");
        let _ = writeln!(out, "  (setup (pad_to_mask_clearance 0))");
        let _ = writeln!(out, "  (net 0 \"\")");
        for (name, id) in sorted_by_id(&net_ids) {
            let _ = writeln!(out, "  (net {} {})", id, quote(name));
        }

        let mut footprints = Vec::with_capacity(circuit.components.len());
        for component in &circuit.components {
            let at = placement
                .get(&component.id)
                .map(|p| (p.x, p.y))
                .unwrap_or((0.0, 0.0));
            let pins = pin_net_map(circuit, component, &net_ids);
            let (name, text) = self.resolve_footprint(component);

            let placed = match self.place_footprint(component, &name, &text, at, &pins) {
                Ok(placed) => placed,
                Err(err) => {
                    // a catalog entry we cannot rewrite is treated as a miss
                    tracing::warn!("Footprint {} unusable for {}: {}", name, component.id, err);
                    self.place_footprint(component, &name, PLACEHOLDER, at, &pins)
                        .map_err(|source| EmitError::Codec {
                            reference: component.id.clone(),
                            source,
                        })?
                }
            };

            let _ = writeln!(out, "  {}", placed.trim());
            footprints.push((component.id.clone(), name));
        }

        if let Some(bbox) = outline {
            let _ = writeln!(
                out,
                "  (gr_rect (start {} {}) (end {} {}) (stroke (width 0.1) (type default)) (fill none) (layer \"Edge.Cuts\") (uuid {}))",
                format_coord(bbox.min.x),
                format_coord(bbox.min.y),
                format_coord(bbox.max.x),
                format_coord(bbox.max.y),
                quote(&new_uuid())
            );
        }
        out.push_str(")\n");

        tracing::debug!(
            "Board: {} footprints, {} nets",
            footprints.len(),
            net_ids.len()
        );
        Ok(EmittedBoard {
            text: out,
            net_ids,
            outline,
            footprints,
        })
    }
}

fn sorted_by_id(net_ids: &BTreeMap<String, u32>) -> Vec<(&str, u32)> {
    let mut pairs: Vec<(&str, u32)> = net_ids.iter().map(|(n, &id)| (n.as_str(), id)).collect();
    pairs.sort_by_key(|&(_, id)| id);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Net, PinConnection};
    use crate::parser::parse_str;
    use crate::placement::{ForceDirectedPlacer, PlacementConfig};

    const R0805: &str = r#"(footprint "R_0805_2012Metric" (version 20221018) (generator pcbnew)
  (layer "F.Cu")
  (property "Reference" "REF**" (at 0 -1.65 0) (layer "F.SilkS"))
  (property "Value" "R_0805_2012Metric" (at 0 1.65 0) (layer "F.Fab"))
  (pad "1" smd roundrect (at -0.9125 0) (size 1.025 1.4) (layers "F.Cu" "F.Paste" "F.Mask"))
  (pad "2" smd roundrect (at 0.9125 0) (size 1.025 1.4) (layers "F.Cu" "F.Paste" "F.Mask"))
)
"#;

    fn connection(pin: &str, net: &str) -> PinConnection {
        PinConnection {
            pin_number: pin.to_string(),
            net_name: net.to_string(),
        }
    }

    fn circuit(nets: &[(&str, &[&str])]) -> Circuit {
        Circuit {
            project_name: "Blink".to_string(),
            description: String::new(),
            mermaid: None,
            components: vec![
                Component {
                    id: "R1".to_string(),
                    kind: "Resistor".to_string(),
                    value: "10k".to_string(),
                    library_ref: "Device:R".to_string(),
                    footprint: None,
                    connections: vec![connection("1", "VCC"), connection("2", "LED_NET")],
                },
                Component {
                    id: "D1".to_string(),
                    kind: "LED".to_string(),
                    value: "Red".to_string(),
                    library_ref: "Device:LED".to_string(),
                    footprint: Some("LED_SMD:LED_0805_2012Metric".to_string()),
                    connections: vec![connection("1", "LED_NET")],
                },
            ],
            nets: nets
                .iter()
                .map(|(name, nodes)| Net {
                    name: name.to_string(),
                    nodes: nodes.iter().map(|n| n.to_string()).collect(),
                })
                .collect(),
        }
    }

    fn blink() -> Circuit {
        circuit(&[
            ("VCC", &["R1:1"]),
            ("LED_NET", &["R1:2", "D1:1"]),
            ("GND", &["D1:2"]),
        ])
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert_footprint("Resistor_SMD", "R_0805_2012Metric", R0805.to_string());
        catalog
    }

    #[test]
    fn test_net_ids_ignore_order() {
        let mut a = circuit(&[("GND", &["D1:2"]), ("VCC", &["R1:1"])]);
        let mut b = circuit(&[("VCC", &["R1:1"]), ("GND", &["D1:2"])]);
        for c in a.components.iter_mut().chain(b.components.iter_mut()) {
            c.connections.clear();
        }

        let ids = assign_net_ids(&a);
        assert_eq!(ids, assign_net_ids(&b));
        assert_eq!(ids["GND"], 1);
        assert_eq!(ids["VCC"], 2);
    }

    #[test]
    fn test_pin_map_fills_gaps_from_nets() {
        let c = blink();
        let ids = assign_net_ids(&c);
        let pins = pin_net_map(&c, &c.components[1], &ids);
        assert_eq!(pins["1"], (ids["LED_NET"], "LED_NET".to_string()));
        assert_eq!(pins["2"], (ids["GND"], "GND".to_string()));
    }

    #[test]
    fn test_board_places_and_binds() {
        let catalog = catalog();
        let c = blink();
        let placement = ForceDirectedPlacer::new(PlacementConfig::with_seed(1))
            .place(&c.components, &c.nets);
        let board = BoardEmitter::new(&catalog, BoardConfig::default())
            .emit(&c, &placement)
            .unwrap();

        let tree = parse_str(&board.text).unwrap();
        let footprints: Vec<_> = tree.children("footprint").collect();
        assert_eq!(footprints.len(), 2);
        assert_eq!(tree.children("net").count(), 4);

        // R1 comes from the catalog via the suggestion rule, D1 falls back
        assert_eq!(footprints[0].atom(1), Some("Resistor_SMD:R_0805_2012Metric"));
        assert_eq!(footprints[1].atom(1), Some("LED_SMD:LED_0805_2012Metric"));
        assert_eq!(board.footprints[0].1, "Resistor_SMD:R_0805_2012Metric");

        let outline = board.outline.unwrap();
        for fp in &footprints {
            let (x, y) = fp.position().unwrap();
            assert!(outline.contains(&crate::placement::Point::new(x, y)));
        }
        let rect = tree.child("gr_rect").unwrap();
        assert_eq!(rect.child("layer").unwrap().atom(1), Some("Edge.Cuts"));

        let start = board.text.find("(footprint \"Resistor_SMD").unwrap();
        let end = board.text.find("(footprint \"LED_SMD").unwrap();
        let r1 = &board.text[start..end];
        let nets = codec::pad_nets(r1).unwrap();
        assert_eq!(nets.len(), 2);
        assert!(nets.contains(&("2".to_string(), board.net_ids["LED_NET"], "LED_NET".to_string())));
        assert_eq!(codec::reference(r1).as_deref(), Some("R1"));
    }

    #[test]
    fn test_positions_match_placement() {
        let catalog = Catalog::new();
        let c = blink();
        let placement = ForceDirectedPlacer::new(PlacementConfig::with_seed(9))
            .place(&c.components, &c.nets);
        let board = BoardEmitter::new(&catalog, BoardConfig::default())
            .emit(&c, &placement)
            .unwrap();
        let tree = parse_str(&board.text).unwrap();

        for (fp, component) in tree.children("footprint").zip(&c.components) {
            let (x, y) = fp.position().unwrap();
            let expected = placement.get(&component.id).unwrap();
            assert!((x - expected.x).abs() < 1e-3);
            assert!((y - expected.y).abs() < 1e-3);
        }
    }
}
