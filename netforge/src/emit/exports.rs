//! Auxiliary exports
//!
//! Each exporter is a single pass over the accepted circuit and its emitted
//! board; none of them rewrite definitions or feed back into validation.

use serde_json::json;
use std::fmt::Write as _;

use crate::codec::format_coord;
use crate::ir::{parse_node, Circuit};
use crate::parser::blocks::quote;
use crate::placement::Placement;

use super::board::EmittedBoard;

/// Everything an exporter may read.
pub struct ExportContext<'a> {
    pub circuit: &'a Circuit,
    pub placement: &'a Placement,
    pub board: &'a EmittedBoard,
}

impl ExportContext<'_> {
    fn footprint_of(&self, id: &str) -> Option<&str> {
        self.board
            .footprints
            .iter()
            .find(|(component, _)| component == id)
            .map(|(_, name)| name.as_str())
    }
}

pub trait AuxiliaryExporter: Send + Sync {
    /// Short human name used in narration, e.g. `IPC-D-356 netlist`.
    fn name(&self) -> &'static str;

    /// Appended to the project base name, e.g. `.ipc` or `_bom.csv`.
    fn suffix(&self) -> &'static str;

    fn render(&self, ctx: &ExportContext) -> String;

    fn file_name(&self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }
}

/// Every exporter produced on a successful run, in emission order.
pub fn default_exporters() -> Vec<Box<dyn AuxiliaryExporter>> {
    vec![
        Box::new(ProjectFile),
        Box::new(Ipc356Netlist),
        Box::new(SpectraDsn),
        Box::new(BomCsv),
        Box::new(FirmwareHeader),
    ]
}

/// Minimal `.kicad_pro` so the schematic and board open as one project.
pub struct ProjectFile;

impl AuxiliaryExporter for ProjectFile {
    fn name(&self) -> &'static str {
        "project file"
    }

    fn suffix(&self) -> &'static str {
        ".kicad_pro"
    }

    fn render(&self, ctx: &ExportContext) -> String {
        let base = ctx.circuit.base_filename();
        let project = json!({
            "board": { "design_settings": { "defaults": {}, "rules": {} } },
            "boards": [],
            "meta": { "filename": format!("{}.kicad_pro", base), "version": 1 },
            "net_settings": {
                "classes": [{ "name": "Default", "clearance": 0.2, "track_width": 0.25 }],
                "meta": { "version": 3 }
            },
            "project": { "name": ctx.circuit.project_name },
            "schematic": { "legacy_lib_dir": "", "legacy_lib_list": [] },
            "text_variables": {}
        });
        let mut text = serde_json::to_string_pretty(&project).unwrap_or_default();
        text.push('\n');
        text
    }
}

/// IPC-D-356 test netlist: one 317 record per net node, placed at its
/// component's board coordinate (metric, 0.001 mm units).
pub struct Ipc356Netlist;

impl AuxiliaryExporter for Ipc356Netlist {
    fn name(&self) -> &'static str {
        "IPC-D-356 netlist"
    }

    fn suffix(&self) -> &'static str {
        ".ipc"
    }

    fn render(&self, ctx: &ExportContext) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "C  IPC-D-356 netlist generated by netforge");
        let _ = writeln!(out, "C  Project: {}", ctx.circuit.project_name);
        let _ = writeln!(out, "P  JOB   {}", ctx.circuit.base_filename());
        let _ = writeln!(out, "P  UNITS CUST 1");
        let _ = writeln!(out, "P  DIM   N");

        for net in &ctx.circuit.nets {
            let name: String = net.name.chars().take(14).collect();
            for (component, pin) in net.nodes.iter().filter_map(|n| parse_node(n)) {
                let Some(at) = ctx.placement.get(component) else {
                    continue;
                };
                let _ = writeln!(
                    out,
                    "317{:<14}   {:<6}-{:<4} M       A01X{:+07}Y{:+07}X0000Y0000R000 S0",
                    name,
                    truncate(component, 6),
                    truncate(pin, 4),
                    (at.x * 1000.0).round() as i64,
                    (-at.y * 1000.0).round() as i64,
                );
            }
        }
        out.push_str("999\n");
        out
    }
}

/// SPECTRA DSN for autorouters: board boundary from the outline, component
/// placement, and the net list.
pub struct SpectraDsn;

impl AuxiliaryExporter for SpectraDsn {
    fn name(&self) -> &'static str {
        "SPECTRA DSN"
    }

    fn suffix(&self) -> &'static str {
        ".dsn"
    }

    fn render(&self, ctx: &ExportContext) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "(pcb {}", quote(&ctx.circuit.project_name));
        let _ = writeln!(out, "  (parser");
        let _ = writeln!(out, "    (string_quote \")");
        let _ = writeln!(out, "    (space_in_name_allowed yes)");
        let _ = writeln!(out, "    (host_cad \"netforge\")");
        let _ = writeln!(out, "    (host_version \"{}\")", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(out, "  )");
        let _ = writeln!(out, "  (resolution mm 1000)");
        let _ = writeln!(out, "  (unit mm)");
        let _ = writeln!(out, "  (structure");
        let _ = writeln!(out, "    (layer F.Cu (type signal) (property (index 0)))");
        let _ = writeln!(out, "    (layer B.Cu (type signal) (property (index 1)))");
        if let Some(bbox) = ctx.board.outline {
            let _ = writeln!(
                out,
                "    (boundary (rect pcb {} {} {} {}))",
                format_coord(bbox.min.x),
                format_coord(bbox.min.y),
                format_coord(bbox.max.x),
                format_coord(bbox.max.y)
            );
        }
        let _ = writeln!(out, "  )");

        let _ = writeln!(out, "  (placement");
        for component in &ctx.circuit.components {
            let (Some(at), Some(footprint)) =
                (ctx.placement.get(&component.id), ctx.footprint_of(&component.id))
            else {
                continue;
            };
            let _ = writeln!(
                out,
                "    (component {} (place {} {} {} front 0))",
                quote(footprint),
                quote(&component.id),
                format_coord(at.x),
                format_coord(at.y)
            );
        }
        let _ = writeln!(out, "  )");

        let _ = writeln!(out, "  (network");
        for net in &ctx.circuit.nets {
            let pins: Vec<String> = net
                .nodes
                .iter()
                .filter_map(|n| parse_node(n))
                .map(|(component, pin)| format!("{}-{}", component, pin))
                .collect();
            let _ = writeln!(out, "    (net {} (pins {}))", quote(&net.name), pins.join(" "));
        }
        let _ = writeln!(out, "  )");
        out.push_str(")\n");
        out
    }
}

/// Bill of materials, one row per component.
pub struct BomCsv;

impl AuxiliaryExporter for BomCsv {
    fn name(&self) -> &'static str {
        "bill of materials"
    }

    fn suffix(&self) -> &'static str {
        "_bom.csv"
    }

    fn render(&self, ctx: &ExportContext) -> String {
        let mut out = String::from("Reference,Value,Footprint,Library\n");
        for component in &ctx.circuit.components {
            let footprint = ctx
                .footprint_of(&component.id)
                .or(component.footprint.as_deref())
                .unwrap_or("N/A");
            let _ = writeln!(
                out,
                "{},{},{},{}",
                csv_field(&component.id),
                csv_field(&component.value),
                csv_field(footprint),
                csv_field(&component.library_ref)
            );
        }
        out
    }
}

/// C header with a `#define` per net joining a `U*` part to a peripheral.
pub struct FirmwareHeader;

impl AuxiliaryExporter for FirmwareHeader {
    fn name(&self) -> &'static str {
        "firmware pin map"
    }

    fn suffix(&self) -> &'static str {
        "_firmware.h"
    }

    fn render(&self, ctx: &ExportContext) -> String {
        let guard = format!("{}_FIRMWARE_H", c_identifier(&ctx.circuit.base_filename()));
        let mut out = String::new();
        let _ = writeln!(out, "// {} pin map", ctx.circuit.project_name);
        if !ctx.circuit.description.is_empty() {
            let _ = writeln!(out, "// {}", ctx.circuit.description.replace('\n', " "));
        }
        let _ = writeln!(out, "#ifndef {}", guard);
        let _ = writeln!(out, "#define {}", guard);
        out.push('\n');

        for net in ctx.circuit.nets.iter().filter(|n| !n.is_floating()) {
            let nodes: Vec<(&str, &str)> = net.nodes.iter().filter_map(|n| parse_node(n)).collect();
            let controller = nodes.iter().find(|(c, _)| c.starts_with('U'));
            let peripheral = nodes.iter().rev().find(|(c, _)| !c.starts_with('U'));
            let (Some((mcu, mcu_pin)), Some((part, part_pin))) = (controller, peripheral) else {
                continue;
            };

            let name = c_identifier(&format!("PIN_{}_{}", part, net.name));
            let value = if mcu_pin.chars().all(|c| c.is_ascii_digit()) {
                mcu_pin.to_string()
            } else {
                quote(mcu_pin)
            };
            let _ = writeln!(
                out,
                "#define {} {}  // {} pad {} -> {} pad {}",
                name, value, mcu, mcu_pin, part, part_pin
            );
        }

        out.push('\n');
        let _ = writeln!(out, "#endif // {}", guard);
        out
    }
}

fn truncate(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn c_identifier(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::emit::board::{BoardConfig, BoardEmitter};
    use crate::placement::{ForceDirectedPlacer, PlacementConfig};

    const LIGHT: &str = r#"{
        "project_name": "Night Light",
        "description": "MCU driven LED",
        "components": [
            {"id": "U1", "type": "MCU", "value": "ESP32", "library_ref": "MCU:ESP32",
             "connections": [{"pin_number": "4", "net_name": "LED_NET"}]},
            {"id": "D1", "type": "LED", "value": "Red, 2V", "library_ref": "Device:LED",
             "connections": [{"pin_number": "2", "net_name": "LED_NET"}]}
        ],
        "nets": [{"name": "LED_NET", "nodes": ["U1:4", "D1:2"]}]
    }"#;

    fn render(exporter: &dyn AuxiliaryExporter) -> String {
        let circuit = Circuit::from_json(LIGHT).unwrap();
        let catalog = Catalog::new();
        let placement = ForceDirectedPlacer::new(PlacementConfig::with_seed(2))
            .place(&circuit.components, &circuit.nets);
        let board = BoardEmitter::new(&catalog, BoardConfig::default())
            .emit(&circuit, &placement)
            .unwrap();
        exporter.render(&ExportContext {
            circuit: &circuit,
            placement: &placement,
            board: &board,
        })
    }

    #[test]
    fn test_file_names() {
        let names: Vec<_> = default_exporters()
            .iter()
            .map(|e| e.file_name("night_light"))
            .collect();
        assert_eq!(
            names,
            vec![
                "night_light.kicad_pro",
                "night_light.ipc",
                "night_light.dsn",
                "night_light_bom.csv",
                "night_light_firmware.h"
            ]
        );
    }

    #[test]
    fn test_project_file_is_json() {
        let text = render(&ProjectFile);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["meta"]["filename"], "night_light.kicad_pro");
        assert_eq!(value["project"]["name"], "Night Light");
    }

    #[test]
    fn test_ipc_records() {
        let text = render(&Ipc356Netlist);
        let records: Vec<_> = text.lines().filter(|l| l.starts_with("317")).collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].starts_with("317LED_NET          U1    -4    M"));
        assert!(text.ends_with("999\n"));
    }

    #[test]
    fn test_dsn_sections() {
        let text = render(&SpectraDsn);
        assert!(text.starts_with("(pcb \"Night Light\""));
        assert!(text.contains("(boundary (rect pcb "));
        assert_eq!(text.matches("(component ").count(), 2);
        assert!(text.contains("(place \"U1\" "));
        assert!(text.contains("(net \"LED_NET\" (pins U1-4 D1-2))"));
    }

    #[test]
    fn test_bom_quotes_commas() {
        let text = render(&BomCsv);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Reference,Value,Footprint,Library");
        assert_eq!(lines[1], "U1,ESP32,netforge:Placeholder_2Pad,MCU:ESP32");
        assert_eq!(lines[2], "D1,\"Red, 2V\",netforge:Placeholder_2Pad,Device:LED");
    }

    #[test]
    fn test_firmware_defines() {
        let text = render(&FirmwareHeader);
        assert!(text.contains("#ifndef NIGHT_LIGHT_FIRMWARE_H"));
        assert!(text.contains("#define PIN_D1_LED_NET 4  // U1 pad 4 -> D1 pad 2"));
        assert!(text.trim_end().ends_with("#endif // NIGHT_LIGHT_FIRMWARE_H"));
    }
}
