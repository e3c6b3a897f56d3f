//! Circuit Intermediate Representation
//!
//! The structured component/net description exchanged between translation,
//! refinement, and emission. Payloads are checked at the boundary
//! ([`Circuit::from_json`]) so downstream stages never see an id-less
//! component or a library reference without its `library:entry` separator.
//!
//! Net node soundness (every `Component:Pin` naming a real component) is
//! deliberately *not* enforced here; that is an ERC concern.

pub mod graph;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

pub use graph::ConnectivityGraph;

/// Separator between library and entry name, and between component and pin.
pub const QUALIFIER: char = ':';

#[derive(Debug, Error)]
pub enum IrError {
    #[error("Response is not valid circuit JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Component #{0} has an empty id")]
    EmptyId(usize),

    #[error("Duplicate component id '{0}'")]
    DuplicateId(String),

    #[error("Component id '{0}' contains ':' (reserved for 'ComponentId:PinNumber' nodes)")]
    QualifiedId(String),

    #[error("Component '{id}' has malformed library_ref '{library_ref}' (expected 'library:symbol')")]
    MalformedLibraryRef { id: String, library_ref: String },

    #[error("Component '{id}' has malformed footprint '{footprint}' (expected 'library:footprint')")]
    MalformedFootprint { id: String, footprint: String },

    #[error("Net '{net}' has malformed node '{node}' (expected 'ComponentId:PinNumber')")]
    MalformedNode { net: String, node: String },
}

/// One component pin bound to one net by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConnection {
    #[serde(deserialize_with = "string_or_number")]
    pub pin_number: String,
    pub net_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(deserialize_with = "string_or_number")]
    pub value: String,

    /// Symbol reference, `library:symbol`.
    pub library_ref: String,

    /// Footprint reference, `library:footprint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint: Option<String>,

    #[serde(default)]
    pub connections: Vec<PinConnection>,
}

impl Component {
    /// Library half of `library_ref`.
    pub fn library_name(&self) -> &str {
        split_qualified(&self.library_ref).map(|(lib, _)| lib).unwrap_or("")
    }

    /// Entry half of `library_ref`.
    pub fn symbol_name(&self) -> &str {
        split_qualified(&self.library_ref)
            .map(|(_, name)| name)
            .unwrap_or(&self.library_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: String,

    /// `ComponentId:PinNumber` strings.
    pub nodes: Vec<String>,
}

impl Net {
    pub fn is_floating(&self) -> bool {
        self.nodes.len() < 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub project_name: String,

    #[serde(default)]
    pub description: String,

    /// Optional block diagram in Mermaid syntax, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mermaid: Option<String>,

    pub components: Vec<Component>,

    #[serde(default)]
    pub nets: Vec<Net>,
}

impl Circuit {
    /// Parse and check a JSON payload.
    pub fn from_json(text: &str) -> Result<Self, IrError> {
        let circuit: Circuit = serde_json::from_str(text)?;
        circuit.check_shape()?;
        Ok(circuit)
    }

    /// Parse a free-form translator response: the outermost JSON object is
    /// pulled out of any surrounding prose or markdown fence first.
    pub fn from_response(response: &str) -> Result<Self, IrError> {
        Self::from_json(&extract_json_from_text(response))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Structural checks enforced at the IR boundary.
    pub fn check_shape(&self) -> Result<(), IrError> {
        let mut seen = HashSet::new();
        for (i, component) in self.components.iter().enumerate() {
            if component.id.trim().is_empty() {
                return Err(IrError::EmptyId(i));
            }
            if component.id.contains(QUALIFIER) {
                return Err(IrError::QualifiedId(component.id.clone()));
            }
            if !seen.insert(component.id.as_str()) {
                return Err(IrError::DuplicateId(component.id.clone()));
            }
            if !is_qualified(&component.library_ref) {
                return Err(IrError::MalformedLibraryRef {
                    id: component.id.clone(),
                    library_ref: component.library_ref.clone(),
                });
            }
            if let Some(footprint) = &component.footprint {
                if !is_qualified(footprint) {
                    return Err(IrError::MalformedFootprint {
                        id: component.id.clone(),
                        footprint: footprint.clone(),
                    });
                }
            }
        }

        for net in &self.nets {
            if let Some(node) = net.nodes.iter().find(|n| parse_node(n).is_none()) {
                return Err(IrError::MalformedNode {
                    net: net.name.clone(),
                    node: node.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Distinct net names from the net list and every component connection,
    /// sorted.
    pub fn net_names(&self) -> BTreeSet<&str> {
        self.nets
            .iter()
            .map(|n| n.name.as_str())
            .chain(
                self.components
                    .iter()
                    .flat_map(|c| c.connections.iter().map(|p| p.net_name.as_str())),
            )
            .collect()
    }

    /// Lower-cased, space-to-underscore project name used for artifact files.
    pub fn base_filename(&self) -> String {
        let base = self.project_name.trim().to_lowercase().replace(' ', "_");
        if base.is_empty() {
            "untitled".to_string()
        } else {
            base
        }
    }

    pub fn connectivity(&self) -> ConnectivityGraph {
        ConnectivityGraph::build(&self.components, &self.nets)
    }
}

/// Split `ComponentId:PinNumber`.
pub fn parse_node(node: &str) -> Option<(&str, &str)> {
    let (component, pin) = node.split_once(QUALIFIER)?;
    if component.is_empty() || pin.is_empty() {
        return None;
    }
    Some((component, pin))
}

/// Split `library:entry`; exactly one separator with both halves non-empty.
pub fn split_qualified(full_name: &str) -> Option<(&str, &str)> {
    let (library, entry) = full_name.split_once(QUALIFIER)?;
    if library.is_empty() || entry.is_empty() || entry.contains(QUALIFIER) {
        return None;
    }
    Some((library, entry))
}

pub fn is_qualified(full_name: &str) -> bool {
    split_qualified(full_name).is_some()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Loose::deserialize(deserializer)? {
        Loose::Text(s) => s,
        Loose::Number(n) => n.to_string(),
    })
}

fn extract_json_from_text(text: &str) -> String {
    let text = text.trim();

    // Markdown code block, with or without a language tag
    if let Some(start) = text.find("```") {
        if let Some(end) = text.rfind("```") {
            if end > start + 3 {
                let inner = text[start + 3..end].trim_start_matches("json");
                if inner.trim().starts_with('{') {
                    return inner.trim().to_string();
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return text[start..=end].to_string();
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLINK: &str = r#"{
        "project_name": "Led Blink",
        "description": "LED with series resistor",
        "components": [
            {"id": "R1", "type": "Resistor", "value": "220", "library_ref": "Device:R",
             "connections": [{"pin_number": "1", "net_name": "VCC"}, {"pin_number": 2, "net_name": "LED_NET"}]},
            {"id": "D1", "type": "LED", "value": "Red", "library_ref": "Device:LED",
             "footprint": "LED_SMD:LED_0805_2012Metric",
             "connections": [{"pin_number": "1", "net_name": "LED_NET"}, {"pin_number": "2", "net_name": "GND"}]}
        ],
        "nets": [
            {"name": "VCC", "nodes": ["R1:1"]},
            {"name": "LED_NET", "nodes": ["R1:2", "D1:1"]},
            {"name": "GND", "nodes": ["D1:2"]}
        ]
    }"#;

    #[test]
    fn test_parse_valid_circuit() {
        let circuit = Circuit::from_json(BLINK).unwrap();
        assert_eq!(circuit.components.len(), 2);
        assert_eq!(circuit.components[0].connections[1].pin_number, "2");
        assert_eq!(circuit.components[0].footprint, None);
        assert_eq!(
            circuit.components[1].footprint.as_deref(),
            Some("LED_SMD:LED_0805_2012Metric")
        );
        assert_eq!(circuit.base_filename(), "led_blink");
        assert_eq!(
            circuit.net_names().into_iter().collect::<Vec<_>>(),
            vec!["GND", "LED_NET", "VCC"]
        );
    }

    #[test]
    fn test_from_response_strips_markdown_fence() {
        let wrapped = format!("Here is the circuit:\n```json\n{}\n```\nEnjoy.", BLINK);
        let circuit = Circuit::from_response(&wrapped).unwrap();
        assert_eq!(circuit.project_name, "Led Blink");
    }

    #[test]
    fn test_rejects_missing_required_field() {
        let err = Circuit::from_json(r#"{"project_name": "x", "components": [{"id": "R1"}]}"#)
            .unwrap_err();
        assert!(matches!(err, IrError::Json(_)));
        assert!(Circuit::from_response("Sorry, I cannot help with that.").is_err());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let dup = BLINK.replace("\"id\": \"D1\"", "\"id\": \"R1\"");
        assert!(matches!(Circuit::from_json(&dup), Err(IrError::DuplicateId(id)) if id == "R1"));

        let qualified_id = BLINK.replace("\"id\": \"R1\"", "\"id\": \"U1:A\"");
        assert!(matches!(
            Circuit::from_json(&qualified_id),
            Err(IrError::QualifiedId(id)) if id == "U1:A"
        ));

        let bad_ref = BLINK.replace("Device:LED", "LED");
        assert!(matches!(
            Circuit::from_json(&bad_ref),
            Err(IrError::MalformedLibraryRef { .. })
        ));

        let two_seps = BLINK.replace("Device:LED", "Device:LED:x");
        assert!(Circuit::from_json(&two_seps).is_err());

        let bad_node = BLINK.replace("\"D1:2\"", "\"D1\"");
        assert!(matches!(
            Circuit::from_json(&bad_node),
            Err(IrError::MalformedNode { .. })
        ));

        let empty_id = BLINK.replace("\"id\": \"D1\"", "\"id\": \"  \"");
        assert!(matches!(Circuit::from_json(&empty_id), Err(IrError::EmptyId(1))));
    }

    #[test]
    fn test_dangling_node_is_structurally_legal() {
        let dangling = BLINK.replace("\"D1:2\"", "\"U7:2\"");
        assert!(Circuit::from_json(&dangling).is_ok());
    }

    #[test]
    fn test_qualified_name_helpers() {
        assert_eq!(split_qualified("Device:R"), Some(("Device", "R")));
        assert_eq!(split_qualified("Device:"), None);
        assert_eq!(parse_node("R1:2"), Some(("R1", "2")));
        assert_eq!(parse_node("R1"), None);
    }
}
