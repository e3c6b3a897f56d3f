use crate::ai::provider::ChatMessage;
use crate::validate::ValidationReport;

/// Errors and warnings quoted back to the translator per correction request.
const MAX_LISTED: usize = 20;

pub const SYSTEM_PROMPT: &str = r#"You are a hardware engineer producing KiCad designs.
Convert the user's description into a circuit and respond ONLY with a JSON object, no markdown and no extra text, in exactly this shape:
{
  "project_name": "Short project name",
  "description": "One sentence describing the circuit",
  "components": [
    {
      "id": "R1",
      "type": "Resistor",
      "value": "10k",
      "library_ref": "Device:R",
      "footprint": "Resistor_SMD:R_0805_2012Metric",
      "connections": [{"pin_number": "1", "net_name": "VCC"}, {"pin_number": "2", "net_name": "LED_NET"}]
    }
  ],
  "nets": [
    {"name": "VCC", "nodes": ["R1:1"]}
  ]
}

Rules:
- library_ref and footprint are "Library:Entry" with exactly one colon; omit footprint if unsure.
- Every component lists its connections; every net lists its nodes as "ComponentId:PinNumber".
- Each node must name a component id defined in components.
- A net shared by several pins lists all of them, so connected parts stay on one net."#;

/// Opening conversation for a new design.
pub fn build_initial_messages(description: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Design request:\n{}", description.trim())),
    ]
}

/// Correction request after a candidate failed validation.
pub fn build_correction_request(report: &ValidationReport) -> String {
    let mut text = String::from(
        "The circuit you returned failed design validation. Fix every error below and return the complete corrected JSON object.\n",
    );

    text.push_str("\nErrors:\n");
    text.push_str(&bullet_list(&report.errors));

    if !report.warnings.is_empty() {
        text.push_str("\nWarnings (fix if possible):\n");
        text.push_str(&bullet_list(&report.warnings));
    }

    if report.errors.iter().any(|e| e.starts_with("DRC:")) {
        text.push_str(
            "\nOverlapping parts usually mean unrelated components were placed on one net or a component was duplicated; check the net list.\n",
        );
    }
    text
}

/// Correction request after a reply that could not be read as circuit JSON.
pub fn build_format_request(error: &str) -> String {
    format!(
        "Your previous reply could not be used: {}\nRespond again with ONLY the JSON object in the required shape.",
        error
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- none\n".to_string();
    }
    let mut out: String = items
        .iter()
        .take(MAX_LISTED)
        .map(|item| format!("- {}\n", item))
        .collect();
    if items.len() > MAX_LISTED {
        out.push_str(&format!("- ... and {} more\n", items.len() - MAX_LISTED));
    }
    out
}
