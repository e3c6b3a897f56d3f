//! Validator: ERC over the circuit IR, DRC over emitted board text
//!
//! ERC rules are pluggable ([`ErcRule`]); the default set flags floating
//! nets (warning), components without connections (error), and net nodes
//! naming components that do not exist (error).
//!
//! DRC reads positions back out of the emitted board rather than trusting
//! placement output, so it checks exactly what would be written to disk.
//! Only footprint centroids are compared; pad extents are not modeled.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::ir::{parse_node, Circuit};
use crate::parser::{parse_str, ParseError, SExp};

pub const DEFAULT_COLLISION_RADIUS: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn error(rule_id: &str, message: String) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity: Severity::Error,
            message,
        }
    }

    fn warning(rule_id: &str, message: String) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity: Severity::Warning,
            message,
        }
    }
}

/// The only signal the repair loop reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_findings(findings: impl IntoIterator<Item = Finding>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for finding in findings {
            match finding.severity {
                Severity::Error => errors.push(finding.message),
                Severity::Warning => warnings.push(finding.message),
            }
        }
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Report for a candidate that never reached validation.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![reason.into()],
            warnings: Vec::new(),
        }
    }
}

pub trait ErcRule: Send + Sync {
    fn id(&self) -> &str;
    fn check(&self, circuit: &Circuit) -> Vec<Finding>;
}

/// Nets with fewer than two nodes.
pub struct FloatingNetRule;

impl ErcRule for FloatingNetRule {
    fn id(&self) -> &str {
        "floating_net"
    }

    fn check(&self, circuit: &Circuit) -> Vec<Finding> {
        circuit
            .nets
            .iter()
            .filter(|net| net.is_floating())
            .map(|net| {
                Finding::warning(
                    self.id(),
                    format!(
                        "ERC: Net '{}' is a floating net ({} connection{})",
                        net.name,
                        net.nodes.len(),
                        if net.nodes.len() == 1 { "" } else { "s" }
                    ),
                )
            })
            .collect()
    }
}

/// Components with an empty connection list.
pub struct UnconnectedComponentRule;

impl ErcRule for UnconnectedComponentRule {
    fn id(&self) -> &str {
        "no_connections"
    }

    fn check(&self, circuit: &Circuit) -> Vec<Finding> {
        circuit
            .components
            .iter()
            .filter(|c| c.connections.is_empty())
            .map(|c| {
                Finding::error(
                    self.id(),
                    format!("ERC: Component '{}' has no defined connections", c.id),
                )
            })
            .collect()
    }
}

/// Net nodes pointing at component ids the circuit does not define.
pub struct UnknownNodeRule;

impl ErcRule for UnknownNodeRule {
    fn id(&self) -> &str {
        "unknown_component"
    }

    fn check(&self, circuit: &Circuit) -> Vec<Finding> {
        let known: HashSet<&str> = circuit.components.iter().map(|c| c.id.as_str()).collect();
        let mut findings = Vec::new();
        for net in &circuit.nets {
            for (component, _) in net.nodes.iter().filter_map(|n| parse_node(n)) {
                if !known.contains(component) {
                    findings.push(Finding::error(
                        self.id(),
                        format!(
                            "ERC: Net '{}' references unknown component '{}'",
                            net.name, component
                        ),
                    ));
                }
            }
        }
        findings
    }
}

/// A footprint read back from board text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedFootprint {
    pub reference: String,
    pub x: f64,
    pub y: f64,
}

/// Reference and top-level position of every footprint on a board.
pub fn placed_footprints(board_text: &str) -> Result<Vec<PlacedFootprint>, ParseError> {
    let tree = parse_str(board_text)?;
    let footprints = tree
        .as_list()
        .unwrap_or(&[])
        .iter()
        .filter(|item| matches!(item.head(), Some("footprint") | Some("module")));

    let mut out = Vec::new();
    for footprint in footprints {
        let Some(reference) = footprint_reference(footprint) else {
            tracing::debug!("Footprint without reference skipped by DRC");
            continue;
        };
        let Some((x, y)) = footprint.position() else {
            tracing::debug!("Footprint {} has no position, skipped by DRC", reference);
            continue;
        };
        out.push(PlacedFootprint { reference, x, y });
    }
    Ok(out)
}

fn footprint_reference(footprint: &SExp) -> Option<String> {
    footprint
        .children("property")
        .find(|p| p.atom(1) == Some("Reference"))
        .and_then(|p| p.atom(2))
        .or_else(|| {
            footprint
                .children("fp_text")
                .find(|t| t.atom(1) == Some("reference"))
                .and_then(|t| t.atom(2))
        })
        .map(str::to_string)
}

pub struct Validator {
    rules: Vec<Arc<dyn ErcRule>>,
    collision_radius: f64,
}

impl Validator {
    pub fn new(collision_radius: f64) -> Self {
        Self {
            rules: Vec::new(),
            collision_radius,
        }
    }

    pub fn with_default_rules(collision_radius: f64) -> Self {
        let mut validator = Self::new(collision_radius);
        validator.add_rule(Arc::new(FloatingNetRule));
        validator.add_rule(Arc::new(UnconnectedComponentRule));
        validator.add_rule(Arc::new(UnknownNodeRule));
        validator
    }

    pub fn add_rule(&mut self, rule: Arc<dyn ErcRule>) {
        self.rules.push(rule);
    }

    pub fn erc(&self, circuit: &Circuit) -> Vec<Finding> {
        self.rules.iter().flat_map(|rule| rule.check(circuit)).collect()
    }

    /// Pairwise centroid overlap check on emitted board text.
    pub fn drc(&self, board_text: &str) -> Vec<Finding> {
        let placed = match placed_footprints(board_text) {
            Ok(placed) => placed,
            Err(err) => {
                return vec![Finding::error(
                    "board_parse",
                    format!("DRC: Board could not be read back: {}", err),
                )]
            }
        };

        let mut findings = Vec::new();
        for (i, a) in placed.iter().enumerate() {
            for b in &placed[i + 1..] {
                let distance = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                if distance < self.collision_radius {
                    findings.push(Finding::error(
                        "overlap",
                        format!(
                            "DRC: Possible overlap between '{}' and '{}' (distance: {:.2}mm)",
                            a.reference, b.reference, distance
                        ),
                    ));
                }
            }
        }
        findings
    }

    pub fn validate(&self, circuit: &Circuit, board_text: &str) -> ValidationReport {
        let report = ValidationReport::from_findings(
            self.erc(circuit).into_iter().chain(self.drc(board_text)),
        );
        tracing::info!(
            "Validation: {} errors, {} warnings",
            report.errors.len(),
            report.warnings.len()
        );
        report
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::with_default_rules(DEFAULT_COLLISION_RADIUS)
    }
}
