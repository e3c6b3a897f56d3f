//! Repair Loop
//!
//! An explicit state machine around the translator:
//!
//! ```text
//! Draft -> Refine -> ProvisionalEmit -> Validate -> Accepted
//!                                          |
//!                                          +-> Repairing -> Draft ...
//!                                          +-> Failed (budget spent)
//! ```
//!
//! Each round is recorded as an immutable [`RoundSnapshot`]. A reply that
//! does not parse as a circuit skips straight to the decision with a
//! rejection report and spends budget like any failed validation, so the
//! translator is called at most `retry_budget + 1` times.
//!
//! Transport failures are not repair rounds; they end the run.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::ai::{
    build_correction_request, build_format_request, build_initial_messages, AIError, ChatMessage,
    Translator,
};
use crate::catalog::Catalog;
use crate::emit::{BoardConfig, BoardEmitter};
use crate::ir::Circuit;
use crate::placement::{ForceDirectedPlacer, Placement, PlacementConfig};
use crate::validate::{ValidationReport, Validator};

pub const DEFAULT_RETRY_BUDGET: usize = 2;

/// User-visible progress callback; receives one line per stage transition.
pub type Narrator = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairStage {
    Draft,
    Refine,
    ProvisionalEmit,
    Validate,
    Accepted,
    Repairing,
    FinalEmit,
    Failed,
}

impl fmt::Display for RepairStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairStage::Draft => "draft",
            RepairStage::Refine => "refine",
            RepairStage::ProvisionalEmit => "provisional-emit",
            RepairStage::Validate => "validate",
            RepairStage::Accepted => "accepted",
            RepairStage::Repairing => "repairing",
            RepairStage::FinalEmit => "final-emit",
            RepairStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What one round saw and decided. Never mutated after the round ends.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSnapshot {
    /// 0 for the first draft.
    pub round: usize,
    pub response: String,
    /// Refined candidate; `None` when the reply was not a circuit.
    pub circuit: Option<Circuit>,
    pub placement: Option<Placement>,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub stages: Vec<RepairStage>,
    pub rounds: Vec<RoundSnapshot>,
}

impl RepairOutcome {
    pub fn is_accepted(&self) -> bool {
        self.stages.last() == Some(&RepairStage::Accepted)
    }

    /// The round that passed validation.
    pub fn accepted(&self) -> Option<&RoundSnapshot> {
        if self.is_accepted() {
            self.rounds.last()
        } else {
            None
        }
    }

    pub fn last_report(&self) -> Option<&ValidationReport> {
        self.rounds.last().map(|r| &r.report)
    }

    pub fn translation_calls(&self) -> usize {
        self.rounds.len()
    }
}

pub struct RepairLoop<'a> {
    catalog: &'a Catalog,
    translator: &'a dyn Translator,
    retry_budget: usize,
    placement: PlacementConfig,
    board: BoardConfig,
    validator: Validator,
    narrator: Option<Narrator>,
}

impl<'a> RepairLoop<'a> {
    pub fn new(catalog: &'a Catalog, translator: &'a dyn Translator) -> Self {
        let board = BoardConfig::default();
        Self {
            catalog,
            translator,
            retry_budget: DEFAULT_RETRY_BUDGET,
            placement: PlacementConfig::default(),
            validator: Validator::with_default_rules(board.collision_radius),
            board,
            narrator: None,
        }
    }

    pub fn with_retry_budget(mut self, retry_budget: usize) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_placement(mut self, placement: PlacementConfig) -> Self {
        self.placement = placement;
        self
    }

    /// Also resets the validator to the default rules at the board's radius.
    pub fn with_board(mut self, board: BoardConfig) -> Self {
        self.validator = Validator::with_default_rules(board.collision_radius);
        self.board = board;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_narrator(mut self, narrator: Narrator) -> Self {
        self.narrator = Some(narrator);
        self
    }

    fn enter(&self, stages: &mut Vec<RepairStage>, stage: RepairStage, message: &str) {
        tracing::info!(stage = %stage, "{}", message);
        if let Some(narrator) = &self.narrator {
            narrator(message);
        }
        stages.push(stage);
    }

    /// Drive rounds until a candidate validates or the budget runs out.
    pub async fn run(&self, description: &str) -> Result<RepairOutcome, AIError> {
        let mut history = build_initial_messages(description);
        let mut stages = Vec::new();
        let mut rounds: Vec<RoundSnapshot> = Vec::new();

        for round in 0..=self.retry_budget {
            self.enter(
                &mut stages,
                RepairStage::Draft,
                &format!("Requesting circuit from {} (round {})", self.translator.name(), round + 1),
            );
            let response = self.translator.translate(&history).await?;

            let (snapshot, correction) = match Circuit::from_response(&response) {
                Ok(candidate) => {
                    let snapshot = self.evaluate(&mut stages, round, response, candidate);
                    let correction = build_correction_request(&snapshot.report);
                    (snapshot, correction)
                }
                Err(e) => {
                    tracing::warn!("Translator reply rejected: {}", e);
                    let snapshot = RoundSnapshot {
                        round,
                        response,
                        circuit: None,
                        placement: None,
                        report: ValidationReport::rejected(format!("Translation: {}", e)),
                    };
                    (snapshot, build_format_request(&e.to_string()))
                }
            };

            let accepted = snapshot.report.is_valid;
            let prior = snapshot.response.clone();
            let report = snapshot.report.clone();
            rounds.push(snapshot);

            if accepted {
                self.enter(
                    &mut stages,
                    RepairStage::Accepted,
                    &format!("Circuit accepted after {} round(s)", round + 1),
                );
                return Ok(RepairOutcome { stages, rounds });
            }

            if round < self.retry_budget {
                self.enter(
                    &mut stages,
                    RepairStage::Repairing,
                    &format!(
                        "Validation failed with {} error(s), asking for a correction",
                        report.errors.len()
                    ),
                );
                history.push(ChatMessage::assistant(prior));
                history.push(ChatMessage::user(correction));
            }
        }

        self.enter(
            &mut stages,
            RepairStage::Failed,
            &format!("Giving up after {} round(s)", rounds.len()),
        );
        Ok(RepairOutcome { stages, rounds })
    }

    fn evaluate(
        &self,
        stages: &mut Vec<RepairStage>,
        round: usize,
        response: String,
        mut circuit: Circuit,
    ) -> RoundSnapshot {
        self.enter(
            stages,
            RepairStage::Refine,
            "Refining component references against the catalog",
        );
        refine(self.catalog, &mut circuit);

        self.enter(stages, RepairStage::ProvisionalEmit, "Placing and emitting a provisional board");
        let placement =
            ForceDirectedPlacer::new(self.placement.clone()).place(&circuit.components, &circuit.nets);
        let board = BoardEmitter::new(self.catalog, self.board.clone()).emit(&circuit, &placement);

        self.enter(stages, RepairStage::Validate, "Running ERC and DRC");
        let report = match board {
            Ok(board) => self.validator.validate(&circuit, &board.text),
            Err(e) => ValidationReport::rejected(format!("DRC: Provisional board failed: {}", e)),
        };
        for error in &report.errors {
            tracing::debug!("{}", error);
        }

        RoundSnapshot {
            round,
            response,
            circuit: Some(circuit),
            placement: Some(placement),
            report,
        }
    }
}

/// Re-resolve symbol references through the catalog and fill missing
/// footprints. Misses keep the translator's choice.
pub fn refine(catalog: &Catalog, circuit: &mut Circuit) {
    for component in &mut circuit.components {
        let best = catalog
            .search(&component.library_ref)
            .into_iter()
            .next()
            .or_else(|| catalog.search(&component.kind).into_iter().next());

        match best {
            Some(full_name) if full_name != component.library_ref => {
                tracing::debug!("{}: {} -> {}", component.id, component.library_ref, full_name);
                component.library_ref = full_name;
            }
            Some(_) => {}
            None => tracing::debug!(
                "{}: no catalog match for {}, keeping it",
                component.id,
                component.library_ref
            ),
        }

        if component.footprint.is_none() {
            component.footprint = catalog.suggest_footprint(&component.library_ref);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Role, ScriptedTranslator};
    use std::sync::Mutex;

    const SYMBOLS: &str = r#"(kicad_symbol_lib (version 20211014)
  (symbol "R" (property "Reference" "R")
    (symbol "R_1_1" (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
                    (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2"))))
  (symbol "LED" (property "Reference" "D")
    (symbol "LED_1_1" (pin passive line (at -3.81 0 0) (length 2.54) (name "K") (number "1"))
                      (pin passive line (at 3.81 0 180) (length 2.54) (name "A") (number "2"))))
)"#;

    const RESISTOR_FP: &str = r#"(footprint "R_0805_2012Metric" (layer "F.Cu")
  (fp_text reference "REF**" (at 0 -1.65) (layer "F.SilkS"))
  (fp_text value "R_0805" (at 0 1.65) (layer "F.Fab"))
  (pad "1" smd roundrect (at -0.9125 0) (size 1.025 1.4) (layers "F.Cu" "F.Paste" "F.Mask"))
  (pad "2" smd roundrect (at 0.9125 0) (size 1.025 1.4) (layers "F.Cu" "F.Paste" "F.Mask"))
)"#;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.index_symbol_text("Device", SYMBOLS).unwrap();
        catalog.insert_footprint("Resistor_SMD", "R_0805_2012Metric", RESISTOR_FP.to_string());
        catalog
    }

    const GOOD: &str = r#"{"project_name": "Blink", "components": [
        {"id": "R1", "type": "Resistor", "value": "10k", "library_ref": "Device:R",
         "connections": [{"pin_number": "1", "net_name": "VCC"}, {"pin_number": "2", "net_name": "LED_NET"}]},
        {"id": "D1", "type": "LED", "value": "Red", "library_ref": "Device:LED",
         "connections": [{"pin_number": "1", "net_name": "LED_NET"}, {"pin_number": "2", "net_name": "GND"}]}
      ], "nets": [
        {"name": "LED_NET", "nodes": ["R1:2", "D1:1"]},
        {"name": "VCC", "nodes": ["R1:1"]},
        {"name": "GND", "nodes": ["D1:2"]}
      ]}"#;

    // Fails ERC on every round: R2 has no connections.
    const BAD: &str = r#"{"project_name": "Blink", "components": [
        {"id": "R1", "type": "Resistor", "value": "10k", "library_ref": "Device:R",
         "connections": [{"pin_number": "1", "net_name": "VCC"}]},
        {"id": "R2", "type": "Resistor", "value": "1k", "library_ref": "Device:R", "connections": []}
      ], "nets": [{"name": "VCC", "nodes": ["R1:1"]}]}"#;

    fn repair_loop<'a>(catalog: &'a Catalog, translator: &'a ScriptedTranslator) -> RepairLoop<'a> {
        RepairLoop::new(catalog, translator).with_placement(PlacementConfig::with_seed(7))
    }

    #[tokio::test]
    async fn test_accepts_first_valid_round() {
        let catalog = catalog();
        let translator = ScriptedTranslator::repeating(GOOD);
        let outcome = repair_loop(&catalog, &translator).run("blink").await.unwrap();

        assert!(outcome.is_accepted());
        assert_eq!(translator.calls(), 1);
        assert_eq!(
            outcome.stages,
            vec![
                RepairStage::Draft,
                RepairStage::Refine,
                RepairStage::ProvisionalEmit,
                RepairStage::Validate,
                RepairStage::Accepted,
            ]
        );
        let accepted = outcome.accepted().unwrap();
        assert_eq!(accepted.report.warnings.len(), 2);
        let circuit = accepted.circuit.as_ref().unwrap();
        assert_eq!(
            circuit.component("R1").unwrap().footprint.as_deref(),
            Some("Resistor_SMD:R_0805_2012Metric")
        );
        assert_eq!(circuit.component("D1").unwrap().footprint, None);
    }

    #[tokio::test]
    async fn test_budget_bounds_translation_calls() {
        let catalog = catalog();
        let translator = ScriptedTranslator::repeating(BAD);
        let outcome = repair_loop(&catalog, &translator)
            .with_retry_budget(2)
            .run("blink")
            .await
            .unwrap();

        assert!(!outcome.is_accepted());
        assert!(outcome.accepted().is_none());
        assert_eq!(translator.calls(), 3);
        assert_eq!(outcome.translation_calls(), 3);
        assert_eq!(outcome.stages.last(), Some(&RepairStage::Failed));
        assert_eq!(
            outcome.stages.iter().filter(|s| **s == RepairStage::Repairing).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_correction_history_carries_prior_candidate() {
        let catalog = catalog();
        let translator = ScriptedTranslator::new([BAD, GOOD]);
        let outcome = repair_loop(&catalog, &translator).run("blink").await.unwrap();

        assert!(outcome.is_accepted());
        let histories = translator.histories();
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].len(), 2);

        let second = &histories[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].content, BAD);
        assert_eq!(second[3].role, Role::User);
        assert!(second[3].content.contains("'R2' has no defined connections"));

        // earlier rounds stay as they were
        assert!(!outcome.rounds[0].report.is_valid);
        assert!(outcome.rounds[1].report.is_valid);
    }

    #[tokio::test]
    async fn test_malformed_reply_spends_budget() {
        let catalog = catalog();
        let translator = ScriptedTranslator::new(["I cannot do that", GOOD]);
        let outcome = repair_loop(&catalog, &translator)
            .with_retry_budget(1)
            .run("blink")
            .await
            .unwrap();

        assert!(outcome.is_accepted());
        assert!(outcome.rounds[0].circuit.is_none());
        assert!(outcome.rounds[0].report.errors[0].starts_with("Translation:"));
        assert_eq!(
            &outcome.stages[..3],
            &[RepairStage::Draft, RepairStage::Repairing, RepairStage::Draft]
        );

        let translator = ScriptedTranslator::repeating("not json");
        let outcome = repair_loop(&catalog, &translator)
            .with_retry_budget(0)
            .run("blink")
            .await
            .unwrap();
        assert_eq!(translator.calls(), 1);
        assert_eq!(outcome.stages, vec![RepairStage::Draft, RepairStage::Failed]);
    }

    #[tokio::test]
    async fn test_transport_error_ends_run() {
        let catalog = catalog();
        let translator = ScriptedTranslator::new(Vec::<String>::new());
        assert!(repair_loop(&catalog, &translator).run("blink").await.is_err());
    }

    #[tokio::test]
    async fn test_narrator_sees_every_transition() {
        let catalog = catalog();
        let translator = ScriptedTranslator::repeating(GOOD);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let narrator: Narrator = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });

        let outcome = repair_loop(&catalog, &translator)
            .with_narrator(narrator)
            .run("blink")
            .await
            .unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), outcome.stages.len());
        assert!(lines[0].contains("scripted"));
    }

    #[test]
    fn test_refine_falls_back_to_type() {
        let catalog = catalog();
        let mut circuit = Circuit::from_json(
            r#"{"project_name": "x", "components": [
                {"id": "D1", "type": "LED", "value": "Red", "library_ref": "Vendor:XYZ-LED-01"},
                {"id": "R1", "type": "Resistor", "value": "1k", "library_ref": "device:r"},
                {"id": "Q1", "type": "Transistor", "value": "", "library_ref": "Vendor:Q"}
            ]}"#,
        )
        .unwrap();

        refine(&catalog, &mut circuit);
        assert_eq!(circuit.components[0].library_ref, "Device:LED");
        assert_eq!(circuit.components[1].library_ref, "Device:R");
        assert_eq!(
            circuit.components[1].footprint.as_deref(),
            Some("Resistor_SMD:R_0805_2012Metric")
        );
        assert_eq!(circuit.components[2].library_ref, "Vendor:Q");
        assert_eq!(circuit.components[2].footprint, None);
    }
}
