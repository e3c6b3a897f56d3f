//! Netforge - natural-language circuit descriptions to KiCad projects
//!
//! A translator turns a description into a circuit IR; the IR is refined
//! against an indexed KiCad library, placed with a force-directed layout,
//! emitted as a provisional board and validated (ERC + DRC). Failing
//! candidates are sent back for correction within a bounded retry budget.
//! Accepted designs are written as a schematic, a board, and auxiliary
//! exports.
//!
//! # Quick Start
//!
//! ```no_run
//! use netforge::{Catalog, GenerationOptions, NetforgeCore, ScriptedTranslator};
//!
//! # async fn run() -> Result<(), netforge::NetforgeError> {
//! let catalog = Catalog::new();
//! let translator = ScriptedTranslator::repeating(std::fs::read_to_string("blink.json")?);
//! let outcome = NetforgeCore::generate(
//!     "LED with a current limiting resistor",
//!     &catalog,
//!     &translator,
//!     &GenerationOptions::default(),
//! )
//! .await?;
//!
//! for name in outcome.artifact_names() {
//!     println!("{}", name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod ai;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod core;
pub mod emit;
pub mod ir;
pub mod parser;
pub mod placement;
pub mod repair;
pub mod validate;

// Re-export main types
pub use ai::{AIError, ChatMessage, OpenAiClient, ScriptedTranslator, Translator};
pub use catalog::{Catalog, CatalogError, IndexStats};
pub use config::{ConfigError, GeneratorConfig, LlmSettings};
pub use crate::core::{write_artifacts, GenerationOptions, GenerationOutcome, NetforgeCore, NetforgeError};
pub use emit::{Artifact, BoardConfig, BoardEmitter, SchematicEmitter};
pub use ir::{Circuit, Component, IrError, Net, PinConnection};
pub use placement::{ForceDirectedPlacer, Placement, PlacementConfig, Point};
pub use repair::{Narrator, RepairLoop, RepairOutcome, RepairStage, RoundSnapshot};
pub use validate::{ValidationReport, Validator};

/// Index a library tree (convenience wrapper).
pub fn index_library(root: &std::path::Path) -> Result<Catalog, NetforgeError> {
    let mut catalog = Catalog::new();
    catalog.index(root)?;
    Ok(catalog)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Catalog, Circuit, GenerationOptions, GenerationOutcome, NetforgeCore, NetforgeError,
        RepairStage, Translator, ValidationReport,
    };
}
