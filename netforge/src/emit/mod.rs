//! Artifact emitters
//!
//! - [`schematic`]: row-layout schematic with wires and floating labels
//! - [`board`]: placed footprints with bound pad nets and an outline
//! - [`exports`]: one-pass auxiliary exports (project, netlist, DSN, BOM,
//!   firmware header)
//!
//! Emitters render text only; writing files is the caller's job so a failed
//! run never leaves partial artifacts behind.

pub mod board;
pub mod exports;
pub mod schematic;

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;

pub use board::{assign_net_ids, BoardConfig, BoardEmitter, EmittedBoard};
pub use exports::{default_exporters, AuxiliaryExporter, ExportContext};
pub use schematic::SchematicEmitter;

pub const SCHEMATIC_SUFFIX: &str = ".kicad_sch";
pub const BOARD_SUFFIX: &str = ".kicad_pcb";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Failed to rewrite footprint for {reference}: {source}")]
    Codec {
        reference: String,
        #[source]
        source: CodecError,
    },
}

/// One rendered output file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub file_name: String,
    #[serde(skip)]
    pub contents: String,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
        }
    }
}

/// Current date for title blocks.
pub(crate) fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

pub(crate) fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
