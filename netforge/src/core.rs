//! Generation pipeline shared by the CLI and library callers.
//! Description in, artifact files out.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::ai::{AIError, Translator};
use crate::catalog::{Catalog, CatalogError};
use crate::config::{ConfigError, GeneratorConfig};
use crate::emit::{
    default_exporters, Artifact, BoardConfig, BoardEmitter, EmitError, ExportContext,
    SchematicEmitter, BOARD_SUFFIX, SCHEMATIC_SUFFIX,
};
use crate::ir::{Circuit, IrError};
use crate::placement::{ForceDirectedPlacer, Placement, PlacementConfig};
use crate::repair::{refine, Narrator, RepairLoop, RepairStage, DEFAULT_RETRY_BUDGET};
use crate::validate::{ValidationReport, Validator};

const TMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, thiserror::Error)]
pub enum NetforgeError {
    #[error("Translation error: {0}")]
    Translation(String),
    #[error("Emission error: {0}")]
    Emission(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Translator unavailable: {0}")]
    Ai(#[from] AIError),
}

impl From<IrError> for NetforgeError {
    fn from(e: IrError) -> Self {
        NetforgeError::Translation(e.to_string())
    }
}

impl From<EmitError> for NetforgeError {
    fn from(e: EmitError) -> Self {
        NetforgeError::Emission(e.to_string())
    }
}

/// Options for one generation run.
#[derive(Clone)]
pub struct GenerationOptions {
    pub retry_budget: usize,
    pub placement: PlacementConfig,
    pub board: BoardConfig,
    pub output_dir: PathBuf,
    pub narrator: Option<Narrator>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            placement: PlacementConfig::default(),
            board: BoardConfig::default(),
            output_dir: PathBuf::from("."),
            narrator: None,
        }
    }
}

impl fmt::Debug for GenerationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationOptions")
            .field("retry_budget", &self.retry_budget)
            .field("placement", &self.placement)
            .field("board", &self.board)
            .field("output_dir", &self.output_dir)
            .field("narrator", &self.narrator.is_some())
            .finish()
    }
}

impl GenerationOptions {
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            retry_budget: config.retry_budget,
            placement: config.placement.clone(),
            board: config.board.clone(),
            output_dir: config.output_dir.clone(),
            narrator: None,
        }
    }

    pub fn with_narrator(mut self, narrator: Narrator) -> Self {
        self.narrator = Some(narrator);
        self
    }

    fn narrate(&self, message: &str) {
        tracing::info!("{}", message);
        if let Some(narrator) = &self.narrator {
            narrator(message);
        }
    }
}

/// Result of a generation run that reached a decision.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationOutcome {
    pub success: bool,
    pub message: String,
    /// Written file paths; empty unless `success`.
    pub artifacts: Vec<PathBuf>,
    pub rounds: usize,
    pub stages: Vec<RepairStage>,
    /// Report of the last round.
    pub report: Option<ValidationReport>,
}

impl GenerationOutcome {
    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect()
    }
}

/// Core generation API used by the CLI.
pub struct NetforgeCore;

impl NetforgeCore {
    /// Translate, repair until valid, then render and write every artifact.
    ///
    /// An exhausted repair budget is an unsuccessful outcome, not an error.
    /// Translator transport failures and final emission failures are errors.
    pub async fn generate(
        description: &str,
        catalog: &Catalog,
        translator: &dyn Translator,
        options: &GenerationOptions,
    ) -> Result<GenerationOutcome, NetforgeError> {
        let mut repair = RepairLoop::new(catalog, translator)
            .with_retry_budget(options.retry_budget)
            .with_placement(options.placement.clone())
            .with_board(options.board.clone());
        if let Some(narrator) = &options.narrator {
            repair = repair.with_narrator(narrator.clone());
        }

        let outcome = repair.run(description).await?;
        let rounds = outcome.translation_calls();
        let mut stages = outcome.stages.clone();
        let report = outcome.last_report().cloned();

        let accepted = outcome
            .accepted()
            .and_then(|round| round.circuit.as_ref().zip(round.placement.as_ref()));

        let (circuit, placement) = match accepted {
            Some(accepted) => accepted,
            None => {
                let reason = report
                    .as_ref()
                    .and_then(|r| r.errors.first().cloned())
                    .unwrap_or_else(|| "no candidate produced".to_string());
                let message = format!(
                    "Design still invalid after {} round(s): {}",
                    rounds, reason
                );
                options.narrate(&message);
                return Ok(GenerationOutcome {
                    success: false,
                    message,
                    artifacts: Vec::new(),
                    rounds,
                    stages,
                    report,
                });
            }
        };

        options.narrate(&format!(
            "Circuit '{}' refined and validated, generating KiCad files",
            circuit.project_name
        ));
        stages.push(RepairStage::FinalEmit);

        let artifacts = Self::render_artifacts(catalog, circuit, placement, &options.board)?;
        for artifact in &artifacts {
            tracing::debug!("Rendered {} ({} bytes)", artifact.file_name, artifact.contents.len());
        }
        let written = write_artifacts(&options.output_dir, &artifacts)?;

        let message = format!(
            "Project '{}' ready: {} files in {}",
            circuit.project_name,
            written.len(),
            options.output_dir.display()
        );
        options.narrate(&message);

        Ok(GenerationOutcome {
            success: true,
            message,
            artifacts: written,
            rounds,
            stages,
            report,
        })
    }

    /// Schematic, board and auxiliary exports for an accepted circuit, in
    /// memory.
    pub fn render_artifacts(
        catalog: &Catalog,
        circuit: &Circuit,
        placement: &Placement,
        board: &BoardConfig,
    ) -> Result<Vec<Artifact>, NetforgeError> {
        let base = circuit.base_filename();

        let schematic = SchematicEmitter::new(catalog).emit(circuit);
        let emitted = BoardEmitter::new(catalog, board.clone()).emit(circuit, placement)?;

        let mut artifacts = vec![
            Artifact::new(format!("{}{}", base, SCHEMATIC_SUFFIX), schematic),
            Artifact::new(format!("{}{}", base, BOARD_SUFFIX), emitted.text.clone()),
        ];

        let ctx = ExportContext {
            circuit,
            placement,
            board: &emitted,
        };
        for exporter in default_exporters() {
            tracing::info!("Exporting {}", exporter.name());
            artifacts.push(Artifact::new(exporter.file_name(&base), exporter.render(&ctx)));
        }
        Ok(artifacts)
    }

    /// Read a circuit IR file.
    pub fn load_circuit(path: &Path) -> Result<Circuit, NetforgeError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Circuit::from_json(&text)?)
    }

    /// Offline ERC plus provisional DRC for a circuit the caller already has.
    pub fn check(
        circuit: &Circuit,
        catalog: &Catalog,
        placement: &PlacementConfig,
        board: &BoardConfig,
    ) -> Result<ValidationReport, NetforgeError> {
        let mut circuit = circuit.clone();
        refine(catalog, &mut circuit);
        let placed = ForceDirectedPlacer::new(placement.clone()).place(&circuit.components, &circuit.nets);
        let emitted = BoardEmitter::new(catalog, board.clone()).emit(&circuit, &placed)?;
        Ok(Validator::with_default_rules(board.collision_radius).validate(&circuit, &emitted.text))
    }
}

/// Write every artifact or none: contents go to `*.tmp` siblings first and
/// are renamed into place only after all writes succeed. Files they replace
/// are kept as `*.bak` until every rename went through, and restored if one
/// fails.
pub fn write_artifacts(dir: &Path, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, NetforgeError> {
    std::fs::create_dir_all(dir)?;

    let staged: Vec<(PathBuf, PathBuf)> = artifacts
        .iter()
        .map(|a| {
            let target = dir.join(&a.file_name);
            let tmp = dir.join(format!("{}{}", a.file_name, TMP_SUFFIX));
            (tmp, target)
        })
        .collect();

    for (artifact, (tmp, _)) in artifacts.iter().zip(&staged) {
        if let Err(e) = std::fs::write(tmp, &artifact.contents) {
            discard(&staged);
            return Err(NetforgeError::Emission(format!(
                "Failed to write {}: {}",
                tmp.display(),
                e
            )));
        }
    }

    let mut installed: Vec<(&Path, Option<PathBuf>)> = Vec::new();
    for (tmp, target) in &staged {
        match install(tmp, target) {
            Ok(backup) => installed.push((target.as_path(), backup)),
            Err(e) => {
                roll_back(&installed);
                discard(&staged);
                return Err(NetforgeError::Emission(format!(
                    "Failed to move {} into place: {}",
                    target.display(),
                    e
                )));
            }
        }
    }

    for (_, backup) in installed {
        if let Some(backup) = backup {
            if let Err(e) = std::fs::remove_file(&backup) {
                tracing::warn!("Could not remove backup {}: {}", backup.display(), e);
            }
        }
    }

    Ok(staged.into_iter().map(|(_, target)| target).collect())
}

/// Rename `tmp` onto `target`, moving an existing file aside first.
fn install(tmp: &Path, target: &Path) -> std::io::Result<Option<PathBuf>> {
    let backup = if target.is_file() {
        let mut name = target.as_os_str().to_owned();
        name.push(BACKUP_SUFFIX);
        let backup = PathBuf::from(name);
        std::fs::rename(target, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(tmp, target) {
        if let Some(backup) = &backup {
            let _ = std::fs::rename(backup, target);
        }
        return Err(e);
    }
    Ok(backup)
}

fn roll_back(installed: &[(&Path, Option<PathBuf>)]) {
    for (target, backup) in installed.iter().rev() {
        let _ = std::fs::remove_file(target);
        if let Some(backup) = backup {
            if let Err(e) = std::fs::rename(backup, target) {
                tracing::warn!("Could not restore {}: {}", target.display(), e);
            }
        }
    }
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        if tmp.exists() {
            let _ = std::fs::remove_file(tmp);
        }
    }
}
