//! Generate a project from a canned circuit without calling a model.
//!
//! ```text
//! cargo run --example offline_generation -- path/to/circuit.json [libs_dir] [out_dir]
//! ```

use netforge::prelude::*;
use netforge::{Narrator, PlacementConfig, ScriptedTranslator};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let ir_path = PathBuf::from(args.next().ok_or("usage: offline_generation <circuit.json> [libs] [out]")?);
    let libs = args.next().map(PathBuf::from);
    let out_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("out"));

    let catalog = match libs {
        Some(root) => netforge::index_library(&root)?,
        None => Catalog::new(),
    };

    let translator = ScriptedTranslator::repeating(std::fs::read_to_string(&ir_path)?);
    let narrator: Narrator = Arc::new(|line: &str| println!("  {}", line));
    let options = GenerationOptions {
        output_dir: out_dir,
        placement: PlacementConfig::with_seed(1),
        ..GenerationOptions::default()
    }
    .with_narrator(narrator);

    let outcome = NetforgeCore::generate("offline replay", &catalog, &translator, &options).await?;
    println!("{}", outcome.message);
    for name in outcome.artifact_names() {
        println!("  {}", name);
    }
    Ok(())
}
