//! Library Catalog
//!
//! Indexes a KiCad library tree into an in-memory store keyed by
//! `library:entry`:
//!
//! - symbol libraries: every `*.kicad_sym` file under the root, one file per
//!   library, many top-level `(symbol "Name" ...)` blocks per file
//! - footprint libraries: every `*.pretty` directory under the root, one
//!   `*.kicad_mod` file per footprint
//!
//! Indexing is explicit and idempotent: re-scanning a key overwrites its
//! text. Unreadable or malformed files are skipped with a warning; one bad
//! file never aborts the scan.
//!
//! The catalog is shared read-only between generation runs (`&Catalog`).
//! Re-indexing needs `&mut Catalog`, so exclusive writers are enforced by the
//! borrow checker inside one process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ir::{split_qualified, QUALIFIER};
use crate::parser::blocks::{scan_named_blocks, BlockError};

pub const SYMBOL_EXTENSION: &str = "kicad_sym";
pub const FOOTPRINT_EXTENSION: &str = "kicad_mod";
pub const FOOTPRINT_DIR_EXTENSION: &str = "pretty";

/// Maximum results returned by [`Catalog::search`].
pub const SEARCH_LIMIT: usize = 5;

const SYMBOL_MARKER: &str = "(symbol ";
const MAX_DEPTH: usize = 20;

/// Package heuristics: (needle in symbol name, suffix of symbol name, footprint).
const FOOTPRINT_RULES: &[(&str, &str, &str)] = &[
    ("Resistor", ":R", "Resistor_SMD:R_0805_2012Metric"),
    ("LED", "", "LED_SMD:LED_0805_2012Metric"),
    ("Capacitor", ":C", "Capacitor_SMD:C_0805_2012Metric"),
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Library root not found: {0}")]
    MissingRoot(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Malformed library: {0}")]
    Block(#[from] BlockError),
    #[error("Library file has no usable name: {0}")]
    Unnamed(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Symbol,
    Footprint,
}

/// One reusable symbol or footprint definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub kind: EntryKind,
    pub library_name: String,
    pub entry_name: String,
    pub full_name: String,
    pub raw_definition: String,
}

impl CatalogEntry {
    fn new(kind: EntryKind, library: &str, entry: &str, raw: String) -> Self {
        Self {
            kind,
            library_name: library.to_string(),
            entry_name: entry.to_string(),
            full_name: format!("{}{}{}", library, QUALIFIER, entry),
            raw_definition: raw,
        }
    }
}

/// Counters from one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub symbol_files: usize,
    pub symbols: usize,
    pub footprints: usize,
    pub skipped_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    symbols: BTreeMap<String, CatalogEntry>,
    footprints: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a library root. May be called repeatedly; entries with the same
    /// full name are overwritten.
    pub fn index(&mut self, root: &Path) -> Result<IndexStats, CatalogError> {
        if !root.is_dir() {
            return Err(CatalogError::MissingRoot(root.to_path_buf()));
        }

        let mut symbol_files = Vec::new();
        let mut footprint_dirs = Vec::new();
        walk_library_tree(root, &mut symbol_files, &mut footprint_dirs, 0)?;
        symbol_files.sort();
        footprint_dirs.sort();

        let mut stats = IndexStats::default();

        for path in &symbol_files {
            match self.index_symbol_file(path) {
                Ok(count) => {
                    stats.symbol_files += 1;
                    stats.symbols += count;
                }
                Err(reason) => {
                    tracing::warn!("Skipping symbol library {}: {}", path.display(), reason);
                    stats.skipped_files.push(path.clone());
                }
            }
        }

        for dir in &footprint_dirs {
            self.index_footprint_dir(dir, &mut stats);
        }

        tracing::info!(
            "Indexed {} symbols from {} libraries and {} footprints under {}",
            stats.symbols,
            stats.symbol_files,
            stats.footprints,
            root.display()
        );
        Ok(stats)
    }

    /// Index the symbols of one library file's content. Sub-unit names
    /// containing the qualifier separator are skipped.
    pub fn index_symbol_text(&mut self, library: &str, content: &str) -> Result<usize, BlockError> {
        let blocks = scan_named_blocks(content, SYMBOL_MARKER)?;
        let mut count = 0;
        for block in blocks {
            if block.name.contains(QUALIFIER) {
                continue;
            }
            let entry = CatalogEntry::new(
                EntryKind::Symbol,
                library,
                &block.name,
                block.span.slice(content).to_string(),
            );
            self.symbols.insert(entry.full_name.clone(), entry);
            count += 1;
        }
        Ok(count)
    }

    /// Register one footprint definition.
    pub fn insert_footprint(&mut self, library: &str, name: &str, content: String) {
        let entry = CatalogEntry::new(EntryKind::Footprint, library, name, content);
        self.footprints.insert(entry.full_name.clone(), entry);
    }

    fn index_symbol_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let library = file_stem(path).ok_or_else(|| CatalogError::Unnamed(path.to_path_buf()))?;
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(self.index_symbol_text(&library, &content)?)
    }

    fn index_footprint_dir(&mut self, dir: &Path, stats: &mut IndexStats) {
        let Some(library) = file_stem(dir) else {
            return;
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Skipping footprint library {}: {}", dir.display(), e);
                stats.skipped_files.push(dir.to_path_buf());
                return;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| has_extension(p, FOOTPRINT_EXTENSION))
            .collect();
        files.sort();

        for path in files {
            let Some(name) = file_stem(&path) else {
                continue;
            };
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let content = String::from_utf8_lossy(&bytes).into_owned();
                    if !content.trim_start().starts_with('(') {
                        tracing::warn!("Skipping malformed footprint {}", path.display());
                        stats.skipped_files.push(path);
                        continue;
                    }
                    self.insert_footprint(&library, &name, content);
                    stats.footprints += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping footprint {}: {}", path.display(), e);
                    stats.skipped_files.push(path);
                }
            }
        }
    }

    /// Definition text for a symbol or footprint by full name (symbols first).
    pub fn lookup_exact(&self, full_name: &str) -> Option<&str> {
        self.lookup_symbol(full_name)
            .or_else(|| self.lookup_footprint(full_name))
    }

    pub fn lookup_symbol(&self, full_name: &str) -> Option<&str> {
        self.symbols
            .get(full_name)
            .map(|e| e.raw_definition.as_str())
    }

    pub fn lookup_footprint(&self, full_name: &str) -> Option<&str> {
        self.footprints
            .get(full_name)
            .map(|e| e.raw_definition.as_str())
    }

    pub fn symbol_entry(&self, full_name: &str) -> Option<&CatalogEntry> {
        self.symbols.get(full_name)
    }

    pub fn footprint_entry(&self, full_name: &str) -> Option<&CatalogEntry> {
        self.footprints.get(full_name)
    }

    /// Ranked symbol search, best match first, at most [`SEARCH_LIMIT`].
    ///
    /// Case-insensitive. Rank: exact full name, exact entry name, entry name
    /// prefix, then substring of the full name. Ties go to the shorter name,
    /// then lexicographic order.
    pub fn search(&self, query: &str) -> Vec<String> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let query_entry = split_qualified(&needle).map(|(_, e)| e.to_string());

        let mut ranked: Vec<(u8, &CatalogEntry)> = self
            .symbols
            .values()
            .filter_map(|entry| {
                let full = entry.full_name.to_lowercase();
                let name = entry.entry_name.to_lowercase();
                let rank = if full == needle {
                    0
                } else if name == needle || query_entry.as_deref() == Some(name.as_str()) {
                    1
                } else if name.starts_with(&needle) {
                    2
                } else if full.contains(&needle) {
                    3
                } else {
                    return None;
                };
                Some((rank, entry))
            })
            .collect();

        ranked.sort_by(|(ra, a), (rb, b)| {
            ra.cmp(rb)
                .then(a.full_name.len().cmp(&b.full_name.len()))
                .then(a.full_name.cmp(&b.full_name))
        });

        ranked
            .into_iter()
            .take(SEARCH_LIMIT)
            .map(|(_, e)| e.full_name.clone())
            .collect()
    }

    /// Package heuristic for common passives; only suggests indexed footprints.
    pub fn suggest_footprint(&self, symbol_full_name: &str) -> Option<String> {
        let suggestion = FOOTPRINT_RULES.iter().find_map(|(needle, suffix, footprint)| {
            let by_name = symbol_full_name.contains(needle);
            let by_suffix = !suffix.is_empty() && symbol_full_name.ends_with(suffix);
            (by_name || by_suffix).then_some(*footprint)
        })?;

        self.footprints
            .contains_key(suggestion)
            .then(|| suggestion.to_string())
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn footprint_count(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.footprints.is_empty()
    }

    /// Persist the index as JSON so a later process can skip re-scanning.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), CatalogError> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn walk_library_tree(
    dir: &Path,
    symbol_files: &mut Vec<PathBuf>,
    footprint_dirs: &mut Vec<PathBuf>,
    depth: usize,
) -> Result<(), CatalogError> {
    if depth > MAX_DEPTH {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                tracing::warn!("Unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') {
                continue;
            }
            if has_extension(&path, FOOTPRINT_DIR_EXTENSION) {
                footprint_dirs.push(path);
            } else if let Err(e) = walk_library_tree(&path, symbol_files, footprint_dirs, depth + 1) {
                tracing::warn!("Skipping directory {}: {}", path.display(), e);
            }
        } else if has_extension(&path, SYMBOL_EXTENSION) {
            symbol_files.push(path);
        }
    }
    Ok(())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_LIB: &str = r#"(kicad_symbol_lib (version 20211014) (generator kicad_symbol_editor)
  (symbol "R" (pin_numbers hide) (in_bom yes) (on_board yes)
    (symbol "R_1_1" (pin passive line (at 0 3.81 270) (length 1.27) (number "1")))
  )
  (symbol "R_Small" (in_bom yes)
    (symbol "R_Small_1_1" (pin passive line (at 0 2.54 270) (number "1")))
  )
  (symbol "LED" (in_bom yes)
    (symbol "LED_1_1" (pin passive line (at -3.81 0 0) (number "1")))
  )
  (symbol "Other:Alias" (extends "R"))
)
"#;

    fn device_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.index_symbol_text("Device", DEVICE_LIB).unwrap();
        catalog
    }

    #[test]
    fn test_index_skips_qualified_subunits() {
        let catalog = device_catalog();
        assert_eq!(catalog.symbol_count(), 3);
        assert!(catalog.lookup_symbol("Device:Other:Alias").is_none());
        let r = catalog.lookup_exact("Device:R").unwrap();
        assert!(r.starts_with("(symbol \"R\""));
        assert!(r.contains("R_1_1"));
        assert!(!r.contains("R_Small"));
    }

    #[test]
    fn test_reindex_overwrites() {
        let mut catalog = device_catalog();
        catalog
            .index_symbol_text("Device", r#"(lib (symbol "R" (changed yes)))"#)
            .unwrap();
        assert_eq!(catalog.symbol_count(), 3);
        assert_eq!(
            catalog.lookup_symbol("Device:R"),
            Some(r#"(symbol "R" (changed yes))"#)
        );
    }

    #[test]
    fn test_search_ranking() {
        let catalog = device_catalog();
        assert_eq!(catalog.search("Device:R")[0], "Device:R");
        assert_eq!(catalog.search("r"), vec!["Device:R", "Device:R_Small"]);
        assert_eq!(catalog.search("led"), vec!["Device:LED"]);
        assert_eq!(catalog.search("Device"), vec!["Device:R", "Device:LED", "Device:R_Small"]);
        assert!(catalog.search("transistor").is_empty());
        assert!(catalog.search("  ").is_empty());
    }

    #[test]
    fn test_suggest_footprint_requires_indexed_entry() {
        let mut catalog = device_catalog();
        assert_eq!(catalog.suggest_footprint("Device:R"), None);

        catalog.insert_footprint("Resistor_SMD", "R_0805_2012Metric", "(footprint \"R_0805_2012Metric\")".into());
        catalog.insert_footprint("LED_SMD", "LED_0805_2012Metric", "(footprint \"LED_0805_2012Metric\")".into());

        assert_eq!(
            catalog.suggest_footprint("Device:R").as_deref(),
            Some("Resistor_SMD:R_0805_2012Metric")
        );
        assert_eq!(
            catalog.suggest_footprint("Device:LED").as_deref(),
            Some("LED_SMD:LED_0805_2012Metric")
        );
        assert_eq!(catalog.suggest_footprint("Device:C"), None);
        assert_eq!(catalog.suggest_footprint("MCU:ESP32"), None);
    }

    #[test]
    fn test_malformed_symbol_text_is_rejected() {
        let mut catalog = Catalog::new();
        assert!(matches!(
            catalog.index_symbol_text("Bad", r#"(lib (symbol "X" (pin)"#),
            Err(BlockError::Unbalanced(_))
        ));
        assert!(catalog.is_empty());
    }
}
