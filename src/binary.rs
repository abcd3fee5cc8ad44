//! The binary container: a data pool, a code collection, and a map of
//! exported symbols, bound together and serializable.
//!
//! Grounded on `original_source/src/machine/binary.h` for the logical shape
//! (header/magic, data section, code section — spec.md §1 explicitly
//! excludes the exact on-disk byte layout, only the logical sections
//! matter). Serialized via `serde` rather than a hand-packed byte writer,
//! the idiomatic-Rust reading of "serializable".

use serde::{Deserialize, Serialize};

use crate::bytecode::CodeCollection;
use crate::common::Map;
use crate::compiler::symbol::{Location, SymbolKind};
use crate::error::RillError;
use crate::value::{Memory, ValueSnapshot};

/// Magic number identifying a `rill` binary container on disk.
pub const MAGIC: u32 = 0xBABA_BEEF;
pub const VERSION: u32 = 1;

/// A serializable record of one exported symbol — decoupled from the
/// compiler's interned `Id` so the container doesn't need the interner to
/// round-trip through `serde`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolRecord {
    pub kind: ExportedKind,
    pub location: ExportedLocation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportedKind {
    Variable,
    Constant,
    Function,
    Module,
}

impl From<SymbolKind> for ExportedKind {
    fn from(kind: SymbolKind) -> Self {
        match kind {
            SymbolKind::Variable => ExportedKind::Variable,
            SymbolKind::Constant => ExportedKind::Constant,
            SymbolKind::Function => ExportedKind::Function,
            SymbolKind::Module => ExportedKind::Module,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportedLocation {
    Undefined,
    None,
    Register(u8),
    Memory(u32),
    Code(u32),
    Builtin(u32),
}

impl From<Location> for ExportedLocation {
    fn from(location: Location) -> Self {
        match location {
            Location::Undefined => ExportedLocation::Undefined,
            Location::None => ExportedLocation::None,
            Location::Register(r) => ExportedLocation::Register(r),
            Location::Memory(a) => ExportedLocation::Memory(a),
            Location::Code(c) => ExportedLocation::Code(c),
            Location::Builtin(b) => ExportedLocation::Builtin(b),
        }
    }
}

/// The exported-symbol map attached to a [`Binary`]: every symbol declared
/// in the module's root scope, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportedSymbols(pub Map<String, SymbolRecord>);

impl ExportedSymbols {
    pub fn get(&self, name: &str) -> Option<&SymbolRecord> {
        self.0.get(name)
    }
}

/// A data pool, a code collection, and a map of exported symbols.
#[derive(Debug, Clone)]
pub struct Binary {
    pub data: Memory,
    pub code: CodeCollection,
    pub symbols: ExportedSymbols,
}

impl Binary {
    pub fn new() -> Self {
        Binary {
            data: Memory::new(),
            code: CodeCollection::new(),
            symbols: ExportedSymbols::default(),
        }
    }
}

impl Default for Binary {
    fn default() -> Self {
        Self::new()
    }
}

/// The on-disk form of a [`Binary`]: header plus the two logical sections
/// from spec.md §6 (data section, code section), plus the exported-symbol
/// map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySnapshot {
    pub magic: u32,
    pub version: u32,
    pub data: Vec<ValueSnapshot>,
    pub code: CodeCollection,
    pub symbols: ExportedSymbols,
}

impl Binary {
    pub fn to_snapshot(&self) -> BinarySnapshot {
        BinarySnapshot {
            magic: MAGIC,
            version: VERSION,
            data: self.data.to_snapshot(),
            code: self.code.clone(),
            symbols: self.symbols.clone(),
        }
    }

    pub fn from_snapshot(snapshot: BinarySnapshot) -> Result<Binary, RillError> {
        if snapshot.magic != MAGIC {
            return Err(RillError::Runtime(format!(
                "bad binary container magic: {:#x}",
                snapshot.magic
            )));
        }
        Ok(Binary {
            data: Memory::from_snapshot(snapshot.data),
            code: snapshot.code,
            symbols: snapshot.symbols,
        })
    }

    /// Serialize to the logical container format (JSON-encoded, per the
    /// teacher's and pack's preference for `serde_json`/`ron` over a
    /// hand-packed byte format).
    pub fn to_bytes(&self) -> Result<Vec<u8>, RillError> {
        serde_json::to_vec_pretty(&self.to_snapshot())
            .map_err(|e| RillError::Runtime(format!("failed to serialize binary: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Binary, RillError> {
        let snapshot: BinarySnapshot = serde_json::from_slice(bytes)
            .map_err(|e| RillError::Runtime(format!("failed to deserialize binary: {e}")))?;
        Binary::from_snapshot(snapshot)
    }
}
