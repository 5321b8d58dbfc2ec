//! Symbol-side data model for the spyglass capture client.
//!
//! This crate answers the question "which function owns program counter X?"
//! for a process whose modules and symbols arrive incrementally from a remote
//! tracing agent:
//!
//! - A [`Module`] is a loaded executable image with an absolute address range
//!   and, once symbols have been delivered, an owned [`SymbolTable`].
//! - A [`SymbolTable`] maps relative addresses to [`Function`] records and
//!   carries a secondary index keyed by the stable hash of each function's
//!   demangled name, which capture presets use to re-select functions.
//! - A [`Process`] owns the set of modules, routes absolute-address lookups
//!   to the owning module, and keeps the process-wide directories that the
//!   sample aggregator publishes resolved names into.
//!
//! Symbol *parsing* is out of scope; callers hand this crate already-parsed
//! [`ModuleSymbols`] payloads.

pub mod function;
pub mod hashing;
pub mod module;
pub mod preset;
pub mod process;
pub mod symbol_table;

pub use function::Function;
pub use module::{Module, INVALID_ADDRESS};
pub use preset::{Preset, PresetModule};
pub use process::{FunctionHandle, Process};
pub use symbol_table::{ModuleSymbols, SymbolInfo, SymbolTable};
