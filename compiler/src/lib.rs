pub mod compat;
pub mod compile;
pub mod formula;
pub mod literal;
pub mod registry;

pub use compat::compatible;
pub use compile::{compile, CompiledProgram, SCORE_SEPARATOR};
pub use registry::{OpcodeDef, OpcodeRegistry, PortDef};
