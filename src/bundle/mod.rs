pub mod assembler;
pub mod diagnostics;
pub mod normalizer;
pub mod preamble;
pub mod stylesheet;

pub use assembler::{Assembly, AssemblyReport, BundleAssembler, PreviewDocument};
pub use normalizer::{normalize, LexicalNormalizer, Normalizer};
