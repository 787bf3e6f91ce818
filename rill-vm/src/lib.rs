pub mod trap;
pub mod vm;

pub use trap::Trap;
pub use vm::{Vm, DEFAULT_MEMORY_BYTES};
