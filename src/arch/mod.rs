//! Architecture-specific code, gated so the rest of the kernel stays
//! portable across whatever rv32imac part a board brings.

pub mod riscv;
