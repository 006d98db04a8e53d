use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod assign;
pub mod columns;
pub mod common;
pub mod fanout;
pub mod pipeline;

#[cfg(test)]
mod fixtures;
