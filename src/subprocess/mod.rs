// src/subprocess/mod.rs
// Peer adapters for the `codex` target: a persistent stdio tool channel
// (C6, `client`) and a one-shot exec fallback (C7, `exec`).

pub mod client;
pub mod exec;
pub mod schemas;

pub use client::SubprocessPeerClient;
pub use exec::SubprocessPeerExec;
