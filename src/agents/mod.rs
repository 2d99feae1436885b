//! Ready-made agents built on the [`Agent`](crate::agent::Agent) façade.

pub mod hello_world;
