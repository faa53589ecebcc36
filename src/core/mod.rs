// src/core/mod.rs
mod engine;
mod pipeline;

// Pipeline stages, leaf dependencies first
mod model;
mod loader;
mod rules;
mod classifier;
mod extractor;
mod builder;
mod grouping;
mod projector;
mod renderer;

// Export the main engine
pub use engine::{AnalyzeRequest, Engine};
