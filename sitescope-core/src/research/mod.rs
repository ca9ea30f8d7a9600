//! Deep research stage.
//!
//! Three steps feed the risk stage:
//! 1. **Plan**: expand the topic into `breadth` distinct aspects
//! 2. **Research**: deepen each aspect over `depth` iterations, chains in parallel
//! 3. **Synthesize**: order findings and attach a methodology note

pub mod planner;
pub mod researcher;
pub mod synthesis;

pub use planner::{Aspect, AspectPlanner};
pub use researcher::{AspectFinding, AspectResearcher};
pub use synthesis::{ResearchDocument, ResearchSynthesizer};
