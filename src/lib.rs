pub mod dsl;
pub mod graph;
pub mod pipeline;
pub mod script;
pub mod spirv;
pub mod validation;
