pub mod analysis;
pub mod choice;
pub mod cleanup;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod renderer;
pub mod scan;
pub mod script;
