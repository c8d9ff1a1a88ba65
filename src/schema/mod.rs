pub mod ast;
pub mod settings;
