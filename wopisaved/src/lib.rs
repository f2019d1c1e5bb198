pub mod commands;
pub mod daemon;
pub mod document;
pub mod save;
