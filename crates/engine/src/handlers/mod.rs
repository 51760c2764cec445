//! Built-in handlers defining the minimal action vocabulary.

mod run;
mod update_context;

pub use run::RunHandler;
pub use update_context::UpdateContextHandler;
