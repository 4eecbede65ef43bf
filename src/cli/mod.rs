pub mod app;
pub mod commands;
pub mod display;

pub use app::App;
pub use commands::{Cli, Commands, ConfigCommand};
pub use display::{display_nodes, format_outcome, render_nodes, NodeRow};
