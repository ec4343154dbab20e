pub mod app;
pub mod assets;
pub mod base64;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod fetch;
pub mod hot_reload;
pub mod renderer;
pub mod scheduler;
pub mod script;
pub mod time;

pub use app::{run, App};
