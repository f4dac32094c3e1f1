mod app;
mod commands;
mod config;
mod effects;
mod persistence;
mod render;

pub use app::run_app;
