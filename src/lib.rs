// ddgfx library
// Fullscreen display driver: initialization, rollback and teardown

pub mod cli;
pub mod config;
pub mod graphics;
pub mod logging;
pub mod threading;

pub use cli::Cli;
pub use config::GfxOptions;
pub use logging::LogLevel;
