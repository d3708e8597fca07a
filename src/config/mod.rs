pub mod display;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod validate;

pub use display::display_config;
pub use lexer::Loc;
pub use parser::{parse_file, parse_str, ConfigError};
pub use types::{AppConfig, LocationConfig, ServerConfig};
pub use validate::validate_configs;
