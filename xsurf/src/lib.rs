#[path = "commands.rs"]
pub mod commands;
#[path = "handlers.rs"]
pub mod handlers;

pub use commands::{CLAP_STYLING, command_argument_builder};
pub use handlers::{
    load_urls_from_file, load_urls_from_source, parse_url_line, scan_config_from_args,
};

// Re-export the scan driver from xsurf-core
pub use xsurf_core::scan::{ScanOptions, execute_scan, extract_url_path};
