pub mod collaborators;
pub mod discovery;
pub mod report;
pub mod scan;

use colored::Colorize;

const BANNER: &str = r#"
    ██╗  ██╗███████╗██╗   ██╗██████╗ ███████╗
    ╚██╗██╔╝██╔════╝██║   ██║██╔══██╗██╔════╝
     ╚███╔╝ ███████╗██║   ██║██████╔╝█████╗
     ██╔██╗ ╚════██║██║   ██║██╔══██╗██╔══╝
    ██╔╝ ██╗███████║╚██████╔╝██║  ██║██║
    ╚═╝  ╚═╝╚══════╝ ╚═════╝ ╚═╝  ╚═╝╚═╝
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan().bold());
    println!(
        "    {} {}\n",
        "XSS attack surface discovery".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}
