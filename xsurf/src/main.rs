use colored::Colorize;
use xsurf::command_argument_builder;
use xsurf::handlers::{handle_mutate, handle_report, handle_scan, init_logging};
use xsurf_core::print_banner;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    init_logging(chosen_command.get_flag("verbose"));

    let outcome = match chosen_command.subcommand() {
        Some(("scan", primary_command)) => handle_scan(primary_command).await,
        Some(("report", primary_command)) => handle_report(primary_command),
        Some(("mutate", primary_command)) => handle_mutate(primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        tracing::error!("{:#}", e);
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
