use clap::{arg, command};
use std::path::PathBuf;
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("xsurf")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("xsurf")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Enable debug logging (RUST_LOG takes precedence)")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("scan")
                .about(
                    "Drive a headless browser through a site and record every parameter that \
                could carry an XSS payload.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The target URL")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of target URLs")
                        .value_parser(clap::value_parser!(PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("JSON result file, written incrementally during the scan")
                        .default_value("result.json"),
                )
                .arg(
                    arg!(--"append")
                        .required(false)
                        .help("Merge into an existing result file instead of clearing it")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"config" <PATH>)
                        .required(false)
                        .help("JSON scan configuration; command line flags override it"),
                )
                .arg(
                    arg!(-d --"depth" <N>)
                        .required(false)
                        .help("Maximum interaction depth per page [default: 2]")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-actions" <N>)
                        .required(false)
                        .help("Maximum interactions per page [default: 50]")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-pages" <N>)
                        .required(false)
                        .help("Maximum pages per target [default: 50]")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-c --"concurrency" <N>)
                        .required(false)
                        .help("Pages analyzed in parallel [default: 3]")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"nav-timeout" <SECONDS>)
                        .required(false)
                        .help("Navigation timeout in seconds [default: 30]")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"interaction-timeout" <MILLIS>)
                        .required(false)
                        .help("Per-interaction timeout in milliseconds [default: 3000]")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-t --"timeout" <SECONDS>)
                        .required(false)
                        .help("Wall clock limit for the whole scan in seconds [default: 3600]")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"scoped")
                        .required(false)
                        .help("Only record traffic to the target's domain and --scope-domain hosts")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"scope-domain" <DOMAIN>)
                        .required(false)
                        .help("Additional in-scope domain (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"light-pass")
                        .required(false)
                        .help("Fill and submit every form once before deep exploration")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"discovery" <PATH>)
                        .required(false)
                        .help("gospider-compatible binary used to pre-discover URLs")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"headful")
                        .required(false)
                        .help("Show the browser window")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Summary format: text, json, markdown")
                        .value_parser(["text", "json", "markdown", "md"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Summarize a result file written by a previous scan")
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(false)
                        .help("The result file")
                        .default_value("result.json"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, markdown")
                        .value_parser(["text", "json", "markdown", "md"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-r --"report" <PATH>)
                        .required(false)
                        .help("Save the report to a file instead of printing it")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            command!("mutate")
                .about(
                    "Ask an OpenAI-compatible model for variants of a payload that was blocked. \
                Reads XSURF_LLM_BASE_URL, XSURF_LLM_API_KEY and XSURF_LLM_MODEL.",
                )
                .arg(
                    arg!(-p --"payload" <PAYLOAD>)
                        .required(true)
                        .help("The payload that failed"),
                ),
        )
}
