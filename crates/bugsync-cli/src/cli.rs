//! CLI command definitions using `clap`

use bugsync_locator::DEFAULT_TEMPLATE;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

pub(crate) fn build() -> Command {
    Command::new("bugsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reconcile vulnerability records with tracker issues")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log line format on stderr"),
        )
        .subcommand(cmd_sync())
        .subcommand(cmd_check())
        .subcommand(cmd_encode())
        .subcommand(cmd_decode())
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Sync configuration (TOML)")
}

fn template_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("template")
                .long("template")
                .default_value(DEFAULT_TEMPLATE)
                .help("Locator comment template"),
        )
        .arg(
            Arg::new("tracker")
                .long("tracker")
                .help("Tracker name substituted for {tracker}"),
        )
}

fn cmd_sync() -> Command {
    Command::new("sync")
        .about("Submit, reopen and close issues for the records in a file")
        .arg(config_arg())
        .arg(
            Arg::new("records")
                .long("records")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Vulnerability records (JSON); locator comments are written back"),
        )
        .arg(
            Arg::new("issues")
                .long("issues")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Issue store (JSON); created if missing"),
        )
        .arg(
            Arg::new("id-field")
                .long("id-field")
                .default_value("id")
                .help("Record field identifying a vulnerability"),
        )
        .arg(
            Arg::new("link-base")
                .long("link-base")
                .help("Deep link prefix of created issues"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the full report as JSON"),
        )
}

fn cmd_check() -> Command {
    Command::new("check")
        .about("Validate a configuration file")
        .arg(config_arg())
        .arg(
            Arg::new("records")
                .long("records")
                .value_parser(value_parser!(PathBuf))
                .help("Also report how many records this file holds"),
        )
}

fn cmd_encode() -> Command {
    template_args(Command::new("encode").about("Render a locator comment"))
        .arg(Arg::new("id").long("id").help("Issue id"))
        .arg(
            Arg::new("link")
                .long("link")
                .required(true)
                .help("Issue deep link"),
        )
}

fn cmd_decode() -> Command {
    template_args(Command::new("decode").about("Extract a locator from a comment"))
        .arg(
            Arg::new("comment")
                .required(true)
                .help("Comment text"),
        )
}
