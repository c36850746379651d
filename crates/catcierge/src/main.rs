//! catcierge: image recognition cat door controller.
//!
//! Watches a camera pointed at the cat door, decides whether the animal
//! passing through carries prey, and locks the door when it does.

use anyhow::Result;
use catcierge::args::{Args, DEFAULT_CONFIG_PATH};
use catcierge::{config, runner};
use catcierge_core::Event;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(serde::Serialize)]
struct EventHelp {
    name: &'static str,
    description: &'static str,
}

fn print_eventhelp(json: bool) {
    if json {
        let events: Vec<EventHelp> = Event::ALL
            .iter()
            .map(|e| EventHelp {
                name: e.name(),
                description: e.description(),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&events).unwrap_or_default()
        );
        return;
    }

    println!("Lifecycle events templates and --<event>_cmd options fire on:\n");
    for event in Event::ALL {
        println!("{:>20}   {}", event.name(), event.description());
    }
}

fn print_cmdhelp() {
    println!("Per-event command options (each repeatable):\n");
    for event in Event::ALL {
        println!("  --{}_cmd \"<command>\"", event.name());
    }
    println!("\nCommands are variable-expanded with the same %var% syntax as templates.");
}

fn print_camhelp() {
    println!("Frame sources accepted by --camera:\n");
    println!("  <directory>    Replay the stills in the directory in name order.");
    println!("  <device>       A V4L2 capture device such as /dev/video0");
    println!("                 (requires a build with the v4l feature).");
}

/// Work out which config file applies, honouring --no_default_config and
/// the CATCIERGE_NO_DEFAULT_CONFIG environment variable.
fn resolve_config_path(cli: &Args) -> Option<PathBuf> {
    if let Some(explicit) = &cli.config {
        return Some(explicit.clone());
    }

    let skip_default =
        cli.no_default_config || std::env::var_os("CATCIERGE_NO_DEFAULT_CONFIG").is_some();

    if skip_default {
        return None;
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

fn banner() {
    let build = option_env!("CATCIERGE_GIT_HASH_SHORT").unwrap_or("unknown");
    let tainted = if option_env!("CATCIERGE_GIT_TAINTED").is_some() {
        "-tainted"
    } else {
        ""
    };

    eprintln!(
        "\nCatcierge v{} ({build}{tainted})\n",
        env!("CARGO_PKG_VERSION")
    );
}

fn real_main() -> Result<i32> {
    let cli = Args::parse();

    if cli.eventhelp {
        print_eventhelp(cli.json);
        return Ok(0);
    }
    if cli.cmdhelp {
        print_cmdhelp();
        return Ok(0);
    }
    if cli.camhelp {
        print_camhelp();
        return Ok(0);
    }

    // Config first, command line after, so the command line overrides.
    let args = match resolve_config_path(&cli) {
        Some(path) => {
            let mut argv: Vec<String> = vec!["catcierge".to_string()];
            argv.extend(config::config_to_argv(&path)?);
            argv.extend(std::env::args().skip(1));
            Args::parse_from(argv)
        }
        None => cli,
    };

    args.validate()?;

    if args.lifecycle.nocolor {
        colored::control::set_override(false);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(!args.lifecycle.nocolor)
        .with_writer(std::io::stderr)
        .init();

    banner();

    runner::run(args)
}

fn main() {
    match real_main() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            eprintln!("For more details use --help");
            std::process::exit(1);
        }
    }
}
