//! INI config file support.
//!
//! Keys equal the CLI long names; sections are decorative; repeated keys
//! accumulate into lists. The file is expanded into an argv prefix so
//! clap parses values exactly once and the command line overrides the
//! file.

use anyhow::{bail, Context, Result};
use ini::Ini;
use std::path::Path;

/// Options only meaningful on the command line itself.
const CLI_ONLY: &[&str] = &[
    "config",
    "help",
    "version",
    "camhelp",
    "cmdhelp",
    "eventhelp",
    "json",
    "no_default_config",
];

/// Options that are plain flags: a truthy value enables them, anything
/// else leaves them off.
const FLAG_KEYS: &[&str] = &[
    "template_matcher",
    "haar_matcher",
    "no_final_decision",
    "no_match_is_fail",
    "eq_histogram",
    "lockout_dummy",
    "auto_roi",
    "save_auto_roi",
    "save",
    "save_obstruct",
    "save_steps",
    "zmq",
    "rfid_lock",
    "backlight_enable",
    "nocolor",
    "noanim",
];

fn truthy(value: &str) -> bool {
    !matches!(value, "" | "0" | "false" | "off" | "no")
}

/// Expand a config file into argv form.
pub fn config_to_argv(path: &Path) -> Result<Vec<String>> {
    let ini = Ini::load_from_file(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut argv = Vec::new();

    for (_section, props) in ini.iter() {
        for (key, value) in props.iter() {
            if CLI_ONLY.contains(&key) {
                bail!("option \"{key}\" is not allowed in a config file");
            }

            if FLAG_KEYS.contains(&key) {
                if truthy(value) {
                    argv.push(format!("--{key}"));
                }
                continue;
            }

            argv.push(format!("--{key}"));
            argv.push(value.to_string());
        }
    }

    Ok(argv)
}
