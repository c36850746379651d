//! Command line surface.
//!
//! The config file uses the same long names; its keys are expanded into
//! an argv prefix so clap performs all value parsing and the command
//! line overrides the file.

use anyhow::{bail, Result};
use catcierge_core::{LockoutMethod, SigusrBehavior};
use catcierge_vision::{HaarMatcherArgs, InDirection, PreyMethod, TemplateMatcherArgs};
use clap::{Args as ClapArgs, Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "./catcierge.cfg";
pub const DEFAULT_PID_PATH: &str = "/var/run/catcierge.pid";

/// Accept 0/1 as well as true/false for boolean values.
fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(format!("\"{s}\" is not a boolean")),
    }
}

/// `WxH` minimum detection size.
#[derive(Debug, Clone, Copy)]
pub struct MinSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for MinSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("cannot parse \"{s}\", expected format: WxH"))?;
        Ok(MinSize {
            width: w.parse().map_err(|_| format!("bad width \"{w}\""))?,
            height: h.parse().map_err(|_| format!("bad height \"{h}\""))?,
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum InDirectionArg {
    Left,
    Right,
}

impl From<InDirectionArg> for InDirection {
    fn from(v: InDirectionArg) -> Self {
        match v {
            InDirectionArg::Left => InDirection::Left,
            InDirectionArg::Right => InDirection::Right,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PreyMethodArg {
    Adaptive,
    Normal,
}

impl From<PreyMethodArg> for PreyMethod {
    fn from(v: PreyMethodArg) -> Self {
        match v {
            PreyMethodArg::Adaptive => PreyMethod::Adaptive,
            PreyMethodArg::Normal => PreyMethod::Normal,
        }
    }
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct TemplateArgs {
    /// Path to a snout image. The average match result is used when
    /// more than one is given.
    #[arg(long = "snout", action = clap::ArgAction::Append)]
    pub snout: Vec<PathBuf>,

    /// Match threshold between 0.0 and 1.0.
    #[arg(long, default_value_t = 0.8)]
    pub threshold: f64,

    /// Match a flipped version of the snout as well, so going out is
    /// not a failed match.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_parser = parse_bool)]
    pub match_flipped: bool,
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct HaarArgs {
    /// Path to the haar cascade xml generated by opencv_traincascade.
    #[arg(long)]
    pub cascade: Option<PathBuf>,

    /// The direction which is considered going inside.
    #[arg(long, value_enum, default_value_t = InDirectionArg::Right)]
    pub in_direction: InDirectionArg,

    /// The smallest box that fits a matched cat head.
    #[arg(long, default_value = "80x80", value_parser = MinSize::from_str)]
    pub min_size: MinSize,

    /// Consider a frame without a cat head a failure. The default is to
    /// only fail on found prey.
    #[arg(long)]
    pub no_match_is_fail: bool,

    /// Equalize the image histogram before the cascade detection step.
    #[arg(long)]
    pub eq_histogram: bool,

    /// Prey matching method. Adaptive combines a global and an adaptive
    /// threshold to find prey otherwise blended into the background.
    #[arg(long, value_enum, default_value_t = PreyMethodArg::Adaptive)]
    pub prey_method: PreyMethodArg,

    /// Normal prey mode only: 2 runs a secondary search when no prey is
    /// found at first.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub prey_steps: u8,
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct LockoutArgs {
    /// 1: timer only. 2: wait for a clear frame, then timer.
    /// 3: clear frame or timer, whichever comes first.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    pub lockout_method: u8,

    /// Lockout time in seconds.
    #[arg(long = "lockout", default_value_t = 30.0)]
    pub lockout_time: f64,

    /// Give up after this many consecutive lockouts (0 disables the
    /// check).
    #[arg(long = "lockout_error", default_value_t = 0)]
    pub max_consecutive_lockout_count: u32,

    /// Lockouts closer together than lockout time plus this many
    /// seconds count as consecutive.
    #[arg(long = "lockout_error_delay", default_value_t = 3.0)]
    pub consecutive_lockout_delay: f64,

    /// Don't actually drive the lock, just log.
    #[arg(long)]
    pub lockout_dummy: bool,
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct RoiArgs {
    /// Seconds to wait after startup before matching starts.
    #[arg(long, default_value_t = 0.0)]
    pub startup_delay: f64,

    /// Region of interest as X Y W H.
    #[arg(long, num_args = 1..=4, value_delimiter = ' ', value_names = ["X", "Y", "W", "H"])]
    pub roi: Option<Vec<u32>>,

    /// Detect the backlight area after the startup delay and use its
    /// bounding box as the region of interest.
    #[arg(long)]
    pub auto_roi: bool,

    /// Greyscale threshold for what counts as backlight.
    #[arg(long, default_value_t = 90)]
    pub auto_roi_thr: u8,

    /// Refuse to start when the backlight is smaller than this many
    /// pixels.
    #[arg(long, default_value_t = 10_000)]
    pub min_backlight: u32,

    /// Save an image of the detected backlight area.
    #[arg(long)]
    pub save_auto_roi: bool,
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct OutputArgs {
    /// Save match images to disk.
    #[arg(long)]
    pub save: bool,

    /// Save the obstruct image of each match group.
    #[arg(long)]
    pub save_obstruct: bool,

    /// Save the intermediate images of the matcher pipeline.
    #[arg(long)]
    pub save_steps: bool,

    /// Output template file. Repeatable.
    #[arg(long = "input", action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,

    #[arg(long, default_value = ".")]
    pub output_path: String,

    #[arg(long)]
    pub match_output_path: Option<String>,

    #[arg(long)]
    pub steps_output_path: Option<String>,

    #[arg(long)]
    pub obstruct_output_path: Option<String>,

    #[arg(long)]
    pub template_output_path: Option<String>,

    /// Publish rendered templates over ZMQ.
    #[arg(long)]
    pub zmq: bool,

    #[arg(long, default_value_t = 5556)]
    pub zmq_port: u16,

    #[arg(long, default_value = "*")]
    pub zmq_iface: String,

    #[arg(long, default_value = "tcp")]
    pub zmq_transport: String,

    /// User variable for the template engine, "<name> <value>". A value
    /// of the form $(command) is executed when referenced. Repeatable.
    #[arg(long = "uservar", action = clap::ArgAction::Append)]
    pub user_vars: Vec<String>,
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct RfidArgs {
    /// Serial port of the reader on the inside of the door.
    #[arg(long = "rfid_in")]
    pub rfid_inner_path: Option<PathBuf>,

    /// Serial port of the reader on the outside of the door.
    #[arg(long = "rfid_out")]
    pub rfid_outer_path: Option<PathBuf>,

    /// Lock when neither reader saw an allowed tag.
    #[arg(long = "rfid_lock")]
    pub lock_on_invalid_rfid: bool,

    /// Seconds to wait after a successful match before the tag reads are
    /// judged, giving the animal time to pass both readers.
    #[arg(long = "rfid_time", default_value_t = 2.0)]
    pub rfid_lock_time: f64,

    /// Comma separated list of allowed tags.
    #[arg(long, value_delimiter = ',')]
    pub rfid_allowed: Vec<String>,
}

#[derive(Debug, Clone, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct LifecycleArgs {
    #[arg(long, default_value_t = 4)]
    pub lockout_gpio_pin: u32,

    #[arg(long, default_value_t = 18)]
    pub backlight_gpio_pin: u32,

    /// Drive the backlight pin as well as the lock.
    #[arg(long)]
    pub backlight_enable: bool,

    /// Drop root privileges to this user after GPIO setup.
    #[arg(long)]
    pub chuid: Option<String>,

    /// Shift human-facing timestamps so "now" reads as this instant,
    /// for replay testing. Format: YYYY-mm-ddTHH:MM:SS.
    #[arg(long)]
    pub base_time: Option<String>,

    #[arg(long)]
    pub nocolor: bool,

    #[arg(long)]
    pub noanim: bool,

    #[arg(long, default_value = DEFAULT_PID_PATH)]
    pub pid_path: PathBuf,

    /// Frame source: a directory of stills, or a capture device.
    #[arg(long, default_value = "/dev/video0")]
    pub camera: PathBuf,

    #[arg(long, default_value = "unlock", value_parser = SigusrBehavior::from_str)]
    pub sigusr1_behavior: SigusrBehavior,

    #[arg(long, default_value = "lock", value_parser = SigusrBehavior::from_str)]
    pub sigusr2_behavior: SigusrBehavior,
}

/// One repeatable `--<event>_cmd` option per lifecycle event.
#[derive(Debug, Clone, Default, ClapArgs)]
#[command(rename_all = "snake_case")]
pub struct EventCommandArgs {
    #[arg(long, action = clap::ArgAction::Append)]
    pub match_group_done_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub state_change_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub do_lockout_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub do_unlock_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub save_img_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub match_done_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub frame_obstructed_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub rfid_detect_cmd: Vec<String>,

    #[arg(long, action = clap::ArgAction::Append)]
    pub rfid_match_cmd: Vec<String>,
}

#[derive(Debug, Parser)]
#[command(
    name = "catcierge",
    version,
    about = "Image recognition cat door controller",
    args_override_self = true,
    rename_all = "snake_case"
)]
pub struct Args {
    /// Config file path. INI format, keys equal to these long option
    /// names.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Don't read the default config file.
    #[arg(long)]
    pub no_default_config: bool,

    /// List the lifecycle events templates and commands can fire on.
    #[arg(long)]
    pub eventhelp: bool,

    /// Emit --eventhelp as JSON.
    #[arg(long, requires = "eventhelp")]
    pub json: bool,

    /// List the per-event command options.
    #[arg(long)]
    pub cmdhelp: bool,

    /// Describe the accepted frame sources.
    #[arg(long)]
    pub camhelp: bool,

    /// Use the snout template matcher.
    #[arg(long)]
    pub template_matcher: bool,

    /// Use the haar cascade matcher. This is the recommended matcher.
    #[arg(long)]
    pub haar_matcher: bool,

    /// How many of the matches in a group must succeed.
    #[arg(long, default_value_t = 2)]
    pub ok_matches_needed: usize,

    /// Seconds the door stays in keep-open before re-arming.
    #[arg(long = "matchtime", default_value_t = 0.0)]
    pub match_time: f64,

    /// Never let the matcher veto the per-frame tally.
    #[arg(long)]
    pub no_final_decision: bool,

    #[command(flatten)]
    pub templ: TemplateArgs,

    #[command(flatten)]
    pub haar: HaarArgs,

    #[command(flatten)]
    pub lockout: LockoutArgs,

    #[command(flatten)]
    pub roi: RoiArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub rfid: RfidArgs,

    #[command(flatten)]
    pub lifecycle: LifecycleArgs,

    #[command(flatten)]
    pub commands: EventCommandArgs,
}

impl Args {
    /// Cross-option checks clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.template_matcher == self.haar_matcher {
            bail!("exactly one of --template_matcher and --haar_matcher is required");
        }

        if self.template_matcher {
            if self.templ.snout.is_empty() {
                bail!("--template_matcher requires at least one --snout image");
            }
            if !(0.0..=1.0).contains(&self.templ.threshold) {
                bail!("--threshold must be between 0.0 and 1.0");
            }
        }

        if self.haar_matcher && self.haar.cascade.is_none() {
            bail!("--haar_matcher requires --cascade");
        }

        if self.ok_matches_needed > catcierge_core::MATCH_MAX_COUNT {
            bail!(
                "--ok_matches_needed must be at most {}",
                catcierge_core::MATCH_MAX_COUNT
            );
        }

        if let Some(roi) = &self.roi.roi {
            if self.roi.auto_roi {
                bail!("--roi and --auto_roi are mutually exclusive");
            }
            if roi.len() != 4 {
                bail!("--roi takes exactly four values: X Y W H");
            }
        }

        for spec in &self.output.user_vars {
            if !spec.contains(' ') {
                bail!("--uservar \"{spec}\" needs to be of the format \"name value\"");
            }
        }

        Ok(())
    }

    pub fn template_matcher_args(&self) -> TemplateMatcherArgs {
        TemplateMatcherArgs {
            snout_paths: self.templ.snout.clone(),
            match_threshold: self.templ.threshold,
            match_flipped: self.templ.match_flipped,
            ..Default::default()
        }
    }

    pub fn haar_matcher_args(&self) -> Option<HaarMatcherArgs> {
        Some(HaarMatcherArgs {
            cascade: self.haar.cascade.clone()?,
            in_direction: self.haar.in_direction.into(),
            min_width: self.haar.min_size.width,
            min_height: self.haar.min_size.height,
            eq_histogram: self.haar.eq_histogram,
            no_match_is_fail: self.haar.no_match_is_fail,
            prey_method: self.haar.prey_method.into(),
            prey_steps: self.haar.prey_steps,
        })
    }

    pub fn lockout_method(&self) -> LockoutMethod {
        LockoutMethod::try_from(self.lockout.lockout_method).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["catcierge"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--haar_matcher", "--cascade", "cat.xml"]);
        assert_eq!(args.ok_matches_needed, 2);
        assert_eq!(args.match_time, 0.0);
        assert_eq!(args.lockout.lockout_time, 30.0);
        assert_eq!(args.lockout.lockout_method, 1);
        assert_eq!(args.templ.threshold, 0.8);
        assert!(args.templ.match_flipped);
        assert_eq!(args.haar.min_size.width, 80);
        assert_eq!(args.output.output_path, ".");
        assert_eq!(args.output.zmq_port, 5556);
        args.validate().unwrap();
    }

    #[test]
    fn test_exactly_one_matcher_required() {
        assert!(parse(&[]).validate().is_err());
        assert!(parse(&["--template_matcher", "--haar_matcher"])
            .validate()
            .is_err());
    }

    #[test]
    fn test_template_matcher_needs_snouts() {
        assert!(parse(&["--template_matcher"]).validate().is_err());
        parse(&["--template_matcher", "--snout", "s.png"])
            .validate()
            .unwrap();
    }

    #[test]
    fn test_snouts_accumulate() {
        let args = parse(&[
            "--template_matcher",
            "--snout",
            "a.png",
            "--snout",
            "b.png",
        ]);
        assert_eq!(args.templ.snout.len(), 2);
    }

    #[test]
    fn test_min_size_parsing() {
        let args = parse(&["--haar_matcher", "--cascade", "c.xml", "--min_size", "120x90"]);
        assert_eq!(args.haar.min_size.width, 120);
        assert_eq!(args.haar.min_size.height, 90);
    }

    #[test]
    fn test_roi_and_auto_roi_conflict() {
        let args = parse(&[
            "--haar_matcher",
            "--cascade",
            "c.xml",
            "--roi",
            "0",
            "0",
            "100",
            "100",
            "--auto_roi",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rfid_allowed_list() {
        let args = parse(&[
            "--haar_matcher",
            "--cascade",
            "c.xml",
            "--rfid_allowed",
            "AAA,BBB,CCC",
        ]);
        assert_eq!(args.rfid.rfid_allowed, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn test_event_commands_accumulate() {
        let args = parse(&[
            "--haar_matcher",
            "--cascade",
            "c.xml",
            "--match_group_done_cmd",
            "notify-send done",
            "--match_group_done_cmd",
            "beep",
        ]);
        assert_eq!(args.commands.match_group_done_cmd.len(), 2);
    }

    #[test]
    fn test_later_value_overrides_earlier() {
        // Config keys are injected before the real argv; the command
        // line must win.
        let args = parse(&[
            "--haar_matcher",
            "--cascade",
            "c.xml",
            "--lockout",
            "10",
            "--lockout",
            "60",
        ]);
        assert_eq!(args.lockout.lockout_time, 60.0);
    }

    #[test]
    fn test_match_flipped_takes_value() {
        let args = parse(&[
            "--template_matcher",
            "--snout",
            "s.png",
            "--match_flipped",
            "0",
        ]);
        assert!(!args.templ.match_flipped);
    }

    #[test]
    fn test_bad_uservar_rejected() {
        let args = parse(&[
            "--haar_matcher",
            "--cascade",
            "c.xml",
            "--uservar",
            "nameonly",
        ]);
        assert!(args.validate().is_err());
    }
}
