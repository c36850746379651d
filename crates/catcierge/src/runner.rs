//! Daemon assembly and the main loop.

use crate::args::Args;
use crate::camera::{FrameSource, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};
use crate::fsm::{Catcierge, EventCommands, Settings};
use crate::gpio::{DoorLock, NoopPinBank, PinBank, SysfsGpio};
use crate::lifecycle::{self, PidFile};
use anyhow::{Context, Result};
use catcierge_core::{Event, WallClock};
use catcierge_output::{BuildInfo, NullPublisher, OutputEngine, OutputPaths, Publisher};
use catcierge_vision::{
    backlight, crop, HaarMatcher, Matcher, Roi, TemplateMatcher,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{error, info, warn};

#[cfg(feature = "rfid")]
use catcierge_rfid::{ReaderSide, RfidReader};

pub fn build_settings(args: &Args) -> Settings {
    Settings {
        ok_matches_needed: args.ok_matches_needed,
        match_time: args.match_time,
        no_final_decision: args.no_final_decision,
        lockout_method: args.lockout_method(),
        lockout_time: args.lockout.lockout_time,
        max_consecutive_lockout_count: args.lockout.max_consecutive_lockout_count,
        consecutive_lockout_delay: args.lockout.consecutive_lockout_delay,
        lockout_dummy: args.lockout.lockout_dummy,
        startup_delay: args.roi.startup_delay,
        save_images: args.output.save,
        save_obstruct: args.output.save_obstruct,
        save_steps: args.output.save_steps,
        paths: OutputPaths {
            output: args.output.output_path.clone(),
            match_output: args.output.match_output_path.clone(),
            steps_output: args.output.steps_output_path.clone(),
            obstruct_output: args.output.obstruct_output_path.clone(),
            template_output: args.output.template_output_path.clone(),
        },
        sigusr1: args.lifecycle.sigusr1_behavior,
        sigusr2: args.lifecycle.sigusr2_behavior,
        rfid_lock: args.rfid.lock_on_invalid_rfid,
        rfid_lock_time: args.rfid.rfid_lock_time,
        rfid_have_inner: args.rfid.rfid_inner_path.is_some(),
        rfid_have_outer: args.rfid.rfid_outer_path.is_some(),
        rfid_allowed: args.rfid.rfid_allowed.clone(),
    }
}

pub fn build_event_commands(args: &Args) -> EventCommands {
    let c = &args.commands;
    let mut commands = EventCommands::new();

    let pairs = [
        (Event::MatchGroupDone, &c.match_group_done_cmd),
        (Event::StateChange, &c.state_change_cmd),
        (Event::DoLockout, &c.do_lockout_cmd),
        (Event::DoUnlock, &c.do_unlock_cmd),
        (Event::SaveImg, &c.save_img_cmd),
        (Event::MatchDone, &c.match_done_cmd),
        (Event::FrameObstructed, &c.frame_obstructed_cmd),
        (Event::RfidDetect, &c.rfid_detect_cmd),
        (Event::RfidMatch, &c.rfid_match_cmd),
    ];

    for (event, cmds) in pairs {
        if !cmds.is_empty() {
            commands.insert(event, cmds.clone());
        }
    }

    commands
}

pub fn build_matcher(args: &Args) -> Result<Matcher> {
    if args.template_matcher {
        let matcher = TemplateMatcher::new(args.template_matcher_args())
            .context("failed to init template matcher")?;
        return Ok(Matcher::Template(matcher));
    }

    let haar_args = args
        .haar_matcher_args()
        .context("haar matcher: no cascade xml specified, use --cascade")?;
    let matcher = HaarMatcher::new(haar_args).context("failed to init haar matcher")?;
    Ok(Matcher::Haar(matcher))
}

pub fn build_engine(args: &Args) -> Result<OutputEngine> {
    let mut engine = OutputEngine::new();

    for spec in &args.output.user_vars {
        let (name, value) = spec
            .split_once(' ')
            .context("--uservar needs to be of the format \"name value\"")?;
        info!("adding user defined variable: {name}");
        engine
            .add_user_var(name, value)
            .with_context(|| format!("failed to add variable \"{name}\""))?;
    }

    if !args.output.inputs.is_empty() {
        info!("loading output templates:");
    }

    for input in &args.output.inputs {
        engine
            .load_template_file(input)
            .with_context(|| format!("failed to load template file {}", input.display()))?;
    }

    Ok(engine)
}

fn build_publisher(args: &Args) -> Result<Box<dyn Publisher>> {
    if !args.output.zmq {
        return Ok(Box::new(NullPublisher));
    }

    #[cfg(feature = "zmq")]
    {
        let publisher = crate::zmq_pub::ZmqPublisher::bind(
            &args.output.zmq_transport,
            &args.output.zmq_iface,
            args.output.zmq_port,
        )?;
        return Ok(Box::new(publisher));
    }

    #[cfg(not(feature = "zmq"))]
    {
        warn!("--zmq was given but this build has no zmq support");
        Ok(Box::new(NullPublisher))
    }
}

fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_hash: option_env!("CATCIERGE_GIT_HASH").unwrap_or("unknown"),
        git_hash_short: option_env!("CATCIERGE_GIT_HASH_SHORT").unwrap_or("unknown"),
        git_tainted: option_env!("CATCIERGE_GIT_TAINTED").is_some(),
    }
}

fn fixed_roi(args: &Args) -> Option<Roi> {
    args.roi
        .roi
        .as_ref()
        .map(|v| Roi::new(v[0], v[1], v[2], v[3]))
}

/// Bring the daemon up and run the main loop. Returns the exit code.
pub fn run(args: Args) -> Result<i32> {
    let settings = build_settings(&args);
    let commands = build_event_commands(&args);

    // A held lock means another instance is alive: refuse to start. A
    // file we simply cannot create (not root, read-only /var/run) only
    // costs us the stale-process protection.
    let _pid_file = match PidFile::create(&args.lifecycle.pid_path) {
        Ok(pid) => Some(pid),
        Err(e) if e.to_string().contains("already running") => return Err(e),
        Err(e) => {
            warn!("running without PID file: {e:#}");
            None
        }
    };

    lifecycle::install_signal_handlers()?;

    // A custom lockout command replaces the GPIO entirely.
    let skip_gpio = !args.commands.do_lockout_cmd.is_empty();
    let bank: Box<dyn PinBank + Send> = if skip_gpio {
        info!("skipping GPIO setup since a custom lockout command is set");
        Box::new(NoopPinBank)
    } else {
        Box::new(SysfsGpio::new())
    };

    let backlight_pin = args
        .lifecycle
        .backlight_enable
        .then_some(args.lifecycle.backlight_gpio_pin);
    let mut door = DoorLock::new(bank, args.lifecycle.lockout_gpio_pin, backlight_pin);

    if !skip_gpio {
        if let Err(e) = door.setup() {
            if unsafe { libc::getuid() } != 0 {
                error!("########## You have to run as root! ###########");
            }
            return Err(e.context("failed to setup GPIO pins"));
        }
    }

    if let Some(user) = &args.lifecycle.chuid {
        lifecycle::drop_privileges(user)?;
    }

    let matcher = build_matcher(&args)?;
    info!("initialized catcierge image recognition");

    let engine = build_engine(&args)?;
    info!("initialized output templates");

    let publisher = build_publisher(&args)?;

    #[cfg(feature = "rfid")]
    let mut rfid_readers: Vec<(ReaderSide, RfidReader)> = {
        let mut readers = Vec::new();
        if let Some(path) = &args.rfid.rfid_inner_path {
            let mut reader = RfidReader::new("Inner", path);
            reader.open()?;
            readers.push((ReaderSide::Inner, reader));
        }
        if let Some(path) = &args.rfid.rfid_outer_path {
            let mut reader = RfidReader::new("Outer", path);
            reader.open()?;
            readers.push((ReaderSide::Outer, reader));
        }
        if !readers.is_empty() {
            info!("initialized RFID readers");
        }
        readers
    };

    let mut source = FrameSource::open(
        &args.lifecycle.camera,
        DEFAULT_FRAME_WIDTH,
        DEFAULT_FRAME_HEIGHT,
    )?;

    let clock = match &args.lifecycle.base_time {
        Some(base) => WallClock::with_base_time(base)?,
        None => WallClock::new(),
    };

    let mut fsm = Catcierge::new(settings, matcher, engine, commands, publisher, door);
    fsm.set_clock(clock);
    fsm.set_build_info(build_info());

    let spinner = if args.lifecycle.noanim {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{msg}]").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar
    };

    info!("starting detection!");
    fsm.start();

    // Nothing matches during the startup delay; frames keep flowing so
    // the camera settles.
    while fsm.is_running() && fsm.in_startup() {
        fsm.poll_signals();
        source.acquire()?;
        spinner.set_message("startup delay");
        spinner.tick();
    }

    // Lock the region of interest in, either fixed or from the
    // backlight search.
    let roi: Option<Roi> = if args.roi.auto_roi {
        let frame = source.acquire()?;
        let (found, contour) = backlight::find_backlight(
            &frame,
            args.roi.auto_roi_thr,
            args.roi.min_backlight,
        )
        .context("auto ROI failed")?;

        info!(
            x = found.x,
            y = found.y,
            width = found.width,
            height = found.height,
            "auto ROI found"
        );

        if args.roi.save_auto_roi {
            let viz = backlight::draw_auto_roi(&frame, &found, &contour);
            let path = format!("{}/auto_roi.png", args.output.output_path);
            std::fs::create_dir_all(&args.output.output_path).ok();
            if let Err(e) = viz.save(&path) {
                error!("failed to save {path}: {e}");
            } else {
                info!("saved auto ROI image to {path}");
            }
        }

        Some(found)
    } else {
        fixed_roi(&args)
    };

    // The main loop: service the readers, grab a frame, run one state
    // machine step.
    while fsm.is_running() {
        if !fsm.poll_signals() {
            break;
        }

        #[cfg(feature = "rfid")]
        for (side, reader) in rfid_readers.iter_mut() {
            match reader.poll() {
                Ok(Some(event)) => fsm.handle_rfid_event(*side, &event),
                Ok(None) => {}
                Err(e) => error!("failed to service RFID reader: {e}"),
            }
        }

        let frame = source.acquire().context("failed to acquire frame")?;
        let frame = match &roi {
            Some(roi) => crop(&frame, roi),
            None => frame,
        };

        fsm.step(&frame);

        spinner.set_message(fsm.state().name());
        spinner.tick();
    }

    spinner.finish_and_clear();
    fsm.shutdown();

    // Give fire-and-forget event commands a beat to spawn.
    std::thread::sleep(Duration::from_millis(10));

    Ok(fsm.exit_code())
}
