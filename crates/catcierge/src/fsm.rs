//! The match-group state machine.
//!
//! One instance owns the matcher, the match group, the timers, the
//! output engine and the door. The main loop feeds it one frame at a
//! time; everything else falls out of the state transitions.

use crate::gpio::DoorLock;
use crate::lifecycle;
use catcierge_core::{
    timefmt, Event, LockoutMethod, MatchGroup, MatchResult, MatchState, SigusrBehavior, Timer,
    WallClock, FILENAME_TIME_FORMAT, MATCH_MAX_COUNT,
};
use catcierge_output::{BuildInfo, ControlVars, OutputEngine, OutputPaths, PathKind, Publisher, RenderView};
use catcierge_vision::Matcher;
use colored::Colorize;
use image::GrayImage;
use std::collections::HashMap;
use tracing::{error, info, warn};

#[cfg(feature = "rfid")]
use catcierge_rfid::{DirectionFusion, ReaderSide, TagEvent};
#[cfg(feature = "rfid")]
use catcierge_core::MatchDirection;

pub type EventCommands = HashMap<Event, Vec<String>>;

/// Knobs the state machine runs on, already parsed and validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ok_matches_needed: usize,
    pub match_time: f64,
    pub no_final_decision: bool,
    pub lockout_method: LockoutMethod,
    pub lockout_time: f64,
    pub max_consecutive_lockout_count: u32,
    pub consecutive_lockout_delay: f64,
    pub lockout_dummy: bool,
    pub startup_delay: f64,
    pub save_images: bool,
    pub save_obstruct: bool,
    pub save_steps: bool,
    pub paths: OutputPaths,
    pub sigusr1: SigusrBehavior,
    pub sigusr2: SigusrBehavior,
    pub rfid_lock: bool,
    pub rfid_lock_time: f64,
    pub rfid_have_inner: bool,
    pub rfid_have_outer: bool,
    pub rfid_allowed: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ok_matches_needed: 2,
            match_time: 0.0,
            no_final_decision: false,
            lockout_method: LockoutMethod::TimerOnly,
            lockout_time: 30.0,
            max_consecutive_lockout_count: 0,
            consecutive_lockout_delay: 3.0,
            lockout_dummy: false,
            startup_delay: 0.0,
            save_images: false,
            save_obstruct: false,
            save_steps: false,
            paths: OutputPaths::new("."),
            sigusr1: SigusrBehavior::Unlock,
            sigusr2: SigusrBehavior::Lock,
            rfid_lock: false,
            rfid_lock_time: 2.0,
            rfid_have_inner: false,
            rfid_have_outer: false,
            rfid_allowed: Vec::new(),
        }
    }
}

impl Settings {
    fn control_vars(&self) -> ControlVars {
        ControlVars {
            match_time: self.match_time,
            ok_matches_needed: self.ok_matches_needed,
            no_final_decision: self.no_final_decision,
            lockout_method: self.lockout_method as u8,
            lockout_time: self.lockout_time,
            max_consecutive_lockout_count: self.max_consecutive_lockout_count,
            consecutive_lockout_delay: self.consecutive_lockout_delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Waiting,
    Matching,
    KeepOpen,
    Lockout,
    /// Events are muted until a sigusr "attention".
    Ignoring,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Initial => "Initial",
            State::Waiting => "Waiting",
            State::Matching => "Matching",
            State::KeepOpen => "Keep open",
            State::Lockout => "Lockout",
            State::Ignoring => "Ignoring",
        }
    }
}

/// The door controller.
pub struct Catcierge {
    settings: Settings,
    control: ControlVars,
    build: BuildInfo,

    state: State,
    prev_state: State,
    running: bool,
    exit_code: i32,
    sigint_seen: u32,

    group: MatchGroup,
    matcher: Matcher,
    engine: OutputEngine,
    commands: EventCommands,
    publisher: Box<dyn Publisher>,
    door: DoorLock,
    clock: WallClock,

    rematch_timer: Timer,
    lockout_timer: Timer,
    startup_timer: Timer,

    consecutive_lockout_count: u32,

    #[cfg(feature = "rfid")]
    rfid: DirectionFusion,
    checked_rfid_lock: bool,
}

impl Catcierge {
    pub fn new(
        settings: Settings,
        matcher: Matcher,
        engine: OutputEngine,
        commands: EventCommands,
        publisher: Box<dyn Publisher>,
        door: DoorLock,
    ) -> Self {
        let control = settings.control_vars();
        Self {
            settings,
            control,
            build: BuildInfo::default(),
            state: State::Initial,
            prev_state: State::Initial,
            running: false,
            exit_code: 0,
            sigint_seen: 0,
            group: MatchGroup::new(),
            matcher,
            engine,
            commands,
            publisher,
            door,
            clock: WallClock::new(),
            rematch_timer: Timer::new(),
            lockout_timer: Timer::new(),
            startup_timer: Timer::new(),
            consecutive_lockout_count: 0,
            #[cfg(feature = "rfid")]
            rfid: DirectionFusion::new(),
            checked_rfid_lock: false,
        }
    }

    pub fn set_clock(&mut self, clock: WallClock) {
        self.clock = clock;
    }

    pub fn set_build_info(&mut self, build: BuildInfo) {
        self.build = build;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn group(&self) -> &MatchGroup {
        &self.group
    }

    pub fn engine(&self) -> &OutputEngine {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn consecutive_lockout_count(&self) -> u32 {
        self.consecutive_lockout_count
    }

    #[cfg(feature = "rfid")]
    pub fn rfid(&self) -> &DirectionFusion {
        &self.rfid
    }

    /// Arm the machine: unlocked door, waiting state, startup delay
    /// running.
    pub fn start(&mut self) {
        self.running = true;
        self.set_state(State::Waiting);
        self.startup_timer.set(self.settings.startup_delay);
        self.startup_timer.start();
    }

    /// Still inside the startup delay?
    pub fn in_startup(&self) -> bool {
        !self.startup_timer.has_timed_out()
    }

    /// Stop the loop gracefully at the next iteration.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Final unlock on the way out.
    pub fn shutdown(&mut self) {
        self.do_unlock();
    }

    fn view(&self) -> RenderView<'_> {
        RenderView {
            state: self.state.name(),
            prev_state: self.prev_state.name(),
            matcher: Some(&self.matcher),
            group: &self.group,
            clock: &self.clock,
            paths: &self.settings.paths,
            control: &self.control,
            build: &self.build,
        }
    }

    /// Render all templates registered for the event, then run the
    /// event's commands when `execute` is set.
    fn trigger(&mut self, ev: Event, execute: bool) {
        let view = RenderView {
            state: self.state.name(),
            prev_state: self.prev_state.name(),
            matcher: Some(&self.matcher),
            group: &self.group,
            clock: &self.clock,
            paths: &self.settings.paths,
            control: &self.control,
            build: &self.build,
        };

        self.engine
            .generate_event(ev.name(), &view, self.publisher.as_mut());

        if execute {
            if let Some(commands) = self.commands.get(&ev) {
                for command in commands {
                    self.engine.execute(command, &view);
                }
            }
        }
    }

    fn set_state(&mut self, new_state: State) {
        info!(
            "[{}] {} [{}]",
            self.state.name().yellow(),
            "->".magenta(),
            new_state.name().yellow()
        );

        self.prev_state = self.state;
        self.state = new_state;

        self.trigger(Event::StateChange, true);
    }

    fn has_command(&self, ev: Event) -> bool {
        self.commands.get(&ev).is_some_and(|c| !c.is_empty())
    }

    /// Engage the lock. A configured do_lockout command replaces the
    /// GPIO write.
    fn do_lockout(&mut self) {
        if self.settings.lockout_dummy {
            warn!("!LOCKOUT DUMMY!");
            return;
        }

        if self.has_command(Event::DoLockout) {
            self.trigger(Event::DoLockout, true);
        } else {
            self.trigger(Event::DoLockout, false);
            if let Err(e) = self.door.lock() {
                error!("failed to lock door: {e:#}");
            }
        }
    }

    /// Release the lock. A configured do_unlock command replaces the
    /// GPIO write.
    pub fn do_unlock(&mut self) {
        if self.has_command(Event::DoUnlock) {
            self.trigger(Event::DoUnlock, true);
        } else {
            self.trigger(Event::DoUnlock, false);
            if let Err(e) = self.door.unlock() {
                error!("failed to unlock door: {e:#}");
            }
        }
    }

    fn state_transition_lockout(&mut self) {
        self.lockout_timer.set(self.settings.lockout_time);
        self.lockout_timer.start();
        self.do_lockout();
        self.set_state(State::Lockout);
    }

    /// Consume pending signal flags. Returns false when the machine has
    /// been asked to stop.
    pub fn poll_signals(&mut self) -> bool {
        let ints = lifecycle::sigint_count();
        if ints > self.sigint_seen {
            self.sigint_seen = ints;
            info!("received SIGINT, stopping...");
            if ints >= 2 {
                // Second SIGINT: unlock and get out now.
                self.do_unlock();
            }
            self.running = false;
        }

        if lifecycle::take_sigusr1() {
            info!("received SIGUSR1");
            self.handle_sigusr(self.settings.sigusr1);
        }

        if lifecycle::take_sigusr2() {
            info!("received SIGUSR2");
            self.handle_sigusr(self.settings.sigusr2);
        }

        self.running
    }

    pub fn handle_sigusr(&mut self, behavior: SigusrBehavior) {
        match behavior {
            SigusrBehavior::None => info!("doing nothing..."),
            SigusrBehavior::Lock => {
                info!("forcing lockout...");
                self.state_transition_lockout();
            }
            SigusrBehavior::Unlock => {
                info!("forcing unlock...");
                self.do_unlock();
                self.set_state(State::Waiting);
            }
            SigusrBehavior::Ignore => {
                info!("ignoring events until further notice...");
                self.set_state(State::Ignoring);
            }
            SigusrBehavior::Attention => {
                info!("stop ignoring events...");
                self.set_state(State::Waiting);
            }
        }
    }

    /// Feed one (ROI-cropped) frame to the current state.
    pub fn step(&mut self, frame: &GrayImage) {
        if !self.running {
            return;
        }

        match self.state {
            State::Initial | State::Ignoring => {}
            State::Waiting => self.state_waiting(frame),
            State::Matching => self.state_matching(frame),
            State::KeepOpen => self.state_keepopen(frame),
            State::Lockout => self.state_lockout(frame),
        }
    }

    fn state_waiting(&mut self, frame: &GrayImage) {
        if !self.matcher.is_obstructed(frame) {
            return;
        }

        self.group.start(frame, self.clock.now());

        #[cfg(feature = "rfid")]
        self.rfid.reset();

        if let Some(id) = self.group.id {
            info!("=== Match group id: {} ===", id.short(10));
        }

        self.save_obstruct_image();
        self.trigger(Event::FrameObstructed, true);
        self.set_state(State::Matching);
    }

    fn save_obstruct_image(&mut self) {
        if !(self.settings.save_images && self.settings.save_obstruct) {
            // The frame was only needed for the group id.
            self.group.obstruct_img = None;
            return;
        }

        let time_str = self
            .group
            .obstruct_time
            .and_then(|t| timefmt::strftime(FILENAME_TIME_FORMAT, &t).ok())
            .unwrap_or_default();

        let dir = self.render_path(PathKind::Obstruct);
        self.group.obstruct_path =
            catcierge_core::SplitPath::new(dir, format!("match_obstruct_{time_str}.png"));
    }

    fn render_path(&self, kind: PathKind) -> String {
        let raw = self.settings.paths.get(kind).to_string();
        match self.engine.render(&raw, &self.view()) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!("failed to generate output path from \"{raw}\": {e}");
                raw
            }
        }
    }

    fn state_matching(&mut self, frame: &GrayImage) {
        let result = match self.matcher.match_frame(frame, self.settings.save_steps) {
            Ok(result) => result,
            Err(e) => {
                // Bad frame: log and stay in matching.
                error!("{} matcher: error when matching frame: {e}", self.matcher.name());
                return;
            }
        };

        self.process_match_result(result, frame);
        self.trigger(Event::MatchDone, true);

        if self.group.is_full() {
            self.decide_lock_status();
        }
    }

    fn process_match_result(&mut self, result: MatchResult, frame: &GrayImage) {
        let mut state = MatchState::new(result, frame, self.clock.now());
        let index = self.group.match_count() + 1;

        let id_short = state.id.map(|id| id.short(10)).unwrap_or_default();
        let line = format!(
            "{}Match {} - {} ({})",
            if state.result.success { "" } else { "No " },
            state.result.direction,
            state.result.description,
            id_short
        );
        if state.result.success {
            info!("{}", line.green());
        } else {
            info!("{}", line.red());
        }

        if self.settings.save_images {
            // Resolve paths now, write to disk later; writes would slow
            // down the matching rate.
            let success_str = if state.result.success { "success" } else { "fail" };
            let base = format!("match_{}_{}__{}", success_str, state.time_str, index);

            let match_dir = self.render_path(PathKind::Match);
            state.path = catcierge_core::SplitPath::new(match_dir, format!("{base}.png"));

            if self.settings.save_steps {
                let steps_dir = self.render_path(PathKind::Steps);
                for (j, step) in state.result.steps.iter_mut().enumerate() {
                    step.path = catcierge_core::SplitPath::new(
                        steps_dir.clone(),
                        format!("{base}_{j:02}_{}.png", step.name),
                    );
                }
            }
        } else {
            state.img = None;
        }

        self.group.push(state);
    }

    /// The group is full: tally, vote on direction, let the matcher have
    /// the final say, then drive the door.
    fn decide_lock_status(&mut self) {
        debug_assert!(self.group.is_full());

        self.group.success = false;
        self.group.success_count = self.group.tally_success();
        self.group.direction = self.matcher.overall_direction(&self.group);

        if self.group.direction == catcierge_core::MatchDirection::Out {
            // Going out: even a single good frame shouldn't lock the
            // cat in with its prey outside.
            self.group.description = "Going out".to_string();
            self.group.success = true;
        } else {
            self.group.success = self.group.success_count >= self.settings.ok_matches_needed;

            if !self.group.success {
                self.group.description = format!(
                    "Lockout {} of {} matches failed",
                    MATCH_MAX_COUNT - self.group.success_count,
                    MATCH_MAX_COUNT
                );
            }

            if !self.settings.no_final_decision {
                self.group.success = self.matcher.decide(&mut self.group);

                if self.group.final_decision {
                    error!(
                        "!!! Match group vetoed match success: {} !!!",
                        self.group.description
                    );
                }
            }
        }

        if self.group.success {
            self.group.description = "Everything OK!".to_string();
            info!(
                "Everything OK! ({} out of {} matches succeeded) Door kept open...",
                self.group.success_count, MATCH_MAX_COUNT
            );

            if self.consecutive_lockout_count > 0 {
                info!(
                    "consecutive lockout count reset (was {})",
                    self.consecutive_lockout_count
                );
                self.consecutive_lockout_count = 0;
            }

            self.do_unlock();

            // One RFID judgement per keep-open period.
            self.checked_rfid_lock = false;

            self.rematch_timer.set(self.settings.match_time);
            self.rematch_timer.reset();
            self.set_state(State::KeepOpen);
        } else {
            info!(
                "Lockout! {} out of {} matches failed (for {} seconds).",
                MATCH_MAX_COUNT - self.group.success_count,
                MATCH_MAX_COUNT,
                self.settings.lockout_time
            );

            if self.check_max_consecutive_lockouts() {
                self.set_state(State::Waiting);
            } else {
                self.state_transition_lockout();
            }
        }

        self.group.end(self.clock.now());

        if self.settings.save_images {
            self.save_images();
        }

        self.trigger(Event::MatchGroupDone, true);
    }

    /// Too many lockouts in a row usually means hardware trouble, such
    /// as a dead backlight matching every frame as obstructed. Returns
    /// true when the machine decided to give up.
    fn check_max_consecutive_lockouts(&mut self) -> bool {
        if self.settings.max_consecutive_lockout_count == 0 {
            return false;
        }

        let since_last = self.lockout_timer.get();
        let window = self.settings.lockout_time + self.settings.consecutive_lockout_delay;

        if since_last <= window {
            self.consecutive_lockout_count += 1;
            if self.consecutive_lockout_count > 1 {
                info!(
                    "Consecutive lockout! {} out of {} before quitting ({:.2} sec <= {:.2} sec)",
                    self.consecutive_lockout_count,
                    self.settings.max_consecutive_lockout_count,
                    since_last,
                    window
                );
            }
        } else {
            info!(
                "consecutive lockout count reset, {:.2} seconds between lockouts",
                since_last
            );
            self.consecutive_lockout_count = 0;
        }

        if self.consecutive_lockout_count >= self.settings.max_consecutive_lockout_count {
            error!(
                "Too many lockouts in a row ({})! Assuming something is wrong... Aborting program!",
                self.consecutive_lockout_count
            );
            self.do_unlock();
            self.running = false;
            self.exit_code = 1;
            return true;
        }

        false
    }

    fn save_images(&mut self) {
        if self.settings.save_obstruct {
            if let Some(img) = &self.group.obstruct_img {
                let full = self.group.obstruct_path.full();
                info!("saving obstruct image: {full}");
                if !self.group.obstruct_path.dir.is_empty() {
                    std::fs::create_dir_all(&self.group.obstruct_path.dir).ok();
                }
                if let Err(e) = img.save(&full) {
                    error!("failed to save obstruct image {full}: {e}");
                }
            }
        }

        for i in 0..self.group.match_count() {
            {
                let m = &self.group.matches()[i];

                if let Some(img) = &m.img {
                    let full = m.path.full();
                    info!("saving image {full}");
                    if !m.path.dir.is_empty() {
                        std::fs::create_dir_all(&m.path.dir).ok();
                    }
                    if let Err(e) = img.save(&full) {
                        error!("failed to save match image {full}: {e}");
                    }
                }

                if self.settings.save_steps {
                    for (j, step) in m.result.steps.iter().enumerate() {
                        if step.img.width() == 0 || step.path.is_empty() {
                            continue;
                        }
                        let full = step.path.full();
                        info!("  {:02} {:<34} {}", j, step.description, full);
                        if !step.path.dir.is_empty() {
                            std::fs::create_dir_all(&step.path.dir).ok();
                        }
                        if let Err(e) = step.img.save(&full) {
                            error!("failed to save step image {full}: {e}");
                        }
                    }
                }
            }

            self.trigger(Event::SaveImg, true);
        }

        self.group.release_images();
    }

    fn state_keepopen(&mut self, frame: &GrayImage) {
        // Wait for the frame to clear before starting the re-arm timer.
        if !self.rematch_timer.is_active() {
            if self.matcher.is_obstructed(frame) {
                return;
            }
            self.rematch_timer.set(self.settings.match_time);
            self.rematch_timer.start();
        }

        if self.rematch_timer.has_timed_out() {
            info!("go back to waiting...");
            self.set_state(State::Waiting);
        }

        #[cfg(feature = "rfid")]
        self.check_rfid_lockout();
    }

    /// Feed a decoded tag read into the direction fusion.
    #[cfg(feature = "rfid")]
    pub fn handle_rfid_event(&mut self, side: ReaderSide, event: &TagEvent) {
        let newly_triggered = self
            .rfid
            .observe(side, event, &self.settings.rfid_allowed);

        info!(
            reader = side.name(),
            tag = %event.data,
            complete = event.complete,
            "RFID read"
        );

        if newly_triggered {
            self.trigger(Event::RfidDetect, true);
        }
    }

    /// After the animal had time to pass both readers, veto the image
    /// match when no allowed tag was seen.
    #[cfg(feature = "rfid")]
    fn check_rfid_lockout(&mut self) {
        if !self.settings.rfid_lock || self.checked_rfid_lock {
            return;
        }

        if !(self.settings.rfid_have_inner || self.settings.rfid_have_outer) {
            return;
        }

        if self.rematch_timer.get() < self.settings.rfid_lock_time {
            return;
        }

        if !self.rfid.inner.triggered && !self.rfid.outer.triggered {
            error!("unknown RFID direction!");
            self.rfid.direction = MatchDirection::Unknown;
        }

        let lock = self.rfid.disallowed(
            self.settings.rfid_have_inner,
            self.settings.rfid_have_outer,
        );

        if lock {
            if self.rfid.direction == MatchDirection::Out {
                info!("RFID lockout: skipping since cat is going out");
            } else {
                info!("RFID lockout!");
                self.state_transition_lockout();
            }
        } else {
            info!("RFID OK!");
        }

        self.trigger(Event::RfidMatch, true);
        self.checked_rfid_lock = true;
    }

    fn state_lockout(&mut self, frame: &GrayImage) {
        let leave = match self.settings.lockout_method {
            LockoutMethod::TimerOnly => self.lockout_timer.has_timed_out(),
            LockoutMethod::ObstructThenTimer => {
                if self.matcher.is_obstructed(frame) {
                    // Hold the countdown until the doorway clears.
                    self.lockout_timer.start();
                    false
                } else {
                    self.lockout_timer.has_timed_out()
                }
            }
            LockoutMethod::ObstructOrTimer => {
                !self.matcher.is_obstructed(frame) || self.lockout_timer.has_timed_out()
            }
        };

        if leave {
            self.do_unlock();
            self.set_state(State::Waiting);
        }
    }
}
