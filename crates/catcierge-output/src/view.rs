//! The read-only snapshot templates are rendered against.
//!
//! The state machine owns everything; renderers receive this borrowed
//! view so no leaf component holds a pointer back into the machine.

use catcierge_core::{MatchGroup, WallClock};
use catcierge_vision::Matcher;

/// The five configurable output directories. Everything falls back to
/// the plain output path.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    pub output: String,
    pub match_output: Option<String>,
    pub steps_output: Option<String>,
    pub obstruct_output: Option<String>,
    pub template_output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Output,
    Match,
    Steps,
    Obstruct,
    Template,
}

impl OutputPaths {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, kind: PathKind) -> &str {
        let specific = match kind {
            PathKind::Output => None,
            PathKind::Match => self.match_output.as_deref(),
            PathKind::Steps => self.steps_output.as_deref(),
            PathKind::Obstruct => self.obstruct_output.as_deref(),
            PathKind::Template => self.template_output.as_deref(),
        };

        specific.unwrap_or(&self.output)
    }
}

/// Daemon settings exposed as template variables.
#[derive(Debug, Clone, Default)]
pub struct ControlVars {
    pub match_time: f64,
    pub ok_matches_needed: usize,
    pub no_final_decision: bool,
    pub lockout_method: u8,
    pub lockout_time: f64,
    pub max_consecutive_lockout_count: u32,
    pub consecutive_lockout_delay: f64,
}

/// Build identity reported through `version` / `git_*` variables.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_hash_short: &'static str,
    pub git_tainted: bool,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: "unknown",
            git_hash_short: "unknown",
            git_tainted: false,
        }
    }
}

/// Borrowed state snapshot handed to the renderer.
pub struct RenderView<'a> {
    pub state: &'a str,
    pub prev_state: &'a str,
    pub matcher: Option<&'a Matcher>,
    pub group: &'a MatchGroup,
    pub clock: &'a WallClock,
    pub paths: &'a OutputPaths,
    pub control: &'a ControlVars,
    pub build: &'a BuildInfo,
}

impl<'a> RenderView<'a> {
    pub fn matcher_short_name(&self) -> &'static str {
        self.matcher.map(|m| m.short_name()).unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_fall_back_to_output() {
        let mut paths = OutputPaths::new("out");
        assert_eq!(paths.get(PathKind::Match), "out");
        assert_eq!(paths.get(PathKind::Template), "out");

        paths.match_output = Some("matches".into());
        assert_eq!(paths.get(PathKind::Match), "matches");
        assert_eq!(paths.get(PathKind::Steps), "out");
    }
}
