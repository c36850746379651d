//! The variable translator chain.
//!
//! First match wins: core vars, path vars, group vars, per-match vars,
//! obstruct vars, matcher-specific vars, then user-defined vars.

use crate::command;
use crate::engine::{Renderer, UserVar};
use crate::error::RenderError;
use crate::pathops::{create_and_get_path, get_path};
use crate::view::PathKind;
use catcierge_core::timefmt::{self, TEMPLATE_TIME_FORMAT};
use catcierge_core::{MatchId, MatchState, MATCH_MAX_COUNT, MAX_STEPS};
use chrono::{DateTime, Local};

type VarResult = Result<Option<String>, RenderError>;

fn bool_var(b: bool) -> Option<String> {
    Some(if b { "1" } else { "0" }.to_string())
}

/// Format a timestamp according to `subvar`, which is either empty (use
/// the default format) or `:<fmt>` with `@`/`&` standing in for `%`.
fn time_var(subvar: &str, t: Option<DateTime<Local>>) -> VarResult {
    let Some(t) = t else {
        return Ok(Some(String::new()));
    };

    let fmt = match subvar.strip_prefix(':') {
        Some(custom) => timefmt::unescape_format(custom),
        None => TEMPLATE_TIME_FORMAT.to_string(),
    };

    Ok(Some(timefmt::strftime(&fmt, &t)?))
}

/// Render an id, optionally truncated by a `:<n>` suffix.
fn id_var(subvar: &str, id: Option<MatchId>) -> VarResult {
    let Some(id) = id else {
        return Ok(Some(String::new()));
    };

    match subvar.strip_prefix(':') {
        Some(n) => match n.parse::<usize>() {
            Ok(n) => Ok(Some(id.short(n))),
            Err(_) => Ok(None),
        },
        None if subvar.is_empty() => Ok(Some(id.to_string())),
        None => Ok(None),
    }
}

/// Variable name with any `|` path operations stripped.
fn base_name(var: &str) -> &str {
    var.split_once('|').map(|(b, _)| b).unwrap_or(var)
}

pub(crate) fn translate(r: &mut Renderer<'_>, var: &str) -> VarResult {
    // template_path / template_path:<name>, the generated target path of
    // a registered template from the current event trigger.
    if let Some(subvar) = var.strip_prefix("template_path") {
        let path = if let Some(name) = subvar.strip_prefix(':') {
            let name = name.split('|').next().unwrap_or(name);
            r.templates
                .iter()
                .position(|t| t.name == name)
                .and_then(|i| r.generated_paths[i].clone())
        } else {
            r.generated_paths.first().cloned().flatten()
        };

        return create_and_get_path(r, var, path.as_deref(), false);
    }

    if var == "time" || var.starts_with("time:") {
        return time_var(&var[4..], Some(r.view.clock.now()));
    }

    match var {
        "state" => return Ok(Some(r.view.state.to_string())),
        "prev_state" => return Ok(Some(r.view.prev_state.to_string())),
        "git_hash" | "git_commit" => return Ok(Some(r.view.build.git_hash.to_string())),
        "git_hash_short" | "git_commit_short" => {
            return Ok(Some(r.view.build.git_hash_short.to_string()))
        }
        "git_tainted" => return Ok(bool_var(r.view.build.git_tainted)),
        "version" => return Ok(Some(r.view.build.version.to_string())),
        "cwd" => {
            let cwd = std::env::current_dir()?;
            return Ok(Some(cwd.to_string_lossy().into_owned()));
        }
        _ => {}
    }

    // The five output path variables, with |dir,abs,rel(...) support.
    let kind = match base_name(var) {
        "output_path" => Some(PathKind::Output),
        "match_output_path" => Some(PathKind::Match),
        "steps_output_path" => Some(PathKind::Steps),
        "obstruct_output_path" => Some(PathKind::Obstruct),
        "template_output_path" => Some(PathKind::Template),
        _ => None,
    };
    if let Some(kind) = kind {
        let value = r.view.paths.get(kind).to_string();
        return create_and_get_path(r, var, Some(&value), true);
    }

    if var == "matcher" {
        return Ok(Some(r.view.matcher_short_name().to_string()));
    }

    if let Some(matcher) = r.view.matcher {
        if let Some(value) = matcher.translate(var) {
            return Ok(Some(value));
        }
    }

    let control = r.view.control;
    match var {
        "ok_matches_needed" => return Ok(Some(control.ok_matches_needed.to_string())),
        "no_final_decision" => return Ok(bool_var(control.no_final_decision)),
        "matchtime" => return Ok(Some((control.match_time as i64).to_string())),
        "lockout_method" => return Ok(Some(control.lockout_method.to_string())),
        "lockout_time" => return Ok(Some((control.lockout_time as i64).to_string())),
        "lockout_error" => {
            return Ok(Some(control.max_consecutive_lockout_count.to_string()))
        }
        "lockout_error_delay" => {
            return Ok(Some(format!("{:.2}", control.consecutive_lockout_delay)))
        }
        _ => {}
    }

    let group = r.view.group;

    if let Some(subvar) = var.strip_prefix("match_group_id") {
        return id_var(subvar, group.id);
    }

    if let Some(subvar) = var.strip_prefix("match_group_start_time") {
        return time_var(subvar, group.start_time);
    }

    if let Some(subvar) = var.strip_prefix("match_group_end_time") {
        return time_var(subvar, group.end_time);
    }

    match var {
        "match_group_success" | "match_success" => return Ok(bool_var(group.success)),
        "match_group_success_str" => {
            return Ok(Some(
                if group.success { "success" } else { "fail" }.to_string(),
            ))
        }
        "match_group_success_count" => return Ok(Some(group.success_count.to_string())),
        "match_group_final_decision" => return Ok(bool_var(group.final_decision)),
        "match_group_direction" => return Ok(Some(group.direction.as_str().to_string())),
        "match_group_desc" | "match_group_description" => {
            return Ok(Some(group.description.clone()))
        }
        "match_group_count" | "match_count" => {
            return Ok(Some(group.match_count().to_string()))
        }
        "match_group_max_count" => return Ok(Some(MATCH_MAX_COUNT.to_string())),
        "obstruct_filename" => return Ok(Some(group.obstruct_path.filename.clone())),
        _ => {}
    }

    if base_name(var).starts_with("obstruct_path") {
        return get_path(r, var, &group.obstruct_path);
    }

    if let Some(subvar) = var.strip_prefix("obstruct_time") {
        return time_var(subvar, group.obstruct_time);
    }

    if let Some(rest) = var.strip_prefix("match") {
        if let Some(result) = translate_match_var(r, var, rest)? {
            return Ok(Some(result));
        }
    }

    // Loop variables shadow user variables.
    if let Some((_, value)) = r.loop_vars.iter().rev().find(|(name, _)| name == var) {
        return Ok(Some(value.clone()));
    }

    match r.user_vars.get(var) {
        Some(UserVar::Literal(value)) => Ok(Some(value.clone())),
        Some(UserVar::Command(cmd)) => {
            let output = command::run_capture(cmd)
                .map_err(|e| RenderError::UserCommand(format!("{cmd}: {e}")))?;
            Ok(Some(output))
        }
        None => Ok(None),
    }
}

/// `match#_*` / `matchcur_*` variables.
fn translate_match_var(r: &mut Renderer<'_>, var: &str, rest: &str) -> VarResult {
    let group = r.view.group;

    let (idx, subvar) = if let Some(cur_rest) = rest.strip_prefix("cur_") {
        match group.match_count() {
            0 => return Ok(None),
            n => (n - 1, cur_rest),
        }
    } else {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Ok(None);
        }

        let Some(subvar) = rest[digits.len()..].strip_prefix('_') else {
            return Ok(None);
        };

        let one_based: usize = match digits.parse() {
            Ok(n) => n,
            Err(_) => return Ok(None),
        };
        if one_based == 0 || one_based > MATCH_MAX_COUNT {
            return Ok(None);
        }

        (one_based - 1, subvar)
    };

    // A slot that has not been filled yet renders as empty.
    let Some(m) = group.matches().get(idx) else {
        return Ok(Some(String::new()));
    };

    translate_match_field(r, var, m, idx, subvar)
}

fn translate_match_field(
    r: &mut Renderer<'_>,
    var: &str,
    m: &MatchState,
    idx: usize,
    subvar: &str,
) -> VarResult {
    if base_name(subvar).starts_with("path") {
        return get_path(r, var, &m.path);
    }

    if subvar == "filename" {
        return Ok(Some(m.path.filename.clone()));
    }

    if subvar == "idx" {
        return Ok(Some((idx + 1).to_string()));
    }

    if let Some(id_sub) = subvar.strip_prefix("id") {
        return id_var(id_sub, m.id);
    }

    match subvar {
        "success" => return Ok(bool_var(m.result.success)),
        "success_str" => {
            return Ok(Some(
                if m.result.success { "success" } else { "fail" }.to_string(),
            ))
        }
        "direction" => return Ok(Some(m.result.direction.as_str().to_string())),
        "desc" | "description" => return Ok(Some(m.result.description.clone())),
        "result" => return Ok(Some(format!("{:.6}", m.result.score))),
        "step_count" => return Ok(Some(m.result.steps.len().to_string())),
        _ => {}
    }

    if let Some(time_sub) = subvar.strip_prefix("time") {
        return time_var(time_sub, m.time);
    }

    if let Some(step_rest) = subvar.strip_prefix("step") {
        let digits: String = step_rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return Ok(None);
        }

        let Some(stepvar) = step_rest[digits.len()..].strip_prefix('_') else {
            return Ok(None);
        };

        let one_based: usize = match digits.parse() {
            Ok(n) => n,
            Err(_) => return Ok(None),
        };
        if one_based == 0 || one_based > MAX_STEPS {
            return Ok(None);
        }

        let step = m.result.steps.get(one_based - 1);

        return match stepvar {
            _ if base_name(stepvar).starts_with("path") => match step {
                Some(step) => get_path(r, var, &step.path),
                None => Ok(Some(String::new())),
            },
            "filename" => Ok(Some(
                step.map(|s| s.path.filename.clone()).unwrap_or_default(),
            )),
            "name" => Ok(Some(step.map(|s| s.name.to_string()).unwrap_or_default())),
            "desc" | "description" => Ok(Some(
                step.map(|s| s.description.to_string()).unwrap_or_default(),
            )),
            "active" => Ok(bool_var(
                step.is_some_and(|s| s.img.width() > 0 && s.img.height() > 0),
            )),
            _ => Ok(None),
        };
    }

    Ok(None)
}
