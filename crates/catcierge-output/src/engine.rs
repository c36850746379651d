//! Template registration and rendering.
//!
//! Rendering is recursive: variable resolution can trigger sub-renders
//! (paths inside paths, `$var$` inside `%var%`). An explicit depth
//! counter on the renderer bounds the recursion.

use crate::command;
use crate::error::RenderError;
use crate::pathops::replace_whitespace;
use crate::publisher::Publisher;
use crate::settings::{self, TemplateSettings};
use crate::translate;
use crate::view::{PathKind, RenderView};
use crate::OUTPUT_MAX_RECURSION;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// A user-defined variable. Values wrapped in `$( ... )` are executed
/// through the shell at reference time with stdout captured.
#[derive(Debug, Clone)]
pub enum UserVar {
    Literal(String),
    Command(String),
}

/// One registered template.
#[derive(Debug, Clone)]
pub struct OutputTemplate {
    pub name: String,
    pub body: String,
    pub settings: TemplateSettings,
}

/// A successfully rendered template from one event trigger.
#[derive(Debug, Clone)]
pub struct Generated {
    pub name: String,
    pub topic: String,
    pub path: Option<PathBuf>,
    pub body: String,
}

/// Owner of the registered templates and the user-variable map.
#[derive(Debug, Default)]
pub struct OutputEngine {
    templates: Vec<OutputTemplate>,
    user_vars: HashMap<String, UserVar>,
    /// Filled at each event trigger; referenced by `template_path`.
    generated_paths: Vec<Option<String>>,
}

impl OutputEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn templates(&self) -> &[OutputTemplate] {
        &self.templates
    }

    pub fn has_user_var(&self, name: &str) -> bool {
        self.user_vars.contains_key(name)
    }

    /// Register a user variable. `$( ... )` values become commands.
    pub fn add_user_var(&mut self, name: &str, value: &str) -> Result<(), RenderError> {
        if self.user_vars.contains_key(name) {
            return Err(RenderError::DuplicateVar(name.to_string()));
        }

        let var = match value.strip_prefix("$(").and_then(|v| v.strip_suffix(')')) {
            Some(cmd) => UserVar::Command(cmd.to_string()),
            None => UserVar::Literal(value.to_string()),
        };

        self.user_vars.insert(name.to_string(), var);
        Ok(())
    }

    /// Register a template from its raw contents.
    ///
    /// A filename of the form `[name]rest.json` names the template;
    /// otherwise the template index is used. `%!` settings may override
    /// both the name and the output filename.
    pub fn add_template(&mut self, contents: &str, filename: &str) -> Result<(), RenderError> {
        let basename = filename.rsplit('/').next().unwrap_or(filename);

        let mut tpl_settings = TemplateSettings::default();

        let rest = match basename.strip_prefix('[') {
            Some(tail) => match tail.split_once(']') {
                Some((name, rest)) => {
                    tpl_settings.name = name.to_string();
                    rest
                }
                None => basename,
            },
            None => basename,
        };

        if tpl_settings.name.is_empty() {
            tpl_settings.name = self.templates.len().to_string();
        }
        tpl_settings.filename = rest.to_string();

        let body = settings::parse_settings(&mut tpl_settings, contents)?;

        if tpl_settings.event_filter.is_empty() {
            warn!(
                template = %tpl_settings.name,
                "output template has no event filter, nothing will be generated"
            );
        }

        for required in &tpl_settings.required_vars {
            if !self.user_vars.contains_key(required) {
                return Err(RenderError::MissingRequiredVar(required.clone()));
            }
        }

        info!(name = %tpl_settings.name, filename = %tpl_settings.filename, "loaded template");

        self.templates.push(OutputTemplate {
            name: tpl_settings.name.clone(),
            body: body.to_string(),
            settings: tpl_settings,
        });
        self.generated_paths.push(None);

        Ok(())
    }

    pub fn load_template_file(&mut self, path: &Path) -> Result<(), RenderError> {
        let contents = std::fs::read_to_string(path)?;
        self.add_template(&contents, &path.to_string_lossy())
    }

    /// One-off render with no current template.
    pub fn render(&self, input: &str, view: &RenderView) -> Result<String, RenderError> {
        let mut r = Renderer::new(self, view, None);
        r.generate(input)
    }

    /// Render validity check, used when loading user configuration.
    pub fn validate(&self, input: &str, view: &RenderView) -> bool {
        self.render(input, view).is_ok()
    }

    /// The generated path of a template from the latest event trigger.
    pub fn generated_path(&self, name: Option<&str>) -> Option<&str> {
        match name {
            Some(name) => self
                .templates
                .iter()
                .position(|t| t.name == name)
                .and_then(|i| self.generated_paths[i].as_deref()),
            None => self.generated_paths.first().and_then(|p| p.as_deref()),
        }
    }

    /// Render every template registered for `event`, write the results
    /// to disk and publish them. A failing template is skipped with a
    /// logged diagnostic; the rest still render.
    pub fn generate_event(
        &mut self,
        event: &str,
        view: &RenderView,
        publisher: &mut dyn Publisher,
    ) -> Vec<Generated> {
        for p in &mut self.generated_paths {
            *p = None;
        }

        let mut results = Vec::new();

        for i in 0..self.templates.len() {
            if !self.templates[i].settings.fires_on(event) {
                continue;
            }

            // The target path renders first so the template body (and any
            // spawned command) can refer to it.
            let dir_template = view.paths.get(PathKind::Template).to_string();
            let path_result = {
                let mut r = Renderer::new(self, view, Some(i));
                r.generate(&dir_template).and_then(|dir| {
                    let fname = r.generate(&self.templates[i].settings.filename)?;
                    Ok((dir, replace_whitespace(&fname)))
                })
            };

            let (dir, fname) = match path_result {
                Ok(parts) => parts,
                Err(e) => {
                    error!(template = %self.templates[i].name, %event, "failed to generate template path: {e}");
                    continue;
                }
            };

            let full = if dir.is_empty() {
                fname.clone()
            } else {
                format!("{}/{}", dir.trim_end_matches('/'), fname)
            };
            self.generated_paths[i] = Some(full.clone());

            let body_result = {
                let mut r = Renderer::new(self, view, Some(i));
                r.generate(&self.templates[i].body)
            };

            let body = match body_result {
                Ok(body) => body,
                Err(e) => {
                    error!(template = %self.templates[i].name, %event, "failed to generate template: {e}");
                    continue;
                }
            };

            let t = &self.templates[i];

            if !t.settings.nozmq {
                publisher.publish(t.settings.topic(), &body);
            }

            let mut written = None;
            if !t.settings.nofile {
                if !dir.is_empty() {
                    if let Err(e) = std::fs::create_dir_all(&dir) {
                        error!("failed to create directory {dir}: {e}");
                    }
                }

                match std::fs::write(&full, &body) {
                    Ok(()) => written = Some(PathBuf::from(&full)),
                    Err(e) => error!("failed to write template output {full}: {e}"),
                }
            }

            results.push(Generated {
                name: t.name.clone(),
                topic: t.settings.topic().to_string(),
                path: written,
                body,
            });
        }

        results
    }

    /// Expand and spawn an event command. Spawn failures are logged, not
    /// propagated; the door must keep working without its observers.
    pub fn execute(&self, command_line: &str, view: &RenderView) {
        match self.render(command_line, view) {
            Ok(expanded) => command::run_detached(&expanded),
            Err(e) => error!("failed to expand command \"{command_line}\": {e}"),
        }
    }
}

/// Scanner position inside a template string.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    rest: &'a str,
    pub line: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s, line: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        if c == '\n' {
            self.line += 1;
        }
        self.rest = &self.rest[c.len_utf8()..];
        Some(c)
    }

    /// Read a `%var%` name, positioned just after the opening `%`.
    /// Consumes the closing `%`.
    fn take_var(&mut self) -> Result<String, RenderError> {
        let mut name = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(RenderError::Unterminated {
                        var: name,
                        line: self.line,
                    });
                }
                Some('%') => {
                    self.bump();
                    return Ok(name);
                }
                Some(c) => {
                    name.push(c);
                    self.bump();
                }
            }
        }
    }
}

/// One in-flight render over a borrowed engine and view.
pub(crate) struct Renderer<'a> {
    pub(crate) templates: &'a [OutputTemplate],
    pub(crate) user_vars: &'a HashMap<String, UserVar>,
    pub(crate) generated_paths: &'a [Option<String>],
    pub(crate) view: &'a RenderView<'a>,
    pub(crate) current_template: Option<usize>,
    pub(crate) depth: usize,
    /// Guards against recursing while resolving a `|rel` base path.
    pub(crate) no_relative_path: bool,
    /// Loop variables, innermost last. Consulted before user vars.
    pub(crate) loop_vars: Vec<(String, String)>,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(
        engine: &'a OutputEngine,
        view: &'a RenderView<'a>,
        current_template: Option<usize>,
    ) -> Self {
        Self {
            templates: &engine.templates,
            user_vars: &engine.user_vars,
            generated_paths: &engine.generated_paths,
            view,
            current_template,
            depth: 0,
            no_relative_path: false,
            loop_vars: Vec::new(),
        }
    }

    /// Render a template string into its final text.
    pub(crate) fn generate(&mut self, input: &str) -> Result<String, RenderError> {
        if self.depth >= OUTPUT_MAX_RECURSION {
            return Err(RenderError::RecursionLimit(OUTPUT_MAX_RECURSION));
        }

        let mut cur = Cursor::new(input);
        let mut out = String::with_capacity(input.len());

        while let Some(c) = cur.peek() {
            if c != '%' {
                out.push(c);
                cur.bump();
                continue;
            }

            cur.bump();

            // %% is a literal %.
            if cur.peek() == Some('%') {
                out.push('%');
                cur.bump();
                continue;
            }

            let line = cur.line;
            let var = cur.take_var()?;

            self.depth += 1;
            let piece = if var.starts_with("for") {
                let expanded = self.expand_inner(&var)?;
                self.parse_for_loop(&mut cur, &expanded, line)
            } else if var.starts_with("if") {
                let expanded = self.expand_inner(&var)?;
                self.parse_if(&mut cur, &expanded, line)
            } else {
                self.translate_required(&var)
            };
            self.depth -= 1;

            out.push_str(&piece?);
        }

        Ok(out)
    }

    /// Expand `$name$` references so the resolved value becomes part of
    /// the surrounding variable name.
    pub(crate) fn expand_inner(&mut self, var: &str) -> Result<String, RenderError> {
        if !var.contains('$') {
            return Ok(var.to_string());
        }

        let mut out = String::with_capacity(var.len());
        let mut rest = var;

        while let Some(start) = rest.find('$') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];

            let end = after
                .find('$')
                .ok_or_else(|| RenderError::InnerUnterminated(var.to_string()))?;

            let inner = &after[..end];
            let value = translate::translate(self, inner)?
                .ok_or_else(|| RenderError::UnknownVar(inner.to_string()))?;
            out.push_str(&value);

            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Full variable resolution: inner expansion then the translator
    /// chain. Unknown variables abort the render.
    fn translate_required(&mut self, var: &str) -> Result<String, RenderError> {
        let expanded = self.expand_inner(var)?;
        translate::translate(self, &expanded)?
            .ok_or_else(|| RenderError::UnknownVar(expanded.clone()))
    }

    /// Resolve a `for`/`if` operand: variables give their value,
    /// anything else stays literal.
    fn try_translate(&mut self, token: &str) -> Option<String> {
        let expanded = self.expand_inner(token).ok()?;
        translate::translate(self, &expanded).ok().flatten()
    }

    fn operand_as_int(&mut self, token: &str) -> Result<i64, RenderError> {
        let resolved = self.try_translate(token);
        let text = resolved.as_deref().unwrap_or(token);
        text.trim()
            .parse::<i64>()
            .map_err(|_| RenderError::NotAnInteger(text.to_string()))
    }

    /// Extract the raw body between the current position and the
    /// matching `%<end_tag>%`, honouring nesting.
    fn extract_body(
        &self,
        cur: &mut Cursor<'_>,
        start_tag: &str,
        end_tag: &'static str,
        expr: &str,
        start_line: usize,
        skip_surrounding_ws: bool,
    ) -> Result<String, RenderError> {
        if skip_surrounding_ws {
            if let Some(' ') | Some('\n') = cur.peek() {
                cur.bump();
            }
        }

        let mut body = String::new();
        let mut nesting = 0usize;

        loop {
            match cur.peek() {
                None => {
                    return Err(RenderError::MissingEnd {
                        end_tag,
                        expr: expr.to_string(),
                        line: start_line,
                    });
                }
                Some('%') => {
                    let mut probe = cur.clone();
                    probe.bump();

                    if probe.peek() == Some('%') {
                        probe.bump();
                        body.push_str("%%");
                        *cur = probe;
                        continue;
                    }

                    let name = probe.take_var()?;

                    if name == end_tag && nesting == 0 {
                        *cur = probe;
                        if skip_surrounding_ws && cur.peek() == Some('\n') {
                            cur.bump();
                        }
                        return Ok(body);
                    }

                    if name.starts_with(start_tag) {
                        nesting += 1;
                    } else if name == end_tag {
                        nesting -= 1;
                    }

                    body.push('%');
                    body.push_str(&name);
                    body.push('%');
                    *cur = probe;
                }
                Some(c) => {
                    body.push(c);
                    cur.bump();
                }
            }
        }
    }

    /// `%for <ident> in <range-or-list>% ... %endfor%`
    fn parse_for_loop(
        &mut self,
        cur: &mut Cursor<'_>,
        expr: &str,
        start_line: usize,
    ) -> Result<String, RenderError> {
        let bad = |what: &'static str| RenderError::BadExpr {
            what,
            expr: expr.to_string(),
            line: start_line,
        };

        let spec = expr.strip_prefix("for").ok_or_else(|| bad("for"))?.trim();
        let (var_name, values_str) = spec.split_once(" in ").ok_or_else(|| bad("for"))?;
        let var_name = var_name.trim();
        let values_str = values_str.trim();

        if var_name.is_empty() || var_name.contains(char::is_whitespace) {
            return Err(bad("for"));
        }

        let values: Vec<String> = if let Some((lo, hi)) = values_str.split_once("..") {
            let lo = self.operand_as_int(lo.trim())?;
            let hi = self.operand_as_int(hi.trim())?;
            if lo > hi {
                return Err(RenderError::ReversedRange(lo, hi));
            }
            (lo..=hi).map(|v| v.to_string()).collect()
        } else if let Some(list) = values_str.strip_prefix('[') {
            let list = list.strip_suffix(']').ok_or_else(|| bad("for"))?;
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            return Err(bad("for"));
        };

        if self.loop_vars.iter().any(|(n, _)| n == var_name)
            || self.user_vars.contains_key(var_name)
        {
            return Err(RenderError::DuplicateVar(var_name.to_string()));
        }

        let body = self.extract_body(cur, "for", "endfor", expr, start_line, true)?;

        self.loop_vars.push((var_name.to_string(), String::new()));

        let mut out = String::new();
        let mut failure = None;

        for value in values {
            if let Some(slot) = self.loop_vars.last_mut() {
                slot.1 = value;
            }

            match self.generate(&body) {
                Ok(piece) => out.push_str(&piece),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.loop_vars.pop();

        match failure {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// `%if <val> <op> <val>% ... %endif%` on integer values.
    fn parse_if(
        &mut self,
        cur: &mut Cursor<'_>,
        expr: &str,
        start_line: usize,
    ) -> Result<String, RenderError> {
        let bad = || RenderError::BadExpr {
            what: "if",
            expr: expr.to_string(),
            line: start_line,
        };

        let spec = expr.strip_prefix("if").ok_or_else(bad)?.trim();
        let mut tokens = spec.split_whitespace();
        let lhs = tokens.next().ok_or_else(bad)?;
        let op = tokens.next().ok_or_else(bad)?;
        let rhs = tokens.next().ok_or_else(bad)?;

        let a = self.operand_as_int(lhs)?;
        let b = self.operand_as_int(rhs)?;

        let truth = match op {
            "==" => a == b,
            "!=" => a != b,
            "<=" => a <= b,
            ">=" => a >= b,
            "<" => a < b,
            ">" => a > b,
            _ => return Err(RenderError::UnknownOperator(op.to_string())),
        };

        let body = self.extract_body(cur, "if", "endif", expr, start_line, false)?;

        if truth {
            self.generate(&body)
        } else {
            Ok(String::new())
        }
    }
}
