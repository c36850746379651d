//! Per-template settings parsed from `%!key value` header lines.

use crate::error::RenderError;

/// Settings recognised at the top of a template. Parsing stops at the
/// first line that is not a `%!` setting.
#[derive(Debug, Clone, Default)]
pub struct TemplateSettings {
    pub name: String,
    /// Output filename, may contain template variables.
    pub filename: String,
    /// Event names this template fires on; `*` or `all` match everything.
    pub event_filter: Vec<String>,
    /// Pub/sub topic, defaults to the template name.
    pub topic: Option<String>,
    pub nozmq: bool,
    pub nofile: bool,
    /// Base path for `|rel` operations inside this template.
    pub rootpath: Option<String>,
    /// User variables that must exist when the template is loaded.
    pub required_vars: Vec<String>,
}

impl TemplateSettings {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }

    pub fn fires_on(&self, event: &str) -> bool {
        self.event_filter
            .iter()
            .any(|e| e == "all" || e == "*" || e == event)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Consume the `%!` header of a template.
///
/// Returns the parsed settings and the template body that follows them.
pub fn parse_settings<'a>(
    settings: &mut TemplateSettings,
    template: &'a str,
) -> Result<&'a str, RenderError> {
    let mut rest = template;

    loop {
        let line_end = rest.find('\n');
        let line = match line_end {
            Some(idx) => &rest[..idx],
            None => rest,
        };

        let trimmed = line.trim_start();
        let Some(setting) = trimmed.strip_prefix("%!") else {
            break;
        };

        let setting = setting.trim();
        let (key, value) = match setting.split_once(char::is_whitespace) {
            Some((k, v)) => (k, v.trim()),
            None => (setting, ""),
        };

        match key {
            "event" => settings.event_filter = parse_list(value),
            "name" => settings.name = value.to_string(),
            "filename" => settings.filename = value.to_string(),
            "topic" => {
                if value.is_empty() {
                    return Err(RenderError::EmptyTopic);
                }
                settings.topic = Some(value.to_string());
            }
            "nozmq" => settings.nozmq = true,
            "nofile" => settings.nofile = true,
            "rootpath" => settings.rootpath = Some(value.to_string()),
            "required" => settings.required_vars = parse_list(value),
            // Kept so two-setting templates can be exercised in tests.
            "nop" => {}
            _ => return Err(RenderError::UnknownSetting(setting.to_string())),
        }

        match line_end {
            Some(idx) => rest = &rest[idx + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }

    Ok(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_stop_at_body() {
        let mut s = TemplateSettings::default();
        let body = parse_settings(
            &mut s,
            "%!name cats\n%!event match_group_done, do_lockout\nHello %state%\n",
        )
        .unwrap();

        assert_eq!(s.name, "cats");
        assert_eq!(s.event_filter, vec!["match_group_done", "do_lockout"]);
        assert_eq!(body, "Hello %state%\n");
    }

    #[test]
    fn test_all_settings() {
        let mut s = TemplateSettings::default();
        let body = parse_settings(
            &mut s,
            "%!name n\n%!filename out_%time%.json\n%!topic cat/events\n%!nozmq\n%!nofile\n%!rootpath /srv\n%!required home, score\nbody",
        )
        .unwrap();

        assert_eq!(s.filename, "out_%time%.json");
        assert_eq!(s.topic(), "cat/events");
        assert!(s.nozmq);
        assert!(s.nofile);
        assert_eq!(s.rootpath.as_deref(), Some("/srv"));
        assert_eq!(s.required_vars, vec!["home", "score"]);
        assert_eq!(body, "body");
    }

    #[test]
    fn test_unknown_setting_is_an_error() {
        let mut s = TemplateSettings::default();
        assert!(matches!(
            parse_settings(&mut s, "%!frobnicate yes\nbody"),
            Err(RenderError::UnknownSetting(_))
        ));
    }

    #[test]
    fn test_empty_topic_is_an_error() {
        let mut s = TemplateSettings::default();
        assert!(matches!(
            parse_settings(&mut s, "%!topic\nbody"),
            Err(RenderError::EmptyTopic)
        ));
    }

    #[test]
    fn test_topic_defaults_to_name() {
        let mut s = TemplateSettings::default();
        s.name = "fallback".to_string();
        parse_settings(&mut s, "body only").unwrap();
        assert_eq!(s.topic(), "fallback");
    }

    #[test]
    fn test_event_wildcard() {
        let mut s = TemplateSettings::default();
        parse_settings(&mut s, "%!event *\n").unwrap();
        assert!(s.fires_on("match_group_done"));
        assert!(s.fires_on("anything"));

        let mut s2 = TemplateSettings::default();
        parse_settings(&mut s2, "%!event all\n").unwrap();
        assert!(s2.fires_on("save_img"));
    }

    #[test]
    fn test_single_line_template_with_setting() {
        let mut s = TemplateSettings::default();
        let body = parse_settings(&mut s, "%!event save_img").unwrap();
        assert!(s.fires_on("save_img"));
        assert_eq!(body, "");
    }
}
