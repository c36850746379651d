//! The `|dir,abs,rel(<path>)` path modifier grammar.

use crate::engine::Renderer;
use crate::error::RenderError;
use catcierge_core::SplitPath;
use std::path::{Component, Path, PathBuf};

/// Whitespace and `:` are unsafe in generated filenames.
pub(crate) fn replace_whitespace(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' | '\t' | '\n' | ':' => '_',
            other => other,
        })
        .collect()
}

fn absolutize(path: &str) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| PathBuf::from(path))
}

/// Compute `target` relative to the directory `base`.
pub(crate) fn relative_path(base: &Path, target: &Path) -> String {
    let base_parts: Vec<Component> = base.components().collect();
    let target_parts: Vec<Component> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..base_parts.len() {
        parts.push("..".to_string());
    }
    for comp in &target_parts[common..] {
        parts.push(comp.as_os_str().to_string_lossy().into_owned());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Resolve a path variable, applying any `|` operations in `var`.
///
/// Operations apply in a fixed order regardless of how they were
/// written: dir, then absolute, then relative. When no explicit `rel`
/// base is given the current template's `rootpath` setting applies.
pub(crate) fn get_path(
    r: &mut Renderer<'_>,
    var: &str,
    path: &SplitPath,
) -> Result<Option<String>, RenderError> {
    let mut is_dir = false;
    let mut is_abs = false;
    let mut rel_to: Option<String> = None;

    if let Some((_, ops)) = var.split_once('|') {
        for op in ops.split(',') {
            let op = op.trim();

            if op == "dir" {
                is_dir = true;
            } else if op == "abs" {
                is_abs = true;
            } else if let Some(rest) = op.strip_prefix("rel") {
                if rel_to.is_some() {
                    return Err(RenderError::BadExpr {
                        what: "path",
                        expr: var.to_string(),
                        line: 0,
                    });
                }

                // The nested path uses @ instead of % so it doesn't end
                // the parent variable early.
                let inner = rest
                    .strip_prefix('(')
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| RenderError::BadExpr {
                        what: "path",
                        expr: var.to_string(),
                        line: 0,
                    })?;

                rel_to = Some(inner.replace('@', "%"));
            }
        }
    }

    let mut the_path = if is_dir {
        path.dir.clone()
    } else {
        let full = path.full();
        if full.is_empty() {
            path.dir.clone()
        } else {
            full
        }
    };

    if is_abs {
        the_path = absolutize(&the_path).to_string_lossy().into_owned();
    }

    // Fall back to the template-wide root path.
    if rel_to.is_none() {
        if let Some(idx) = r.current_template {
            rel_to = r.templates[idx].settings.rootpath.clone();
        }
    }

    if let Some(rel) = rel_to {
        if !r.no_relative_path {
            r.no_relative_path = true;
            let rendered = r.generate(&rel);
            r.no_relative_path = false;
            let rel_base = rendered?;

            let abs_target = absolutize(&the_path);
            let abs_base = absolutize(&rel_base);

            return Ok(Some(relative_path(&abs_base, &abs_target)));
        }
    }

    // Stored paths may themselves contain variables.
    Ok(Some(r.generate(&the_path)?))
}

/// Wrap a plain path string into a [`SplitPath`] and resolve it.
pub(crate) fn create_and_get_path(
    r: &mut Renderer<'_>,
    var: &str,
    path_val: Option<&str>,
    dir_only: bool,
) -> Result<Option<String>, RenderError> {
    let Some(path_val) = path_val else {
        return Ok(None);
    };

    let path = if dir_only {
        SplitPath::new(path_val, "")
    } else {
        SplitPath::from_full(path_val)
    };

    get_path(r, var, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_whitespace() {
        assert_eq!(replace_whitespace("a b\tc:d\ne"), "a_b_c_d_e");
        assert_eq!(replace_whitespace("clean.json"), "clean.json");
    }

    #[test]
    fn test_relative_path_sibling() {
        let rel = relative_path(Path::new("/data/www"), Path::new("/data/img/cat.png"));
        assert_eq!(rel, "../img/cat.png");
    }

    #[test]
    fn test_relative_path_below() {
        let rel = relative_path(Path::new("/data"), Path::new("/data/img/cat.png"));
        assert_eq!(rel, "img/cat.png");
    }

    #[test]
    fn test_relative_path_identical() {
        let rel = relative_path(Path::new("/data/img"), Path::new("/data/img"));
        assert_eq!(rel, ".");
    }

    #[test]
    fn test_relative_path_above() {
        let rel = relative_path(Path::new("/data/img/deep"), Path::new("/data"));
        assert_eq!(rel, "../..");
    }
}
