//! The directory/filename/full path triple used for every saved artifact.

use serde::{Deserialize, Serialize};

/// A path kept as a coupled directory + filename pair.
///
/// Templates can refer to the directory, the filename or the joined full
/// path of any saved image, so all three are maintained together.
/// `full` is always `dir` + `/` + `filename` (or just `dir` when there is
/// no filename yet).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPath {
    pub dir: String,
    pub filename: String,
}

impl SplitPath {
    pub fn new(dir: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.into(),
        }
    }

    /// Split a plain path string on the last separator.
    pub fn from_full(full: &str) -> Self {
        match full.rfind('/') {
            Some(idx) => Self::new(&full[..idx], &full[idx + 1..]),
            None => Self::new("", full),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dir.is_empty() && self.filename.is_empty()
    }

    pub fn reset(&mut self) {
        self.dir.clear();
        self.filename.clear();
    }

    /// The joined path. A trailing separator on `dir` is not duplicated.
    pub fn full(&self) -> String {
        if self.filename.is_empty() {
            return self.dir.clone();
        }

        if self.dir.is_empty() {
            return self.filename.clone();
        }

        if self.dir.ends_with('/') {
            format!("{}{}", self.dir, self.filename)
        } else {
            format!("{}/{}", self.dir, self.filename)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_joins_with_separator() {
        let p = SplitPath::new("a/b", "c.png");
        assert_eq!(p.full(), "a/b/c.png");
    }

    #[test]
    fn test_full_no_double_separator() {
        let p = SplitPath::new("a/b/", "c.png");
        assert_eq!(p.full(), "a/b/c.png");
    }

    #[test]
    fn test_dir_only() {
        let p = SplitPath::new("a/b", "");
        assert_eq!(p.full(), "a/b");
    }

    #[test]
    fn test_from_full() {
        let p = SplitPath::from_full("x/y/z.png");
        assert_eq!(p.dir, "x/y");
        assert_eq!(p.filename, "z.png");
        assert_eq!(p.full(), "x/y/z.png");

        let bare = SplitPath::from_full("z.png");
        assert_eq!(bare.dir, "");
        assert_eq!(bare.filename, "z.png");
        assert_eq!(bare.full(), "z.png");
    }

    #[test]
    fn test_reset() {
        let mut p = SplitPath::new("a", "b");
        p.reset();
        assert!(p.is_empty());
        assert_eq!(p.full(), "");
    }
}
