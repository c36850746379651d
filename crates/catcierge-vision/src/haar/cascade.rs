//! Loader and runtime for `opencv_traincascade` Haar classifiers.
//!
//! Parses the new-style cascade XML (BOOST stages over HAAR features)
//! and runs the classic multi-scale sliding window detection: the image
//! is repeatedly downscaled, every window position is evaluated against
//! the stage chain on integral images, and surviving windows are grouped
//! into detections by neighbor count.

use catcierge_core::Rect;
use image::imageops::FilterType;
use image::GrayImage;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("failed to read cascade file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cascade xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed cascade: {0}")]
    Malformed(String),

    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// One weighted rectangle of a Haar feature, in base window coordinates.
#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    weight: f64,
}

#[derive(Debug, Clone, Default)]
struct Feature {
    rects: Vec<WeightedRect>,
}

/// A decision node: descend left when the normalised feature value is
/// below the threshold. Non-positive child indices are leaf references.
#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone, Default)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
struct Stage {
    threshold: f64,
    weak: Vec<WeakClassifier>,
}

/// A loaded cascade classifier.
#[derive(Debug, Clone)]
pub struct Cascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

/// Knobs for [`Cascade::detect`].
#[derive(Debug, Clone, Copy)]
pub struct DetectParams {
    pub scale_factor: f64,
    pub min_neighbors: usize,
    /// Smallest accepted detection, (0, 0) for unbounded.
    pub min_size: (u32, u32),
    /// Largest accepted detection, (0, 0) for unbounded.
    pub max_size: (u32, u32),
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
            max_size: (0, 0),
        }
    }
}

/// Summed-area tables for plain and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let w = img.width() as usize;
        let h = img.height() as usize;
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }

        Self { stride, sum, sq }
    }

    fn rect(table: &[f64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        table[(y + h) * stride + x + w] + table[y * stride + x]
            - table[y * stride + x + w]
            - table[(y + h) * stride + x]
    }

    fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sq, self.stride, x, y, w, h)
    }
}

fn parse_numbers<T: std::str::FromStr>(text: &str) -> Result<Vec<T>, CascadeError> {
    text.split_whitespace()
        .map(|tok| {
            tok.trim_end_matches('.')
                .parse::<T>()
                .or_else(|_| tok.parse::<T>())
                .map_err(|_| CascadeError::Malformed(format!("bad number \"{tok}\"")))
        })
        .collect()
}

impl Cascade {
    pub fn from_file(path: &Path) -> Result<Self, CascadeError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(xml: &str) -> Result<Self, CascadeError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut cascade = Cascade {
            window_width: 0,
            window_height: 0,
            stages: Vec::new(),
            features: Vec::new(),
        };

        loop {
            match reader.read_event()? {
                XmlEvent::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

                    if name == "_" {
                        match path.last().map(String::as_str) {
                            Some("stages") => cascade.stages.push(Stage::default()),
                            Some("weakClassifiers") => {
                                let stage = cascade.stages.last_mut().ok_or_else(|| {
                                    CascadeError::Malformed("weak classifier outside stage".into())
                                })?;
                                stage.weak.push(WeakClassifier::default());
                            }
                            Some("features") => cascade.features.push(Feature::default()),
                            _ => {}
                        }
                    }

                    path.push(name);
                }
                XmlEvent::End(_) => {
                    path.pop();
                }
                XmlEvent::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| CascadeError::Malformed(e.to_string()))?
                        .into_owned();
                    cascade.handle_text(&path, text.trim())?;
                }
                XmlEvent::Eof => break,
                _ => {}
            }
        }

        cascade.validate()?;

        Ok(cascade)
    }

    fn handle_text(&mut self, path: &[String], text: &str) -> Result<(), CascadeError> {
        let leaf = match path.last() {
            Some(l) => l.as_str(),
            None => return Ok(()),
        };
        let parent = path
            .len()
            .checked_sub(2)
            .and_then(|i| path.get(i))
            .map(String::as_str)
            .unwrap_or("");

        match (parent, leaf) {
            ("cascade", "stageType") => {
                if text != "BOOST" {
                    return Err(CascadeError::Unsupported(format!(
                        "stage type \"{text}\", only BOOST is supported"
                    )));
                }
            }
            ("cascade", "featureType") => {
                if text != "HAAR" {
                    return Err(CascadeError::Unsupported(format!(
                        "feature type \"{text}\", only HAAR is supported"
                    )));
                }
            }
            ("cascade", "width") => {
                self.window_width = parse_numbers::<u32>(text)?
                    .first()
                    .copied()
                    .unwrap_or_default();
            }
            ("cascade", "height") => {
                self.window_height = parse_numbers::<u32>(text)?
                    .first()
                    .copied()
                    .unwrap_or_default();
            }
            ("_", "stageThreshold") => {
                let stage = self
                    .stages
                    .last_mut()
                    .ok_or_else(|| CascadeError::Malformed("stage threshold w/o stage".into()))?;
                stage.threshold = parse_numbers::<f64>(text)?
                    .first()
                    .copied()
                    .unwrap_or_default();
            }
            ("_", "internalNodes") => {
                let nums = parse_numbers::<f64>(text)?;
                if nums.len() % 4 != 0 || nums.is_empty() {
                    return Err(CascadeError::Malformed(
                        "internalNodes is not a list of quads".into(),
                    ));
                }

                let weak = self
                    .stages
                    .last_mut()
                    .and_then(|s| s.weak.last_mut())
                    .ok_or_else(|| CascadeError::Malformed("nodes w/o weak classifier".into()))?;

                for quad in nums.chunks(4) {
                    weak.nodes.push(Node {
                        left: quad[0] as i32,
                        right: quad[1] as i32,
                        feature: quad[2] as usize,
                        threshold: quad[3],
                    });
                }
            }
            ("_", "leafValues") => {
                let weak = self
                    .stages
                    .last_mut()
                    .and_then(|s| s.weak.last_mut())
                    .ok_or_else(|| CascadeError::Malformed("leaves w/o weak classifier".into()))?;
                weak.leaves = parse_numbers::<f64>(text)?;
            }
            ("_", "tilted") => {
                if text != "0" {
                    return Err(CascadeError::Unsupported(
                        "tilted features are not supported (train with BASIC mode)".into(),
                    ));
                }
            }
            ("rects", "_") => {
                let nums = parse_numbers::<f64>(text)?;
                if nums.len() != 5 {
                    return Err(CascadeError::Malformed(format!(
                        "feature rect \"{text}\" is not x y w h weight"
                    )));
                }

                let feature = self
                    .features
                    .last_mut()
                    .ok_or_else(|| CascadeError::Malformed("rect w/o feature".into()))?;
                feature.rects.push(WeightedRect {
                    x: nums[0] as u32,
                    y: nums[1] as u32,
                    w: nums[2] as u32,
                    h: nums[3] as u32,
                    weight: nums[4],
                });
            }
            _ => {}
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), CascadeError> {
        if self.window_width < 3 || self.window_height < 3 {
            return Err(CascadeError::Malformed(format!(
                "bad base window {}x{}",
                self.window_width, self.window_height
            )));
        }

        if self.stages.is_empty() {
            return Err(CascadeError::Malformed("no stages".into()));
        }

        for stage in &self.stages {
            for weak in &stage.weak {
                if weak.nodes.is_empty() || weak.leaves.len() < weak.nodes.len() + 1 {
                    return Err(CascadeError::Malformed(
                        "weak classifier node/leaf count mismatch".into(),
                    ));
                }

                for node in &weak.nodes {
                    if node.feature >= self.features.len() {
                        return Err(CascadeError::Malformed(format!(
                            "node references feature {} of {}",
                            node.feature,
                            self.features.len()
                        )));
                    }
                }
            }
        }

        for feature in &self.features {
            for r in &feature.rects {
                if r.x + r.w > self.window_width || r.y + r.h > self.window_height {
                    return Err(CascadeError::Malformed(
                        "feature rect outside base window".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    fn eval_feature(&self, integral: &Integral, feature: usize, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * integral.rect_sum(x + r.x, y + r.y, r.w, r.h))
            .sum()
    }

    fn eval_weak(&self, weak: &WeakClassifier, integral: &Integral, x: u32, y: u32, inv: f64) -> f64 {
        let mut idx: i32 = 0;
        loop {
            let node = &weak.nodes[idx as usize];
            let val = self.eval_feature(integral, node.feature, x, y) * inv;
            let next = if val < node.threshold {
                node.left
            } else {
                node.right
            };

            if next <= 0 {
                return weak.leaves[(-next) as usize];
            }
            idx = next;
        }
    }

    fn eval_window(&self, integral: &Integral, x: u32, y: u32) -> bool {
        // Variance-normalise over the slightly inset window so lighting
        // changes do not move the trained thresholds.
        let nw = self.window_width - 2;
        let nh = self.window_height - 2;
        let area = (nw * nh) as f64;
        let sum = integral.rect_sum(x + 1, y + 1, nw, nh);
        let sq = integral.rect_sq_sum(x + 1, y + 1, nw, nh);

        let nf2 = area * sq - sum * sum;
        let inv = if nf2 > 0.0 { 1.0 / nf2.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let score: f64 = stage
                .weak
                .iter()
                .map(|w| self.eval_weak(w, integral, x, y, inv))
                .sum();

            if score < stage.threshold {
                return false;
            }
        }

        true
    }

    /// Multi-scale detection over a greyscale image.
    pub fn detect(&self, img: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        let mut candidates = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (self.window_width as f64 * factor).round() as u32;
            let win_h = (self.window_height as f64 * factor).round() as u32;

            if win_w > img.width() || win_h > img.height() {
                break;
            }

            if params.max_size.0 > 0
                && (win_w > params.max_size.0 || win_h > params.max_size.1)
            {
                break;
            }

            if win_w < params.min_size.0 || win_h < params.min_size.1 {
                factor *= params.scale_factor;
                continue;
            }

            let sw = (img.width() as f64 / factor).round() as u32;
            let sh = (img.height() as f64 / factor).round() as u32;
            if sw < self.window_width || sh < self.window_height {
                break;
            }

            let scaled;
            let view = if factor == 1.0 {
                img
            } else {
                scaled = image::imageops::resize(img, sw, sh, FilterType::Triangle);
                &scaled
            };

            let integral = Integral::new(view);
            let step = if factor > 2.0 { 1 } else { 2 };

            let mut y = 0;
            while y + self.window_height <= view.height() {
                let mut x = 0;
                while x + self.window_width <= view.width() {
                    if self.eval_window(&integral, x, y) {
                        candidates.push(Rect::new(
                            (x as f64 * factor).round() as i32,
                            (y as f64 * factor).round() as i32,
                            win_w,
                            win_h,
                        ));
                    }
                    x += step;
                }
                y += step;
            }

            factor *= params.scale_factor;
        }

        group_rectangles(candidates, params.min_neighbors, 0.2)
    }
}

fn rects_similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * 0.5 * (a.width.min(b.width) + a.height.min(b.height)) as f64;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && (((a.x + a.width as i32) - (b.x + b.width as i32)).abs() as f64) <= delta
        && (((a.y + a.height as i32) - (b.y + b.height as i32)).abs() as f64) <= delta
}

/// Cluster similar rectangles, average each class and keep those with at
/// least `min_neighbors` members. Classes are returned biggest first.
fn group_rectangles(rects: Vec<Rect>, min_neighbors: usize, eps: f64) -> Vec<Rect> {
    if rects.is_empty() {
        return rects;
    }

    if min_neighbors == 0 {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if rects_similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    let mut classes: std::collections::HashMap<usize, (usize, i64, i64, i64, i64)> =
        std::collections::HashMap::new();

    for i in 0..n {
        let root = find(&mut parent, i);
        let r = &rects[i];
        let entry = classes.entry(root).or_insert((0, 0, 0, 0, 0));
        entry.0 += 1;
        entry.1 += r.x as i64;
        entry.2 += r.y as i64;
        entry.3 += r.width as i64;
        entry.4 += r.height as i64;
    }

    let mut grouped: Vec<(usize, Rect)> = classes
        .into_values()
        .filter(|(count, ..)| *count >= min_neighbors)
        .map(|(count, x, y, w, h)| {
            let c = count as i64;
            (
                count,
                Rect::new(
                    (x / c) as i32,
                    (y / c) as i32,
                    (w / c) as u32,
                    (h / c) as u32,
                ),
            )
        })
        .collect();

    grouped.sort_by(|a, b| b.0.cmp(&a.0));
    grouped.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Cascade with one stage and one stump over a single full-window
    /// rect. `leaf_pass` is returned when the (normalised) feature value
    /// is >= -1e9, i.e. always.
    fn trivial_cascade(stage_threshold: f64, leaf_pass: f64) -> String {
        format!(
            r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>{stage_threshold}</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 -1.0e+09</internalNodes>
          <leafValues>-1.0 {leaf_pass}</leafValues>
        </_>
      </weakClassifiers>
    </_>
  </stages>
  <features>
    <_>
      <rects>
        <_>0 0 8 8 1.</_>
      </rects>
      <tilted>0</tilted>
    </_>
  </features>
</cascade>
</opencv_storage>
"#
        )
    }

    #[test]
    fn test_parse_trivial_cascade() {
        let cascade = Cascade::from_str(&trivial_cascade(0.5, 1.0)).unwrap();
        assert_eq!(cascade.window_size(), (8, 8));
        assert_eq!(cascade.stages.len(), 1);
        assert_eq!(cascade.features.len(), 1);
    }

    #[test]
    fn test_always_pass_cascade_detects() {
        let cascade = Cascade::from_str(&trivial_cascade(0.5, 1.0)).unwrap();
        let img = GrayImage::from_fn(32, 32, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));

        let rects = cascade.detect(&img, &DetectParams::default());
        assert!(!rects.is_empty());
    }

    #[test]
    fn test_never_pass_cascade_detects_nothing() {
        // Leaf value below the stage threshold on every window.
        let cascade = Cascade::from_str(&trivial_cascade(0.5, -1.0)).unwrap();
        let img = GrayImage::from_fn(32, 32, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));

        let rects = cascade.detect(&img, &DetectParams::default());
        assert!(rects.is_empty());
    }

    #[test]
    fn test_min_size_filters_scales() {
        let cascade = Cascade::from_str(&trivial_cascade(0.5, 1.0)).unwrap();
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));

        let rects = cascade.detect(
            &img,
            &DetectParams {
                min_size: (16, 16),
                ..Default::default()
            },
        );

        assert!(rects.iter().all(|r| r.width >= 16 && r.height >= 16));
    }

    #[test]
    fn test_tilted_rejected() {
        let xml = trivial_cascade(0.5, 1.0).replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        assert!(matches!(
            Cascade::from_str(&xml),
            Err(CascadeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_rect_outside_window_rejected() {
        let xml = trivial_cascade(0.5, 1.0).replace("0 0 8 8 1.", "0 0 12 8 1.");
        assert!(matches!(
            Cascade::from_str(&xml),
            Err(CascadeError::Malformed(_))
        ));
    }

    #[test]
    fn test_group_rectangles_requires_neighbors() {
        let lone = vec![Rect::new(0, 0, 10, 10)];
        assert!(group_rectangles(lone, 3, 0.2).is_empty());

        let cluster = vec![
            Rect::new(0, 0, 10, 10),
            Rect::new(1, 1, 10, 10),
            Rect::new(0, 1, 10, 10),
        ];
        let grouped = group_rectangles(cluster, 3, 0.2);
        assert_eq!(grouped.len(), 1);
    }

    #[test]
    fn test_group_rectangles_separates_clusters() {
        let mut rects = Vec::new();
        for i in 0..3 {
            rects.push(Rect::new(i, i, 10, 10));
            rects.push(Rect::new(100 + i, 100 + i, 10, 10));
        }
        let grouped = group_rectangles(rects, 3, 0.2);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn test_integral_rect_sum() {
        let img = GrayImage::from_pixel(4, 4, Luma([2]));
        let integral = Integral::new(&img);
        assert_eq!(integral.rect_sum(0, 0, 4, 4), 32.0);
        assert_eq!(integral.rect_sum(1, 1, 2, 2), 8.0);
        assert_eq!(integral.rect_sq_sum(0, 0, 4, 4), 64.0);
    }
}
