use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    geometry::{compute_metrics, AggregateMetrics},
    BinaryVerdict, ClassifyError, Detection, ImageFrame, Verdict,
};

/// Tunable limits for the three-way classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Fewer characters than this count as no text at all.
    pub min_total_chars: usize,
    pub meme_min_region_area_ratio: f64,
    pub meme_min_width_ratio: f64,
    pub meme_min_total_area_ratio: f64,
    /// This many characters make a meme regardless of area.
    pub meme_min_total_chars: usize,
    pub max_overlay_total_area_ratio: f64,
    pub max_overlay_region_area_ratio: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_total_chars: 3,
            meme_min_region_area_ratio: 0.10,
            meme_min_width_ratio: 0.70,
            meme_min_total_area_ratio: 0.20,
            meme_min_total_chars: 25,
            max_overlay_total_area_ratio: 0.08,
            max_overlay_region_area_ratio: 0.04,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ClassifyError> {
        let ratios = [
            ("meme_min_region_area_ratio", self.meme_min_region_area_ratio),
            ("meme_min_width_ratio", self.meme_min_width_ratio),
            ("meme_min_total_area_ratio", self.meme_min_total_area_ratio),
            ("max_overlay_total_area_ratio", self.max_overlay_total_area_ratio),
            ("max_overlay_region_area_ratio", self.max_overlay_region_area_ratio),
        ];
        match ratios
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            Some((name, value)) => Err(ClassifyError::InvalidThreshold { name, value }),
            None => Ok(()),
        }
    }
}

/// The rules of the three-way classifier, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    NoDetections,
    BelowCharFloor,
    LargeRegion,
    WideRegion,
    DenseText,
    ManyChars,
    SmallOverlay,
    Fallback,
}

impl Rule {
    pub fn verdict(self) -> Verdict {
        match self {
            Rule::NoDetections | Rule::BelowCharFloor => Verdict::None,
            Rule::SmallOverlay => Verdict::Overlay,
            Rule::LargeRegion
            | Rule::WideRegion
            | Rule::DenseText
            | Rule::ManyChars
            | Rule::Fallback => Verdict::Meme,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rule::NoDetections => "no_detections",
            Rule::BelowCharFloor => "below_char_floor",
            Rule::LargeRegion => "large_region",
            Rule::WideRegion => "wide_region",
            Rule::DenseText => "dense_text",
            Rule::ManyChars => "many_chars",
            Rule::SmallOverlay => "small_overlay",
            Rule::Fallback => "fallback",
        }
    }
}

/// What the rules get to look at.
struct Evidence {
    detections: usize,
    metrics: AggregateMetrics,
}

type Condition = fn(&Evidence, &Thresholds) -> bool;

/// Ordered decision list; the first matching rule decides.
///
/// Meme rules come before the overlay rule so that inputs satisfying both
/// numeric ranges are rejected. Anything reaching the end is a meme.
const DECISION_LIST: [(Rule, Condition); 8] = [
    (Rule::NoDetections, |e, _| e.detections == 0),
    (Rule::BelowCharFloor, |e, t| {
        e.metrics.total_chars < t.min_total_chars
    }),
    (Rule::LargeRegion, |e, t| {
        e.metrics.max_region_area_ratio >= t.meme_min_region_area_ratio
    }),
    (Rule::WideRegion, |e, t| {
        e.metrics.max_region_width_ratio >= t.meme_min_width_ratio
    }),
    (Rule::DenseText, |e, t| {
        e.metrics.total_area_ratio >= t.meme_min_total_area_ratio
    }),
    (Rule::ManyChars, |e, t| {
        e.metrics.total_chars >= t.meme_min_total_chars
    }),
    (Rule::SmallOverlay, |e, t| {
        e.metrics.total_area_ratio <= t.max_overlay_total_area_ratio
            && e.metrics.max_region_area_ratio <= t.max_overlay_region_area_ratio
    }),
    (Rule::Fallback, |_, _| true),
];

/// Outcome of the three-way classifier together with what led to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub rule: Rule,
    pub metrics: AggregateMetrics,
}

/// Three-way classifier over validated thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextClassifier {
    thresholds: Thresholds,
}

impl TextClassifier {
    pub fn new(thresholds: Thresholds) -> Result<Self, ClassifyError> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn classify(&self, detections: &[Detection], frame: ImageFrame) -> Verdict {
        self.decide(detections, frame).verdict
    }

    #[instrument(level = "trace", skip(self, detections), fields(detections = detections.len()))]
    pub fn decide(&self, detections: &[Detection], frame: ImageFrame) -> Decision {
        let evidence = Evidence {
            detections: detections.len(),
            metrics: if detections.is_empty() {
                AggregateMetrics::default()
            } else {
                compute_metrics(detections, frame)
            },
        };

        let rule = DECISION_LIST
            .iter()
            .find(|(_, condition)| condition(&evidence, &self.thresholds))
            .map(|(rule, _)| *rule)
            .unwrap_or(Rule::Fallback);

        Decision {
            verdict: rule.verdict(),
            rule,
            metrics: evidence.metrics,
        }
    }
}

/// Classifies `detections` of a `width` x `height` image as `none`, `overlay` or `meme`.
///
/// Fails only on zero dimensions or invalid thresholds.
pub fn classify(
    detections: &[Detection],
    width: u32,
    height: u32,
    thresholds: &Thresholds,
) -> Result<Verdict, ClassifyError> {
    let frame = ImageFrame::new(width, height)?;
    Ok(TextClassifier::new(*thresholds)?.classify(detections, frame))
}

/// Two-way classifier: any text above the character floor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryClassifier {
    pub min_total_chars: usize,
}

impl Default for BinaryClassifier {
    fn default() -> Self {
        Self { min_total_chars: 3 }
    }
}

impl BinaryClassifier {
    pub fn new(min_total_chars: usize) -> Self {
        Self { min_total_chars }
    }

    pub fn classify(&self, detections: &[Detection]) -> BinaryVerdict {
        classify_binary(detections, self.min_total_chars)
    }
}

pub fn classify_binary(detections: &[Detection], min_total_chars: usize) -> BinaryVerdict {
    let total_chars: usize = detections.iter().map(Detection::char_count).sum();
    if total_chars >= min_total_chars {
        BinaryVerdict::TextPresent
    } else {
        BinaryVerdict::NoText
    }
}

/// Classification strategy selected for a triage run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    ThreeWay(TextClassifier),
    Binary(BinaryClassifier),
}

/// A policy's keep/reject call for one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Judgement {
    pub keep: bool,
    /// Verdict name, e.g. `overlay` or `text_present`.
    pub label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl Policy {
    pub fn judge(&self, detections: &[Detection], frame: ImageFrame) -> Judgement {
        match self {
            Policy::ThreeWay(classifier) => {
                let decision = classifier.decide(detections, frame);
                Judgement {
                    keep: decision.verdict.is_kept(),
                    label: decision.verdict.as_str(),
                    decision: Some(decision),
                }
            }
            Policy::Binary(classifier) => {
                let verdict = classifier.classify(detections);
                Judgement {
                    keep: verdict == BinaryVerdict::NoText,
                    label: verdict.as_str(),
                    decision: None,
                }
            }
        }
    }

    /// Whether rejected images must be collected in their own directory.
    pub fn needs_rejected_dir(&self) -> bool {
        matches!(self, Policy::ThreeWay(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ImageFrame {
        ImageFrame::new(1000, 1000).unwrap()
    }

    /// Axis-aligned box on the 1000x1000 test frame.
    fn boxed(x: f64, y: f64, w: f64, h: f64, text: &str) -> Detection {
        Detection::new(
            [(x, y), (x + w, y), (x + w, y + h), (x, y + h)],
            text,
            0.9,
        )
    }

    fn decide(detections: &[Detection]) -> Decision {
        TextClassifier::new(Thresholds::default())
            .unwrap()
            .decide(detections, frame())
    }

    #[test]
    fn no_detections_is_none_for_any_size() {
        for (w, h) in [(1, 1), (64, 4096), (1920, 1080)] {
            assert_eq!(classify(&[], w, h, &Thresholds::default()), Ok(Verdict::None));
        }
        assert_eq!(decide(&[]).rule, Rule::NoDetections);
    }

    #[test]
    fn no_detections_wins_even_without_char_floor() {
        let thresholds = Thresholds {
            min_total_chars: 0,
            ..Default::default()
        };
        assert_eq!(classify(&[], 10, 10, &thresholds), Ok(Verdict::None));
    }

    #[test]
    fn char_floor_beats_geometry() {
        // Covers the whole image but only two characters.
        let decision = decide(&[boxed(0.0, 0.0, 1000.0, 1000.0, "ok")]);
        assert_eq!(decision.verdict, Verdict::None);
        assert_eq!(decision.rule, Rule::BelowCharFloor);
    }

    #[test]
    fn large_single_region_is_meme() {
        let thresholds = Thresholds {
            min_total_chars: 1,
            ..Default::default()
        };
        // 400x300 = 12% of the frame.
        let detections = [boxed(100.0, 100.0, 400.0, 300.0, "x")];
        let decision = TextClassifier::new(thresholds)
            .unwrap()
            .decide(&detections, frame());
        assert_eq!(decision.verdict, Verdict::Meme);
        assert_eq!(decision.rule, Rule::LargeRegion);
    }

    #[test]
    fn wide_region_is_meme() {
        // 800x20 spans 80% of the width but only 1.6% of the area.
        let decision = decide(&[boxed(100.0, 900.0, 800.0, 20.0, "caption")]);
        assert_eq!(decision.rule, Rule::WideRegion);
        assert_eq!(decision.verdict, Verdict::Meme);
    }

    #[test]
    fn dense_text_is_meme() {
        // Nine 250x90 regions: 2.25% each, 20.25% in total, all narrow.
        let detections = (0..9)
            .map(|i| boxed(0.0, i as f64 * 100.0, 250.0, 90.0, "ab"))
            .collect::<Vec<_>>();
        let decision = decide(&detections);
        assert_eq!(decision.rule, Rule::DenseText);
    }

    #[test]
    fn many_characters_is_meme_regardless_of_area() {
        let decision = decide(&[boxed(10.0, 10.0, 50.0, 10.0, "when you finally fix the bug")]);
        assert_eq!(decision.rule, Rule::ManyChars);
        assert_eq!(decision.verdict, Verdict::Meme);
    }

    #[test]
    fn small_text_is_overlay() {
        // Total 5%, largest region 2%.
        let detections = [
            boxed(0.0, 0.0, 200.0, 100.0, "12:04"),
            boxed(0.0, 500.0, 200.0, 100.0, "REC"),
            boxed(700.0, 900.0, 100.0, 100.0, "wm"),
        ];
        let decision = decide(&detections);
        assert!((decision.metrics.total_area_ratio - 0.05).abs() < 1e-12);
        assert!((decision.metrics.max_region_area_ratio - 0.02).abs() < 1e-12);
        assert_eq!(decision.rule, Rule::SmallOverlay);
        assert_eq!(decision.verdict, Verdict::Overlay);
    }

    #[test]
    fn middle_ground_falls_back_to_meme() {
        // Six 200x100 regions: 12% in total, none above 2%, none wide.
        let detections = (0..6)
            .map(|i| boxed(0.0, i as f64 * 150.0, 200.0, 100.0, "abc"))
            .collect::<Vec<_>>();
        let decision = decide(&detections);
        assert!((decision.metrics.total_area_ratio - 0.12).abs() < 1e-12);
        assert_eq!(decision.rule, Rule::Fallback);
        assert_eq!(decision.verdict, Verdict::Meme);
    }

    #[test]
    fn largest_region_above_overlay_ceiling_falls_back() {
        // One 5% region: below the meme ceiling, above the 4% overlay ceiling.
        let decision = decide(&[boxed(0.0, 0.0, 250.0, 200.0, "logo")]);
        assert_eq!(decision.rule, Rule::Fallback);
    }

    #[test]
    fn overlay_ceiling_is_a_hard_step() {
        let thresholds = Thresholds {
            max_overlay_region_area_ratio: 1.0,
            meme_min_region_area_ratio: 1.0,
            ..Default::default()
        };
        let classifier = TextClassifier::new(thresholds).unwrap();
        // 0.079 and 0.081 of a 1000x1000 frame.
        let below = [boxed(0.0, 0.0, 79.0, 1000.0, "abcd")];
        let above = [boxed(0.0, 0.0, 81.0, 1000.0, "abcd")];
        assert_eq!(classifier.classify(&below, frame()), Verdict::Overlay);
        assert_eq!(classifier.classify(&above, frame()), Verdict::Meme);
    }

    #[test]
    fn meme_checks_run_before_overlay() {
        // Overlay ceilings loose enough to accept everything: meme rules still win.
        let thresholds = Thresholds {
            max_overlay_total_area_ratio: 1.0,
            max_overlay_region_area_ratio: 1.0,
            ..Default::default()
        };
        let classifier = TextClassifier::new(thresholds).unwrap();
        let detections = [boxed(0.0, 0.0, 500.0, 500.0, "big text")];
        assert_eq!(classifier.decide(&detections, frame()).rule, Rule::LargeRegion);
    }

    #[test]
    fn rotated_text_classifies_without_error() {
        let diamond = Detection::new(
            [(100.0, 50.0), (150.0, 100.0), (100.0, 150.0), (50.0, 100.0)],
            "spin",
            0.7,
        );
        let decision = decide(&[diamond]);
        assert_eq!(decision.metrics.total_text_area, 10_000.0);
        assert_eq!(decision.verdict, Verdict::Overlay);
    }

    #[test]
    fn degenerate_regions_only_add_characters() {
        let flat = Detection::new(
            [(0.0, 10.0), (300.0, 10.0), (600.0, 10.0), (900.0, 10.0)],
            "abc",
            0.4,
        );
        let decision = decide(&[flat]);
        assert_eq!(decision.metrics.total_chars, 3);
        assert_eq!(decision.metrics.max_region_width_ratio, 0.0);
        assert_eq!(decision.verdict, Verdict::Overlay);
    }

    #[test]
    fn zero_dimensions_fail_fast() {
        let thresholds = Thresholds::default();
        assert_eq!(
            classify(&[], 0, 10, &thresholds),
            Err(ClassifyError::InvalidFrame {
                width: 0,
                height: 10
            })
        );
        assert!(classify(&[], 10, 0, &thresholds).is_err());
    }

    #[test]
    fn negative_threshold_fails_fast() {
        let thresholds = Thresholds {
            meme_min_width_ratio: -0.1,
            ..Default::default()
        };
        assert_eq!(
            TextClassifier::new(thresholds),
            Err(ClassifyError::InvalidThreshold {
                name: "meme_min_width_ratio",
                value: -0.1
            })
        );
        let nan = Thresholds {
            max_overlay_total_area_ratio: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn binary_counts_characters_only() {
        let huge = [boxed(0.0, 0.0, 1000.0, 1000.0, "ab")];
        assert_eq!(classify_binary(&huge, 3), BinaryVerdict::NoText);

        let tiny = [boxed(0.0, 0.0, 1.0, 1.0, "abc")];
        assert_eq!(classify_binary(&tiny, 3), BinaryVerdict::TextPresent);
        assert_eq!(classify_binary(&[], 3), BinaryVerdict::NoText);
    }

    #[test]
    fn policies_route_differently() {
        // A timestamp is an acceptable overlay but still text.
        let timestamp = [boxed(10.0, 10.0, 100.0, 20.0, "12:04")];
        let three_way = Policy::ThreeWay(TextClassifier::new(Thresholds::default()).unwrap());
        let binary = Policy::Binary(BinaryClassifier::default());

        let judgement = three_way.judge(&timestamp, frame());
        assert!(judgement.keep);
        assert_eq!(judgement.label, "overlay");
        assert_eq!(judgement.decision.map(|it| it.rule), Some(Rule::SmallOverlay));

        let judgement = binary.judge(&timestamp, frame());
        assert!(!judgement.keep);
        assert_eq!(judgement.label, "text_present");
        assert!(judgement.decision.is_none());
    }
}
