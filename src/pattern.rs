//! Dream quality pattern classification.
//!
//! Reduces the five recognized entry metrics to one categorical pattern plus
//! continuous scores and a visual style descriptor. Classification is total:
//! missing or non-finite metrics fall back to neutral midpoints.

use crate::models::DreamEntry;
use serde::{Deserialize, Serialize};

pub const SENSORY_DETAIL: &str = "Sensory Detail";
pub const EMOTIONAL_RECALL: &str = "Emotional Recall";
pub const LOST_SEGMENTS: &str = "Lost Segments";
pub const DESCRIPTIVENESS: &str = "Descriptiveness";
pub const CONFIDENCE_SCORE: &str = "Confidence Score";

/// Midpoint of the 1-5 scale.
const SCALE_FALLBACK: f64 = 2.5;
/// Midpoint of the 0-10 lost segments scale.
const LOST_SEGMENTS_FALLBACK: f64 = 3.0;
const LOST_SEGMENTS_MAX: f64 = 10.0;
const LOST_SEGMENTS_WEIGHT: f64 = 0.7;
const LOW_CONFIDENCE_WEIGHT: f64 = 0.3;
const MIN_OPACITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    HighQuality,
    Fragmented,
    RichNarrative,
    BasicRecall,
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] = [
        PatternKind::HighQuality,
        PatternKind::Fragmented,
        PatternKind::RichNarrative,
        PatternKind::BasicRecall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighQuality => "high-quality",
            Self::Fragmented => "fragmented",
            Self::RichNarrative => "rich-narrative",
            Self::BasicRecall => "basic-recall",
        }
    }
}

/// Decision-list cut-offs. These are compatibility values, not derived ones,
/// and can be overridden from settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassificationThresholds {
    pub fragmentation: f64,
    pub high_quality_score: f64,
    pub high_quality_descriptiveness: f64,
    pub rich_narrative_descriptiveness: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            fragmentation: 0.6,
            high_quality_score: 0.7,
            high_quality_descriptiveness: 0.6,
            rich_narrative_descriptiveness: 0.7,
        }
    }
}

impl ClassificationThresholds {
    pub fn clamped(self) -> Self {
        Self {
            fragmentation: clamp_unit(self.fragmentation),
            high_quality_score: clamp_unit(self.high_quality_score),
            high_quality_descriptiveness: clamp_unit(self.high_quality_descriptiveness),
            rich_narrative_descriptiveness: clamp_unit(self.rich_narrative_descriptiveness),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorKind {
    Gradient,
    Striped,
    Textured,
    Solid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gradient {
    pub from: String,
    pub to: String,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualStyle {
    pub indicator: IndicatorKind,
    pub color: String,
    pub opacity: f64,
    pub gradient: Option<Gradient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternVisualization {
    pub base_pattern: PatternKind,
    pub quality_score: f64,
    pub fragmentation_level: f64,
    pub descriptiveness: f64,
    pub visual_style: VisualStyle,
}

/// Raw metric values after fallback substitution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternMetrics {
    pub sensory_detail: f64,
    pub emotional_recall: f64,
    pub lost_segments: f64,
    pub descriptiveness: f64,
    pub confidence: f64,
}

impl PatternMetrics {
    pub fn from_entry(entry: &DreamEntry) -> Self {
        Self {
            sensory_detail: entry.metric(SENSORY_DETAIL).unwrap_or(SCALE_FALLBACK),
            emotional_recall: entry.metric(EMOTIONAL_RECALL).unwrap_or(SCALE_FALLBACK),
            lost_segments: entry.metric(LOST_SEGMENTS).unwrap_or(LOST_SEGMENTS_FALLBACK),
            descriptiveness: entry.metric(DESCRIPTIVENESS).unwrap_or(SCALE_FALLBACK),
            confidence: entry.metric(CONFIDENCE_SCORE).unwrap_or(SCALE_FALLBACK),
        }
    }

    pub fn quality_score(&self) -> f64 {
        let mean = (self.sensory_detail + self.emotional_recall + self.confidence) / 3.0;
        normalize_scale(mean)
    }

    pub fn fragmentation_level(&self) -> f64 {
        let lost = clamp_unit(self.lost_segments / LOST_SEGMENTS_MAX);
        let low_confidence = clamp_unit((5.0 - self.confidence) / 4.0);
        clamp_unit(LOST_SEGMENTS_WEIGHT * lost + LOW_CONFIDENCE_WEIGHT * low_confidence)
    }

    pub fn descriptiveness_score(&self) -> f64 {
        normalize_scale(self.descriptiveness)
    }
}

struct StylePreset {
    indicator: IndicatorKind,
    color: &'static str,
    gradient_to: Option<&'static str>,
}

fn style_preset(pattern: PatternKind) -> StylePreset {
    match pattern {
        PatternKind::HighQuality => StylePreset {
            indicator: IndicatorKind::Gradient,
            color: "#4caf50",
            gradient_to: Some("#2e7d32"),
        },
        PatternKind::Fragmented => StylePreset {
            indicator: IndicatorKind::Striped,
            color: "#ff9800",
            gradient_to: None,
        },
        PatternKind::RichNarrative => StylePreset {
            indicator: IndicatorKind::Textured,
            color: "#9c27b0",
            gradient_to: Some("#6a1b9a"),
        },
        PatternKind::BasicRecall => StylePreset {
            indicator: IndicatorKind::Solid,
            color: "#9e9e9e",
            gradient_to: None,
        },
    }
}

pub fn classify(entry: &DreamEntry) -> PatternVisualization {
    classify_with(entry, &ClassificationThresholds::default())
}

pub fn classify_with(entry: &DreamEntry, thresholds: &ClassificationThresholds) -> PatternVisualization {
    let metrics = PatternMetrics::from_entry(entry);
    let quality_score = metrics.quality_score();
    let fragmentation_level = metrics.fragmentation_level();
    let descriptiveness = metrics.descriptiveness_score();

    // First match wins.
    let base_pattern = if fragmentation_level > thresholds.fragmentation {
        PatternKind::Fragmented
    } else if quality_score > thresholds.high_quality_score
        && descriptiveness > thresholds.high_quality_descriptiveness
    {
        PatternKind::HighQuality
    } else if descriptiveness > thresholds.rich_narrative_descriptiveness {
        PatternKind::RichNarrative
    } else {
        PatternKind::BasicRecall
    };

    PatternVisualization {
        base_pattern,
        quality_score,
        fragmentation_level,
        descriptiveness,
        visual_style: visual_style(base_pattern, quality_score, metrics.confidence),
    }
}

pub fn visual_style(pattern: PatternKind, quality_score: f64, confidence: f64) -> VisualStyle {
    let preset = style_preset(pattern);
    let opacity = (confidence / 5.0).clamp(MIN_OPACITY, 1.0);
    let gradient = preset.gradient_to.map(|to| Gradient {
        from: preset.color.to_string(),
        to: to.to_string(),
        intensity: clamp_unit(quality_score),
    });
    VisualStyle {
        indicator: preset.indicator,
        color: preset.color.to_string(),
        opacity,
        gradient,
    }
}

fn normalize_scale(value: f64) -> f64 {
    clamp_unit((value - 1.0) / 4.0)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::{
        classify, classify_with, ClassificationThresholds, IndicatorKind, PatternKind,
        CONFIDENCE_SCORE, DESCRIPTIVENESS, EMOTIONAL_RECALL, LOST_SEGMENTS, SENSORY_DETAIL,
    };
    use crate::models::DreamEntry;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn entry() -> DreamEntry {
        DreamEntry::new(NaiveDate::from_ymd_opt(2025, 5, 1).expect("valid date"), "dream")
    }

    fn perfect() -> DreamEntry {
        entry()
            .with_metric(SENSORY_DETAIL, 5.0)
            .with_metric(EMOTIONAL_RECALL, 5.0)
            .with_metric(CONFIDENCE_SCORE, 5.0)
            .with_metric(LOST_SEGMENTS, 0.0)
            .with_metric(DESCRIPTIVENESS, 5.0)
    }

    #[test]
    fn perfect_metrics_are_high_quality() {
        let pattern = classify(&perfect());
        assert_eq!(pattern.base_pattern, PatternKind::HighQuality);
        assert_eq!(pattern.quality_score, 1.0);
        assert_eq!(pattern.fragmentation_level, 0.0);
        assert_eq!(pattern.visual_style.opacity, 1.0);
        let gradient = pattern.visual_style.gradient.expect("high quality has a gradient");
        assert_eq!(gradient.intensity, 1.0);
    }

    #[test]
    fn fragmentation_dominates_quality() {
        let pattern = classify(&perfect().with_metric(LOST_SEGMENTS, 10.0));
        // 0.7 * 1.0 + 0.3 * 0.0
        assert!((pattern.fragmentation_level - 0.7).abs() < 1e-9);
        assert_eq!(pattern.base_pattern, PatternKind::Fragmented);
        assert_eq!(pattern.visual_style.indicator, IndicatorKind::Striped);
    }

    #[test]
    fn missing_metrics_use_neutral_fallbacks() {
        let pattern = classify(&entry());
        assert_eq!(pattern.base_pattern, PatternKind::BasicRecall);
        assert!((pattern.quality_score - 0.375).abs() < 1e-9);
        // 0.7 * 0.3 + 0.3 * 0.625
        assert!((pattern.fragmentation_level - 0.3975).abs() < 1e-9);
        assert!((pattern.descriptiveness - 0.375).abs() < 1e-9);
        assert_eq!(pattern.visual_style.opacity, 0.5);
    }

    #[test]
    fn descriptive_but_low_quality_is_rich_narrative() {
        let pattern = classify(
            &entry()
                .with_metric(SENSORY_DETAIL, 2.0)
                .with_metric(EMOTIONAL_RECALL, 2.0)
                .with_metric(CONFIDENCE_SCORE, 4.0)
                .with_metric(LOST_SEGMENTS, 1.0)
                .with_metric(DESCRIPTIVENESS, 4.5),
        );
        assert_eq!(pattern.base_pattern, PatternKind::RichNarrative);
    }

    #[test]
    fn opacity_has_a_floor() {
        let pattern = classify(&entry().with_metric(CONFIDENCE_SCORE, 1.0));
        assert_eq!(pattern.visual_style.opacity, 0.3);
    }

    #[test]
    fn thresholds_are_tunable() {
        let strict = ClassificationThresholds {
            high_quality_score: 1.0,
            ..ClassificationThresholds::default()
        };
        assert_eq!(classify_with(&perfect(), &strict).base_pattern, PatternKind::RichNarrative);
    }

    #[test]
    fn classification_is_total_over_arbitrary_metrics() {
        let mut rng = StdRng::seed_from_u64(7);
        let names = [SENSORY_DETAIL, EMOTIONAL_RECALL, LOST_SEGMENTS, DESCRIPTIVENESS, CONFIDENCE_SCORE];
        for _ in 0..500 {
            let mut sample = entry();
            for name in names {
                if rng.random_bool(0.7) {
                    sample = sample.with_metric(name, rng.random_range(-20.0..40.0));
                }
            }
            let pattern = classify(&sample);
            assert!(PatternKind::ALL.contains(&pattern.base_pattern));
            for score in [pattern.quality_score, pattern.fragmentation_level, pattern.descriptiveness] {
                assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
            }
            assert!((0.3..=1.0).contains(&pattern.visual_style.opacity));
        }
    }
}
