//! Encoding policy: an ordered, first-match-wins rule table
//!
//! Rules run from the most specific (detected effect signatures, category
//! overrides) to the most general (size-based catch-alls). Each terminal rule
//! fully determines the [`EncodingDecision`]; the block-alignment rule is the
//! one exception and resamples the working image before evaluation continues,
//! so every later rule sees block-aligned geometry.
//!
//! Rule ids are positions in [`RULES`] (1-based), followed by the fallback and
//! the fallback's time-budget downgrade.

use image::RgbaImage;
use std::time::Duration;
use tracing::{debug, trace};

use super::decision::{
    Downgrade, EncodingDecision, Preprocess, QualityTier, RuleId, TextureFormat, TimeBudget,
};
use super::hints::{AssetCategory, AssetHints};
use super::metrics::{has_partial_alpha, is_long_strip, MetricCache};
use super::pixels::PixelBuffer;
use super::transforms::{aligned_size, is_block_aligned, FilterResizer, Resizer};

/// Images below this in both dimensions count as icons
pub const SMALL_ICON_LIMIT: u32 = 450;
/// Images above this in both dimensions are bulk backgrounds
pub const LARGE_BACKGROUND_LIMIT: u32 = 750;
pub const FLAT_SYMBOL_MAX_HEIGHT: u32 = 100;
pub const FLAT_SYMBOL_MAX_STD_DEV: f32 = 18.0;
/// Strip sheets noisier than this stay uncompressed
pub const STRIP_SHEET_MAX_STD_DEV: f32 = 25.0;
/// Images above this in either dimension take BC3
pub const LARGE_IMAGE_LIMIT: u32 = 600;
/// Budget overruns below this deviation (and without soft alpha) drop to BC3
pub const DOWNGRADE_MAX_STD_DEV: f32 = 22.0;

pub const DEFAULT_FALLBACK_BUDGET: Duration = Duration::from_millis(60_000);

pub const FALLBACK_RULE_NAME: &str = "fallback";
pub const DOWNGRADE_RULE_NAME: &str = "fallback-downgrade";

/// Colour correction appended to decisions for images with partial alpha
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub gamma: f32,
    pub green_boost: f32,
}

/// Tunable parts of the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicySettings {
    /// Output for [`AssetCategory::Font`] images (BC7 or RGBA8)
    pub font_format: TextureFormat,
    /// Soft limit on the fallback BC7 compression; `None` uses the fast preset
    /// without a budget
    pub fallback_budget: Option<Duration>,
    pub correction: Option<Correction>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            font_format: TextureFormat::Bc7,
            fallback_budget: Some(DEFAULT_FALLBACK_BUDGET),
            correction: None,
        }
    }
}

/// Facts about the source file that are not visible in its pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceTraits {
    /// The file embeds an ICC colour profile, or a PNG gamma other than sRGB's
    pub has_icc_profile: bool,
}

/// Working state of one classification run
struct Evaluation<'a> {
    source: PixelBuffer<'a>,
    aligned: Option<RgbaImage>,
    metrics: MetricCache,
    hints: AssetHints,
    preprocessing: Vec<Preprocess>,
}

impl<'a> Evaluation<'a> {
    fn new(source: PixelBuffer<'a>, hints: AssetHints) -> Self {
        Self {
            source,
            aligned: None,
            metrics: MetricCache::default(),
            hints,
            preprocessing: Vec::new(),
        }
    }

    /// Current pixels: the aligned copy once one exists
    fn pixels(&self) -> PixelBuffer<'_> {
        match &self.aligned {
            Some(image) => PixelBuffer::from_image(image),
            None => self.source,
        }
    }

    fn width(&self) -> u32 {
        self.pixels().width()
    }

    fn height(&self) -> u32 {
        self.pixels().height()
    }

    fn has(&self, category: AssetCategory) -> bool {
        self.hints.contains(category)
    }

    fn has_alpha(&self) -> bool {
        self.metrics.alpha(self.pixels()).has_alpha
    }

    fn soft_alpha(&self) -> bool {
        self.metrics.soft_alpha(self.pixels())
    }

    fn std_dev(&self) -> f32 {
        self.metrics.color_std_dev(self.pixels())
    }
}

type Predicate = fn(&Evaluation<'_>, &PolicySettings) -> bool;
type Selector = fn(&Evaluation<'_>, &PolicySettings) -> (TextureFormat, QualityTier);

enum Outcome {
    Encode(TextureFormat, QualityTier),
    Select(Selector),
    /// Non-terminal: resample to block-aligned dimensions and keep going
    AlignToBlocks,
}

struct Rule {
    name: &'static str,
    applies: Predicate,
    outcome: Outcome,
}

// BC3 and RGBA8 ignore most of the effort range; they get the middle preset
const BC3: (TextureFormat, QualityTier) = (TextureFormat::Bc3, QualityTier::Balanced);
const RGBA8: (TextureFormat, QualityTier) = (TextureFormat::Rgba8, QualityTier::Balanced);

fn small_alpha_icon(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.width() < SMALL_ICON_LIMIT && e.height() < SMALL_ICON_LIMIT && e.has_alpha()
}

fn glow_fx(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.metrics.glow_fx(e.pixels())
}

fn dark_gradient(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.metrics.dark_gradient_background(e.pixels())
}

fn animation(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.has(AssetCategory::Animation)
}

fn jackpot(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.has(AssetCategory::Jackpot)
}

fn progress_counter(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.has(AssetCategory::ProgressCounter)
}

fn large_background(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.width() > LARGE_BACKGROUND_LIMIT && e.height() > LARGE_BACKGROUND_LIMIT
}

fn flat_symbol(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    !e.pixels().is_empty()
        && e.height() <= FLAT_SYMBOL_MAX_HEIGHT
        && !e.soft_alpha()
        && e.std_dev() < FLAT_SYMBOL_MAX_STD_DEV
}

fn misaligned(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    !e.pixels().is_empty() && !is_block_aligned(e.width(), e.height())
}

fn font(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.has(AssetCategory::Font)
}

fn font_output(_: &Evaluation<'_>, settings: &PolicySettings) -> (TextureFormat, QualityTier) {
    match settings.font_format {
        TextureFormat::Rgba8 => RGBA8,
        format => (format, QualityTier::HighQuality),
    }
}

fn long_strip(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    is_long_strip(e.width(), e.height())
}

fn long_strip_sheet(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.metrics.long_strip_sheet(e.pixels())
}

fn strip_sheet_output(e: &Evaluation<'_>, _: &PolicySettings) -> (TextureFormat, QualityTier) {
    if e.soft_alpha() || e.std_dev() > STRIP_SHEET_MAX_STD_DEV {
        RGBA8
    } else {
        BC3
    }
}

fn large_image(e: &Evaluation<'_>, _: &PolicySettings) -> bool {
    e.width() > LARGE_IMAGE_LIMIT || e.height() > LARGE_IMAGE_LIMIT
}

/// The rule table, highest priority first. The fallback follows implicitly.
static RULES: [Rule; 13] = [
    Rule {
        name: "small-alpha-icon",
        applies: small_alpha_icon,
        outcome: Outcome::Encode(TextureFormat::Bc7, QualityTier::HighQualityUniform),
    },
    Rule {
        name: "glow-fx",
        applies: glow_fx,
        outcome: Outcome::Encode(TextureFormat::Bc7, QualityTier::HighQuality),
    },
    Rule {
        name: "dark-gradient-background",
        applies: dark_gradient,
        outcome: Outcome::Encode(TextureFormat::Bc7, QualityTier::HighQuality),
    },
    Rule {
        name: "animation",
        applies: animation,
        outcome: Outcome::Encode(TextureFormat::Bc7, QualityTier::HighQualityUniform),
    },
    Rule {
        name: "jackpot",
        applies: jackpot,
        outcome: Outcome::Encode(RGBA8.0, RGBA8.1),
    },
    Rule {
        name: "progress-counter",
        applies: progress_counter,
        outcome: Outcome::Encode(RGBA8.0, RGBA8.1),
    },
    Rule {
        name: "large-background",
        applies: large_background,
        outcome: Outcome::Encode(TextureFormat::Bc7, QualityTier::UltraFast),
    },
    Rule {
        name: "flat-symbol",
        applies: flat_symbol,
        outcome: Outcome::Encode(BC3.0, BC3.1),
    },
    Rule {
        name: "align-to-blocks",
        applies: misaligned,
        outcome: Outcome::AlignToBlocks,
    },
    Rule {
        name: "font",
        applies: font,
        outcome: Outcome::Select(font_output),
    },
    Rule {
        name: "long-strip",
        applies: long_strip,
        outcome: Outcome::Encode(TextureFormat::Bc7, QualityTier::QuickOnly),
    },
    Rule {
        name: "long-strip-sheet",
        applies: long_strip_sheet,
        outcome: Outcome::Select(strip_sheet_output),
    },
    Rule {
        name: "large-catch-all",
        applies: large_image,
        outcome: Outcome::Encode(BC3.0, BC3.1),
    },
];

pub fn fallback_rule() -> RuleId {
    RuleId::from_position(RULES.len())
}

pub fn downgrade_rule() -> RuleId {
    RuleId::from_position(RULES.len() + 1)
}

/// Every rule id with its name, in evaluation order
pub fn rule_table() -> Vec<(RuleId, &'static str)> {
    RULES
        .iter()
        .enumerate()
        .map(|(i, rule)| (RuleId::from_position(i), rule.name))
        .chain([
            (fallback_rule(), FALLBACK_RULE_NAME),
            (downgrade_rule(), DOWNGRADE_RULE_NAME),
        ])
        .collect()
}

/// Look a rule up by name
pub fn rule_id(name: &str) -> Option<RuleId> {
    rule_table()
        .into_iter()
        .find(|(_, n)| *n == name)
        .map(|(id, _)| id)
}

/// Result of classifying one image
#[derive(Debug, Clone)]
pub struct Classification {
    pub decision: EncodingDecision,
    /// Block-aligned copy of the image when the alignment rule fired
    pub aligned: Option<RgbaImage>,
}

/// Chooses an [`EncodingDecision`] for each image.
///
/// Stateless between calls: classifying the same pixels twice gives the same
/// decision, and one engine can be shared across threads.
pub struct PolicyEngine {
    settings: PolicySettings,
    resizer: Box<dyn Resizer>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(PolicySettings::default())
    }
}

impl PolicyEngine {
    pub fn new(settings: PolicySettings) -> Self {
        Self::with_resizer(settings, FilterResizer::default())
    }

    pub fn with_resizer(settings: PolicySettings, resizer: impl Resizer + 'static) -> Self {
        Self {
            settings,
            resizer: Box::new(resizer),
        }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    pub fn resizer(&self) -> &dyn Resizer {
        self.resizer.as_ref()
    }

    /// Run the rule table over one image
    pub fn classify(
        &self,
        pixels: PixelBuffer<'_>,
        hints: AssetHints,
        traits: SourceTraits,
    ) -> Classification {
        let mut eval = Evaluation::new(pixels, hints);

        for (index, rule) in RULES.iter().enumerate() {
            if !(rule.applies)(&eval, &self.settings) {
                trace!("Rule {} ({}) did not match", index + 1, rule.name);
                continue;
            }

            let (format, quality) = match rule.outcome {
                Outcome::Encode(format, quality) => (format, quality),
                Outcome::Select(select) => select(&eval, &self.settings),
                Outcome::AlignToBlocks => {
                    self.align(&mut eval);
                    continue;
                }
            };

            return self.finish(eval, RuleId::from_position(index), rule.name, format, quality, None, traits);
        }

        let (format, quality, budget) = self.fallback(&eval);
        self.finish(eval, fallback_rule(), FALLBACK_RULE_NAME, format, quality, budget, traits)
    }

    fn align(&self, eval: &mut Evaluation<'_>) {
        let (width, height) = aligned_size(eval.width(), eval.height());
        debug!(
            "Aligning {}x{} to {}x{}",
            eval.width(),
            eval.height(),
            width,
            height
        );

        let resized = self.resizer.resize(eval.pixels(), width, height);
        eval.aligned = Some(resized);
        eval.metrics.clear();
        eval.preprocessing
            .push(Preprocess::ResizeToMultipleOf4 { width, height });
    }

    fn fallback(&self, eval: &Evaluation<'_>) -> (TextureFormat, QualityTier, Option<TimeBudget>) {
        let Some(limit) = self.settings.fallback_budget else {
            return (TextureFormat::Bc7, QualityTier::FastBalanced, None);
        };

        let downgrade = if !eval.soft_alpha() && eval.std_dev() < DOWNGRADE_MAX_STD_DEV {
            Downgrade {
                format: BC3.0,
                quality: BC3.1,
            }
        } else {
            Downgrade {
                format: TextureFormat::Bc7,
                quality: QualityTier::FastBalanced,
            }
        };

        let budget = TimeBudget {
            limit,
            downgrade,
            downgrade_rule: downgrade_rule(),
        };
        (TextureFormat::Bc7, QualityTier::Balanced, Some(budget))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        mut eval: Evaluation<'_>,
        rule: RuleId,
        rule_name: &'static str,
        format: TextureFormat,
        quality: QualityTier,
        time_budget: Option<TimeBudget>,
        traits: SourceTraits,
    ) -> Classification {
        if let Some(correction) = self.settings.correction {
            // Judged on the source: resampling a hard alpha edge invents mid values
            if has_partial_alpha(eval.source) {
                eval.preprocessing.push(Preprocess::PremultiplyAlpha);
                if traits.has_icc_profile {
                    eval.preprocessing.push(Preprocess::GammaCorrect {
                        gamma: correction.gamma,
                    });
                    eval.preprocessing.push(Preprocess::GreenBoost {
                        factor: correction.green_boost,
                    });
                }
            }
        }

        let decision = EncodingDecision {
            rule,
            rule_name,
            format,
            quality,
            preprocessing: eval.preprocessing,
            time_budget,
        };
        debug!("Policy decision: {}", decision);

        Classification {
            decision,
            aligned: eval.aligned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textures::fixtures::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn classify(img: &RgbaImage, hints: AssetHints) -> Classification {
        PolicyEngine::default().classify(PixelBuffer::from_image(img), hints, SourceTraits::default())
    }

    fn rule(name: &str) -> RuleId {
        rule_id(name).unwrap_or_else(|| panic!("no rule named {name}"))
    }

    #[test]
    fn test_rule_table_ids() {
        let table = rule_table();
        assert_eq!(table.len(), 15);
        for (i, (id, _)) in table.iter().enumerate() {
            assert_eq!(id.get() as usize, i + 1);
        }
        let mut names: Vec<_> = table.iter().map(|(_, n)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 15);

        assert_eq!(rule("small-alpha-icon").get(), 1);
        assert_eq!(rule("align-to-blocks").get(), 9);
        assert_eq!(rule("large-catch-all").get(), 13);
        assert_eq!(fallback_rule().get(), 14);
        assert_eq!(downgrade_rule().get(), 15);
    }

    #[test]
    fn test_small_alpha_icon() {
        let mut img = noise(256, 256, 11);
        fill_alpha(&mut img, 96, 96, 64, 64, 128);

        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("small-alpha-icon"));
        assert_eq!(result.decision.rule.get(), 1);
        assert_eq!(result.decision.format, TextureFormat::Bc7);
        assert_eq!(result.decision.quality, QualityTier::HighQualityUniform);
        assert!(result.decision.preprocessing.is_empty());
        assert!(result.aligned.is_none());
    }

    #[test]
    fn test_small_opaque_image_is_not_an_icon() {
        let img = noise(256, 256, 11);
        let result = classify(&img, AssetHints::none());
        assert_ne!(result.decision.rule, rule("small-alpha-icon"));
    }

    #[test]
    fn test_glow_fx() {
        let img = glow(800, 240);
        let result = classify(&img, AssetHints::none().with(AssetCategory::Jackpot));
        assert_eq!(result.decision.rule, rule("glow-fx"));
        assert_eq!(result.decision.quality, QualityTier::HighQuality);
    }

    #[test]
    fn test_dark_gradient_background() {
        let img = vertical_gradient(1000, 1000);
        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("dark-gradient-background"));
        assert_eq!(result.decision.rule.get(), 3);
        assert_eq!(result.decision.format, TextureFormat::Bc7);
        assert_eq!(result.decision.quality, QualityTier::HighQuality);
    }

    #[test]
    fn test_category_rules_in_priority_order() {
        let img = noise(500, 500, 2);

        let both = AssetHints::none()
            .with(AssetCategory::Jackpot)
            .with(AssetCategory::Animation);
        let result = classify(&img, both);
        assert_eq!(result.decision.rule, rule("animation"));
        assert_eq!(result.decision.quality, QualityTier::HighQualityUniform);

        let result = classify(&img, AssetHints::none().with(AssetCategory::Jackpot));
        assert_eq!(result.decision.rule, rule("jackpot"));
        assert_eq!(result.decision.format, TextureFormat::Rgba8);

        let hints = AssetHints::from_path_str("Assets\\ProgressCounters\\digit_3.png");
        let result = classify(&img, hints);
        assert_eq!(result.decision.rule, rule("progress-counter"));
        assert_eq!(result.decision.format, TextureFormat::Rgba8);
    }

    #[test]
    fn test_large_background() {
        let img = noise(800, 1200, 4);
        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("large-background"));
        assert_eq!(result.decision.quality, QualityTier::UltraFast);
    }

    #[test]
    fn test_large_noisy_image_falls_through_to_bc3() {
        // 800x1200 is often quoted as the rule 13 example, but rule 7 claims
        // anything over 750 on both sides first; 700 keeps one side under it.
        let img = noise(800, 1200, 4);
        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("large-background"));

        let img = noise(700, 1200, 4);
        let buf = PixelBuffer::from_image(&img);
        assert!(crate::textures::metrics::color_std_dev(buf) > 25.0);

        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("large-catch-all"));
        assert_eq!(result.decision.rule.get(), 13);
        assert_eq!(result.decision.format, TextureFormat::Bc3);
        assert!(result.aligned.is_none());
    }

    #[test]
    fn test_flat_symbol() {
        let img = solid(200, 64, [220, 30, 30, 255]);
        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("flat-symbol"));
        assert_eq!(result.decision.format, TextureFormat::Bc3);
    }

    #[test]
    fn test_long_strip_regardless_of_content() {
        for img in [noise(64, 512, 9), solid(64, 512, [0, 0, 0, 255])] {
            let result = classify(&img, AssetHints::none());
            assert_eq!(result.decision.rule, rule("long-strip"));
            assert_eq!(result.decision.format, TextureFormat::Bc7);
            assert_eq!(result.decision.quality, QualityTier::QuickOnly);
        }
    }

    #[test]
    fn test_font_output_is_configurable() {
        let img = noise(300, 300, 5);
        let hints = AssetHints::from_path_str("ui/fonts/title.png");

        let result = classify(&img, hints);
        assert_eq!(result.decision.rule, rule("font"));
        assert_eq!(result.decision.format, TextureFormat::Bc7);
        assert_eq!(result.decision.quality, QualityTier::HighQuality);

        let engine = PolicyEngine::new(PolicySettings {
            font_format: TextureFormat::Rgba8,
            ..PolicySettings::default()
        });
        let result = engine.classify(PixelBuffer::from_image(&img), hints, SourceTraits::default());
        assert_eq!(result.decision.rule, rule("font"));
        assert_eq!(result.decision.format, TextureFormat::Rgba8);
    }

    #[test]
    fn test_long_strip_sheet() {
        let sheet = |rgb| {
            let mut img = solid(256, 128, [0, 0, 0, 255]);
            for top in [10, 50, 90] {
                fill_rgb(&mut img, 20, top, 200, 8, rgb);
            }
            img
        };

        let result = classify(&sheet([30, 30, 30]), AssetHints::none());
        assert_eq!(result.decision.rule, rule("long-strip-sheet"));
        assert_eq!(result.decision.format, TextureFormat::Bc3);

        // High contrast bands push the deviation above 25
        let result = classify(&sheet([220, 180, 40]), AssetHints::none());
        assert_eq!(result.decision.rule, rule("long-strip-sheet"));
        assert_eq!(result.decision.format, TextureFormat::Rgba8);
    }

    #[test]
    fn test_alignment_then_continue() {
        let img = noise(250, 130, 6);
        let result = classify(&img, AssetHints::none());

        let aligned = result.aligned.as_ref().unwrap();
        assert_eq!(aligned.dimensions(), (252, 132));
        assert_eq!(
            result.decision.preprocessing,
            vec![Preprocess::ResizeToMultipleOf4 {
                width: 252,
                height: 132
            }]
        );
        assert_eq!(result.decision.output_size(250, 130), (252, 132));
        assert_eq!(result.decision.rule, fallback_rule());
    }

    #[test]
    fn test_later_rules_see_aligned_geometry() {
        // 349x100 is just short of a 3.5 aspect; aligned to 352x100 it is a strip
        let img = noise(349, 100, 8);
        assert!(!is_long_strip(349, 100));

        let result = classify(&img, AssetHints::none());
        assert_eq!(result.decision.rule, rule("long-strip"));
        assert_eq!(result.decision.output_size(349, 100), (352, 100));
    }

    #[test]
    fn test_aligned_image_is_not_resized() {
        let img = noise(256, 128, 6);
        let result = classify(&img, AssetHints::none());
        assert!(result.aligned.is_none());
        assert!(result.decision.preprocessing.is_empty());
    }

    struct CountingResizer(Arc<AtomicUsize>);

    impl Resizer for CountingResizer {
        fn resize(&self, src: PixelBuffer<'_>, width: u32, height: u32) -> RgbaImage {
            self.0.fetch_add(1, Ordering::SeqCst);
            FilterResizer::default().resize(src, width, height)
        }
    }

    #[test]
    fn test_alignment_uses_injected_resizer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = PolicyEngine::with_resizer(
            PolicySettings::default(),
            CountingResizer(calls.clone()),
        );

        let img = noise(99, 33, 1);
        let result = engine.classify(PixelBuffer::from_image(&img), AssetHints::none(), SourceTraits::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.aligned.unwrap().dimensions(), (100, 36));

        // An early terminal rule never reaches alignment
        let img = solid(99, 33, [0, 0, 0, 255]);
        let result = engine.classify(PixelBuffer::from_image(&img), AssetHints::none(), SourceTraits::default());
        assert_eq!(result.decision.rule, rule("flat-symbol"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fallback_with_budget() {
        let img = solid(500, 500, [120, 140, 160, 255]);
        let result = classify(&img, AssetHints::none());
        let decision = result.decision;
        assert_eq!(decision.rule, fallback_rule());
        assert_eq!(decision.format, TextureFormat::Bc7);
        assert_eq!(decision.quality, QualityTier::Balanced);

        let budget = decision.time_budget.unwrap();
        assert_eq!(budget.limit, DEFAULT_FALLBACK_BUDGET);
        assert_eq!(budget.downgrade.format, TextureFormat::Bc3);
        assert_eq!(budget.downgrade_rule, downgrade_rule());
    }

    #[test]
    fn test_fallback_downgrade_keeps_bc7_for_soft_alpha() {
        let mut img = solid(500, 500, [255, 255, 255, 255]);
        for y in 0..500 {
            fill_alpha(&mut img, 0, y, 500, 1, ((y * 13) % 256) as u8);
        }
        let result = classify(&img, AssetHints::none());
        let budget = result.decision.time_budget.unwrap();
        assert_eq!(budget.downgrade.format, TextureFormat::Bc7);
        assert_eq!(budget.downgrade.quality, QualityTier::FastBalanced);
    }

    #[test]
    fn test_fallback_without_budget() {
        let engine = PolicyEngine::new(PolicySettings {
            fallback_budget: None,
            ..PolicySettings::default()
        });
        let img = solid(500, 500, [120, 140, 160, 255]);
        let result = engine.classify(PixelBuffer::from_image(&img), AssetHints::none(), SourceTraits::default());
        assert_eq!(result.decision.rule, fallback_rule());
        assert_eq!(result.decision.quality, QualityTier::FastBalanced);
        assert!(result.decision.time_budget.is_none());
    }

    #[test]
    fn test_degenerate_buffer_reaches_fallback() {
        let buf = PixelBuffer::new(&[], 0, 0, 0).unwrap();
        let result = PolicyEngine::default().classify(buf, AssetHints::none(), SourceTraits::default());
        assert_eq!(result.decision.rule, fallback_rule());
        assert!(result.aligned.is_none());
        assert!(result.decision.preprocessing.is_empty());

        let buf = PixelBuffer::new(&[], 0, 37, 0).unwrap();
        let result = PolicyEngine::default().classify(buf, AssetHints::none(), SourceTraits::default());
        assert_eq!(result.decision.rule, fallback_rule());
    }

    #[test]
    fn test_classification_is_idempotent() {
        let engine = PolicyEngine::default();
        for img in [noise(250, 130, 1), glow(800, 240), vertical_gradient(1000, 1000)] {
            let buf = PixelBuffer::from_image(&img);
            let first = engine.classify(buf, AssetHints::none(), SourceTraits::default());
            let second = engine.classify(buf, AssetHints::none(), SourceTraits::default());
            assert_eq!(first.decision, second.decision);
            assert_eq!(first.aligned, second.aligned);
        }
    }

    #[test]
    fn test_correction_steps() {
        let engine = PolicyEngine::new(PolicySettings {
            correction: Some(Correction {
                gamma: 0.88,
                green_boost: 1.16,
            }),
            ..PolicySettings::default()
        });

        let mut img = noise(256, 256, 3);
        fill_alpha(&mut img, 0, 0, 16, 16, 128);
        let buf = PixelBuffer::from_image(&img);

        let plain = engine.classify(buf, AssetHints::none(), SourceTraits::default());
        assert_eq!(plain.decision.preprocessing, vec![Preprocess::PremultiplyAlpha]);

        let tagged = engine.classify(
            buf,
            AssetHints::none(),
            SourceTraits {
                has_icc_profile: true,
            },
        );
        assert_eq!(
            tagged.decision.preprocessing,
            vec![
                Preprocess::PremultiplyAlpha,
                Preprocess::GammaCorrect { gamma: 0.88 },
                Preprocess::GreenBoost { factor: 1.16 },
            ]
        );
        // Correction never changes the chosen encoding
        assert_eq!(plain.decision.rule, tagged.decision.rule);
        assert_eq!(plain.decision.format, tagged.decision.format);

        let opaque = noise(256, 256, 3);
        let result = engine.classify(
            PixelBuffer::from_image(&opaque),
            AssetHints::none(),
            SourceTraits {
                has_icc_profile: true,
            },
        );
        assert!(result.decision.preprocessing.is_empty());
    }

    #[test]
    fn test_correction_ignores_alignment_resampling() {
        let engine = PolicyEngine::new(PolicySettings {
            correction: Some(Correction {
                gamma: 0.88,
                green_boost: 1.16,
            }),
            ..PolicySettings::default()
        });

        // Binary alpha with a hard edge; 502x130 needs alignment
        let mut img = noise(502, 130, 6);
        fill_alpha(&mut img, 0, 0, 251, 130, 0);
        assert!(!has_partial_alpha(PixelBuffer::from_image(&img)));

        let result = engine.classify(
            PixelBuffer::from_image(&img),
            AssetHints::none(),
            SourceTraits {
                has_icc_profile: true,
            },
        );
        assert!(result.aligned.is_some());
        assert_eq!(
            result.decision.preprocessing,
            vec![Preprocess::ResizeToMultipleOf4 {
                width: 504,
                height: 132
            }]
        );
    }

    #[test]
    fn test_correction_disabled_by_default() {
        let mut img = noise(256, 256, 3);
        fill_alpha(&mut img, 0, 0, 16, 16, 128);
        let result = PolicyEngine::default().classify(
            PixelBuffer::from_image(&img),
            AssetHints::none(),
            SourceTraits {
                has_icc_profile: true,
            },
        );
        assert!(result.decision.preprocessing.is_empty());
    }
}
