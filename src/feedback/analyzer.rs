//! Aggregation of the feedback log into resolution rates, recurring
//! failures and optimization recommendations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{FeedbackItem, FeedbackSource, FeedbackType, Outcome};
use crate::domain::Category;

/// Window used for the volume trend insight.
const RECENT_DAYS: i64 = 7;
const HIGH_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub category: Category,
    pub source: FeedbackSource,
    pub total: usize,
    pub resolved: usize,
    pub exhausted: usize,
    pub resolution_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSignature {
    pub signature: String,
    pub category: Category,
    pub occurrences: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub resolution_rate: f64,
    pub sample_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub text: String,
    pub confidence: f64,
    pub signature: String,
    pub occurrences: usize,
    pub category: Category,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalysis {
    pub window_days: u32,
    pub total: usize,
    pub average_severity: f64,
    pub resolution_rate: f64,
    pub by_type: BTreeMap<FeedbackType, usize>,
    pub by_source: BTreeMap<FeedbackSource, usize>,
    pub groups: Vec<GroupStats>,
    pub recurring: Vec<RecurringSignature>,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub insights: Vec<String>,
}

#[derive(Default)]
struct Tally {
    total: usize,
    resolved: usize,
    exhausted: usize,
}

impl Tally {
    fn add(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Resolved => self.resolved += 1,
            Outcome::Exhausted => self.exhausted += 1,
            Outcome::Info => {}
        }
    }

    /// Share of finished items that were resolved; 0 when nothing finished.
    fn resolution_rate(&self) -> f64 {
        let finished = self.resolved + self.exhausted;
        if finished == 0 {
            0.0
        } else {
            self.resolved as f64 / finished as f64
        }
    }
}

pub struct FeedbackAnalyzer {
    pub recurrence_threshold: usize,
}

impl FeedbackAnalyzer {
    pub fn new(recurrence_threshold: usize) -> Self {
        Self {
            recurrence_threshold,
        }
    }

    /// Analyze the items falling inside the trailing `days` window ending at `now`.
    pub fn analyze(
        &self,
        items: &[FeedbackItem],
        days: u32,
        now: DateTime<Utc>,
    ) -> FeedbackAnalysis {
        let since = now - Duration::days(i64::from(days));
        let window: Vec<&FeedbackItem> = items.iter().filter(|i| i.timestamp >= since).collect();

        let mut analysis = FeedbackAnalysis {
            window_days: days,
            total: window.len(),
            ..Default::default()
        };
        if window.is_empty() {
            analysis.insights.push("No feedback data available for analysis".to_string());
            return analysis;
        }

        let mut overall = Tally::default();
        let mut groups: BTreeMap<(Category, FeedbackSource), Tally> = BTreeMap::new();
        for item in &window {
            *analysis.by_type.entry(item.feedback_type).or_default() += 1;
            *analysis.by_source.entry(item.source).or_default() += 1;
            overall.add(item.outcome);
            groups
                .entry((item.category.unwrap_or(Category::Unknown), item.source))
                .or_default()
                .add(item.outcome);
        }
        analysis.average_severity =
            window.iter().map(|i| i.severity).sum::<f64>() / window.len() as f64;
        analysis.resolution_rate = overall.resolution_rate();
        analysis.groups = groups
            .into_iter()
            .map(|((category, source), tally)| GroupStats {
                category,
                source,
                total: tally.total,
                resolved: tally.resolved,
                exhausted: tally.exhausted,
                resolution_rate: tally.resolution_rate(),
            })
            .collect();

        analysis.recurring = self.recurring(&window);
        analysis.recommendations = analysis
            .recurring
            .iter()
            .map(|r| self.recommend(r, days))
            .collect();
        analysis.recommendations.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        analysis.insights = insights(&window, &analysis, now);
        analysis
    }

    /// Error signatures seen at least `recurrence_threshold` times, most frequent first.
    fn recurring(&self, window: &[&FeedbackItem]) -> Vec<RecurringSignature> {
        let mut by_signature: BTreeMap<&str, Vec<&FeedbackItem>> = BTreeMap::new();
        for item in window.iter().filter(|i| i.feedback_type == FeedbackType::Error) {
            by_signature.entry(item.signature.as_str()).or_default().push(item);
        }

        let mut recurring: Vec<RecurringSignature> = by_signature
            .into_iter()
            .filter(|(_, items)| items.len() >= self.recurrence_threshold)
            .filter_map(|(signature, items)| {
                let first_seen = items.iter().map(|i| i.timestamp).min()?;
                let last_seen = items.iter().map(|i| i.timestamp).max()?;
                let latest = items.iter().max_by_key(|i| i.timestamp)?;
                let mut tally = Tally::default();
                items.iter().for_each(|i| tally.add(i.outcome));
                Some(RecurringSignature {
                    signature: signature.to_string(),
                    category: dominant_category(&items),
                    occurrences: items.len(),
                    first_seen,
                    last_seen,
                    resolution_rate: tally.resolution_rate(),
                    sample_message: latest.message.clone(),
                })
            })
            .collect();

        recurring.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        recurring
    }

    fn recommend(&self, recurring: &RecurringSignature, days: u32) -> OptimizationRecommendation {
        let occurrences = recurring.occurrences as f64;
        let threshold = self.recurrence_threshold.max(1) as f64;
        let raw =
            occurrences / (occurrences + threshold) + 0.25 * (1.0 - recurring.resolution_rate);
        let confidence = (raw.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;

        let text = format!(
            "{} error {} recurred {} times in the last {} days ({:.0}% resolved): {}",
            recurring.category,
            recurring.signature,
            recurring.occurrences,
            days,
            recurring.resolution_rate * 100.0,
            recurring.category.suggested_fix()
        );

        OptimizationRecommendation {
            text,
            confidence,
            signature: recurring.signature.clone(),
            occurrences: recurring.occurrences,
            category: recurring.category,
        }
    }
}

fn dominant_category(items: &[&FeedbackItem]) -> Category {
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    for category in items.iter().filter_map(|i| i.category) {
        *counts.entry(category).or_default() += 1;
    }
    // Ties go to the lower-ordered category so the choice is stable.
    counts
        .into_iter()
        .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.cmp(ca)))
        .map(|(category, _)| category)
        .unwrap_or(Category::Unknown)
}

fn insights(
    window: &[&FeedbackItem],
    analysis: &FeedbackAnalysis,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut insights = Vec::new();

    let recent_cutoff = now - Duration::days(RECENT_DAYS);
    let (recent, older): (Vec<&FeedbackItem>, Vec<&FeedbackItem>) =
        window.iter().copied().partition(|i| i.timestamp > recent_cutoff);
    if recent.len() > older.len() {
        insights.push("Feedback volume is increasing; failures may be growing".to_string());
    } else if recent.len() < older.len() {
        insights.push("Feedback volume is decreasing; fixes are taking effect".to_string());
    }

    let mut tally = Tally::default();
    recent.iter().for_each(|i| tally.add(i.outcome));
    if tally.resolved + tally.exhausted > 0 {
        let rate = tally.resolution_rate();
        if rate > 0.8 {
            insights.push(format!(
                "High resolution rate ({:.0}%) in the last {} days",
                rate * 100.0,
                RECENT_DAYS
            ));
        } else if rate < 0.5 {
            insights.push(format!(
                "Low resolution rate ({:.0}%) in the last {} days needs attention",
                rate * 100.0,
                RECENT_DAYS
            ));
        }
    }

    if !analysis.recurring.is_empty() {
        insights.push(format!("{} recurring error signatures detected", analysis.recurring.len()));
    }

    let high = analysis
        .recommendations
        .iter()
        .filter(|r| r.confidence > HIGH_CONFIDENCE)
        .count();
    if high > 0 {
        insights.push(format!("{} high-confidence optimizations recommended", high));
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn error(message: &str, days_ago: i64, outcome: Outcome, category: Category) -> FeedbackItem {
        let mut item = FeedbackItem::new(message, FeedbackType::Error, FeedbackSource::Ci)
            .with_outcome(outcome)
            .with_category(category);
        item.timestamp = now() - Duration::days(days_ago);
        item
    }

    #[test]
    fn test_empty_window() {
        let analysis = FeedbackAnalyzer::new(3).analyze(&[], 30, now());
        assert_eq!(analysis.total, 0);
        assert_eq!(analysis.insights, vec!["No feedback data available for analysis"]);
    }

    #[test]
    fn test_window_excludes_old_items() {
        let items = vec![
            error("old failure", 45, Outcome::Exhausted, Category::Network),
            error("new failure", 1, Outcome::Resolved, Category::Network),
        ];
        let analysis = FeedbackAnalyzer::new(3).analyze(&items, 30, now());
        assert_eq!(analysis.total, 1);
        assert_eq!(analysis.resolution_rate, 1.0);
    }

    #[test]
    fn test_groups_by_category_and_source() {
        let mut review =
            FeedbackItem::new("naming", FeedbackType::ReviewComment, FeedbackSource::Review);
        review.timestamp = now() - Duration::days(2);
        let items = vec![
            error("connection refused", 1, Outcome::Resolved, Category::Network),
            error("connection reset", 2, Outcome::Exhausted, Category::Network),
            error("connection reset", 3, Outcome::Resolved, Category::Network),
            review,
        ];
        let analysis = FeedbackAnalyzer::new(3).analyze(&items, 30, now());

        assert_eq!(analysis.groups.len(), 2);
        let network = analysis
            .groups
            .iter()
            .find(|g| g.category == Category::Network)
            .unwrap();
        assert_eq!(network.source, FeedbackSource::Ci);
        assert_eq!((network.total, network.resolved, network.exhausted), (3, 2, 1));
        assert!((network.resolution_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(analysis.by_type[&FeedbackType::Error], 3);
        assert_eq!(analysis.by_source[&FeedbackSource::Review], 1);
    }

    #[test]
    fn test_recurring_signature_recommendation() {
        let items: Vec<FeedbackItem> = (1..=4)
            .map(|d| {
                let message = format!("Connection refused to 10.0.0.{}:5432", d);
                error(&message, d, Outcome::Exhausted, Category::Network)
            })
            .collect();
        let analysis = FeedbackAnalyzer::new(3).analyze(&items, 30, now());

        assert_eq!(analysis.recurring.len(), 1);
        let recurring = &analysis.recurring[0];
        assert_eq!(recurring.occurrences, 4);
        assert_eq!(recurring.category, Category::Network);
        assert_eq!(recurring.resolution_rate, 0.0);
        assert_eq!(recurring.first_seen, now() - Duration::days(4));

        let rec = &analysis.recommendations[0];
        // 4/(4+3) + 0.25
        assert_eq!(rec.confidence, 0.821);
        assert!(rec.text.contains("network"));
        assert!(rec.text.contains(Category::Network.suggested_fix()));
        assert!(analysis.insights.iter().any(|i| i.contains("1 high-confidence")));
    }

    #[test]
    fn test_recurrence_ignores_paths_and_names() {
        let missing = |module: &str, file: &str, days_ago: i64, outcome: Outcome| {
            let message = format!("ModuleNotFoundError: No module named '{}' in {}", module, file);
            error(&message, days_ago, outcome, Category::Dependency)
        };
        let items = vec![
            missing("requests", "src/app/main.py", 1, Outcome::Resolved),
            missing("numpy", "lib/util.py", 2, Outcome::Exhausted),
            missing("yaml", "tools/gen.py", 3, Outcome::Exhausted),
            error("Permission denied: /run/app.sock", 1, Outcome::Exhausted, Category::Permission),
        ];
        let analysis = FeedbackAnalyzer::new(3).analyze(&items, 30, now());

        assert_eq!(analysis.recurring.len(), 1);
        assert_eq!(analysis.recurring[0].occurrences, 3);
        assert_eq!(analysis.recurring[0].category, Category::Dependency);
        assert!((analysis.recurring[0].resolution_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_below_threshold_not_recurring() {
        let items = vec![
            error("disk full", 1, Outcome::Exhausted, Category::System),
            error("disk full", 2, Outcome::Exhausted, Category::System),
        ];
        let analysis = FeedbackAnalyzer::new(3).analyze(&items, 30, now());
        assert!(analysis.recurring.is_empty());
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let items: Vec<FeedbackItem> = (0..50)
            .map(|_| error("same failure", 1, Outcome::Exhausted, Category::Runtime))
            .collect();
        let analysis = FeedbackAnalyzer::new(1).analyze(&items, 30, now());
        assert_eq!(analysis.recommendations[0].confidence, 1.0);
    }

    #[test]
    fn test_volume_and_resolution_insights() {
        let items = vec![
            error("a", 1, Outcome::Exhausted, Category::Runtime),
            error("b", 2, Outcome::Exhausted, Category::Runtime),
            error("c", 20, Outcome::Resolved, Category::Runtime),
        ];
        let analysis = FeedbackAnalyzer::new(3).analyze(&items, 30, now());
        assert!(analysis.insights.iter().any(|i| i.contains("increasing")));
        assert!(analysis.insights.iter().any(|i| i.starts_with("Low resolution rate")));
    }
}
