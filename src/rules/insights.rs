use crate::query::breakdowns::{SectionStats, WEEKDAYS};
use crate::query::percentage;
use crate::rules::signals::peak;
use crate::rules::{Level, RuleContext};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightCategory {
    Engagement,
    Conversion,
    Content,
    Timing,
}

/// A categorized, confidence-scored observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightType,
    pub category: InsightCategory,
    pub title: String,
    pub description: String,
    pub impact: Level,
    pub actionable: bool,
    pub confidence: f64,
    pub data_points: usize,
}

impl Insight {
    /// Ranking score: impact weight × confidence.
    pub fn score(&self) -> f64 {
        f64::from(self.impact.weight()) * self.confidence
    }
}

/// What a matching rule contributes beyond its static fields.
struct Finding {
    description: String,
    data_points: usize,
}

struct InsightRule {
    title: &'static str,
    category: InsightCategory,
    kind: InsightType,
    impact: Level,
    confidence: f64,
    actionable: bool,
    evaluate: fn(&RuleContext<'_>) -> Option<Finding>,
}

/// Rules in evaluation order. Output order is decided by [`Insight::score`], with
/// this order breaking ties.
const RULES: &[InsightRule] = &[
    InsightRule {
        title: "Excellent Content Engagement",
        category: InsightCategory::Engagement,
        kind: InsightType::Positive,
        impact: Level::High,
        confidence: 0.90,
        actionable: false,
        evaluate: strong_engagement,
    },
    InsightRule {
        title: "Low Initial Engagement",
        category: InsightCategory::Engagement,
        kind: InsightType::Negative,
        impact: Level::High,
        confidence: 0.85,
        actionable: true,
        evaluate: weak_engagement,
    },
    InsightRule {
        title: "Mobile Experience Gap",
        category: InsightCategory::Engagement,
        kind: InsightType::Negative,
        impact: Level::Medium,
        confidence: 0.80,
        actionable: true,
        evaluate: mobile_gap,
    },
    InsightRule {
        title: "Excellent Conversion Performance",
        category: InsightCategory::Conversion,
        kind: InsightType::Positive,
        impact: Level::High,
        confidence: 0.95,
        actionable: false,
        evaluate: conversion_above_benchmark,
    },
    InsightRule {
        title: "Below Average Conversion Rate",
        category: InsightCategory::Conversion,
        kind: InsightType::Negative,
        impact: Level::High,
        confidence: 0.90,
        actionable: true,
        evaluate: conversion_below_benchmark,
    },
    InsightRule {
        title: "High Download, Low Signature Rate",
        category: InsightCategory::Conversion,
        kind: InsightType::Negative,
        impact: Level::Medium,
        confidence: 0.80,
        actionable: true,
        evaluate: downloads_without_signatures,
    },
    InsightRule {
        title: "High Drop-off Section Identified",
        category: InsightCategory::Content,
        kind: InsightType::Negative,
        impact: Level::Medium,
        confidence: 0.85,
        actionable: true,
        evaluate: worst_section,
    },
    InsightRule {
        title: "High-Engagement Content Identified",
        category: InsightCategory::Content,
        kind: InsightType::Positive,
        impact: Level::Medium,
        confidence: 0.80,
        actionable: true,
        evaluate: best_section,
    },
    InsightRule {
        title: "Peak Engagement Time Identified",
        category: InsightCategory::Timing,
        kind: InsightType::Positive,
        impact: Level::Medium,
        confidence: 0.75,
        actionable: true,
        evaluate: peak_hour,
    },
    InsightRule {
        title: "Optimal Day for Proposals",
        category: InsightCategory::Timing,
        kind: InsightType::Positive,
        impact: Level::Low,
        confidence: 0.70,
        actionable: true,
        evaluate: peak_day,
    },
];

/// Evaluate every insight rule and rank the matches by impact × confidence.
///
/// An empty event set yields no insights.
pub fn generate_insights(ctx: &RuleContext<'_>) -> Vec<Insight> {
    if ctx.signals.is_empty() {
        return Vec::new();
    }

    let mut insights: Vec<Insight> = RULES
        .iter()
        .filter_map(|rule| {
            (rule.evaluate)(ctx).map(|finding| Insight {
                kind: rule.kind,
                category: rule.category,
                title: rule.title.to_string(),
                description: finding.description,
                impact: rule.impact,
                actionable: rule.actionable,
                confidence: rule.confidence,
                data_points: finding.data_points,
            })
        })
        .collect();
    insights.sort_by(|a, b| b.score().total_cmp(&a.score()));

    tracing::debug!(matched = insights.len(), rules = RULES.len(), "Evaluated insight rules");
    insights
}

fn strong_engagement(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let t = ctx.thresholds;
    (s.scroll_depth > t.strong_engagement_scroll_depth
        && s.avg_time_on_page > t.strong_engagement_time_on_page)
        .then(|| Finding {
            description: format!(
                "Readers are highly engaged: {:.1}% scroll depth and {:.0} seconds \
                 average time on page.",
                s.scroll_depth, s.avg_time_on_page
            ),
            data_points: s.events,
        })
}

fn weak_engagement(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let t = ctx.thresholds;
    (s.scroll_depth < t.weak_engagement_scroll_depth
        || s.bounce_rate > t.weak_engagement_bounce_rate)
        .then(|| Finding {
            description: format!(
                "A {:.1}% bounce rate with {:.1}% scroll depth means most readers leave \
                 before reaching the substance of the proposal.",
                s.bounce_rate, s.scroll_depth
            ),
            data_points: s.events,
        })
}

fn mobile_gap(ctx: &RuleContext<'_>) -> Option<Finding> {
    let gap = ctx.signals.device_gap?;
    (gap.scroll_gap() > ctx.thresholds.mobile_scroll_gap).then(|| Finding {
        description: format!(
            "Mobile readers reach {:.1}% of the document against {:.1}% on desktop, \
             pointing at mobile layout problems.",
            gap.mobile_scroll_depth, gap.desktop_scroll_depth
        ),
        data_points: gap.events,
    })
}

fn conversion_above_benchmark(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let benchmark = ctx.benchmarks.conversion_rate;
    (s.views > 0 && s.conversion_rate > benchmark * ctx.thresholds.conversion_above_benchmark)
        .then(|| Finding {
            description: format!(
                "A {:.1}% conversion rate is well above the {benchmark}% industry average.",
                s.conversion_rate
            ),
            data_points: s.views,
        })
}

fn conversion_below_benchmark(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let benchmark = ctx.benchmarks.conversion_rate;
    (s.views > 0 && s.conversion_rate < benchmark * ctx.thresholds.conversion_below_benchmark)
        .then(|| Finding {
            description: format!(
                "A {:.1}% conversion rate trails the {benchmark}% industry average. Review \
                 the proposal content and where the call to action sits.",
                s.conversion_rate
            ),
            data_points: s.views,
        })
}

fn downloads_without_signatures(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let t = ctx.thresholds;
    (s.downloads as f64 > s.signatures as f64 * t.download_to_signature_ratio
        && s.download_to_signature_rate < t.download_to_signature_rate)
        .then(|| Finding {
            description: format!(
                "Many readers download without signing ({:.1}% of downloads convert), \
                 which suggests price shopping or a stalled decision.",
                s.download_to_signature_rate
            ),
            data_points: s.downloads,
        })
}

fn qualifying_sections<'a>(ctx: &'a RuleContext<'_>) -> impl Iterator<Item = &'a SectionStats> {
    let min_views = ctx.thresholds.section_min_views;
    ctx.signals.sections.iter().filter(move |s| s.views > min_views)
}

fn worst_section(ctx: &RuleContext<'_>) -> Option<Finding> {
    let threshold = ctx.thresholds.section_drop_off_rate;
    let worst = qualifying_sections(ctx)
        .filter(|s| s.drop_off_rate() > threshold)
        .reduce(|best, s| if s.drop_off_rate() > best.drop_off_rate() { s } else { best })?;
    Some(Finding {
        description: format!(
            "The \"{}\" section loses {:.1}% of its readers. Consider reworking it.",
            worst.section,
            worst.drop_off_rate()
        ),
        data_points: worst.views,
    })
}

fn best_section(ctx: &RuleContext<'_>) -> Option<Finding> {
    let threshold = ctx.thresholds.section_engaged_time;
    let best = qualifying_sections(ctx)
        .filter(|s| s.avg_time_spent > threshold)
        .reduce(|best, s| if s.avg_time_spent > best.avg_time_spent { s } else { best })?;
    Some(Finding {
        description: format!(
            "The \"{}\" section holds readers for {:.0} seconds on average. Its approach \
             may carry over to other sections.",
            best.section, best.avg_time_spent
        ),
        data_points: best.views,
    })
}

fn peak_hour(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let (hour, count) = peak(&s.hour_counts);
    let average = s.events as f64 / 24.0;
    (count as f64 > average * ctx.thresholds.peak_hour_factor).then(|| Finding {
        description: format!(
            "{hour}:00 UTC carries {:.0}% of all activity, {:.1}x the hourly average. \
             Consider sending proposals around this hour.",
            percentage(count, s.events),
            count as f64 / average
        ),
        data_points: s.events,
    })
}

fn peak_day(ctx: &RuleContext<'_>) -> Option<Finding> {
    let s = ctx.signals;
    let (day, count) = peak(&s.weekday_counts);
    let average = s.events as f64 / 7.0;
    (count as f64 > average * ctx.thresholds.peak_day_factor).then(|| Finding {
        description: format!(
            "{} sees the most activity with {:.0}% of the week. Consider sending \
             proposals on this day.",
            WEEKDAYS[day],
            percentage(count, s.events)
        ),
        data_points: s.events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Benchmarks, RuleThresholds};
    use crate::ingest::event::{DeviceType, Event, EventType};
    use crate::rules::Signals;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::Map;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn event(event_type: EventType, session: &str, offset_secs: i64) -> Event {
        Event {
            event_type,
            timestamp: base() + Duration::seconds(offset_secs),
            session_id: session.to_string(),
            visitor_id: None,
            proposal_id: None,
            user_id: None,
            section: None,
            scroll_depth: None,
            time_on_page: None,
            device_type: None,
            browser_type: None,
            location: None,
            metadata: Map::new(),
        }
    }

    fn scroll(session: &str, offset_secs: i64, depth: f64) -> Event {
        let mut e = event(EventType::Scroll, session, offset_secs);
        e.scroll_depth = Some(depth);
        e
    }

    fn insights_for(events: &[Event]) -> Vec<Insight> {
        let refs: Vec<&Event> = events.iter().collect();
        let signals = Signals::from_events(&refs);
        let thresholds = RuleThresholds::default();
        let benchmarks = Benchmarks::default();
        generate_insights(&RuleContext {
            signals: &signals,
            thresholds: &thresholds,
            benchmarks: &benchmarks,
        })
    }

    fn find<'a>(insights: &'a [Insight], title: &str) -> Option<&'a Insight> {
        insights.iter().find(|i| i.title == title)
    }

    #[test]
    fn test_empty_input_has_no_insights() {
        assert!(insights_for(&[]).is_empty());
    }

    #[test]
    fn test_strong_engagement() {
        let events: Vec<Event> = (0..20)
            .flat_map(|i| {
                let session = format!("s{i}");
                [
                    event(EventType::View, &session, 0),
                    scroll(&session, 120, 75.0),
                    event(EventType::Exit, &session, 300),
                ]
            })
            .collect();
        let insights = insights_for(&events);
        let insight = find(&insights, "Excellent Content Engagement").unwrap();
        assert_eq!(insight.kind, InsightType::Positive);
        assert_eq!(insight.impact, Level::High);
        assert!((insight.confidence - 0.90).abs() < f64::EPSILON);
        assert!(!insight.actionable);
        assert_eq!(insight.data_points, 60);
        assert!(find(&insights, "Low Initial Engagement").is_none());
    }

    #[test]
    fn test_weak_engagement_from_bounces() {
        let events: Vec<Event> = (0..10).map(|i| event(EventType::View, &format!("s{i}"), 0)).collect();
        let insights = insights_for(&events);
        let insight = find(&insights, "Low Initial Engagement").unwrap();
        assert_eq!(insight.kind, InsightType::Negative);
        assert!(insight.actionable);
    }

    #[test]
    fn test_mobile_gap() {
        let mut desktop = scroll("d", 0, 90.0);
        desktop.device_type = Some(DeviceType::Desktop);
        let mut mobile = scroll("m", 0, 50.0);
        mobile.device_type = Some(DeviceType::Mobile);
        let insights = insights_for(&[desktop, mobile]);
        let insight = find(&insights, "Mobile Experience Gap").unwrap();
        assert_eq!(insight.impact, Level::Medium);
        assert_eq!(insight.data_points, 2);
    }

    #[test]
    fn test_conversion_above_and_below() {
        // 5% = 2x the 2.5% benchmark
        let mut events: Vec<Event> = (0..20).map(|i| event(EventType::View, &format!("s{i}"), 0)).collect();
        events.push(event(EventType::Signature, "s0", 60));
        let insights = insights_for(&events);
        let high = find(&insights, "Excellent Conversion Performance").unwrap();
        assert!((high.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(high.impact, Level::High);
        assert_eq!(high.data_points, 20);
        // Highest score ranks first.
        assert_eq!(insights[0].title, "Excellent Conversion Performance");

        let no_signatures: Vec<Event> =
            (0..20).map(|i| event(EventType::View, &format!("s{i}"), 0)).collect();
        assert!(find(&insights_for(&no_signatures), "Below Average Conversion Rate").is_some());
    }

    #[test]
    fn test_conversion_rules_need_views() {
        let events = [event(EventType::Click, "s1", 0), event(EventType::Click, "s1", 40)];
        let insights = insights_for(&events);
        assert!(find(&insights, "Below Average Conversion Rate").is_none());
    }

    #[test]
    fn test_downloads_without_signatures() {
        let mut events: Vec<Event> = (0..5).map(|i| event(EventType::Download, &format!("s{i}"), 0)).collect();
        events.push(event(EventType::Signature, "s0", 10));
        let insight = find(&insights_for(&events), "High Download, Low Signature Rate")
            .cloned()
            .unwrap();
        assert_eq!(insight.data_points, 5);
        assert!(insight.description.contains("20.0%"));
    }

    #[test]
    fn test_section_rules() {
        let mut events = Vec::new();
        for i in 0..6 {
            let session = format!("s{i}");
            let mut view = event(EventType::View, &session, 0);
            view.section = Some("pricing".to_string());
            let mut exit = event(EventType::Exit, &session, 5);
            exit.section = Some("pricing".to_string());
            events.push(view);
            events.push(exit);

            let mut read = event(EventType::View, &session, 0);
            read.section = Some("scope".to_string());
            let mut done = event(EventType::Click, &session, 90);
            done.section = Some("scope".to_string());
            events.push(read);
            events.push(done);
        }
        let insights = insights_for(&events);
        let worst = find(&insights, "High Drop-off Section Identified").unwrap();
        assert!(worst.description.contains("\"pricing\""));
        assert_eq!(worst.data_points, 6);
        let best = find(&insights, "High-Engagement Content Identified").unwrap();
        assert!(best.description.contains("\"scope\""));
    }

    #[test]
    fn test_timing_rules() {
        // Everything at 09:00 on one Wednesday.
        let events: Vec<Event> = (0..10).map(|i| event(EventType::View, &format!("s{i}"), i)).collect();
        let insights = insights_for(&events);
        let hour = find(&insights, "Peak Engagement Time Identified").unwrap();
        assert!(hour.description.starts_with("9:00"));
        assert_eq!(hour.data_points, 10);
        let day = find(&insights, "Optimal Day for Proposals").unwrap();
        assert!(day.description.starts_with("Wednesday"));
        assert_eq!(day.impact, Level::Low);
    }

    #[test]
    fn test_sorted_by_score() {
        let events: Vec<Event> = (0..10).map(|i| event(EventType::View, &format!("s{i}"), i)).collect();
        let insights = insights_for(&events);
        assert!(insights.windows(2).all(|w| w[0].score() >= w[1].score()));
    }

    #[test]
    fn test_wire_format() {
        let events: Vec<Event> = (0..10).map(|i| event(EventType::View, &format!("s{i}"), i)).collect();
        let insights = insights_for(&events);
        let json = serde_json::to_value(find(&insights, "Low Initial Engagement").unwrap()).unwrap();
        assert_eq!(json["type"], "negative");
        assert_eq!(json["category"], "engagement");
        assert_eq!(json["impact"], "high");
        assert!(json.get("dataPoints").is_some());
        assert!(json.get("kind").is_none());
    }
}
