use crate::rules::signals::top_buckets;
use crate::rules::{Level, RuleContext};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Content,
    Design,
    Timing,
    #[serde(rename = "follow-up")]
    FollowUp,
}

/// A prioritized, actionable optimization step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub priority: Level,
    pub category: RecommendationCategory,
    pub title: String,
    pub description: String,
    pub expected_impact: String,
    pub implementation: String,
    pub estimated_effort: Level,
    pub expected_timeframe: String,
}

struct RecommendationRule {
    title: &'static str,
    priority: Level,
    category: RecommendationCategory,
    expected_impact: &'static str,
    implementation: &'static str,
    estimated_effort: Level,
    expected_timeframe: &'static str,
    /// Returns the description when the rule applies.
    evaluate: fn(&RuleContext<'_>) -> Option<String>,
}

const RULES: &[RecommendationRule] = &[
    RecommendationRule {
        title: "Improve Opening Content Hook",
        priority: Level::High,
        category: RecommendationCategory::Content,
        expected_impact: "Increase scroll depth by 20-30% and reduce bounce rate",
        implementation: "Rewrite the first section to focus on client pain points and immediate \
                         value. Use bullet points and visuals to make it scannable.",
        estimated_effort: Level::Medium,
        expected_timeframe: "1-2 weeks",
        evaluate: opening_hook,
    },
    RecommendationRule {
        title: "Optimize Proposal Length and Structure",
        priority: Level::High,
        category: RecommendationCategory::Content,
        expected_impact: "Reduce bounce rate by 15-25%",
        implementation: "Use executive summary, clear headings, bullet points, and visual \
                         breaks. Consider progressive disclosure for detailed sections.",
        estimated_effort: Level::High,
        expected_timeframe: "2-3 weeks",
        evaluate: restructure,
    },
    RecommendationRule {
        title: "Revise Low-Engagement Sections",
        priority: Level::Medium,
        category: RecommendationCategory::Content,
        expected_impact: "Improve overall engagement by 10-15%",
        implementation: "Review sections with <30 second engagement. Add visuals, simplify \
                         language, or consider removing if not essential.",
        estimated_effort: Level::Medium,
        expected_timeframe: "1-2 weeks",
        evaluate: low_engagement_sections,
    },
    RecommendationRule {
        title: "Optimize Mobile Experience",
        priority: Level::High,
        category: RecommendationCategory::Design,
        expected_impact: "Improve mobile conversion by 20-30%",
        implementation: "Implement responsive design, larger touch targets, simplified \
                         navigation, and mobile-optimized content layout.",
        estimated_effort: Level::High,
        expected_timeframe: "3-4 weeks",
        evaluate: mobile_experience,
    },
    RecommendationRule {
        title: "Improve Call-to-Action Visibility",
        priority: Level::Medium,
        category: RecommendationCategory::Design,
        expected_impact: "Increase click-through rate by 15-25%",
        implementation: "Use contrasting colors, clear action-oriented text, and strategic \
                         placement for CTAs. Consider multiple CTA placements.",
        estimated_effort: Level::Low,
        expected_timeframe: "1 week",
        evaluate: call_to_action,
    },
    RecommendationRule {
        title: "Optimize Proposal Send Times",
        priority: Level::Medium,
        category: RecommendationCategory::Timing,
        expected_impact: "Increase initial view rates by 10-20%",
        implementation: "Schedule proposal sends during peak hours. Set up automated sending \
                         for optimal times.",
        estimated_effort: Level::Low,
        expected_timeframe: "1 week",
        evaluate: send_times,
    },
    RecommendationRule {
        title: "Implement Follow-up Sequence",
        priority: Level::Medium,
        category: RecommendationCategory::Timing,
        expected_impact: "Reduce time to signature by 20-30%",
        implementation: "Create automated follow-up emails at 3, 7, and 14 days with different \
                         angles (urgency, social proof, additional value).",
        estimated_effort: Level::Medium,
        expected_timeframe: "2 weeks",
        evaluate: follow_up_sequence,
    },
    RecommendationRule {
        title: "Target Download-Only Users",
        priority: Level::High,
        category: RecommendationCategory::FollowUp,
        expected_impact: "Convert 10-15% of download-only users to signatures",
        implementation: "Set up automated follow-up for users who download but don't sign \
                         within 48 hours. Address common objections and offer consultation calls.",
        estimated_effort: Level::Medium,
        expected_timeframe: "2 weeks",
        evaluate: download_only,
    },
    RecommendationRule {
        title: "Nurture Return Visitors",
        priority: Level::Medium,
        category: RecommendationCategory::FollowUp,
        expected_impact: "Increase conversion rate of return visitors by 25-40%",
        implementation: "Create personalized follow-up content for return visitors. Offer \
                         limited-time incentives or schedule consultation calls.",
        estimated_effort: Level::Medium,
        expected_timeframe: "2-3 weeks",
        evaluate: nurture_return_visitors,
    },
];

/// Evaluate every recommendation rule, highest priority first.
///
/// Rules of equal priority keep table order. An empty event set yields nothing.
pub fn generate_recommendations(ctx: &RuleContext<'_>) -> Vec<Recommendation> {
    if ctx.signals.is_empty() {
        return Vec::new();
    }

    let mut recommendations: Vec<Recommendation> = RULES
        .iter()
        .filter_map(|rule| {
            (rule.evaluate)(ctx).map(|description| Recommendation {
                priority: rule.priority,
                category: rule.category,
                title: rule.title.to_string(),
                description,
                expected_impact: rule.expected_impact.to_string(),
                implementation: rule.implementation.to_string(),
                estimated_effort: rule.estimated_effort,
                expected_timeframe: rule.expected_timeframe.to_string(),
            })
        })
        .collect();
    recommendations.sort_by_key(|r| std::cmp::Reverse(r.priority.weight()));

    tracing::debug!(
        matched = recommendations.len(),
        rules = RULES.len(),
        "Evaluated recommendation rules"
    );
    recommendations
}

fn opening_hook(ctx: &RuleContext<'_>) -> Option<String> {
    let depth = ctx.signals.scroll_depth;
    (depth < ctx.thresholds.opening_hook_scroll_depth).then(|| {
        format!(
            "Readers only reach {depth:.1}% of the proposal. A stronger opening would keep \
             them reading."
        )
    })
}

fn restructure(ctx: &RuleContext<'_>) -> Option<String> {
    let bounce = ctx.signals.bounce_rate;
    (bounce > ctx.thresholds.restructure_bounce_rate).then(|| {
        format!(
            "A {bounce:.1}% bounce rate suggests the proposal feels too long or hard to \
             navigate at first glance."
        )
    })
}

fn low_engagement_sections(ctx: &RuleContext<'_>) -> Option<String> {
    let t = ctx.thresholds;
    let weak: Vec<&str> = ctx
        .signals
        .sections
        .iter()
        .filter(|s| s.events > t.section_min_events && s.avg_time_spent < t.section_low_engagement_time)
        .map(|s| s.section.as_str())
        .collect();
    (!weak.is_empty()).then(|| {
        format!(
            "{} section(s) hold readers for under {} seconds: {}.",
            weak.len(),
            t.section_low_engagement_time,
            weak.join(", ")
        )
    })
}

fn mobile_experience(ctx: &RuleContext<'_>) -> Option<String> {
    let gap = ctx.signals.device_gap?;
    (gap.scroll_gap() > ctx.thresholds.responsive_scroll_gap).then(|| {
        format!(
            "Mobile readers scroll {:.1} points less than desktop readers.",
            gap.scroll_gap()
        )
    })
}

fn call_to_action(ctx: &RuleContext<'_>) -> Option<String> {
    let s = ctx.signals;
    (s.views > 0 && s.click_through_rate < ctx.thresholds.call_to_action_ctr).then(|| {
        format!(
            "Only {:.1}% of views lead to a click. Calls to action may be hard to find.",
            s.click_through_rate
        )
    })
}

fn send_times(ctx: &RuleContext<'_>) -> Option<String> {
    let hours: Vec<String> = top_buckets(&ctx.signals.hour_counts, 3)
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(hour, _)| format!("{hour}:00"))
        .collect();
    (!hours.is_empty()).then(|| {
        format!(
            "Readers are most active at {} UTC. Time proposal delivery to match.",
            hours.join(", ")
        )
    })
}

fn follow_up_sequence(ctx: &RuleContext<'_>) -> Option<String> {
    let days = ctx.signals.days_to_signature?;
    (days > ctx.thresholds.follow_up_days_to_signature).then(|| {
        format!("Signing takes {days:.1} days on average after the first view.")
    })
}

fn download_only(ctx: &RuleContext<'_>) -> Option<String> {
    let s = ctx.signals;
    (s.downloads as f64 > s.signatures as f64 * ctx.thresholds.nurture_download_ratio).then(|| {
        format!(
            "{} downloads produced only {} signatures.",
            s.downloads, s.signatures
        )
    })
}

fn nurture_return_visitors(ctx: &RuleContext<'_>) -> Option<String> {
    let rate = ctx.signals.return_visitor_rate;
    (rate > ctx.thresholds.nurture_return_visitor_rate).then(|| {
        format!("{rate:.1}% of visitors come back, showing sustained interest worth following up on.")
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

    fn recommendations_for(events: &[Event]) -> Vec<Recommendation> {
        let refs: Vec<&Event> = events.iter().collect();
        let signals = Signals::from_events(&refs);
        let thresholds = RuleThresholds::default();
        let benchmarks = Benchmarks::default();
        generate_recommendations(&RuleContext {
            signals: &signals,
            thresholds: &thresholds,
            benchmarks: &benchmarks,
        })
    }

    fn titles(recommendations: &[Recommendation]) -> Vec<&str> {
        recommendations.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn test_empty_input_has_no_recommendations() {
        assert!(recommendations_for(&[]).is_empty());
    }

    #[test]
    fn test_bouncing_views() {
        let events: Vec<Event> = (0..10).map(|i| event(EventType::View, &format!("s{i}"), 0)).collect();
        let recommendations = recommendations_for(&events);
        let titles = titles(&recommendations);
        assert!(titles.contains(&"Improve Opening Content Hook"));
        assert!(titles.contains(&"Optimize Proposal Length and Structure"));
        assert!(titles.contains(&"Improve Call-to-Action Visibility"));
        assert!(titles.contains(&"Optimize Proposal Send Times"));
        assert!(!titles.contains(&"Target Download-Only Users"));
    }

    #[test]
    fn test_sorted_by_priority_keeping_table_order() {
        let events: Vec<Event> = (0..10).map(|i| event(EventType::View, &format!("s{i}"), 0)).collect();
        let recommendations = recommendations_for(&events);
        assert!(recommendations
            .windows(2)
            .all(|w| w[0].priority.weight() >= w[1].priority.weight()));
        assert_eq!(recommendations[0].title, "Improve Opening Content Hook");
        assert_eq!(recommendations[1].title, "Optimize Proposal Length and Structure");
    }

    #[test]
    fn test_send_times_lists_top_hours() {
        let mut events = Vec::new();
        for i in 0..3 {
            events.push(event(EventType::View, &format!("a{i}"), 5 * 3600));
        }
        for i in 0..2 {
            events.push(event(EventType::View, &format!("b{i}"), 0));
        }
        events.push(event(EventType::View, "c", 3600));
        events.push(event(EventType::View, "d", 2 * 3600));
        let recommendations = recommendations_for(&events);
        let send = recommendations
            .iter()
            .find(|r| r.title == "Optimize Proposal Send Times")
            .unwrap();
        assert!(send.description.contains("14:00, 9:00, 10:00"));
        assert_eq!(send.category, RecommendationCategory::Timing);
    }

    #[test]
    fn test_mobile_experience() {
        let mut desktop = event(EventType::Scroll, "d", 0);
        desktop.device_type = Some(DeviceType::Desktop);
        desktop.scroll_depth = Some(80.0);
        let mut mobile = event(EventType::Scroll, "m", 0);
        mobile.device_type = Some(DeviceType::Mobile);
        mobile.scroll_depth = Some(60.0);
        let recommendations = recommendations_for(&[desktop, mobile]);
        let mobile = recommendations
            .iter()
            .find(|r| r.title == "Optimize Mobile Experience")
            .unwrap();
        assert_eq!(mobile.priority, Level::High);
        assert_eq!(mobile.estimated_effort, Level::High);
        assert_eq!(mobile.expected_timeframe, "3-4 weeks");
    }

    #[test]
    fn test_follow_up_rules() {
        let mut events = Vec::new();
        for i in 0..4 {
            events.push(event(EventType::Download, &format!("s{i}"), 0));
        }
        events.push(event(EventType::View, "late", 0));
        events.push(event(EventType::Signature, "late", 10 * 86_400));
        let recommendations = recommendations_for(&events);
        let titles = titles(&recommendations);
        assert!(titles.contains(&"Target Download-Only Users"));
        assert!(titles.contains(&"Implement Follow-up Sequence"));
        let json = serde_json::to_value(
            recommendations
                .iter()
                .find(|r| r.title == "Target Download-Only Users")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(json["category"], "follow-up");
        assert_eq!(json["estimatedEffort"], "medium");
        assert!(json.get("expectedImpact").is_some());
    }

    #[test]
    fn test_low_engagement_sections() {
        let mut events = Vec::new();
        for i in 0..6 {
            let mut e = event(EventType::View, &format!("s{i}"), 0);
            e.section = Some("terms".to_string());
            events.push(e);
        }
        let recommendations = recommendations_for(&events);
        let revise = recommendations
            .iter()
            .find(|r| r.title == "Revise Low-Engagement Sections")
            .unwrap();
        assert!(revise.description.contains("terms"));
    }

    #[test]
    fn test_nurture_return_visitors() {
        let mut first = event(EventType::View, "s1", 0);
        first.visitor_id = Some("v1".to_string());
        let mut second = event(EventType::View, "s2", 2 * 86_400);
        second.visitor_id = Some("v1".to_string());
        let titles_found = recommendations_for(&[first, second]);
        assert!(titles(&titles_found).contains(&"Nurture Return Visitors"));
    }
}
