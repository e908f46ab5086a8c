use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use proposal_lens::config::EngineConfig;
use proposal_lens::engine::{AnalyticsEngine, AnalyticsRequest, RequestData};
use proposal_lens::ingest::cleaner::{clean_events, CleaningOptions};
use proposal_lens::ingest::event::{Event, RawEvent};
use proposal_lens::query::metrics::calculate_metrics;
use std::sync::Arc;

const EVENT_TYPES: [&str; 6] = ["view", "scroll", "click", "scroll", "download", "signature"];
const DEVICES: [&str; 3] = ["desktop", "mobile", "tablet"];
const SECTIONS: [&str; 5] = ["intro", "scope", "timeline", "pricing", "terms"];

fn bench_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn make_event(i: usize) -> RawEvent {
    let offset = i64::try_from(i).unwrap_or(0);
    RawEvent {
        event_type: EVENT_TYPES[i % EVENT_TYPES.len()].to_string(),
        timestamp: (bench_now() - Duration::minutes(offset * 7)).to_rfc3339(),
        session_id: Some(format!("session-{}", i / 6)),
        visitor_id: Some(format!("visitor-{}", i / 30)),
        proposal_id: Some(format!("proposal-{}", i % 12)),
        section: Some(SECTIONS[i % SECTIONS.len()].to_string()),
        scroll_depth: Some(f64::from(u32::try_from(i % 100).unwrap_or(0))),
        device_type: Some(DEVICES[i % DEVICES.len()].to_string()),
        ..RawEvent::default()
    }
}

/// End-to-end `full` requests: cleaning, filtering and the four concurrent tasks.
fn bench_full_request(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = AnalyticsEngine::new(Arc::new(EngineConfig::default()));
    let mut group = c.benchmark_group("process_analytics_full");

    for size in [100, 1_000, 10_000] {
        let events: Vec<RawEvent> = (0..size).map(make_event).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                let request = AnalyticsRequest {
                    kind: Some("full".to_string()),
                    data: RequestData {
                        events: Some(events.clone()),
                        ..RequestData::default()
                    },
                };
                runtime.block_on(engine.process_analytics_at(request, bench_now()))
            });
        });
    }
    group.finish();
}

/// Metric calculation alone, over already-cleaned events.
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculate_metrics");

    for size in [1_000, 10_000] {
        let raw: Vec<RawEvent> = (0..size).map(make_event).collect();
        let cleaned = clean_events(&raw, CleaningOptions::default(), bench_now());
        let refs: Vec<&Event> = cleaned.iter().collect();
        let benchmarks = EngineConfig::default().benchmarks;
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| calculate_metrics(&refs, &benchmarks));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_request, bench_metrics);
criterion_main!(benches);
