use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder};

static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "live_session_webhook_events_total",
            "Webhook events ingested, by type and processing outcome",
        ),
        &["event_type", "status"],
    )
    .expect("failed to create live_session_webhook_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register live_session_webhook_events_total");
    counter
});

static WEBHOOK_PROCESSING_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "live_session_webhook_processing_seconds",
            "End-to-end webhook processing latency",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
        ]),
        &["event_type"],
    )
    .expect("failed to create live_session_webhook_processing_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register live_session_webhook_processing_seconds");
    histogram
});

static BROADCASTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "live_session_broadcasts_total",
            "Realtime updates pushed to session channels",
        ),
        &["update_type"],
    )
    .expect("failed to create live_session_broadcasts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register live_session_broadcasts_total");
    counter
});

pub fn observe_webhook_event(event_type: &str, status: &str, elapsed: Duration) {
    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[event_type, status])
        .inc();
    WEBHOOK_PROCESSING_SECONDS
        .with_label_values(&[event_type])
        .observe(elapsed.as_secs_f64());
}

pub fn observe_broadcast(update_type: &str) {
    BROADCASTS_TOTAL.with_label_values(&[update_type]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
