//! Metrics definitions for the forecast gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const FORECAST_REQUESTS: MetricDef = MetricDef {
    name: "forecast.requests",
    metric_type: MetricType::Counter,
    description: "Number of forecast requests, tagged with the outcome",
};

pub const FORECAST_REQUEST_DURATION: MetricDef = MetricDef {
    name: "forecast.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time from receiving a forecast request to responding, in seconds",
};

pub const BRIDGE_PENDING: MetricDef = MetricDef {
    name: "bridge.pending",
    metric_type: MetricType::Gauge,
    description: "Number of requests waiting for a reply from the calculation module",
};

pub const BRIDGE_TIMEOUTS: MetricDef = MetricDef {
    name: "bridge.timeouts",
    metric_type: MetricType::Counter,
    description: "Number of requests the calculation module did not answer in time",
};

pub const BRIDGE_UNMATCHED_REPLIES: MetricDef = MetricDef {
    name: "bridge.unmatched_replies",
    metric_type: MetricType::Counter,
    description: "Number of replies that arrived without a waiting request",
};

pub const BROKER_PUBLISH_FAILURES: MetricDef = MetricDef {
    name: "broker.publish.failures",
    metric_type: MetricType::Counter,
    description: "Number of forecast requests the broker did not accept",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FORECAST_REQUESTS,
    FORECAST_REQUEST_DURATION,
    BRIDGE_PENDING,
    BRIDGE_TIMEOUTS,
    BRIDGE_UNMATCHED_REPLIES,
    BROKER_PUBLISH_FAILURES,
];
