use shared::metrics_defs::{MetricDef, MetricType};

pub const DISPATCH_DURATION: MetricDef = MetricDef {
    name: "dispatch.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single upstream request in seconds. Tagged with server.",
};

pub const FANOUT_DURATION: MetricDef = MetricDef {
    name: "fanout.duration",
    metric_type: MetricType::Histogram,
    description: "Time until every server answered (or timed out) in a fan-out. Tagged with operation.",
};

pub const FANOUT_SERVER_FAILURE: MetricDef = MetricDef {
    name: "fanout.server.failure",
    metric_type: MetricType::Counter,
    description: "Per-server failures during a fan-out. Tagged with operation, server.",
};

pub const LOGIN_RESULT: MetricDef = MetricDef {
    name: "login.result",
    metric_type: MetricType::Counter,
    description: "Login attempts. Tagged with result: ok, degraded, failed, challenge_failed.",
};

pub const PACKAGE_LOG_FAILURE: MetricDef = MetricDef {
    name: "package_log.failure",
    metric_type: MetricType::Counter,
    description: "Build log fetches that failed and were answered with an empty log.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DISPATCH_DURATION,
    FANOUT_DURATION,
    FANOUT_SERVER_FAILURE,
    LOGIN_RESULT,
    PACKAGE_LOG_FAILURE,
];
