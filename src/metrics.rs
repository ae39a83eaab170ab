use std::sync::LazyLock;

use prometheus::*;

static METRIC_QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "im_stream_queue_depth",
        "current depth of a handoff queue",
        &["queue"]
    )
    .unwrap()
});

static METRIC_DROPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "im_stream_dropped_count",
        "frames or tasks dropped by the pipeline",
        &["stage", "reason"]
    )
    .unwrap()
});

static METRIC_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_stream_processed_count", "tasks processed by the worker pool")
        .unwrap()
});

/// 更新队列深度指标
pub fn set_queue_depth(queue: &str, depth: usize) {
    METRIC_QUEUE_DEPTH.with_label_values(&[queue]).set(depth as i64);
}

/// 增加丢弃计数
pub fn inc_dropped(stage: &str, reason: &str) {
    METRIC_DROPPED.with_label_values(&[stage, reason]).inc();
}

pub fn inc_processed() {
    METRIC_PROCESSED.inc();
}
