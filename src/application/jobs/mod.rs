mod transitions;

pub use transitions::{
    BatchReport, BatchState, TransitionBatchTask, TransitionBatchTaskBuilder, TransitionScanJob,
    WATERMARK_KEY, WATERMARK_NAMESPACE, process_transition_scan_job,
    effective_scan_interval, transition_scan_cron_expression, transition_scan_schedule,
};
