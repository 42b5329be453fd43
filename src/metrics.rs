use prometheus::{
    register_histogram, register_int_counter_vec, Histogram, IntCounterVec,
};

lazy_static::lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_http_requests_total", "Total HTTP requests", &["method", "path", "status"]
    ).unwrap();
    pub static ref DETECT_DURATION: Histogram = register_histogram!(
        "prism_detect_duration_seconds", "Detection call duration",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();
    pub static ref DETECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_detections_total", "Emitted detections", &["product"]
    ).unwrap();
    pub static ref REGIONS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_regions_skipped_total", "Scanned regions that contributed no candidate", &["reason"]
    ).unwrap();
    pub static ref OCR_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_ocr_calls_total", "OCR verifications", &["result"]
    ).unwrap();
    pub static ref LEARNED_REFERENCES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_learned_references_total", "References written back by auto-learning", &["product"]
    ).unwrap();
    pub static ref PRUNED_REFERENCES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_pruned_references_total", "References evicted by the per-product cap", &["product"]
    ).unwrap();
    pub static ref INDEX_SAVES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prism_index_saves_total", "Index persistence attempts", &["status"]
    ).unwrap();
}

pub fn init() {
    lazy_static::initialize(&HTTP_REQUESTS_TOTAL);
    lazy_static::initialize(&DETECT_DURATION);
    lazy_static::initialize(&DETECTIONS_TOTAL);
    lazy_static::initialize(&REGIONS_SKIPPED_TOTAL);
    lazy_static::initialize(&OCR_CALLS_TOTAL);
    lazy_static::initialize(&LEARNED_REFERENCES_TOTAL);
    lazy_static::initialize(&PRUNED_REFERENCES_TOTAL);
    lazy_static::initialize(&INDEX_SAVES_TOTAL);
}
