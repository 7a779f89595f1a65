//! Pipeline components: scan producer, inference consumer, controller.

pub mod consumer;
pub mod controller;
pub mod scan;

pub use consumer::{
    CONSUMER_CANCEL, CONSUMER_DONE, CONSUMER_FAILED, CONSUMER_WORKER, ConsumerEvent,
    InferenceConsumer,
};
pub use controller::{Pipeline, PipelineConfig};
pub use scan::{
    SCAN_CANCEL, SCAN_DONE, SCAN_WORKER, ScanEvent, ScanProducer, derive_id, is_image_file,
};
