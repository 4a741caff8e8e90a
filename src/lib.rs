pub mod attitude;
pub mod bandpass;
pub mod config;
pub mod csv_loader;
pub mod events;
pub mod feature_extractor;
pub mod gesture_classifier;
pub mod imu_buffer;
pub mod one_euro;
pub mod peak_detector;
pub mod peak_selector;
pub mod pipeline;
pub mod recorder;
pub mod types;
