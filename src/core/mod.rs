pub mod bitrate;
pub mod dependencies;
pub mod encoder_probe;
pub mod health_probe;
pub mod installer;
pub mod metrics;
pub mod pipeline_builder;
pub mod port_cleanup;
pub mod preflight;
pub mod status_server;
pub mod stream_config;
pub mod supervisor;
