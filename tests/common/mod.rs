// Shared helpers for the integration tests.
#![allow(dead_code)]

use camrtsp::core::encoder_probe::EncoderChoice;
use camrtsp::core::pipeline_builder::{LaunchPlan, ProcessSpec};

/// A port nothing listens on right now.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn sh(script: &str) -> ProcessSpec {
    ProcessSpec::new("sh", vec!["-c".to_string(), script.to_string()])
}

/// Launch plan whose server is a shell script, labelled with `encoder`.
pub fn sh_plan(encoder: &str, script: &str) -> LaunchPlan {
    LaunchPlan {
        encoder: EncoderChoice::Software { element: encoder.to_string() },
        server: sh(script),
        pusher: None,
        config_file: None,
        description: script.to_string(),
    }
}
