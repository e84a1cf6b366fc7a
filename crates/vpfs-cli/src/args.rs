// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::prelude::*;

const VPFS_LOG: &str = "VPFS_LOG";

pub fn configure_logging(verbosity: u8) {
    let mut config = match verbosity {
        0 => {
            if let Ok(existing) = std::env::var(VPFS_LOG) {
                existing
            } else {
                "vpfs=info,warn".to_string()
            }
        }
        1 => "vpfs=debug,info".to_string(),
        2 => "vpfs=trace,info".to_string(),
        3 => "vpfs=trace,debug".to_string(),
        _ => "trace".to_string(),
    };
    std::env::set_var(VPFS_LOG, &config);
    if let Ok(overrides) = std::env::var("RUST_LOG") {
        config.push(',');
        config.push_str(&overrides);
    }
    let env_filter = tracing_subscriber::filter::EnvFilter::from(config);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(verbosity > 2);
    let sub = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(fmt_layer);
    tracing::subscriber::set_global_default(sub).expect("logging initialized once");
}
