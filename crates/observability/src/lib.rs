//! # roguetalk-observability
//!
//! Observability fuer den Voice-Layer:
//! - Structured Logging (Text oder JSON) via tracing-subscriber
//! - Prometheus-kompatible Voice-Metriken

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::VoiceMetrics;
