use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    metrics::describe_counter!("sheets_ingested_total", "Uploaded answer sheets by outcome");
    metrics::describe_counter!("sheet_corrections_total", "Sheet corrections by outcome");
    metrics::describe_counter!(
        "persistence_failures_total",
        "Corrections annotated but not durably recorded"
    );
    metrics::describe_histogram!("correction_duration_seconds", "Wall time of one correction");
    metrics::describe_histogram!(
        "external_call_duration_seconds",
        "Latency of OCR, grading and object store calls"
    );

    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
