//! Metrics recorder initialization.

use std::net::SocketAddr;

use tracing::info;

use crate::Result;

/// Handle to the installed recorder.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render current metrics in Prometheus text format.
    ///
    /// Empty when collection is disabled or the `prometheus` feature is off.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        if let Some(handle) = &self.prometheus_handle {
            return handle.render();
        }
        String::new()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Where the exporter serves `/metrics`. `None` installs the recorder
    /// without an HTTP listener (render via [`MetricsHandle::render`]).
    pub listen: Option<SocketAddr>,
    /// Labels added to every metric.
    pub global_labels: Vec<(String, String)>,
}

/// Install the global recorder.
///
/// Call once, from inside the Tokio runtime, before any metric is recorded.
/// When `config.enabled` is false nothing is installed and every
/// `counter!`/`gauge!`/`histogram!` call stays a no-op.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle::default());
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        let _ = config;
        info!("metrics requested but the prometheus feature is not compiled in");
        Ok(MetricsHandle::default())
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(crate::worker::DELIVERY_DURATION_SECONDS.to_string()),
        crate::buckets::DELIVERY_DURATION,
    )?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    let Some(addr) = config.listen else {
        let handle = builder.install_recorder()?;
        info!("prometheus recorder installed without http listener");
        return Ok(handle);
    };

    let (recorder, exporter) = builder.with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| crate::Error::AlreadyInstalled)?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "prometheus exporter stopped");
        }
    });
    info!(%addr, "prometheus exporter listening");
    Ok(handle)
}
