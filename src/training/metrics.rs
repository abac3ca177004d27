// Metrics extraction from training output
//
// Structured results are preferred. Stdout scraping is the fallback, and the
// placeholder set is the last resort. Placeholders are always flagged.

use serde_json::Value;
use tracing::warn;

use crate::errors::LifecycleError;
use crate::registry::Metrics;

/// Metric names reported in the registry
pub const METRIC_NAMES: [&str; 4] = ["accuracy", "precision", "recall", "f1"];

/// Where the final metrics came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsSource {
    Results,
    Stdout,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReport {
    pub metrics: Metrics,
    pub source: MetricsSource,
}

impl MetricsReport {
    pub fn is_placeholder(&self) -> bool {
        self.source == MetricsSource::Placeholder
    }
}

/// Values meant to be replaced, reported when training produced nothing usable
pub fn placeholder_metrics() -> Metrics {
    [
        ("accuracy", 95.0),
        ("precision", 94.0),
        ("recall", 96.0),
        ("f1", 95.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Fractions are reported as percentages
fn to_percent(value: f64) -> f64 {
    if value <= 1.0 {
        value * 100.0
    } else {
        value
    }
}

/// Extract metrics, falling back to the placeholder set
pub fn extract(results: Option<&Value>, stdout: &str) -> MetricsReport {
    if let Some(metrics) = results.and_then(from_results) {
        return MetricsReport {
            metrics,
            source: MetricsSource::Results,
        };
    }

    if let Some(metrics) = from_stdout(stdout) {
        return MetricsReport {
            metrics,
            source: MetricsSource::Stdout,
        };
    }

    warn!(
        error = %LifecycleError::MetricsUnrecognized,
        "Recording PLACEHOLDER metrics for this version; they do not describe the model"
    );
    MetricsReport {
        metrics: placeholder_metrics(),
        source: MetricsSource::Placeholder,
    }
}

/// Direct `{accuracy, ...}` mapping or a `test` sub-mapping with `eval_` prefixed keys
pub fn from_results(results: &Value) -> Option<Metrics> {
    let scope = results
        .get("test")
        .filter(|t| t.is_object())
        .unwrap_or(results);
    let object = scope.as_object()?;

    let metrics: Metrics = METRIC_NAMES
        .iter()
        .filter_map(|name| {
            let value = object
                .get(&format!("eval_{}", name))
                .or_else(|| object.get(*name))
                .and_then(Value::as_f64)?;
            Some((name.to_string(), to_percent(value)))
        })
        .collect();

    (!metrics.is_empty()).then_some(metrics)
}

/// Lines of the form `<label containing a metric name>: <value>[%]`
pub fn from_stdout(stdout: &str) -> Option<Metrics> {
    let mut metrics = Metrics::new();

    for line in stdout.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.to_lowercase();
        let Some(name) = METRIC_NAMES.iter().find(|name| label.contains(*name)) else {
            continue;
        };
        let cleaned = value.trim().trim_end_matches('%').replace(',', ".");
        if let Ok(value) = cleaned.parse::<f64>() {
            metrics.insert(name.to_string(), to_percent(value));
        }
    }

    (!metrics.is_empty()).then_some(metrics)
}
