use std::sync::Arc;

use crate::{Registry, Sample};

/// Cheap, cloneable handle workers use to submit samples.
///
/// Base tags are attached to every sample; tags on the sample itself take precedence.
#[derive(Debug, Clone)]
pub struct Sampler {
    registry: Arc<Registry>,
    base_tags: Arc<[(String, String)]>,
}

impl Sampler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            base_tags: Arc::from(Vec::new()),
        }
    }

    /// Returns a sampler that adds `key=value` to everything it submits.
    #[must_use]
    pub fn with_tag(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let mut tags: Vec<(String, String)> = self
            .base_tags
            .iter()
            .filter(|(k, _)| *k != key)
            .cloned()
            .collect();
        tags.push((key, value.into()));
        Self {
            registry: self.registry.clone(),
            base_tags: Arc::from(tags),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Records a sample. Rejected samples are logged and counted, never returned.
    pub fn submit(&self, mut sample: Sample) {
        if !self.base_tags.is_empty() {
            let mut tags = self.base_tags.to_vec();
            tags.append(&mut sample.tags);
            sample.tags = tags;
        }

        if let Err(err) = self.registry.record(&sample) {
            tracing::warn!(metric = %sample.metric, error = %err, "sample dropped");
        }
    }

    pub fn add(&self, metric: &str, value: f64, tags: &[(&str, &str)]) {
        self.submit(Sample::counter(metric, value).with_tags(tags.iter().copied()));
    }

    pub fn gauge(&self, metric: &str, value: f64, tags: &[(&str, &str)]) {
        self.submit(Sample::gauge(metric, value).with_tags(tags.iter().copied()));
    }

    pub fn rate(&self, metric: &str, hit: bool, tags: &[(&str, &str)]) {
        self.submit(Sample::rate(metric, hit).with_tags(tags.iter().copied()));
    }

    pub fn trend(&self, metric: &str, value: f64, tags: &[(&str, &str)]) {
        self.submit(Sample::trend(metric, value).with_tags(tags.iter().copied()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_tags_apply_and_sample_tags_win() {
        let registry = Arc::new(Registry::default());
        let sampler = Sampler::new(registry.clone()).with_tag("scenario", "default");

        sampler.trend("http_req_duration", 10.0, &[]);
        sampler.trend("http_req_duration", 20.0, &[("scenario", "spike")]);

        let snap = registry.snapshot();
        let metric = snap
            .get("http_req_duration")
            .unwrap_or_else(|| panic!("missing metric"));
        let tags: Vec<_> = metric
            .series
            .iter()
            .map(|s| s.tag("scenario").unwrap_or_default().to_string())
            .collect();
        assert_eq!(tags, vec!["default".to_string(), "spike".to_string()]);
    }

    #[test]
    fn conflicting_kind_is_swallowed_and_counted() {
        let registry = Arc::new(Registry::default());
        let sampler = Sampler::new(registry.clone());

        sampler.rate("errors", false, &[]);
        sampler.add("errors", 1.0, &[]);

        let snap = registry.snapshot();
        assert_eq!(snap.dropped_samples, 1);
        assert_eq!(snap.rate("errors").map(|r| r.total), Some(1));
    }
}
