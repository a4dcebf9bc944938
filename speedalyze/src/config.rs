use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use speedalyze_core::{
    DEFAULT_GRACEFUL_WINDOW, Scenario, Stage, ThresholdSet, default_thresholds,
    validate_thresholds,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Fully resolved run configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunConfig {
    pub base_url: String,
    pub request_timeout: Option<Duration>,
    pub scenario: Scenario,
    pub thresholds: Vec<ThresholdSet>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
            scenario: Scenario::reference(),
            thresholds: default_thresholds(),
        }
    }
}

/// On-disk config. Every field is optional; missing ones take the reference
/// values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ConfigYaml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(rename = "startVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_vus: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageYaml>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub graceful_ramp_down: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Omitted means the reference thresholds; an empty map disables them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<BTreeMap<String, ThresholdExprYaml>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl From<Duration> for YamlDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for YamlDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 20s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let secs = u64::try_from(v).map_err(|_| E::custom("duration must not be negative"))?;
                Ok(YamlDuration(Duration::from_secs(secs)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

impl ConfigYaml {
    /// Applies defaults and validates the schedule and thresholds.
    pub(crate) fn resolve(self) -> anyhow::Result<RunConfig> {
        let defaults = RunConfig::default();

        let stages = match self.stages {
            Some(stages) => stages
                .into_iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect(),
            None => defaults.scenario.stages().to_vec(),
        };
        let scenario = Scenario::new(
            self.start_vus.unwrap_or(defaults.scenario.start_vus()),
            stages,
            self.graceful_ramp_down
                .map_or(DEFAULT_GRACEFUL_WINDOW, YamlDuration::into_inner),
            self.graceful_stop
                .map_or(DEFAULT_GRACEFUL_WINDOW, YamlDuration::into_inner),
        )
        .context("invalid stage schedule")?;

        let thresholds = match self.thresholds {
            Some(raw) => parse_thresholds_map(raw)?,
            None => defaults.thresholds,
        };
        validate_thresholds(&thresholds).context("invalid thresholds")?;

        Ok(RunConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            request_timeout: self.request_timeout.map(YamlDuration::into_inner),
            scenario,
            thresholds,
        })
    }

    /// Fully spelled-out form of a resolved config.
    pub(crate) fn from_resolved(cfg: &RunConfig) -> Self {
        Self {
            base_url: Some(cfg.base_url.clone()),
            request_timeout: cfg.request_timeout.map(YamlDuration::from),
            start_vus: Some(cfg.scenario.start_vus()),
            stages: Some(
                cfg.scenario
                    .stages()
                    .iter()
                    .map(|st| StageYaml {
                        duration: YamlDuration::from(st.duration),
                        target: st.target,
                    })
                    .collect(),
            ),
            graceful_ramp_down: Some(YamlDuration::from(cfg.scenario.ramp_down())),
            graceful_stop: Some(YamlDuration::from(cfg.scenario.stop())),
            thresholds: Some(render_thresholds(&cfg.thresholds)),
        }
    }
}

/// Reads `path`, or returns the reference config when there is none.
pub(crate) async fn load_config(path: Option<&Path>) -> anyhow::Result<RunConfig> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read config YAML: {}", path.display()))?;
    let doc: ConfigYaml = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))?;

    doc.resolve()
        .with_context(|| format!("invalid config: {}", path.display()))
}

pub(crate) async fn write_yaml_file<T: Serialize>(path: &Path, doc: &T) -> anyhow::Result<()> {
    let s = serde_yaml::to_string(doc).context("failed to serialize YAML")?;
    write_file(path, s).await
}

pub(crate) async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write file: {}", path.display()))?;

    Ok(())
}

fn render_thresholds(sets: &[ThresholdSet]) -> BTreeMap<String, ThresholdExprYaml> {
    sets.iter()
        .map(|s| {
            let v = match s.expressions.as_slice() {
                [one] => ThresholdExprYaml::One(one.clone()),
                many => ThresholdExprYaml::Many(many.to_vec()),
            };
            (s.metric.clone(), v)
        })
        .collect()
}

fn parse_thresholds_map(
    raw: BTreeMap<String, ThresholdExprYaml>,
) -> anyhow::Result<Vec<ThresholdSet>> {
    let mut out = Vec::new();

    for (metric, v) in raw {
        let expressions: Vec<String> = match v {
            ThresholdExprYaml::One(s) => vec![s],
            ThresholdExprYaml::Many(v) => v,
        };

        if expressions.is_empty() {
            anyhow::bail!("invalid thresholds for `{metric}`: empty list");
        }

        out.push(ThresholdSet {
            metric,
            expressions,
        });
    }

    Ok(out)
}
