use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use stampede_core::{
    Endpoint, EndpointSpec, HookStep, MAX_CONFIGURED_DURATION, Matcher, OutcomeRules, RequestPlan,
    ScenarioOptions, Signature, Stage, StepHooks, ThinkTime, ThresholdSet,
};

use crate::run_support::EnvVars;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentYaml {
    #[serde(default)]
    base_url: Option<String>,

    /// Per-request timeout.
    #[serde(default)]
    timeout: Option<YamlDuration>,

    /// Overall run budget.
    #[serde(default)]
    budget: Option<YamlDuration>,

    scenarios: Vec<ScenarioYaml>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(default)]
    setup: Vec<StepYaml>,

    #[serde(default)]
    teardown: Vec<StepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioYaml {
    /// Scenario name (metrics scenario tag).
    #[serde(default)]
    name: Option<String>,

    /// Executor kind: ramping-vus | constant-vus | per-vu-iterations
    #[serde(default)]
    executor: Option<String>,

    #[serde(default)]
    start_time: Option<YamlDuration>,

    #[serde(default)]
    vus: Option<u64>,
    #[serde(default)]
    iterations: Option<u64>,
    #[serde(default)]
    duration: Option<YamlDuration>,
    #[serde(default)]
    max_duration: Option<YamlDuration>,

    // ramping-vus
    #[serde(rename = "startVUs", default)]
    start_vus: Option<u64>,

    #[serde(default)]
    stages: Vec<StageYaml>,

    #[serde(default)]
    think_time: Option<ThinkTimeYaml>,

    endpoints: Vec<EndpointYaml>,

    #[serde(default)]
    expected: Vec<ExpectedYaml>,

    /// Statuses eligible for expected-failure matching (default 400, 409).
    #[serde(default)]
    expected_statuses: Option<Vec<u16>>,

    #[serde(default)]
    transport_timeout_expected: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageYaml {
    target: u64,

    #[serde(default)]
    duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThinkTimeYaml {
    Fixed(YamlDuration),
    Jittered {
        #[serde(default)]
        fixed: YamlDuration,
        #[serde(default)]
        jitter: YamlDuration,
    },
}

impl ThinkTimeYaml {
    fn into_think_time(self) -> ThinkTime {
        match self {
            Self::Fixed(d) => ThinkTime::fixed(d.into_inner()),
            Self::Jittered { fixed, jitter } => {
                ThinkTime::uniform(fixed.into_inner(), jitter.into_inner())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointYaml {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    method: Option<String>,

    path: String,

    #[serde(default)]
    headers: BTreeMap<String, String>,

    /// JSON body template.
    #[serde(default)]
    body: Option<serde_json::Value>,

    #[serde(default = "default_weight")]
    weight: f64,

    /// Response field path per iteration variable, e.g. `orderId: orderId|id`.
    #[serde(default)]
    capture: BTreeMap<String, String>,

    #[serde(default)]
    then: Option<Box<EndpointYaml>>,

    #[serde(default)]
    metrics: EndpointMetricsYaml,

    #[serde(default)]
    cache_hit_below: Option<YamlDuration>,
}

fn default_weight() -> f64 {
    1.0
}

impl EndpointYaml {
    fn into_spec(self) -> EndpointSpec {
        EndpointSpec {
            name: self.name.unwrap_or_default(),
            method: self.method.unwrap_or_default(),
            path: self.path,
            headers: self.headers.into_iter().collect(),
            body: self.body,
            weight: self.weight,
            capture: self.capture.into_iter().collect(),
            then: self.then.map(|next| Box::new(next.into_spec())),
            success_metric: self.metrics.success,
            latency_metric: self.metrics.latency,
            cache_hit_below: self.cache_hit_below.map(YamlDuration::into_inner),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointMetricsYaml {
    #[serde(default)]
    success: Option<String>,
    #[serde(default)]
    latency: Option<String>,
}

/// One expected-failure signature. Every matcher field present adds an
/// alternative under the same label.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpectedYaml {
    signature: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    code_contains: Vec<String>,
    #[serde(default)]
    message_contains: Vec<String>,
}

impl ExpectedYaml {
    fn into_signatures(self) -> anyhow::Result<Vec<Signature>> {
        let label = self.signature;
        let mut out = Vec::new();
        if let Some(code) = self.code {
            out.push(Signature::new(&label, Matcher::CodeEquals(code)));
        }
        for part in self.code_contains {
            out.push(Signature::new(&label, Matcher::CodeContains(part)));
        }
        for part in self.message_contains {
            out.push(Signature::new(&label, Matcher::MessageContains(part)));
        }
        anyhow::ensure!(
            !out.is_empty(),
            "expected signature `{label}` needs at least one of code, codeContains, messageContains"
        );
        Ok(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepYaml {
    #[serde(flatten)]
    endpoint: EndpointYaml,

    #[serde(default)]
    repeat: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprYaml {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }

    fn bounded<E: serde::de::Error>(d: Duration) -> Result<Self, E> {
        if d > MAX_CONFIGURED_DURATION {
            return Err(E::custom(format_args!(
                "duration {d:?} exceeds the limit of {}",
                humantime::format_duration(MAX_CONFIGURED_DURATION)
            )));
        }
        Ok(Self(d))
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
                f.write_str("duration as string (e.g. 10s, 2m30s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                YamlDuration::bounded(Duration::from_secs(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let secs = u64::try_from(v).map_err(|_| E::custom("duration cannot be negative"))?;
                YamlDuration::bounded(Duration::from_secs(secs))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Duration::try_from_secs_f64(v)
                    .map_err(E::custom)
                    .and_then(YamlDuration::bounded)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                YamlDuration::bounded(d)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// A scenario document after env substitution and template parsing.
#[derive(Debug)]
pub(crate) struct LoadedDocument {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub budget: Option<Duration>,
    pub scenarios: Vec<ScenarioOptions>,
    pub thresholds: Vec<ThresholdSet>,
    pub hooks: StepHooks,
}

pub(crate) async fn load_document(path: &Path, env: &EnvVars) -> anyhow::Result<LoadedDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario document: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_string();

    parse_document(&bytes, env, &default_name)
        .with_context(|| format!("invalid scenario document: {}", path.display()))
}

pub(crate) fn parse_document(
    bytes: &[u8],
    env: &EnvVars,
    default_name: &str,
) -> anyhow::Result<LoadedDocument> {
    let mut raw: serde_yaml::Value = serde_yaml::from_slice(bytes).context("failed to parse YAML")?;
    substitute_env(&mut raw, env)?;
    let doc: DocumentYaml = serde_yaml::from_value(raw).context("failed to parse YAML")?;

    let total = doc.scenarios.len();
    let scenarios = doc
        .scenarios
        .into_iter()
        .enumerate()
        .map(|(idx, scenario)| {
            let fallback = if total <= 1 {
                default_name.to_string()
            } else {
                format!("scenario_{}", idx + 1)
            };
            scenario_yaml_into_options(scenario, fallback)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let thresholds = doc
        .thresholds
        .into_iter()
        .map(|(key, exprs)| ThresholdSet::parse(&key, &exprs.into_vec()))
        .collect::<Result<Vec<_>, _>>()?;

    let hooks = StepHooks {
        setup: steps_into_hooks(doc.setup).context("invalid setup step")?,
        teardown: steps_into_hooks(doc.teardown).context("invalid teardown step")?,
    };

    Ok(LoadedDocument {
        base_url: doc.base_url,
        timeout: doc.timeout.map(YamlDuration::into_inner),
        budget: doc.budget.map(YamlDuration::into_inner),
        scenarios,
        thresholds,
        hooks,
    })
}

fn scenario_yaml_into_options(
    scenario: ScenarioYaml,
    default_name: String,
) -> anyhow::Result<ScenarioOptions> {
    let ScenarioYaml {
        name,
        executor,
        start_time,
        vus,
        iterations,
        duration,
        max_duration,
        start_vus,
        stages,
        think_time,
        endpoints,
        expected,
        expected_statuses,
        transport_timeout_expected,
    } = scenario;

    let name = name.unwrap_or(default_name);

    let think_time = think_time
        .map(ThinkTimeYaml::into_think_time)
        .unwrap_or_default();
    let specs = endpoints.into_iter().map(EndpointYaml::into_spec).collect();
    let plan = RequestPlan::new(specs, think_time)
        .with_context(|| format!("scenario `{name}`: invalid endpoints"))?;

    let mut signatures = Vec::new();
    for e in expected {
        signatures.extend(
            e.into_signatures()
                .with_context(|| format!("scenario `{name}`"))?,
        );
    }
    let mut rules = OutcomeRules::with_signatures(signatures);
    if let Some(statuses) = expected_statuses {
        rules.expected_statuses = statuses;
    }
    rules.transport_timeout_expected = transport_timeout_expected;

    Ok(ScenarioOptions {
        name,
        executor,
        start_time: start_time.map(YamlDuration::into_inner).unwrap_or_default(),
        vus,
        duration: duration.map(YamlDuration::into_inner),
        iterations,
        max_duration: max_duration.map(YamlDuration::into_inner),
        start_vus,
        stages: stages
            .into_iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
        plan: Arc::new(plan),
        rules: Arc::new(rules),
    })
}

fn steps_into_hooks(steps: Vec<StepYaml>) -> anyhow::Result<Vec<HookStep>> {
    steps
        .into_iter()
        .map(|step| -> anyhow::Result<HookStep> {
            let endpoint = Endpoint::from_spec(step.endpoint.into_spec())?;
            Ok(HookStep {
                endpoint,
                repeat: step.repeat.unwrap_or(1),
            })
        })
        .collect()
}

const ENV_OPEN: &str = "${env:";

/// Resolves `${env:NAME}` / `${env:NAME:default}` in every string scalar.
/// Runtime placeholders such as `${vu}` are left for the request templates.
fn substitute_env(value: &mut serde_yaml::Value, env: &EnvVars) -> anyhow::Result<()> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => {
            if let Some(resolved) = resolve_env(s, env)? {
                *value = resolved;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_env(item, env)?;
            }
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env(v, env)?;
            }
        }
        Value::Tagged(tagged) => substitute_env(&mut tagged.value, env)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

fn resolve_env(s: &str, env: &EnvVars) -> anyhow::Result<Option<serde_yaml::Value>> {
    if !s.contains(ENV_OPEN) {
        return Ok(None);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    let mut placeholders = 0usize;
    while let Some(start) = rest.find(ENV_OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + ENV_OPEN.len()..];
        let end = after
            .find('}')
            .with_context(|| format!("unterminated env placeholder in `{s}`"))?;
        let inner = &after[..end];
        let (name, default) = match inner.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };
        anyhow::ensure!(!name.is_empty(), "empty env placeholder in `{s}`");

        match (env.get(name), default) {
            (Some(v), _) => out.push_str(v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => anyhow::bail!("env var `{name}` is not set and has no default"),
        }
        placeholders += 1;
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    // A scalar that was exactly one placeholder keeps a numeric/bool reading.
    let whole = placeholders == 1 && s.starts_with(ENV_OPEN) && s.ends_with('}');
    if whole && let Ok(v @ (serde_yaml::Value::Number(_) | serde_yaml::Value::Bool(_))) =
        serde_yaml::from_str::<serde_yaml::Value>(&out)
    {
        return Ok(Some(v));
    }
    Ok(Some(serde_yaml::Value::String(out)))
}
