use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde_json::Value;
use stampede_http::util::join_url;
use stampede_http::HttpRequest;

use crate::select::WeightedTable;
use crate::template::{IterationVars, JsonTemplate, StrTemplate, TemplateContext};
use crate::think::ThinkTime;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid placeholder `${{{0}}}`")]
    InvalidPlaceholder(String),

    #[error("unterminated placeholder in `{0}`")]
    UnterminatedPlaceholder(String),

    #[error("unknown variable `{0}`")]
    UnknownVar(String),

    #[error("endpoint weight must be a finite non-negative number, got {0}")]
    InvalidWeight(f64),

    #[error("at least one endpoint needs a positive weight")]
    NoPositiveWeight,

    #[error("invalid http method `{0}`")]
    InvalidMethod(String),

    #[error("invalid capture path `{0}`")]
    InvalidCapture(String),

    #[error("response has no value for capture `{var}`")]
    CaptureMissing { var: String },

    #[error("failed to encode request body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Endpoint as declared, before templates are parsed.
#[derive(Debug, Clone, Default)]
pub struct EndpointSpec {
    pub name: String,
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub weight: f64,
    /// `(variable, path)` where path is `a.b` with `|` separated fallbacks.
    pub capture: Vec<(String, String)>,
    pub then: Option<Box<EndpointSpec>>,
    pub success_metric: Option<String>,
    pub latency_metric: Option<String>,
    pub cache_hit_below: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub var: String,
    alternatives: Vec<Vec<String>>,
}

impl Capture {
    pub fn parse(var: &str, path: &str) -> Result<Self, PlanError> {
        let mut alternatives = Vec::new();
        for alt in path.split('|') {
            let segs: Vec<String> = alt.trim().split('.').map(str::to_string).collect();
            if segs.iter().any(String::is_empty) {
                return Err(PlanError::InvalidCapture(path.to_string()));
            }
            alternatives.push(segs);
        }
        Ok(Self {
            var: var.to_string(),
            alternatives,
        })
    }

    /// First non-null value among the alternatives.
    pub fn extract(&self, doc: &Value) -> Option<Value> {
        self.alternatives.iter().find_map(|segs| {
            let v = segs.iter().try_fold(doc, |cur, seg| match cur {
                Value::Object(map) => map.get(seg),
                Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })?;
            (!v.is_null()).then(|| v.clone())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointMetrics {
    /// Extra counter bumped on success.
    pub success: Option<String>,
    /// Extra trend fed with this endpoint's latency.
    pub latency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Position in [`RequestPlan::endpoints`].
    pub id: usize,
    pub name: Arc<str>,
    pub method: http::Method,
    path: StrTemplate,
    headers: Vec<(String, StrTemplate)>,
    body: Option<JsonTemplate>,
    pub weight: f64,
    pub captures: Vec<Capture>,
    /// Follow-up issued in the same iteration after this one succeeds.
    pub then: Option<Box<Endpoint>>,
    pub metrics: EndpointMetrics,
    /// Latency under which a response is counted as a probable cache hit.
    pub cache_hit_below: Option<Duration>,
}

impl Endpoint {
    pub fn from_spec(spec: EndpointSpec) -> Result<Self, PlanError> {
        let method_raw = if spec.method.is_empty() {
            "GET".to_string()
        } else {
            spec.method.to_ascii_uppercase()
        };
        let method = http::Method::from_bytes(method_raw.as_bytes())
            .map_err(|_| PlanError::InvalidMethod(spec.method.clone()))?;

        let headers = spec
            .headers
            .iter()
            .map(|(k, v)| Ok((k.clone(), StrTemplate::parse(v)?)))
            .collect::<Result<Vec<_>, PlanError>>()?;
        let body = spec.body.as_ref().map(JsonTemplate::parse).transpose()?;
        let captures = spec
            .capture
            .iter()
            .map(|(var, path)| Capture::parse(var, path))
            .collect::<Result<Vec<_>, _>>()?;
        let then = spec
            .then
            .map(|next| Endpoint::from_spec(*next).map(Box::new))
            .transpose()?;

        let name = if spec.name.is_empty() {
            format!("{} {}", method, spec.path)
        } else {
            spec.name
        };

        Ok(Self {
            id: 0,
            name: Arc::from(name),
            method,
            path: StrTemplate::parse(&spec.path)?,
            headers,
            body,
            weight: spec.weight,
            captures,
            then,
            metrics: EndpointMetrics {
                success: spec.success_metric,
                latency: spec.latency_metric,
            },
            cache_hit_below: spec.cache_hit_below,
        })
    }

    pub fn build(
        &self,
        base_url: &str,
        timeout: Option<Duration>,
        ctx: &mut TemplateContext<'_>,
    ) -> Result<HttpRequest, PlanError> {
        let path = self.path.render(ctx)?;
        let mut req =
            HttpRequest::new(self.method.clone(), join_url(base_url, &path)).with_timeout(timeout);

        for (k, v) in &self.headers {
            req = req.with_header(k.clone(), v.render(ctx)?);
        }
        if let Some(body) = &self.body {
            let rendered = body.render(ctx)?;
            req = req.with_json(Bytes::from(serde_json::to_vec(&rendered)?));
        }
        Ok(req)
    }

    /// Stores every capture into `vars`. Fails on the first missing one.
    pub fn capture_into(&self, body: &[u8], vars: &mut IterationVars) -> Result<(), PlanError> {
        if self.captures.is_empty() {
            return Ok(());
        }
        let doc: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        for cap in &self.captures {
            let v = cap.extract(&doc).ok_or_else(|| PlanError::CaptureMissing {
                var: cap.var.clone(),
            })?;
            vars.insert(cap.var.clone(), v);
        }
        Ok(())
    }

    fn assign_ids(&mut self, next: &mut usize) {
        self.id = *next;
        *next += 1;
        if let Some(then) = self.then.as_deref_mut() {
            then.assign_ids(next);
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Endpoint>) {
        out.push(self);
        if let Some(then) = self.then.as_deref() {
            then.collect(out);
        }
    }
}

/// One logical unit of work: weighted entry endpoints, each optionally
/// chaining follow-ups, plus the pause between iterations.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    entries: Vec<Endpoint>,
    table: WeightedTable,
    pub think_time: ThinkTime,
    endpoint_count: usize,
}

impl RequestPlan {
    pub fn new(specs: Vec<EndpointSpec>, think_time: ThinkTime) -> Result<Self, PlanError> {
        let mut entries = specs
            .into_iter()
            .map(Endpoint::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        let table = WeightedTable::new(entries.iter().map(|e| e.weight))?;

        let mut next = 0usize;
        for e in &mut entries {
            e.assign_ids(&mut next);
        }

        Ok(Self {
            entries,
            table,
            think_time,
            endpoint_count: next,
        })
    }

    pub fn entries(&self) -> &[Endpoint] {
        &self.entries
    }

    /// Entry endpoints and their follow-ups, ordered by id.
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        let mut out = Vec::with_capacity(self.endpoint_count);
        for e in &self.entries {
            e.collect(&mut out);
        }
        out
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoint_count
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Endpoint> {
        self.entries.get(self.table.sample(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedVars;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn spec(name: &str, method: &str, path: &str, weight: f64) -> EndpointSpec {
        EndpointSpec {
            name: name.into(),
            method: method.into(),
            path: path.into(),
            weight,
            ..EndpointSpec::default()
        }
    }

    #[test]
    fn ids_cover_follow_ups() {
        let mut create = spec("create_order", "post", "/api/orders", 1.0);
        create.capture = vec![("orderId".into(), "orderId|id".into())];
        create.then = Some(Box::new(spec("pay", "POST", "/api/orders/${var:orderId}/payment", 0.0)));
        let plan = match RequestPlan::new(vec![create, spec("list", "GET", "/api/products", 1.0)], ThinkTime::default()) {
            Ok(p) => p,
            Err(e) => panic!("{e}"),
        };

        let names: Vec<(usize, &str)> = plan.endpoints().iter().map(|e| (e.id, &*e.name)).collect();
        assert_eq!(names, vec![(0, "create_order"), (1, "pay"), (2, "list")]);
        assert_eq!(plan.endpoint_count(), 3);
        assert_eq!(plan.entries().len(), 2);
    }

    #[test]
    fn capture_falls_back_across_alternatives() {
        let cap = match Capture::parse("orderId", "orderId|id|data.order.id") {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(cap.extract(&json!({"orderId": 5})), Some(json!(5)));
        assert_eq!(cap.extract(&json!({"orderId": null, "id": 6})), Some(json!(6)));
        assert_eq!(cap.extract(&json!({"data": {"order": {"id": 7}}})), Some(json!(7)));
        assert_eq!(cap.extract(&json!({"other": 1})), None);
        assert!(Capture::parse("x", "a..b").is_err());
    }

    #[test]
    fn build_renders_url_headers_and_json_body() {
        let mut s = spec("issue", "POST", "/api/coupons/issue", 1.0);
        s.body = Some(json!({"userId": "${vu}", "couponId": 1}));
        s.headers = vec![("x-user".into(), "u-${vu}".into())];
        let ep = match Endpoint::from_spec(s) {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        };

        let vars = IterationVars::new();
        let shared = SharedVars::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = TemplateContext {
            vu: 9,
            scenario_vu: 9,
            iter: 0,
            scenario_iter: 0,
            vars: &vars,
            shared: &shared,
            rng: &mut rng,
        };
        let req = match ep.build("http://localhost:8081", Some(Duration::from_secs(1)), &mut ctx) {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(req.method, http::Method::POST);
        assert_eq!(req.url, "http://localhost:8081/api/coupons/issue");
        assert_eq!(req.timeout, Some(Duration::from_secs(1)));
        assert!(req.headers.contains(&("x-user".to_string(), "u-9".to_string())));
        assert!(req.headers.contains(&("content-type".to_string(), "application/json".to_string())));
        let body: Value = match serde_json::from_slice(&req.body) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(body, json!({"userId": 9, "couponId": 1}));
    }

    #[test]
    fn capture_into_reports_missing_values() {
        let mut s = spec("create", "POST", "/api/orders", 1.0);
        s.capture = vec![("orderId".into(), "orderId|id".into())];
        let ep = match Endpoint::from_spec(s) {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        };
        let mut vars = IterationVars::new();
        assert!(ep.capture_into(br#"{"id": 3}"#, &mut vars).is_ok());
        assert_eq!(vars.get("orderId"), Some(&json!(3)));
        assert!(matches!(
            ep.capture_into(b"not json", &mut vars),
            Err(PlanError::CaptureMissing { .. })
        ));
    }

    #[test]
    fn rejects_invalid_methods_and_weights() {
        assert!(matches!(
            Endpoint::from_spec(spec("x", "GE T", "/", 1.0)),
            Err(PlanError::InvalidMethod(_))
        ));
        assert!(matches!(
            RequestPlan::new(vec![spec("x", "GET", "/", 0.0)], ThinkTime::default()),
            Err(PlanError::NoPositiveWeight)
        ));
    }
}
