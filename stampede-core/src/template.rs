//! `${...}` placeholders in endpoint paths, headers and JSON bodies.
//!
//! Templates are parsed once when a plan is built and rendered per request.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;
use serde_json::Value;

use crate::plan::PlanError;
use crate::shared::SharedVars;

pub type IterationVars = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Placeholder {
    /// Run-wide VU id.
    Vu,
    /// 1-based VU index within the scenario.
    ScenarioVu,
    /// 0-based iteration of this VU.
    Iter,
    /// `iter + 1`.
    Seq,
    /// 0-based iteration number across the whole scenario.
    ScenarioIter,
    /// Inclusive integer range.
    Rand { lo: i64, hi: i64 },
    /// `(vu mod n) + 1`, for mapping many VUs onto few contended ids.
    VuMod(u64),
    /// `a` with probability `p`, else `b`.
    Chance { p: f64, a: String, b: String },
    Var(String),
}

impl Placeholder {
    fn parse(inner: &str) -> Result<Self, PlanError> {
        let bad = || PlanError::InvalidPlaceholder(inner.to_string());
        let mut parts = inner.splitn(2, ':');
        let head = parts.next().unwrap_or_default();
        let rest = parts.next();

        let p = match (head, rest) {
            ("vu", None) => Self::Vu,
            ("scenario_vu", None) => Self::ScenarioVu,
            ("iter", None) => Self::Iter,
            ("seq", None) => Self::Seq,
            ("scenario_iter", None) => Self::ScenarioIter,
            ("rand", Some(range)) => {
                let (lo, hi) = range.split_once(':').ok_or_else(bad)?;
                let lo: i64 = lo.trim().parse().map_err(|_| bad())?;
                let hi: i64 = hi.trim().parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                Self::Rand { lo, hi }
            }
            ("vu_mod", Some(n)) => {
                let n: u64 = n.trim().parse().map_err(|_| bad())?;
                if n == 0 {
                    return Err(bad());
                }
                Self::VuMod(n)
            }
            ("chance", Some(spec)) => {
                let mut it = spec.splitn(3, ':');
                let p: f64 = it.next().unwrap_or_default().parse().map_err(|_| bad())?;
                let a = it.next().ok_or_else(bad)?;
                let b = it.next().ok_or_else(bad)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(bad());
                }
                Self::Chance {
                    p,
                    a: a.to_string(),
                    b: b.to_string(),
                }
            }
            ("var", Some(name)) if !name.is_empty() => Self::Var(name.to_string()),
            _ => return Err(bad()),
        };
        Ok(p)
    }

    fn value(&self, ctx: &mut TemplateContext<'_>) -> Result<Value, PlanError> {
        let v = match self {
            Self::Vu => Value::from(ctx.vu),
            Self::ScenarioVu => Value::from(ctx.scenario_vu),
            Self::Iter => Value::from(ctx.iter),
            Self::Seq => Value::from(ctx.iter.saturating_add(1)),
            Self::ScenarioIter => Value::from(ctx.scenario_iter),
            Self::Rand { lo, hi } => Value::from(ctx.rng.gen_range(*lo..=*hi)),
            Self::VuMod(n) => Value::from(ctx.vu % n + 1),
            Self::Chance { p, a, b } => {
                let hit = ctx.rng.gen_bool(*p);
                literal_value(if hit { a } else { b })
            }
            Self::Var(name) => match ctx.vars.get(name) {
                Some(v) => v.clone(),
                None => ctx
                    .shared
                    .pick(name, &mut *ctx.rng)
                    .ok_or_else(|| PlanError::UnknownVar(name.clone()))?,
            },
        };
        Ok(v)
    }
}

/// `null`, booleans and numbers keep their JSON type; anything else is a string.
fn literal_value(raw: &str) -> Value {
    match raw {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct TemplateContext<'a> {
    pub vu: u64,
    pub scenario_vu: u64,
    pub iter: u64,
    pub scenario_iter: u64,
    pub vars: &'a IterationVars,
    pub shared: &'a SharedVars,
    pub rng: &'a mut StdRng,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Lit(String),
    Slot(Placeholder),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrTemplate {
    segments: Vec<Segment>,
}

impl StrTemplate {
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start + 2..].find('}') else {
                return Err(PlanError::UnterminatedPlaceholder(raw.to_string()));
            };
            if start > 0 {
                segments.push(Segment::Lit(rest[..start].to_string()));
            }
            let inner = &rest[start + 2..start + 2 + len];
            segments.push(Segment::Slot(Placeholder::parse(inner)?));
            rest = &rest[start + 2 + len + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Lit(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Lit(_)))
    }

    fn sole_placeholder(&self) -> Option<&Placeholder> {
        match self.segments.as_slice() {
            [Segment::Slot(p)] => Some(p),
            _ => None,
        }
    }

    pub fn render(&self, ctx: &mut TemplateContext<'_>) -> Result<String, PlanError> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Lit(s) => out.push_str(s),
                Segment::Slot(p) => out.push_str(&value_text(&p.value(ctx)?)),
            }
        }
        Ok(out)
    }
}

/// JSON value with templated strings. A string that is exactly one
/// placeholder renders to that placeholder's typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonTemplate {
    Literal(Value),
    Str(StrTemplate),
    Array(Vec<JsonTemplate>),
    Object(Vec<(String, JsonTemplate)>),
}

impl JsonTemplate {
    pub fn parse(value: &Value) -> Result<Self, PlanError> {
        Ok(match value {
            Value::String(s) => {
                let t = StrTemplate::parse(s)?;
                if t.is_static() {
                    Self::Literal(value.clone())
                } else {
                    Self::Str(t)
                }
            }
            Value::Array(items) => Self::Array(
                items
                    .iter()
                    .map(Self::parse)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::parse(v)?)))
                    .collect::<Result<Vec<_>, PlanError>>()?,
            ),
            other => Self::Literal(other.clone()),
        })
    }

    pub fn render(&self, ctx: &mut TemplateContext<'_>) -> Result<Value, PlanError> {
        Ok(match self {
            Self::Literal(v) => v.clone(),
            Self::Str(t) => match t.sole_placeholder() {
                Some(p) => p.value(ctx)?,
                None => Value::String(t.render(ctx)?),
            },
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.render(ctx))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Self::Object(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (k, v) in fields {
                    map.insert(k.clone(), v.render(ctx)?);
                }
                Value::Object(map)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use serde_json::json;

    fn render_str(raw: &str, vars: &IterationVars, shared: &SharedVars) -> String {
        let mut rng = StdRng::seed_from_u64(11);
        let mut ctx = TemplateContext {
            vu: 42,
            scenario_vu: 7,
            iter: 2,
            scenario_iter: 99,
            vars,
            shared,
            rng: &mut rng,
        };
        let t = match StrTemplate::parse(raw) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        };
        match t.render(&mut ctx) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        }
    }

    #[test]
    fn renders_identity_placeholders() {
        let vars = IterationVars::new();
        let shared = SharedVars::new();
        assert_eq!(
            render_str("/u/${vu}/s/${scenario_vu}/i/${iter}/${seq}/${scenario_iter}", &vars, &shared),
            "/u/42/s/7/i/2/3/99"
        );
        assert_eq!(render_str("/api/points/users/${vu_mod:20}/charge", &vars, &shared), "/api/points/users/3/charge");
        assert_eq!(render_str("no placeholders $ here", &vars, &shared), "no placeholders $ here");
    }

    #[test]
    fn var_prefers_iteration_capture_over_shared() {
        let mut vars = IterationVars::new();
        vars.insert("orderId".into(), json!(17));
        let shared = SharedVars::new();
        shared.set("orderId", json!(1));
        shared.set("tag", json!("x"));
        assert_eq!(render_str("/orders/${var:orderId}/payment", &vars, &shared), "/orders/17/payment");
        assert_eq!(render_str("${var:tag}", &vars, &shared), "x");
    }

    #[test]
    fn rand_is_inclusive_and_in_range() {
        let vars = IterationVars::new();
        let shared = SharedVars::new();
        let mut rng = StdRng::seed_from_u64(5);
        let t = match StrTemplate::parse("${rand:1:3}") {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        };
        let mut seen = [false; 3];
        for _ in 0..200 {
            let mut ctx = TemplateContext {
                vu: 1,
                scenario_vu: 1,
                iter: 0,
                scenario_iter: 0,
                vars: &vars,
                shared: &shared,
                rng: &mut rng,
            };
            let n: usize = match t.render(&mut ctx).map(|s| s.parse()) {
                Ok(Ok(n)) => n,
                other => panic!("unexpected render {other:?}"),
            };
            assert!((1..=3).contains(&n));
            seen[n - 1] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }

    #[test]
    fn json_sole_placeholders_keep_types() {
        let vars = IterationVars::new();
        let shared = SharedVars::new();
        let body = json!({
            "userId": "${vu}",
            "label": "user-${vu}",
            "usePoint": "${chance:1:1000:0}",
            "couponId": "${chance:0:1:null}",
            "items": [{ "productId": 1, "quantity": "${seq}" }],
        });
        let t = match JsonTemplate::parse(&body) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = TemplateContext {
            vu: 5,
            scenario_vu: 5,
            iter: 0,
            scenario_iter: 0,
            vars: &vars,
            shared: &shared,
            rng: &mut rng,
        };
        let rendered = match t.render(&mut ctx) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(
            rendered,
            json!({
                "userId": 5,
                "label": "user-5",
                "usePoint": 1000,
                "couponId": null,
                "items": [{ "productId": 1, "quantity": 1 }],
            })
        );
    }

    #[test]
    fn rejects_malformed_placeholders() {
        for raw in ["${", "${nope}", "${rand:5:1}", "${vu_mod:0}", "${chance:2:a:b}", "${var:}", "${env:HOME}"] {
            assert!(StrTemplate::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn missing_var_is_a_render_error() {
        let vars = IterationVars::new();
        let shared = SharedVars::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = TemplateContext {
            vu: 1,
            scenario_vu: 1,
            iter: 0,
            scenario_iter: 0,
            vars: &vars,
            shared: &shared,
            rng: &mut rng,
        };
        let t = match StrTemplate::parse("${var:orderId}") {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        };
        assert!(matches!(t.render(&mut ctx), Err(PlanError::UnknownVar(_))));
    }
}
