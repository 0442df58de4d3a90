use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

use crate::aspect::{CheckDeclaration, GatewayCheck, RequiresAuthentication, RequiresPermissions};
use crate::cors::CorsPolicy;
use crate::reply::Reply;
use crate::server::{HttpRequest, HttpResponse};

/// How a raw parameter value is converted before the action sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// Parsed as JSON; a body field is taken as-is
    Json,
}

impl ParamType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Json => "json",
        }
    }
}

/// Where a parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamSource {
    /// Path, then query, then a field of a JSON object body
    #[default]
    Auto,
    Path,
    Query,
    Header,
    /// The whole request body
    Body,
}

/// Binding metadata for one action parameter, computed at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: Arc<str>,
    pub ty: ParamType,
    pub source: ParamSource,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    Missing {
        param: Arc<str>,
    },
    Invalid {
        param: Arc<str>,
        expected: ParamType,
        value: String,
    },
}

impl BindError {
    #[must_use]
    pub fn param(&self) -> &str {
        match self {
            BindError::Missing { param } | BindError::Invalid { param, .. } => param.as_ref(),
        }
    }

    /// The `400` response sent for this error.
    #[must_use]
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse::json(
            400,
            &serde_json::json!({ "error": self.to_string(), "param": self.param() }),
        )
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::Missing { param } => write!(f, "Missing required parameter '{param}'"),
            BindError::Invalid {
                param,
                expected,
                value,
            } => write!(
                f,
                "Invalid value '{value}' for parameter '{param}': expected {}",
                expected.as_str()
            ),
        }
    }
}

impl std::error::Error for BindError {}

fn convert_str(spec: &ParamSpec, raw: &str) -> Result<Value, BindError> {
    let invalid = || BindError::Invalid {
        param: Arc::clone(&spec.name),
        expected: spec.ty,
        value: raw.to_string(),
    };
    match spec.ty {
        ParamType::String => Ok(Value::String(raw.to_string())),
        ParamType::Integer => raw.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
        ParamType::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        ParamType::Boolean => match raw.trim() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        ParamType::Json => serde_json::from_str(raw).map_err(|_| invalid()),
    }
}

fn convert_value(spec: &ParamSpec, value: Value) -> Result<Value, BindError> {
    let ok = match (&value, spec.ty) {
        (Value::String(s), ty) if ty != ParamType::Json => return convert_str(spec, s),
        (_, ParamType::Json) => true,
        (Value::Number(n), ParamType::Integer) => n.is_i64() || n.is_u64(),
        (Value::Number(_), ParamType::Number) => true,
        (Value::Bool(_), ParamType::Boolean) => true,
        _ => false,
    };
    if ok {
        Ok(value)
    } else {
        Err(BindError::Invalid {
            param: Arc::clone(&spec.name),
            expected: spec.ty,
            value: value.to_string(),
        })
    }
}

fn lookup_auto(req: &HttpRequest, body: Option<&Value>, name: &str) -> Option<Value> {
    if let Some(v) = req.get_path_param(name) {
        return Some(Value::String(v.to_string()));
    }
    if let Some(v) = req.get_query_param(name) {
        return Some(Value::String(v.to_string()));
    }
    body.and_then(|b| b.get(name)).cloned()
}

/// Bind request values to `specs`, in order.
///
/// Absent optional parameters bind to `Value::Null`.
pub fn bind_params(req: &HttpRequest, specs: &[ParamSpec]) -> Result<Vec<Value>, BindError> {
    let needs_body = specs
        .iter()
        .any(|s| matches!(s.source, ParamSource::Auto));
    let body_json = if needs_body { req.body_json() } else { None };

    let mut args = Vec::with_capacity(specs.len());
    for spec in specs {
        let raw = match spec.source {
            ParamSource::Auto => lookup_auto(req, body_json.as_ref(), &spec.name),
            ParamSource::Path => req
                .get_path_param(&spec.name)
                .map(|v| Value::String(v.to_string())),
            ParamSource::Query => req
                .get_query_param(&spec.name)
                .map(|v| Value::String(v.to_string())),
            ParamSource::Header => req
                .get_header(&spec.name)
                .map(|v| Value::String(v.to_string())),
            ParamSource::Body => match spec.ty {
                _ if req.body.is_empty() => None,
                ParamType::Json => Some(req.body_json().ok_or_else(|| BindError::Invalid {
                    param: Arc::clone(&spec.name),
                    expected: ParamType::Json,
                    value: String::from_utf8_lossy(&req.body).into_owned(),
                })?),
                _ => Some(Value::String(String::from_utf8_lossy(&req.body).into_owned())),
            },
        };
        let bound = match raw {
            Some(value) => convert_value(spec, value)?,
            None if spec.required => {
                return Err(BindError::Missing {
                    param: Arc::clone(&spec.name),
                })
            }
            None => Value::Null,
        };
        args.push(bound);
    }
    Ok(args)
}

/// What an action closure sees: the request and its bound arguments.
pub struct ActionContext<'a> {
    pub request: &'a HttpRequest,
    specs: &'a [ParamSpec],
    args: &'a [Value],
}

impl<'a> ActionContext<'a> {
    #[must_use]
    pub fn new(request: &'a HttpRequest, specs: &'a [ParamSpec], args: &'a [Value]) -> Self {
        Self {
            request,
            specs,
            args,
        }
    }

    /// Bound argument by parameter name. `None` for absent optional parameters.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&Value> {
        let index = self.specs.iter().position(|s| s.name.as_ref() == name)?;
        self.args.get(index).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.arg(name).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.arg(name).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.arg(name).and_then(Value::as_bool)
    }

    pub fn json<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .arg(name)
            .ok_or_else(|| anyhow::anyhow!("parameter '{name}' not bound"))?;
        Ok(T::deserialize(value)?)
    }

    /// Deserialize the raw request body.
    pub fn body<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.request.body)?)
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.request.attribute(key)
    }
}

/// Values an action may return.
pub trait IntoReply {
    fn into_reply(self) -> anyhow::Result<Reply>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(self)
    }
}

impl IntoReply for HttpResponse {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(Reply::Response(self))
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(Reply::Json(self))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(Reply::Text(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(Reply::Text(self.to_string()))
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(Reply::Bytes(self, "application/octet-stream".to_string()))
    }
}

impl IntoReply for () {
    fn into_reply(self) -> anyhow::Result<Reply> {
        Ok(Reply::Empty)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<anyhow::Error>,
{
    fn into_reply(self) -> anyhow::Result<Reply> {
        self.map_err(Into::into)?.into_reply()
    }
}

pub type ActionFn = Arc<dyn Fn(&ActionContext<'_>) -> anyhow::Result<Reply> + Send + Sync>;

/// An action under registration: handler, parameters, checks and CORS.
pub struct Action {
    pub(crate) name: Arc<str>,
    pub(crate) handler: ActionFn,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) checks: Vec<CheckDeclaration>,
    pub(crate) cors: Option<CorsPolicy>,
}

impl Action {
    pub fn new<R, F>(name: &str, handler: F) -> Self
    where
        R: IntoReply,
        F: Fn(&ActionContext<'_>) -> R + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            handler: Arc::new(move |ctx: &ActionContext<'_>| handler(ctx).into_reply()),
            params: Vec::new(),
            checks: Vec::new(),
            cors: None,
        }
    }

    /// An action that runs on its owning instance.
    pub fn bind<T, R, F>(owner: &Arc<T>, name: &str, handler: F) -> Self
    where
        T: Send + Sync + 'static,
        R: IntoReply,
        F: Fn(&T, &ActionContext<'_>) -> R + Send + Sync + 'static,
    {
        let owner = Arc::clone(owner);
        Self::new(name, move |ctx: &ActionContext<'_>| handler(&owner, ctx))
    }

    fn push_param(mut self, name: &str, ty: ParamType, source: ParamSource, required: bool) -> Self {
        self.params.push(ParamSpec {
            name: Arc::from(name),
            ty,
            source,
            required,
        });
        self
    }

    /// Required parameter, looked up in path, query, then body.
    #[must_use]
    pub fn param(self, name: &str, ty: ParamType) -> Self {
        self.push_param(name, ty, ParamSource::Auto, true)
    }

    #[must_use]
    pub fn optional(self, name: &str, ty: ParamType) -> Self {
        self.push_param(name, ty, ParamSource::Auto, false)
    }

    /// Pin the most recently declared parameter to one source.
    #[must_use]
    pub fn source(mut self, source: ParamSource) -> Self {
        if let Some(last) = self.params.last_mut() {
            last.source = source;
        }
        self
    }

    /// Bind the whole request body as parameter `body`.
    #[must_use]
    pub fn body(self, ty: ParamType) -> Self {
        self.push_param("body", ty, ParamSource::Body, true)
    }

    #[must_use]
    pub fn check(mut self, decl: CheckDeclaration) -> Self {
        self.checks.push(decl);
        self
    }

    #[must_use]
    pub fn gateway(self, decl: GatewayCheck) -> Self {
        self.check(CheckDeclaration::Gateway(decl))
    }

    #[must_use]
    pub fn requires_authentication(self) -> Self {
        self.check(CheckDeclaration::Authentication(RequiresAuthentication))
    }

    #[must_use]
    pub fn requires_permissions(self, decl: RequiresPermissions) -> Self {
        self.check(CheckDeclaration::Permissions(decl))
    }

    #[must_use]
    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        self.cors = Some(policy);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("checks", &self.checks)
            .field("cors", &self.cors.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, ty: ParamType, source: ParamSource, required: bool) -> ParamSpec {
        ParamSpec {
            name: Arc::from(name),
            ty,
            source,
            required,
        }
    }

    #[test]
    fn test_auto_prefers_path_over_query() {
        let mut req = HttpRequest::get("/users/7?id=9");
        req.path_params.push((Arc::from("id"), "7".to_string()));
        let args = bind_params(&req, &[spec("id", ParamType::Integer, ParamSource::Auto, true)]).unwrap();
        assert_eq!(args, vec![json!(7)]);
    }

    #[test]
    fn test_auto_falls_back_to_body_field() {
        let req = HttpRequest::new(http::Method::POST, "/u").with_json(&json!({"age": 31, "name": "ann"}));
        let args = bind_params(
            &req,
            &[
                spec("age", ParamType::Integer, ParamSource::Auto, true),
                spec("name", ParamType::String, ParamSource::Auto, true),
            ],
        )
        .unwrap();
        assert_eq!(args, vec![json!(31), json!("ann")]);
    }

    #[test]
    fn test_missing_required_and_optional() {
        let req = HttpRequest::get("/");
        let err = bind_params(&req, &[spec("q", ParamType::String, ParamSource::Query, true)]).unwrap_err();
        assert_eq!(err.param(), "q");
        let args = bind_params(&req, &[spec("q", ParamType::String, ParamSource::Query, false)]).unwrap();
        assert_eq!(args, vec![Value::Null]);
    }

    #[test]
    fn test_invalid_integer() {
        let req = HttpRequest::get("/?n=abc");
        let err = bind_params(&req, &[spec("n", ParamType::Integer, ParamSource::Query, true)]).unwrap_err();
        assert!(matches!(err, BindError::Invalid { .. }));
        let resp = err.to_response();
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body_json().unwrap()["param"], "n");
    }

    #[test]
    fn test_boolean_and_header() {
        let req = HttpRequest::get("/?verbose=1").with_header("X-Tenant", "acme");
        let args = bind_params(
            &req,
            &[
                spec("verbose", ParamType::Boolean, ParamSource::Query, true),
                spec("x-tenant", ParamType::String, ParamSource::Header, true),
            ],
        )
        .unwrap();
        assert_eq!(args, vec![json!(true), json!("acme")]);
    }

    #[test]
    fn test_body_json_source() {
        let req = HttpRequest::new(http::Method::POST, "/").with_body("{not json");
        let err = bind_params(&req, &[spec("body", ParamType::Json, ParamSource::Body, true)]).unwrap_err();
        assert_eq!(err.param(), "body");
    }

    #[test]
    fn test_context_accessors() {
        let req = HttpRequest::get("/?limit=5&tag=x");
        let specs = [
            spec("limit", ParamType::Integer, ParamSource::Query, true),
            spec("tag", ParamType::String, ParamSource::Query, true),
            spec("page", ParamType::Integer, ParamSource::Query, false),
        ];
        let args = bind_params(&req, &specs).unwrap();
        let ctx = ActionContext::new(&req, &specs, &args);
        assert_eq!(ctx.int("limit"), Some(5));
        assert_eq!(ctx.str("tag"), Some("x"));
        assert_eq!(ctx.int("page"), None);
        assert!(ctx.arg("unknown").is_none());
    }

    #[test]
    fn test_result_into_reply() {
        let ok: Result<&'static str, anyhow::Error> = Ok("fine");
        assert_eq!(ok.into_reply().unwrap(), Reply::Text("fine".into()));
        let err: Result<(), std::io::Error> = Err(std::io::Error::other("disk"));
        assert!(err.into_reply().is_err());
    }
}
