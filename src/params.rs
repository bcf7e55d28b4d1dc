//! Request context and typed operation parameters extracted from it.

use crate::descriptor::ResourceDescriptor;
use crate::error::AppError;
use crate::query::expr::Comparison;
use crate::query::plan::SortDirection;
use crate::store::Document;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Page ceiling applied to an explicit `limit` when the endpoint sets no `maxPage`.
pub const DEFAULT_MAX_PAGE: u64 = 100;

/// Raw inputs of one operation call: URL query pairs in order, body bytes, endpoint option overrides.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub options: Document,
}

impl RequestContext {
    pub fn new(query: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        RequestContext {
            query,
            body: body.into(),
            options: Document::new(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        RequestContext::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            Vec::new(),
        )
    }

    pub fn with_options(mut self, options: Document) -> Self {
        self.options = options;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    pub fn json_body(&self) -> Result<Document, AppError> {
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(Value::Object(doc)) => Ok(doc),
            _ => Err(AppError::Validation("body must be a JSON object".into())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Converter {
    Number,
    Int,
    Bool,
    String,
}

impl Converter {
    /// `None` when the raw text does not parse.
    pub fn convert(self, raw: &str) -> Option<Value> {
        match self {
            Converter::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            Converter::Int => raw.trim().parse::<i64>().ok().map(Value::from),
            Converter::Bool => Some(Value::Bool(!matches!(raw, "0" | "false"))),
            Converter::String => Some(Value::String(raw.to_string())),
        }
    }
}

impl FromStr for Converter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(Converter::Number),
            "int" => Ok(Converter::Int),
            "bool" => Ok(Converter::Bool),
            "string" => Ok(Converter::String),
            other => Err(AppError::Validation(format!("unknown converter '{}'", other))),
        }
    }
}

pub type CustomExtractor = fn(&RequestContext, &ResourceDescriptor) -> Result<Option<Value>, AppError>;

#[derive(Clone, Copy)]
pub enum Extractor {
    Convert(Converter),
    /// Every occurrence of the key, converted; absent when none parse.
    Multi(Converter),
    Custom(CustomExtractor),
    /// Never read from the query; only an endpoint option can set it.
    OptionOnly,
}

impl FromStr for Extractor {
    type Err = AppError;

    /// `"int"`, `"multi:string"`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("multi", conv)) => Ok(Extractor::Multi(conv.parse()?)),
            _ => Ok(Extractor::Convert(s.parse()?)),
        }
    }
}

/// Extracts the listed keys from the request. Endpoint options always win over the query.
pub fn extract_generic(
    ctx: &RequestContext,
    descriptor: &ResourceDescriptor,
    keys: &[(&str, Extractor)],
) -> Result<Document, AppError> {
    let mut out = Document::new();
    for (key, extractor) in keys {
        if let Some(v) = ctx.options.get(*key) {
            out.insert(key.to_string(), v.clone());
            continue;
        }
        let value = match extractor {
            Extractor::Convert(conv) => ctx.get(key).and_then(|raw| conv.convert(raw)),
            Extractor::Multi(conv) => {
                let all: Vec<Value> = ctx
                    .get_all(key)
                    .into_iter()
                    .filter_map(|raw| conv.convert(raw))
                    .collect();
                (!all.is_empty()).then_some(Value::Array(all))
            }
            Extractor::Custom(f) => f(ctx, descriptor)?,
            Extractor::OptionOnly => None,
        };
        if let Some(v) = value {
            out.insert(key.to_string(), v);
        }
    }
    Ok(out)
}

fn typed<T: DeserializeOwned>(doc: Document) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| AppError::Validation(format!("Invalid parameters: {}", e)))
}

/// One requested filter: `filter_<name>=<mode>:<value>`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterValue {
    pub name: String,
    pub value: String,
    pub mode: Comparison,
}

/// Reads `filter_<name>` for every declared filter, in declaration order.
pub fn extract_filters(ctx: &RequestContext, descriptor: &ResourceDescriptor) -> Result<Vec<FilterValue>, AppError> {
    let mut out = Vec::new();
    for (name, _) in descriptor.filters() {
        let Some(raw) = ctx.get(&format!("filter_{}", name)) else {
            continue;
        };
        let (mode, value) = match raw.split_once(':') {
            Some((mode, value)) if !mode.is_empty() => (mode.parse::<Comparison>()?, value),
            _ => (Comparison::Eq, raw),
        };
        out.push(FilterValue {
            name: name.to_string(),
            value: value.to_string(),
            mode,
        });
    }
    Ok(out)
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParameters {
    #[serde(skip)]
    pub filters: Vec<FilterValue>,
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
    pub sort_key: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub max_page: Option<u64>,
    #[serde(default)]
    pub no_foreign: bool,
    #[serde(default)]
    pub no_pluck: bool,
    pub pluck_mode: Option<String>,
}

impl ListParameters {
    pub fn extract(ctx: &RequestContext, descriptor: &ResourceDescriptor) -> Result<Self, AppError> {
        let doc = extract_generic(
            ctx,
            descriptor,
            &[
                ("offset", Extractor::Convert(Converter::Int)),
                ("limit", Extractor::Convert(Converter::Int)),
                ("sortKey", Extractor::Convert(Converter::String)),
                ("sortDirection", Extractor::Convert(Converter::String)),
                ("maxPage", Extractor::OptionOnly),
                ("noForeign", Extractor::Convert(Converter::Bool)),
                ("noPluck", Extractor::Convert(Converter::Bool)),
                ("pluckMode", Extractor::Convert(Converter::String)),
            ],
        )?;
        let mut params: ListParameters = typed(doc)?;
        if let Some(key) = &params.sort_key {
            let sortable = descriptor.field(key).is_some_and(|f| f.sortable.is_some());
            if !sortable {
                return Err(AppError::Validation("Field is not sortable.".into()));
            }
        }
        params.filters = extract_filters(ctx, descriptor)?;
        Ok(params)
    }

    /// `limit` capped by `maxPage` (default 100). Without `limit`, `maxPage`, which may be unbounded.
    pub fn effective_limit(&self) -> Option<u64> {
        match self.limit.filter(|l| *l > 0) {
            Some(limit) => Some(limit.min(self.max_page.unwrap_or(DEFAULT_MAX_PAGE))),
            None => self.max_page,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetParameters {
    pub id: String,
    pub index: Option<String>,
    #[serde(default)]
    pub no_foreign: bool,
}

impl GetParameters {
    pub fn extract(ctx: &RequestContext, descriptor: &ResourceDescriptor) -> Result<Self, AppError> {
        let doc = extract_generic(
            ctx,
            descriptor,
            &[
                ("id", Extractor::Convert(Converter::String)),
                ("index", Extractor::Convert(Converter::String)),
                ("noForeign", Extractor::Convert(Converter::Bool)),
            ],
        )?;
        require_id(&doc)?;
        typed(doc)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParameters {
    #[serde(default)]
    pub no_mandatory: bool,
}

impl NewParameters {
    pub fn extract(ctx: &RequestContext, descriptor: &ResourceDescriptor) -> Result<Self, AppError> {
        typed(extract_generic(ctx, descriptor, &[("noMandatory", Extractor::OptionOnly)])?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditParameters {
    pub id: String,
    pub index: Option<String>,
    #[serde(default)]
    pub no_mandatory: bool,
}

impl EditParameters {
    pub fn extract(ctx: &RequestContext, descriptor: &ResourceDescriptor) -> Result<Self, AppError> {
        let doc = extract_generic(
            ctx,
            descriptor,
            &[
                ("id", Extractor::Convert(Converter::String)),
                ("index", Extractor::Convert(Converter::String)),
                ("noMandatory", Extractor::OptionOnly),
            ],
        )?;
        require_id(&doc)?;
        typed(doc)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeleteParameters {
    pub id: Vec<String>,
}

impl DeleteParameters {
    pub fn extract(ctx: &RequestContext, descriptor: &ResourceDescriptor) -> Result<Self, AppError> {
        let doc = extract_generic(ctx, descriptor, &[("id", Extractor::Multi(Converter::String))])?;
        require_id(&doc)?;
        typed(doc)
    }
}

fn require_id(doc: &Document) -> Result<(), AppError> {
    match doc.get("id") {
        None | Some(Value::Null) => Err(AppError::Validation("Missing id.".into())),
        Some(Value::String(s)) if s.is_empty() => Err(AppError::Validation("Missing id.".into())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AccessMode;
    use serde_json::json;

    fn items() -> ResourceDescriptor {
        let mut d = ResourceDescriptor::new("items");
        d.set_mode("name", AccessMode::ReadWrite)
            .set_filter("name", None, false)
            .set_filter("price", None, false)
            .set_sortable("price", true, false);
        d
    }

    #[test]
    fn converters() {
        assert_eq!(Converter::Bool.convert("0"), Some(json!(false)));
        assert_eq!(Converter::Bool.convert("false"), Some(json!(false)));
        assert_eq!(Converter::Bool.convert(""), Some(json!(true)));
        assert_eq!(Converter::Int.convert("12"), Some(json!(12)));
        assert_eq!(Converter::Int.convert("x"), None);
        assert_eq!(Converter::Number.convert("1.5"), Some(json!(1.5)));
    }

    #[test]
    fn extractor_from_str() {
        assert!(matches!("multi:int".parse::<Extractor>().unwrap(), Extractor::Multi(Converter::Int)));
        assert!(matches!("bool".parse::<Extractor>().unwrap(), Extractor::Convert(Converter::Bool)));
        assert!("multi:nope".parse::<Extractor>().is_err());
    }

    #[test]
    fn options_override_query() {
        let d = items();
        let ctx = RequestContext::from_pairs([("limit", "50")])
            .with_options(serde_json::Map::from_iter([("limit".to_string(), json!(5))]));
        let p = ListParameters::extract(&ctx, &d).unwrap();
        assert_eq!(p.limit, Some(5));
    }

    #[test]
    fn max_page_ignores_query() {
        let d = items();
        let ctx = RequestContext::from_pairs([("maxPage", "1000"), ("limit", "500")]);
        let p = ListParameters::extract(&ctx, &d).unwrap();
        assert_eq!(p.max_page, None);
        assert_eq!(p.effective_limit(), Some(100));
    }

    #[test]
    fn effective_limit_rules() {
        let mut p = ListParameters::default();
        assert_eq!(p.effective_limit(), None);
        p.max_page = Some(20);
        assert_eq!(p.effective_limit(), Some(20));
        p.limit = Some(5);
        assert_eq!(p.effective_limit(), Some(5));
        p.limit = Some(50);
        assert_eq!(p.effective_limit(), Some(20));
        p.limit = Some(0);
        assert_eq!(p.effective_limit(), Some(20));
    }

    #[test]
    fn filters_parse_modes() {
        let d = items();
        let ctx = RequestContext::from_pairs([("filter_price", "gt:100"), ("filter_name", "Item A")]);
        let filters = extract_filters(&ctx, &d).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].name, "name");
        assert_eq!(filters[0].mode, Comparison::Eq);
        assert_eq!(filters[0].value, "Item A");
        assert_eq!(filters[1].mode, Comparison::Gt);
        assert_eq!(filters[1].value, "100");
    }

    #[test]
    fn filter_value_keeps_later_colons_and_leading_colon() {
        let d = items();
        let ctx = RequestContext::from_pairs([("filter_name", "eq:a:b"), ("filter_price", ":x")]);
        let filters = extract_filters(&ctx, &d).unwrap();
        assert_eq!(filters[0].value, "a:b");
        assert_eq!(filters[1].mode, Comparison::Eq);
        assert_eq!(filters[1].value, ":x");
    }

    #[test]
    fn bad_filter_mode_is_rejected() {
        let d = items();
        let ctx = RequestContext::from_pairs([("filter_price", "between:1")]);
        let err = ListParameters::extract(&ctx, &d).unwrap_err();
        assert!(err.to_string().contains("between"));
    }

    #[test]
    fn sort_key_must_be_sortable() {
        let d = items();
        let err = ListParameters::extract(&RequestContext::from_pairs([("sortKey", "name")]), &d).unwrap_err();
        assert_eq!(err.to_string(), "Field is not sortable.");
        let ok = ListParameters::extract(
            &RequestContext::from_pairs([("sortKey", "price"), ("sortDirection", "desc")]),
            &d,
        )
        .unwrap();
        assert_eq!(ok.sort_direction, Some(SortDirection::Desc));
        assert!(ListParameters::extract(&RequestContext::from_pairs([("sortDirection", "up")]), &d).is_err());
    }

    #[test]
    fn get_and_delete_require_ids() {
        let d = items();
        let err = GetParameters::extract(&RequestContext::default(), &d).unwrap_err();
        assert_eq!(err.to_string(), "Missing id.");
        assert!(DeleteParameters::extract(&RequestContext::default(), &d).is_err());
        let del = DeleteParameters::extract(&RequestContext::from_pairs([("id", "a"), ("id", "b")]), &d).unwrap();
        assert_eq!(del.id, vec!["a", "b"]);
    }

    #[test]
    fn body_must_be_object() {
        assert!(RequestContext::default().with_body("[1]").json_body().is_err());
        assert_eq!(
            RequestContext::default().with_body(r#"{"a":1}"#).json_body().unwrap()["a"],
            json!(1)
        );
    }
}
