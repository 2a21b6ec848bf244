//! Query construction.
//!
//! Queries are built as values so that every store adapter can evaluate them:
//! the XTDB adapter renders them to EDN, the in-memory adapter interprets
//! them directly.

use std::fmt::Write as _;

use serde_json::Value;

use crate::database::ports::{Document, PRIMARY_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSet {
    AllFields,
    OnlyId,
}

/// Right-hand side of a where clause.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereValue {
    One(Value),
    Any(Vec<Value>),
}

impl WhereValue {
    /// Attributes holding a list match when any element matches.
    pub fn matches(&self, stored: &Value) -> bool {
        match stored {
            Value::Array(items) => items.iter().any(|item| self.matches_scalar(item)),
            scalar => self.matches_scalar(scalar),
        }
    }

    fn matches_scalar(&self, stored: &Value) -> bool {
        match self {
            WhereValue::One(expected) => expected == stored,
            WhereValue::Any(candidates) => candidates.contains(stored),
        }
    }
}

impl From<&str> for WhereValue {
    fn from(value: &str) -> Self {
        WhereValue::One(Value::String(value.to_string()))
    }
}

impl From<String> for WhereValue {
    fn from(value: String) -> Self {
        WhereValue::One(Value::String(value))
    }
}

impl From<Vec<String>> for WhereValue {
    fn from(values: Vec<String>) -> Self {
        WhereValue::Any(values.into_iter().map(Value::String).collect())
    }
}

/// Pulls documents whose attributes satisfy every filter.
#[derive(Debug, Clone, PartialEq)]
pub struct PullQuery {
    pub fields: FieldSet,
    pub filters: Vec<(String, WhereValue)>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl PullQuery {
    pub fn new(fields: FieldSet) -> Self {
        Self {
            fields,
            filters: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    pub fn filter(
        mut self,
        field: impl Into<String>,
        value: impl Into<WhereValue>,
    ) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters.iter().all(|(field, expected)| {
            document
                .get(field)
                .is_some_and(|stored| expected.matches(stored))
        })
    }

    fn render(&self, find: &str, paginate: bool) -> String {
        let mut inputs = Vec::new();
        let mut in_args = Vec::new();
        let mut clauses = String::new();

        for (index, (field, value)) in self.filters.iter().enumerate() {
            match value {
                WhereValue::One(expected) => {
                    let _ = write!(
                        clauses,
                        "[?e :{field} {}]",
                        edn_value(expected)
                    );
                }
                WhereValue::Any(candidates) => {
                    let var = format!("_in{index}");
                    let _ = write!(clauses, "[?e :{field} {var}]");
                    inputs.push(format!("[{var} ...]"));
                    in_args.push(edn_vector(candidates));
                }
            }
        }
        if clauses.is_empty() {
            let _ = write!(clauses, "[?e :{PRIMARY_KEY}]");
        }

        let mut query = format!("{{:query {{:find [{find}]");
        if !inputs.is_empty() {
            let _ = write!(query, " :in [{}]", inputs.join(" "));
        }
        let _ = write!(query, " :where [{clauses}]");
        if paginate {
            if let Some(limit) = self.limit {
                let _ = write!(query, " :limit {limit}");
            }
            if let Some(offset) = self.offset {
                let _ = write!(query, " :offset {offset}");
            }
        }
        query.push('}');
        if !in_args.is_empty() {
            let _ = write!(query, " :in-args [{}]", in_args.join(" "));
        }
        query.push('}');
        query
    }
}

/// One-hop neighbours of a set of documents, one nested pull per encoded
/// relation attribute (`Type/prop` or `Type/_prop`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighbourQuery {
    pub ids: Vec<String>,
    pub attributes: Vec<String>,
}

impl NeighbourQuery {
    fn render(&self) -> String {
        let related: Vec<String> = self
            .attributes
            .iter()
            .map(|attribute| format!("{{:{attribute} [*]}}"))
            .collect();
        let ids: Vec<Value> =
            self.ids.iter().cloned().map(Value::String).collect();
        format!(
            "{{:query {{:find [(pull ?e [:{PRIMARY_KEY} {}])] :in [[_xt_id ...]] \
             :where [[?e :{PRIMARY_KEY} _xt_id]]}} :in-args [{}]}}",
            related.join(" "),
            edn_vector(&ids)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Rows of `[document]`.
    Pull(PullQuery),
    /// A single row `[count]`.
    Count(PullQuery),
    /// Rows of `[document-with-nested-neighbours]`.
    Neighbours(NeighbourQuery),
    /// Rows of `[id]` for objects that have no scan profile document.
    MissingScanProfile,
}

impl Query {
    pub fn to_edn(&self) -> String {
        match self {
            Query::Pull(pull) => {
                let find = match pull.fields {
                    FieldSet::AllFields => "(pull ?e [*])".to_string(),
                    FieldSet::OnlyId => format!("(pull ?e [:{PRIMARY_KEY}])"),
                };
                pull.render(&find, true)
            }
            Query::Count(pull) => pull.render("(count ?e)", false),
            Query::Neighbours(neighbours) => neighbours.render(),
            Query::MissingScanProfile => "{:query {:find [?ooi] :where \
                 [[?ooi :object_type ?t] (not-join [?ooi] \
                 [?scan_profile :reference ?ooi] \
                 [?scan_profile :type \"ScanProfile\"])]}}"
                .to_string(),
        }
    }
}

fn edn_value(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => {
            let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        }
        Value::Array(items) => edn_vector(items),
        Value::Object(_) => "nil".to_string(),
    }
}

fn edn_vector(items: &[Value]) -> String {
    let rendered: Vec<String> = items.iter().map(edn_value).collect();
    format!("[{}]", rendered.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pull_query_renders_scalar_and_list_filters() {
        let query = PullQuery::new(FieldSet::AllFields)
            .filter("type", "Origin")
            .filter(
                "method",
                vec!["dns-resolving".to_string(), "port-classification-ip".to_string()],
            )
            .limit(10);

        assert_eq!(
            Query::Pull(query).to_edn(),
            "{:query {:find [(pull ?e [*])] :in [[_in1 ...]] \
             :where [[?e :type \"Origin\"][?e :method _in1]] :limit 10} \
             :in-args [[\"dns-resolving\" \"port-classification-ip\"]]}"
        );
    }

    #[test]
    fn count_ignores_pagination() {
        let query = PullQuery::new(FieldSet::OnlyId)
            .filter("object_type", "Hostname")
            .limit(5)
            .offset(10);
        assert_eq!(
            Query::Count(query).to_edn(),
            "{:query {:find [(count ?e)] :where [[?e :object_type \"Hostname\"]]}}"
        );
    }

    #[test]
    fn neighbour_query_nests_each_attribute() {
        let query = NeighbourQuery {
            ids: vec!["Hostname|internet|example.com".into()],
            attributes: vec!["Hostname/network".into(), "DNSARecord/_hostname".into()],
        };
        assert_eq!(
            Query::Neighbours(query).to_edn(),
            "{:query {:find [(pull ?e [:xt/id {:Hostname/network [*]} \
             {:DNSARecord/_hostname [*]}])] :in [[_xt_id ...]] \
             :where [[?e :xt/id _xt_id]]} \
             :in-args [[\"Hostname|internet|example.com\"]]}"
        );
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(edn_value(&json!("a\"b")), "\"a\\\"b\"");
    }

    #[test]
    fn list_attributes_match_any_element() {
        let query = PullQuery::new(FieldSet::AllFields)
            .filter("result", "Hostname|internet|example.com");
        let document = json!({
            "xt/id": "declaration|manual|Hostname|internet|example.com",
            "result": ["Network|internet", "Hostname|internet|example.com"],
        });
        let Value::Object(document) = document else {
            unreachable!()
        };
        assert!(query.matches(&document));
        assert!(!query.filter("type", "Origin").matches(&document));
    }
}
