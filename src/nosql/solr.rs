//! Solr document store over the HTTP API.
//!
//! Collections are Solr cores under `http://host:port/solr`. Options:
//! `timeout` (seconds, default 30) for every request, `scheme` (`http`),
//! `path` (`solr`), `id_field` (the core's unique key, `id`) and
//! `config_set` (`_default`) for cores created by [`DocumentStore::create_collection`].

use super::filter::{DocumentQuery, FieldFilter, FilterOp, FilterSet, FilterValue, SortOrder};
use super::{DocumentField, DocumentStore};
use crate::db::connection::{connect_timeout, open_failure};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, Row};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};

pub struct SolrStore {
    info: ConnectionInfo,
    base_url: String,
    id_field: String,
    client: Option<Client>,
}

impl SolrStore {
    pub fn new(info: ConnectionInfo) -> Self {
        let host = if info.host.is_empty() {
            "localhost"
        } else {
            info.host.as_str()
        };
        let base_url = format!(
            "{}://{}:{}/{}",
            info.option("scheme").unwrap_or("http"),
            host,
            info.port_or_default(),
            info.option("path").unwrap_or("solr").trim_matches('/')
        );
        let id_field = info.option("id_field").unwrap_or("id").to_string();
        Self {
            info,
            base_url,
            id_field,
            client: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> DbResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| crate::db::connection::not_open(&self.info))
    }

    fn core_url(&self, core: &str, handler: &str) -> String {
        format!("{}/{}/{}", self.base_url, core, handler)
    }

    /// Send a request and decode the JSON body, surfacing Solr's error block.
    async fn send(&self, request: RequestBuilder) -> DbResult<JsonValue> {
        let request = if self.info.user.is_empty() {
            request
        } else {
            request.basic_auth(&self.info.user, Some(&self.info.password))
        };
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: JsonValue = serde_json::from_str(&text).unwrap_or(JsonValue::Null);

        if let Some(error) = body.get("error") {
            let message = error
                .get("msg")
                .and_then(JsonValue::as_str)
                .unwrap_or("Solr request failed")
                .to_string();
            let code = error.get("code").map(|c| c.to_string());
            return Err(DbError::query(message, code));
        }
        if !status.is_success() {
            return Err(DbError::query(
                format!("Solr returned HTTP {}: {}", status, text.trim()),
                Some(status.as_u16().to_string()),
            ));
        }
        Ok(body)
    }

    async fn search(&self, core: &str, params: Vec<(&str, String)>) -> DbResult<(Vec<Row>, u64)> {
        let client = self.client()?;
        let body = self
            .send(client.get(self.core_url(core, "select")).query(&params))
            .await?;
        let response = body
            .get("response")
            .ok_or_else(|| DbError::query("Solr response has no result block", None))?;
        let total = response
            .get("numFound")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);
        let rows = response
            .get("docs")
            .and_then(JsonValue::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| d.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok((rows, total))
    }

    async fn post_update(&self, core: &str, payload: &JsonValue) -> DbResult<()> {
        let client = self.client()?;
        let url = self.core_url(core, "update");
        self.send(client.post(url).query(&[("commit", "true")]).json(payload))
            .await
            .map(|_| ())
    }

    async fn core_admin(&self, params: Vec<(&str, String)>) -> DbResult<JsonValue> {
        let client = self.client()?;
        let url = format!("{}/admin/cores", self.base_url);
        self.send(client.get(url).query(&params)).await
    }
}

fn base_params(filter: &FilterSet) -> Vec<(&'static str, String)> {
    let mut params = vec![("q", "*:*".to_string()), ("wt", "json".to_string())];
    params.extend(to_filter_queries(filter).into_iter().map(|fq| ("fq", fq)));
    params
}

#[async_trait]
impl DocumentStore for SolrStore {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = Client::builder()
            .timeout(connect_timeout(&self.info))
            .build()
            .map_err(|e| open_failure(&self.info, DbError::from(e)))?;
        self.client = Some(client);

        if let Err(e) = self
            .core_admin(vec![("action", "STATUS".to_string()), ("wt", "json".to_string())])
            .await
        {
            self.client = None;
            return Err(open_failure(&self.info, e));
        }
        info!(endpoint = %self.base_url, "Solr connection opened");
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.client.take().is_some() {
            debug!(endpoint = %self.base_url, "Solr connection closed");
        }
        Ok(())
    }

    async fn ping(&mut self) -> bool {
        self.client.is_some()
            && self
                .core_admin(vec![("action", "STATUS".to_string()), ("wt", "json".to_string())])
                .await
                .is_ok()
    }

    async fn select(
        &mut self,
        collection: &str,
        query: &DocumentQuery,
        count_total: bool,
    ) -> DbResult<(Vec<Row>, Option<u64>)> {
        let mut params = base_params(&query.filter);
        if !query.sort.is_empty() {
            let sort = query
                .sort
                .iter()
                .map(|(field, order)| {
                    let dir = match order {
                        SortOrder::Asc => "asc",
                        SortOrder::Desc => "desc",
                    };
                    format!("{} {}", field, dir)
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("sort", sort));
        }
        if !query.fields.is_empty() {
            params.push(("fl", query.fields.join(",")));
        }

        let (rows, total) = match query.window() {
            Some((start, rows)) => {
                params.push(("start", start.to_string()));
                params.push(("rows", rows.to_string()));
                self.search(collection, params).await?
            }
            None => {
                // Solr caps unpaged reads at 10 rows; size the read from a count.
                let mut count = params.clone();
                count.push(("rows", "0".to_string()));
                let (_, total) = self.search(collection, count).await?;
                params.push(("rows", total.to_string()));
                self.search(collection, params).await?
            }
        };
        Ok((rows, count_total.then_some(total)))
    }

    async fn insert(&mut self, collection: &str, documents: Vec<Row>) -> DbResult<u64> {
        if documents.is_empty() {
            return Ok(0);
        }
        let n = documents.len() as u64;
        let payload = JsonValue::Array(documents.into_iter().map(JsonValue::Object).collect());
        self.post_update(collection, &payload).await?;
        Ok(n)
    }

    /// Atomic `set` on every matching document.
    async fn update(&mut self, collection: &str, filter: &FilterSet, data: &Row) -> DbResult<u64> {
        let mut params = base_params(filter);
        params.push(("fl", self.id_field.clone()));
        params.push(("rows", i32::MAX.to_string()));
        let (matches, _) = self.search(collection, params).await?;

        let updates: Vec<JsonValue> = matches
            .iter()
            .filter_map(|doc| doc.get(&self.id_field))
            .map(|id| {
                let mut update = Row::new();
                update.insert(self.id_field.clone(), id.clone());
                for (field, value) in data {
                    if *field != self.id_field {
                        update.insert(field.clone(), json!({ "set": value }));
                    }
                }
                JsonValue::Object(update)
            })
            .collect();
        if updates.is_empty() {
            return Ok(0);
        }
        let n = updates.len() as u64;
        self.post_update(collection, &JsonValue::Array(updates)).await?;
        Ok(n)
    }

    async fn delete(&mut self, collection: &str, filter: &FilterSet) -> DbResult<u64> {
        let mut params = base_params(filter);
        params.push(("rows", "0".to_string()));
        let (_, total) = self.search(collection, params).await?;

        let query = match to_filter_queries(filter) {
            clauses if clauses.is_empty() => "*:*".to_string(),
            clauses => clauses
                .iter()
                .map(|c| format!("({})", c))
                .collect::<Vec<_>>()
                .join(" AND "),
        };
        self.post_update(collection, &json!({ "delete": { "query": query } }))
            .await?;
        Ok(total)
    }

    async fn max_id(&mut self, collection: &str, id_field: &str) -> DbResult<i64> {
        let params = vec![
            ("q", "*:*".to_string()),
            ("wt", "json".to_string()),
            ("fl", id_field.to_string()),
            ("sort", format!("{} desc", id_field)),
            ("rows", "1".to_string()),
        ];
        let (rows, _) = self.search(collection, params).await?;
        Ok(rows
            .first()
            .and_then(|doc| doc.get(id_field))
            .and_then(|id| match id {
                JsonValue::Number(n) => n.as_i64(),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(0))
    }

    async fn collection_exists(&mut self, collection: &str) -> DbResult<bool> {
        let body = self
            .core_admin(vec![
                ("action", "STATUS".to_string()),
                ("core", collection.to_string()),
                ("wt", "json".to_string()),
            ])
            .await?;
        Ok(body
            .get("status")
            .and_then(|s| s.get(collection))
            .and_then(JsonValue::as_object)
            .is_some_and(|core| !core.is_empty()))
    }

    async fn create_collection(&mut self, collection: &str) -> DbResult<()> {
        let config_set = self.info.option("config_set").unwrap_or("_default").to_string();
        self.core_admin(vec![
            ("action", "CREATE".to_string()),
            ("name", collection.to_string()),
            ("configSet", config_set),
            ("wt", "json".to_string()),
        ])
        .await
        .map(|_| ())
    }

    fn supports_schema(&self) -> bool {
        true
    }

    async fn fields(&mut self, collection: &str) -> DbResult<Vec<DocumentField>> {
        let client = self.client()?;
        let body = self
            .send(
                client
                    .get(self.core_url(collection, "schema/fields"))
                    .query(&[("wt", "json")]),
            )
            .await?;
        Ok(body
            .get("fields")
            .and_then(JsonValue::as_array)
            .map(|fields| fields.iter().filter_map(parse_field).collect())
            .unwrap_or_default())
    }

    async fn add_field(&mut self, collection: &str, field: &DocumentField) -> DbResult<()> {
        self.post_schema(collection, "add-field", field).await
    }

    async fn replace_field(&mut self, collection: &str, field: &DocumentField) -> DbResult<()> {
        self.post_schema(collection, "replace-field", field).await
    }
}

impl SolrStore {
    async fn post_schema(&self, core: &str, command: &str, field: &DocumentField) -> DbResult<()> {
        let client = self.client()?;
        let mut payload = serde_json::Map::new();
        payload.insert(command.to_string(), field_json(field));
        self.send(
            client
                .post(self.core_url(core, "schema"))
                .json(&JsonValue::Object(payload)),
        )
        .await
        .map(|_| ())
    }
}

fn field_json(field: &DocumentField) -> JsonValue {
    json!({
        "name": field.name,
        "type": field.field_type,
        "multiValued": field.multi_valued,
        "stored": field.stored,
        "indexed": field.indexed,
        "required": field.required,
    })
}

fn parse_field(value: &JsonValue) -> Option<DocumentField> {
    let flag = |key: &str, default: bool| value.get(key).and_then(JsonValue::as_bool).unwrap_or(default);
    let mut field = DocumentField::new(
        value.get("name")?.as_str()?,
        value.get("type")?.as_str()?,
    );
    field.multi_valued = flag("multiValued", false);
    field.stored = flag("stored", true);
    field.indexed = flag("indexed", true);
    field.required = flag("required", false);
    Some(field)
}

const SPECIAL: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
    '/', ' ',
];

/// Escape query-syntax characters of a bare term.
fn escape_term(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn term(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        FilterValue::Int(i) => i.to_string(),
        FilterValue::Float(f) => f.to_string(),
        FilterValue::Date(d) => d.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        FilterValue::Bool(b) => b.to_string(),
    }
}

fn like_term(value: &FilterValue) -> String {
    let text = match value {
        FilterValue::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    };
    format!("*{}*", escape_term(&text))
}

fn filter_query(filter: &FieldFilter) -> String {
    let field = escape_term(&filter.field);
    let terms: Vec<String> = filter.values.iter().map(term).collect();
    let first = terms.first().cloned().unwrap_or_default();
    let any = || format!("({})", terms.join(" OR "));

    match filter.op {
        FilterOp::Eq if filter.is_multi() => format!("{}:{}", field, any()),
        FilterOp::Eq => format!("{}:{}", field, first),
        FilterOp::In => format!("{}:{}", field, any()),
        FilterOp::Ne if filter.is_multi() => format!("-{}:{}", field, any()),
        FilterOp::Ne => format!("-{}:{}", field, first),
        FilterOp::Lt => format!("{}:{{* TO {}}}", field, first),
        FilterOp::Le => format!("{}:[* TO {}]", field, first),
        FilterOp::Gt => format!("{}:{{{} TO *}}", field, first),
        FilterOp::Ge => format!("{}:[{} TO *]", field, first),
        FilterOp::Between => format!(
            "{}:[{} TO {}]",
            field,
            first,
            terms.get(1).cloned().unwrap_or_default()
        ),
        FilterOp::Like => filter
            .values
            .iter()
            .map(|v| format!("{}:{}", field, like_term(v)))
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

/// Translate a filter set into one `fq` clause per field.
pub fn to_filter_queries(filter: &FilterSet) -> Vec<String> {
    filter.filters.iter().map(filter_query).collect()
}
