//! Document stores (MongoDB, Solr) behind one facade.
//!
//! Document stores share the filter vocabulary of [`filter`] and the error
//! policy of the relational access points: engine-side failures come back as
//! a failed [`QueryInfo`], connection failures stay `Err`.

pub mod filter;
pub mod mongodb;
pub mod solr;

pub use filter::{DocumentQuery, FieldFilter, FilterKind, FilterOp, FilterSet, FilterValue, SortOrder};
pub use mongodb::MongoStore;
pub use solr::SolrStore;

use crate::db::access_point::QueryOutcome;
use crate::db::reader::{DataReader, ResultSet};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, DataField, DriverKind, QueryInfo, Row, StatementType};
use crate::storage::FieldDef;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Field definition as a document store's schema API sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentField {
    pub name: String,
    pub field_type: String,
    pub multi_valued: bool,
    pub stored: bool,
    pub indexed: bool,
    pub required: bool,
}

impl DocumentField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            multi_valued: false,
            stored: true,
            indexed: true,
            required: false,
        }
    }

    /// Map a declared storage field onto a schema field type.
    pub fn from_field_def(name: impl Into<String>, def: &FieldDef) -> Self {
        let field_type = match def.type_name.as_str() {
            "text" | "tinytext" | "mediumtext" | "longtext" => "text_general",
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" => "plong",
            "float" | "double" | "real" | "decimal" | "numeric" => "pdouble",
            "date" | "datetime" | "timestamp" => "pdate",
            "bool" | "boolean" => "boolean",
            _ => "string",
        };
        let mut field = Self::new(name, field_type);
        field.required = def.required;
        field
    }

    /// Whether the live definition differs in anything we manage.
    pub fn differs_from(&self, live: &DocumentField) -> bool {
        self.field_type != live.field_type
            || self.multi_valued != live.multi_valued
            || self.stored != live.stored
            || self.indexed != live.indexed
            || self.required != live.required
    }
}

/// Schema change applied by [`DocumentAccessPoint::reconcile_fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Added(String),
    Replaced(String),
}

/// One document-store connection.
#[async_trait]
pub trait DocumentStore: Send {
    fn info(&self) -> &ConnectionInfo;

    fn is_open(&self) -> bool;

    async fn open(&mut self) -> DbResult<()>;

    async fn close(&mut self) -> DbResult<()>;

    async fn ping(&mut self) -> bool;

    /// Matching documents of the query window, plus the total match count
    /// when `count_total` is set.
    async fn select(
        &mut self,
        collection: &str,
        query: &DocumentQuery,
        count_total: bool,
    ) -> DbResult<(Vec<Row>, Option<u64>)>;

    async fn insert(&mut self, collection: &str, documents: Vec<Row>) -> DbResult<u64>;

    /// Set `data` on every matching document.
    async fn update(&mut self, collection: &str, filter: &FilterSet, data: &Row) -> DbResult<u64>;

    async fn delete(&mut self, collection: &str, filter: &FilterSet) -> DbResult<u64>;

    /// Highest numeric value of `id_field`, 0 for an empty collection.
    async fn max_id(&mut self, collection: &str, id_field: &str) -> DbResult<i64>;

    async fn collection_exists(&mut self, collection: &str) -> DbResult<bool>;

    async fn create_collection(&mut self, collection: &str) -> DbResult<()>;

    /// Whether the engine has a managed field schema.
    fn supports_schema(&self) -> bool {
        false
    }

    async fn fields(&mut self, _collection: &str) -> DbResult<Vec<DocumentField>> {
        Err(DbError::unsupported(self.info().driver.id(), "fields"))
    }

    async fn add_field(&mut self, _collection: &str, _field: &DocumentField) -> DbResult<()> {
        Err(DbError::unsupported(self.info().driver.id(), "add_field"))
    }

    async fn replace_field(&mut self, _collection: &str, _field: &DocumentField) -> DbResult<()> {
        Err(DbError::unsupported(self.info().driver.id(), "replace_field"))
    }
}

/// Printable description of a document operation, used as the query text.
fn describe(verb: &str, collection: &str, filter: &FilterSet) -> String {
    if filter.is_empty() {
        format!("{} {}", verb, collection)
    } else {
        format!("{} {} {}", verb, collection, filter.to_json())
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "int",
        JsonValue::Number(_) => "double",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Declared fields that are missing from, or differ in, the live schema.
fn diff_fields<'a>(
    live: &[DocumentField],
    declared: &'a [DocumentField],
) -> Vec<(FieldChange, &'a DocumentField)> {
    declared
        .iter()
        .filter_map(|field| match live.iter().find(|l| l.name == field.name) {
            None => Some((FieldChange::Added(field.name.clone()), field)),
            Some(existing) if field.differs_from(existing) => {
                Some((FieldChange::Replaced(field.name.clone()), field))
            }
            Some(_) => None,
        })
        .collect()
}

/// Named facade over one document store.
pub struct DocumentAccessPoint {
    name: String,
    driver: DriverKind,
    store: Mutex<Box<dyn DocumentStore>>,
    log_queries: bool,
    id_field: String,
}

impl DocumentAccessPoint {
    pub fn new(name: impl Into<String>, store: Box<dyn DocumentStore>) -> Self {
        Self {
            name: name.into(),
            driver: store.info().driver,
            store: Mutex::new(store),
            log_queries: false,
            id_field: "id".to_string(),
        }
    }

    pub fn with_log_queries(mut self, log_queries: bool) -> Self {
        self.log_queries = log_queries;
        self
    }

    /// Field that receives client-assigned ids on insert.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    async fn acquire(&self) -> DbResult<tokio::sync::MutexGuard<'_, Box<dyn DocumentStore>>> {
        let mut store = self.store.lock().await;
        if !store.is_open() {
            store.open().await?;
        }
        Ok(store)
    }

    pub async fn open(&self) -> DbResult<()> {
        self.acquire().await.map(|_| ())
    }

    fn log(&self, text: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if self.log_queries {
            info!(point = %self.name, query = %text, elapsed_ms, "Query");
        } else {
            debug!(point = %self.name, query = %text, elapsed_ms, "Query");
        }
    }

    /// Turn an engine error into a failed [`QueryInfo`]; other errors stay `Err`.
    fn embed(&self, kind: StatementType, text: &str, err: DbError) -> DbResult<QueryInfo> {
        if err.is_query_error() {
            warn!(point = %self.name, query = %text, error = %err, "Query failed");
            Ok(QueryInfo::failed(kind, text, err.message()))
        } else {
            Err(err)
        }
    }

    /// Read matching documents; `count_total` adds the match count to the reader.
    pub async fn select(
        &self,
        collection: &str,
        query: &DocumentQuery,
        count_total: bool,
    ) -> DbResult<QueryOutcome> {
        let text = describe("select", collection, &query.filter);
        let started = Instant::now();
        let result = {
            let mut store = self.acquire().await?;
            store.select(collection, query, count_total).await
        };

        match result {
            Ok((rows, total)) => {
                self.log(&text, started);
                let fields = rows
                    .first()
                    .map(|row| {
                        row.iter()
                            .map(|(k, v)| DataField::new(k.clone(), json_type(v)).with_table(collection))
                            .collect()
                    })
                    .unwrap_or_default();
                let reader = DataReader::new(ResultSet::new(fields, rows), text);
                Ok(QueryOutcome::Reader(match total {
                    Some(total) => reader.with_affected(total),
                    None => reader,
                }))
            }
            Err(e) => self
                .embed(StatementType::Select, &text, e)
                .map(QueryOutcome::Info),
        }
    }

    /// Insert documents, assigning `max_id + 1, + 2, ...` to those without an id.
    ///
    /// Ids are read and assigned client-side, so two concurrent writers can
    /// pick the same id.
    pub async fn insert(&self, collection: &str, mut documents: Vec<Row>) -> DbResult<QueryInfo> {
        let text = format!("insert {} ({} documents)", collection, documents.len());
        let started = Instant::now();
        let mut store = self.acquire().await?;

        let mut first_id = None;
        if documents.iter().any(|d| d.get(&self.id_field).is_none_or(JsonValue::is_null)) {
            let mut next = match store.max_id(collection, &self.id_field).await {
                Ok(max) => max + 1,
                Err(e) => return self.embed(StatementType::Insert, &text, e),
            };
            for doc in documents.iter_mut() {
                if doc.get(&self.id_field).is_none_or(JsonValue::is_null) {
                    first_id.get_or_insert(next);
                    doc.insert(self.id_field.clone(), JsonValue::from(next));
                    next += 1;
                }
            }
        }

        match store.insert(collection, documents).await {
            Ok(affected) => {
                self.log(&text, started);
                Ok(QueryInfo::success(StatementType::Insert, text, affected, first_id))
            }
            Err(e) => self.embed(StatementType::Insert, &text, e),
        }
    }

    pub async fn update(&self, collection: &str, filter: &FilterSet, data: &Row) -> DbResult<QueryInfo> {
        let text = describe("update", collection, filter);
        let started = Instant::now();
        let result = self.acquire().await?.update(collection, filter, data).await;
        match result {
            Ok(affected) => {
                self.log(&text, started);
                Ok(QueryInfo::success(StatementType::Update, text, affected, None))
            }
            Err(e) => self.embed(StatementType::Update, &text, e),
        }
    }

    /// Delete matching documents; an empty filter clears the collection.
    pub async fn delete(&self, collection: &str, filter: &FilterSet) -> DbResult<QueryInfo> {
        let text = describe("delete", collection, filter);
        let started = Instant::now();
        let result = self.acquire().await?.delete(collection, filter).await;
        let kind = if filter.is_empty() {
            StatementType::Truncate
        } else {
            StatementType::Delete
        };
        match result {
            Ok(affected) => {
                self.log(&text, started);
                Ok(QueryInfo::success(kind, text, affected, None))
            }
            Err(e) => self.embed(kind, &text, e),
        }
    }

    pub async fn max_id(&self, collection: &str) -> DbResult<i64> {
        self.acquire().await?.max_id(collection, &self.id_field).await
    }

    /// Create the collection when missing; `true` when it was created.
    pub async fn ensure_collection(&self, collection: &str) -> DbResult<bool> {
        let mut store = self.acquire().await?;
        if store.collection_exists(collection).await? {
            return Ok(false);
        }
        store.create_collection(collection).await?;
        info!(point = %self.name, collection, "Collection created");
        Ok(true)
    }

    pub async fn collection_exists(&self, collection: &str) -> DbResult<bool> {
        self.acquire().await?.collection_exists(collection).await
    }

    /// Field changes [`reconcile_fields`](Self::reconcile_fields) would apply.
    pub async fn pending_fields(
        &self,
        collection: &str,
        declared: &[DocumentField],
    ) -> DbResult<Vec<FieldChange>> {
        let mut store = self.acquire().await?;
        if !store.supports_schema() {
            return Ok(Vec::new());
        }
        let live = store.fields(collection).await?;
        Ok(diff_fields(&live, declared)
            .into_iter()
            .map(|(change, _)| change)
            .collect())
    }

    /// Bring the live field schema in line with `declared`.
    ///
    /// Stores without a managed schema report no changes.
    pub async fn reconcile_fields(
        &self,
        collection: &str,
        declared: &[DocumentField],
    ) -> DbResult<Vec<FieldChange>> {
        let mut store = self.acquire().await?;
        if !store.supports_schema() {
            debug!(point = %self.name, collection, "Schemaless store, nothing to reconcile");
            return Ok(Vec::new());
        }

        let live = store.fields(collection).await?;
        let mut changes = Vec::new();
        for (change, field) in diff_fields(&live, declared) {
            match &change {
                FieldChange::Added(_) => store.add_field(collection, field).await?,
                FieldChange::Replaced(_) => store.replace_field(collection, field).await?,
            }
            changes.push(change);
        }
        if !changes.is_empty() {
            info!(point = %self.name, collection, changes = changes.len(), "Fields reconciled");
        }
        Ok(changes)
    }

    /// Add the fields the collection does not define yet; existing ones are
    /// left as they are. Returns the names that were added.
    pub async fn create_custom_fields(
        &self,
        collection: &str,
        fields: &[DocumentField],
    ) -> DbResult<Vec<String>> {
        let mut store = self.acquire().await?;
        if !store.supports_schema() {
            return Err(DbError::unsupported(self.driver.id(), "custom fields"));
        }
        let live = store.fields(collection).await?;
        let mut added = Vec::new();
        for field in fields {
            if live.iter().any(|f| f.name == field.name) {
                continue;
            }
            store.add_field(collection, field).await?;
            added.push(field.name.clone());
        }
        debug!(point = %self.name, collection, added = added.len(), "Custom fields created");
        Ok(added)
    }

    /// Whether the engine answers; never opens the store.
    pub async fn ping(&self) -> bool {
        self.store.lock().await.ping().await
    }

    pub async fn close(&self) -> DbResult<()> {
        self.store.lock().await.close().await
    }
}

impl std::fmt::Debug for DocumentAccessPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAccessPoint")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("id_field", &self.id_field)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// In-process store over `BTreeMap`s, matching on string equality only.
    #[derive(Default)]
    struct MemoryStore {
        info: Option<ConnectionInfo>,
        open: bool,
        collections: BTreeMap<String, Vec<Row>>,
        schema: BTreeMap<String, Vec<DocumentField>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                info: Some(ConnectionInfo::new(DriverKind::Solr, "mem", "")),
                ..Self::default()
            }
        }

        fn matches(doc: &Row, filter: &FilterSet) -> bool {
            filter.filters.iter().all(|f| {
                f.values
                    .iter()
                    .any(|v| doc.get(&f.field) == Some(&v.to_json()))
            })
        }

        fn docs(&mut self, collection: &str) -> DbResult<&mut Vec<Row>> {
            if collection == "broken" {
                return Err(DbError::query("collection is broken", Some("500".into())));
            }
            Ok(self.collections.entry(collection.to_string()).or_default())
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        fn info(&self) -> &ConnectionInfo {
            self.info.as_ref().unwrap()
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn open(&mut self) -> DbResult<()> {
            self.open = true;
            Ok(())
        }

        async fn close(&mut self) -> DbResult<()> {
            self.open = false;
            Ok(())
        }

        async fn ping(&mut self) -> bool {
            self.open
        }

        async fn select(
            &mut self,
            collection: &str,
            query: &DocumentQuery,
            count_total: bool,
        ) -> DbResult<(Vec<Row>, Option<u64>)> {
            let all: Vec<Row> = self
                .docs(collection)?
                .iter()
                .filter(|d| Self::matches(d, &query.filter))
                .cloned()
                .collect();
            let total = all.len() as u64;
            let rows = match query.window() {
                Some((skip, limit)) => all.into_iter().skip(skip as usize).take(limit as usize).collect(),
                None => all,
            };
            Ok((rows, count_total.then_some(total)))
        }

        async fn insert(&mut self, collection: &str, documents: Vec<Row>) -> DbResult<u64> {
            let n = documents.len() as u64;
            self.docs(collection)?.extend(documents);
            Ok(n)
        }

        async fn update(&mut self, collection: &str, filter: &FilterSet, data: &Row) -> DbResult<u64> {
            let mut n = 0;
            for doc in self.docs(collection)?.iter_mut().filter(|d| Self::matches(d, filter)) {
                doc.extend(data.clone());
                n += 1;
            }
            Ok(n)
        }

        async fn delete(&mut self, collection: &str, filter: &FilterSet) -> DbResult<u64> {
            let docs = self.docs(collection)?;
            let before = docs.len();
            docs.retain(|d| !Self::matches(d, filter));
            Ok((before - docs.len()) as u64)
        }

        async fn max_id(&mut self, collection: &str, id_field: &str) -> DbResult<i64> {
            Ok(self
                .docs(collection)?
                .iter()
                .filter_map(|d| d.get(id_field).and_then(JsonValue::as_i64))
                .max()
                .unwrap_or(0))
        }

        async fn collection_exists(&mut self, collection: &str) -> DbResult<bool> {
            Ok(self.collections.contains_key(collection))
        }

        async fn create_collection(&mut self, collection: &str) -> DbResult<()> {
            self.collections.insert(collection.to_string(), Vec::new());
            Ok(())
        }

        fn supports_schema(&self) -> bool {
            true
        }

        async fn fields(&mut self, collection: &str) -> DbResult<Vec<DocumentField>> {
            Ok(self.schema.get(collection).cloned().unwrap_or_default())
        }

        async fn add_field(&mut self, collection: &str, field: &DocumentField) -> DbResult<()> {
            self.schema.entry(collection.to_string()).or_default().push(field.clone());
            Ok(())
        }

        async fn replace_field(&mut self, collection: &str, field: &DocumentField) -> DbResult<()> {
            if let Some(fields) = self.schema.get_mut(collection) {
                for f in fields.iter_mut().filter(|f| f.name == field.name) {
                    *f = field.clone();
                }
            }
            Ok(())
        }
    }

    fn doc(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn point() -> DocumentAccessPoint {
        DocumentAccessPoint::new("docs", Box::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_after_max() {
        let ap = point();
        let info = ap
            .insert("users", vec![doc(json!({"id": 7, "name": "a"})), doc(json!({"name": "b"})), doc(json!({"name": "c"}))])
            .await
            .unwrap();
        assert!(info.is_ok());
        assert_eq!(info.affected, 3);
        assert_eq!(info.insert_id, Some(1));

        let info = ap.insert("users", vec![doc(json!({"name": "d"}))]).await.unwrap();
        assert_eq!(info.insert_id, Some(8));
        assert_eq!(ap.max_id("users").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_select_paginates_and_counts() {
        let ap = point();
        let docs = (0..5).map(|i| doc(json!({"n": i, "kind": "x"}))).collect();
        ap.insert("items", docs).await.unwrap();

        let query = DocumentQuery::new(FilterSet::from_json(&json!({"kind": ["string", "=", "x"]})).unwrap())
            .with_page(2, 2);
        let mut reader = ap.select("items", &query, true).await.unwrap().into_reader().unwrap();
        assert_eq!(reader.affected(), Some(5));
        assert_eq!(reader.count(), 2);
        assert_eq!(reader.read().unwrap()["n"], json!(2));
        assert!(reader.field("kind").is_some());

        let reader = ap.select("items", &query, false).await.unwrap().into_reader().unwrap();
        assert_eq!(reader.affected(), None);
    }

    #[tokio::test]
    async fn test_errors_are_embedded() {
        let ap = point();
        let outcome = ap.select("broken", &DocumentQuery::default(), false).await.unwrap();
        assert_eq!(outcome.error(), Some("collection is broken"));

        let info = ap.delete("broken", &FilterSet::new()).await.unwrap();
        assert_eq!(info.statement_type, StatementType::Truncate);
        assert_eq!(info.affected, 0);
        assert!(!info.is_ok());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let ap = point();
        ap.insert("t", vec![doc(json!({"k": "a"})), doc(json!({"k": "b"}))]).await.unwrap();
        let filter = FilterSet::from_json(&json!({"k": ["string", "=", "a"]})).unwrap();

        let info = ap.update("t", &filter, &doc(json!({"v": 1}))).await.unwrap();
        assert_eq!(info.affected, 1);
        assert_eq!(info.query, r#"update t {"k":["string","=","a"]}"#);

        let info = ap.delete("t", &filter).await.unwrap();
        assert_eq!(info.statement_type, StatementType::Delete);
        assert_eq!(info.affected, 1);
        assert_eq!(ap.delete("t", &FilterSet::new()).await.unwrap().affected, 1);
    }

    #[tokio::test]
    async fn test_collections_and_fields() {
        let ap = point();
        assert!(ap.ensure_collection("c").await.unwrap());
        assert!(!ap.ensure_collection("c").await.unwrap());

        let declared = vec![
            DocumentField::from_field_def("c_title", &FieldDef::new("varchar")),
            DocumentField::from_field_def("c_n", &FieldDef::new("int").required()),
        ];
        assert_eq!(ap.pending_fields("c", &declared).await.unwrap().len(), 2);
        let changes = ap.reconcile_fields("c", &declared).await.unwrap();
        assert_eq!(
            changes,
            vec![FieldChange::Added("c_title".into()), FieldChange::Added("c_n".into())]
        );
        assert!(ap.reconcile_fields("c", &declared).await.unwrap().is_empty());

        let retyped = vec![DocumentField::from_field_def("c_title", &FieldDef::new("text"))];
        assert_eq!(
            ap.reconcile_fields("c", &retyped).await.unwrap(),
            vec![FieldChange::Replaced("c_title".into())]
        );
    }

    #[tokio::test]
    async fn test_create_custom_fields_only_adds() {
        let ap = point();
        let first = vec![DocumentField::from_field_def("c_a", &FieldDef::new("int"))];
        assert_eq!(ap.create_custom_fields("c", &first).await.unwrap(), vec!["c_a"]);

        let next = vec![
            DocumentField::from_field_def("c_a", &FieldDef::new("text")),
            DocumentField::from_field_def("c_b", &FieldDef::new("bool")),
        ];
        assert_eq!(ap.create_custom_fields("c", &next).await.unwrap(), vec!["c_b"]);
        // c_a keeps its original type
        assert_eq!(
            ap.pending_fields("c", &next).await.unwrap(),
            vec![FieldChange::Replaced("c_a".into())]
        );
    }

    #[test]
    fn test_field_type_mapping() {
        assert_eq!(DocumentField::from_field_def("a", &FieldDef::new("bigint")).field_type, "plong");
        assert_eq!(DocumentField::from_field_def("a", &FieldDef::new("decimal")).field_type, "pdouble");
        assert_eq!(DocumentField::from_field_def("a", &FieldDef::new("datetime")).field_type, "pdate");
        assert_eq!(DocumentField::from_field_def("a", &FieldDef::new("varchar")).field_type, "string");
        assert!(DocumentField::from_field_def("a", &FieldDef::new("int").required()).required);
    }
}
