//! In-memory [`Backend`] backed by [`DashMap`].
//!
//! Databases and collections spring into existence on first write, like a
//! document server would. An optional allow-list restricts which database
//! names resolve at all.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use docbridge_core::{Document, Invocation, ObjectId, Scope, Value};
use parking_lot::RwLock;
use tracing::debug;

use super::query;
use super::{BackendError, Outcome, VecCursor, WriteAck};
use crate::traits::Backend;

type Collection = Arc<RwLock<Vec<Document>>>;

#[derive(Default)]
struct Database {
    collections: DashMap<String, Collection>,
}

/// Concurrent in-memory document store.
#[derive(Default)]
pub struct MemoryBackend {
    databases: DashMap<String, Arc<Database>>,
    allowed: Option<HashSet<String>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the given database names resolve; others fail with
    /// `BackendError::UnknownDatabase`.
    #[must_use]
    pub fn with_databases<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Builds a backend from a `memory://` URI. `memory://?databases=a,b`
    /// restricts the resolvable database names.
    ///
    /// # Errors
    ///
    /// Returns an error for any other scheme.
    pub fn from_uri(uri: &str) -> anyhow::Result<Self> {
        let rest = uri
            .strip_prefix("memory://")
            .ok_or_else(|| anyhow::anyhow!("unsupported backend URI {uri:?}: expected memory://"))?;
        let query = rest.split_once('?').map_or("", |(_, q)| q);
        let databases = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("databases="))
            .map(|list| {
                list.split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            });

        Ok(match databases {
            Some(names) if !names.is_empty() => Self::with_databases(names),
            _ => Self::new(),
        })
    }

    fn database(&self, name: &str) -> Result<Arc<Database>, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(name) {
                return Err(BackendError::UnknownDatabase {
                    name: name.to_string(),
                });
            }
        }
        Ok(Arc::clone(
            self.databases.entry(name.to_string()).or_default().value(),
        ))
    }

    /// Existing collection, or a fresh one that is registered only when `create` is set.
    fn collection(db: &Database, name: &str, create: bool) -> Collection {
        if create {
            return Arc::clone(db.collections.entry(name.to_string()).or_default().value());
        }
        db.collections
            .get(name)
            .map_or_else(Collection::default, |c| Arc::clone(c.value()))
    }
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

fn doc_param(params: &Document, name: &str) -> Result<Option<Document>, BackendError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Document(d)) => Ok(Some(d.clone())),
        Some(other) => Err(BackendError::invalid(
            name,
            format!("expected object, got {}", other.type_name()),
        )),
    }
}

fn required_doc(params: &Document, name: &str) -> Result<Document, BackendError> {
    doc_param(params, name)?.ok_or_else(|| BackendError::invalid(name, "is required"))
}

fn usize_param(params: &Document, name: &str) -> Result<Option<usize>, BackendError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| BackendError::invalid(name, "expected a non-negative integer")),
    }
}

fn bool_param(params: &Document, name: &str) -> Result<bool, BackendError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(BackendError::invalid(name, "expected a boolean")),
    }
}

fn string_param(params: &Document, name: &str) -> Result<String, BackendError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::invalid(name, "expected a string"))
}

fn docs_param(params: &Document, name: &str) -> Result<Vec<Document>, BackendError> {
    params
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::invalid(name, "expected an array of documents"))?
        .iter()
        .map(|v| {
            v.as_document()
                .cloned()
                .ok_or_else(|| BackendError::invalid(name, "expected an array of documents"))
        })
        .collect()
}

/// `return_document` accepts pymongo's `ReturnDocument` booleans or the
/// strings `"before"` / `"after"`.
fn return_after(params: &Document) -> Result<bool, BackendError> {
    match params.get("return_document") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("after") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("before") => Ok(false),
        Some(_) => Err(BackendError::invalid("return_document", "expected before/after")),
    }
}

fn is_mutating(operation: &str) -> bool {
    matches!(
        operation,
        "delete_one"
            | "delete_many"
            | "find_one_and_delete"
            | "find_one_and_update"
            | "find_one_and_replace"
            | "drop"
    )
}

fn ok_reply() -> Document {
    let mut doc = Document::new();
    doc.insert("ok".to_string(), Value::Float(1.0));
    doc
}

/// Returns the document's `_id`, generating one at the front when absent.
fn ensure_id(doc: &mut Document) -> Value {
    if let Some(id) = doc.get("_id") {
        return id.clone();
    }
    let id = Value::ObjectId(ObjectId::new());
    doc.shift_insert(0, "_id".to_string(), id.clone());
    id
}

fn contains_id(docs: &[Document], id: &Value) -> bool {
    docs.iter().any(|d| d.get("_id") == Some(id))
}

fn duplicate(id: &Value) -> BackendError {
    BackendError::DuplicateKey {
        key: format!("_id: {id:?}"),
    }
}

/// Documents matching `filter`, sorted and windowed by `sort` / `skip` / `limit`.
fn select(docs: &[Document], params: &Document) -> Result<Vec<Document>, BackendError> {
    let filter = doc_param(params, "filter")?.unwrap_or_default();
    let mut selected = Vec::new();
    for doc in docs {
        if query::matches(doc, &filter)? {
            selected.push(doc.clone());
        }
    }
    if let Some(spec) = doc_param(params, "sort")? {
        query::sort(&mut selected, &spec);
    }
    let skip = usize_param(params, "skip")?.unwrap_or(0);
    let limit = usize_param(params, "limit")?.filter(|l| *l > 0).unwrap_or(usize::MAX);
    Ok(selected.into_iter().skip(skip).take(limit).collect())
}

/// Index of the first document matching `filter` after sorting.
fn first_match(docs: &[Document], params: &Document) -> Result<Option<usize>, BackendError> {
    let filter = required_doc(params, "filter")?;
    let mut candidates = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        if query::matches(doc, &filter)? {
            candidates.push(i);
        }
    }
    if let Some(spec) = doc_param(params, "sort")? {
        let mut keyed: Vec<Document> = candidates.iter().map(|i| docs[*i].clone()).collect();
        query::sort(&mut keyed, &spec);
        return Ok(keyed
            .first()
            .and_then(|first| docs.iter().position(|d| d == first)));
    }
    Ok(candidates.first().copied())
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

fn run_aggregate(docs: &[Document], params: &Document) -> Result<Vec<Document>, BackendError> {
    let stages = params
        .get("pipeline")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::invalid("pipeline", "expected an array of stages"))?;

    let mut current: Vec<Document> = docs.to_vec();
    for stage in stages {
        let (name, spec) = stage
            .as_document()
            .filter(|d| d.len() == 1)
            .and_then(|d| d.iter().next())
            .ok_or_else(|| {
                BackendError::invalid("pipeline", "each stage must have exactly one key")
            })?;
        current = match (name.as_str(), spec) {
            ("$match", Value::Document(filter)) => {
                let mut kept = Vec::new();
                for doc in current {
                    if query::matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            ("$sort", Value::Document(order)) => {
                query::sort(&mut current, order);
                current
            }
            ("$skip", n) => {
                let n = n.as_i64().and_then(|n| usize::try_from(n).ok()).unwrap_or(0);
                current.into_iter().skip(n).collect()
            }
            ("$limit", n) => {
                let n = n
                    .as_i64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| BackendError::invalid("$limit", "expected a positive integer"))?;
                current.into_iter().take(n).collect()
            }
            ("$project", Value::Document(projection)) => current
                .iter()
                .map(|doc| query::project(doc, projection))
                .collect::<Result<_, _>>()?,
            ("$count", Value::String(field)) => {
                let mut out = Document::new();
                out.insert(field.clone(), Value::from(current.len() as u64));
                vec![out]
            }
            (other, _) => return Err(BackendError::invalid(other, "unsupported aggregation stage")),
        };
    }
    Ok(current)
}

fn update_docs(
    docs: &mut Vec<Document>,
    params: &Document,
    many: bool,
    replace: bool,
) -> Result<WriteAck, BackendError> {
    let filter = required_doc(params, "filter")?;
    let change_key = if replace { "replacement" } else { "update" };
    let change = required_doc(params, change_key)?;
    if replace == query::is_operator_update(&change) {
        let reason = if replace {
            "replacement must not contain update operators"
        } else {
            "update must only contain update operators"
        };
        return Err(BackendError::invalid(change_key, reason));
    }
    let upsert = bool_param(params, "upsert")?;

    let mut matched = 0_u64;
    let mut modified = 0_u64;
    for doc in docs.iter_mut() {
        if !query::matches(doc, &filter)? {
            continue;
        }
        matched += 1;
        let changed = if replace {
            let mut next = change.clone();
            if let Some(id) = doc.get("_id") {
                next.shift_insert(0, "_id".to_string(), id.clone());
            }
            let changed = *doc != next;
            *doc = next;
            changed
        } else {
            query::apply_update(doc, &change)?
        };
        if changed {
            modified += 1;
        }
        if !many {
            break;
        }
    }

    let mut upserted_id = None;
    if matched == 0 && upsert {
        let mut fresh = query::upsert_seed(&filter)?;
        if replace {
            fresh.extend(change);
        } else {
            query::apply_update(&mut fresh, &change)?;
        }
        let id = ensure_id(&mut fresh);
        docs.push(fresh);
        upserted_id = Some(id);
    }

    let mut raw_result = ok_reply();
    let n = matched + u64::from(upserted_id.is_some());
    raw_result.insert("n".to_string(), Value::from(n));
    raw_result.insert("nModified".to_string(), Value::from(modified));
    raw_result.insert("updatedExisting".to_string(), Value::Bool(matched > 0));
    if let Some(id) = &upserted_id {
        raw_result.insert("upserted".to_string(), id.clone());
    }

    Ok(WriteAck::Update {
        acknowledged: true,
        matched_count: matched,
        modified_count: modified,
        upserted_id,
        raw_result,
    })
}

fn delete_docs(
    docs: &mut Vec<Document>,
    params: &Document,
    many: bool,
) -> Result<WriteAck, BackendError> {
    let filter = required_doc(params, "filter")?;
    // Match everything before removing anything, so a bad filter leaves the collection intact.
    let mut doomed = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        if query::matches(doc, &filter)? {
            doomed.push(i);
            if !many {
                break;
            }
        }
    }
    for i in doomed.iter().rev() {
        docs.remove(*i);
    }
    let deleted = doomed.len() as u64;

    let mut raw_result = ok_reply();
    raw_result.insert("n".to_string(), Value::from(deleted));
    Ok(WriteAck::Delete {
        acknowledged: true,
        deleted_count: deleted,
        raw_result,
    })
}

fn distinct(docs: &[Document], params: &Document) -> Result<Value, BackendError> {
    let key = string_param(params, "key")?;
    let filter = doc_param(params, "filter")?.unwrap_or_default();
    let mut seen: Vec<Value> = Vec::new();
    for doc in docs {
        if !query::matches(doc, &filter)? {
            continue;
        }
        let values = match query::get_path(doc, &key) {
            Some(Value::Array(items)) => items.clone(),
            Some(v) => vec![v.clone()],
            None => continue,
        };
        for v in values {
            if !seen.contains(&v) {
                seen.push(v);
            }
        }
    }
    Ok(Value::Array(seen))
}

impl MemoryBackend {
    fn execute_on_collection(
        db: &Database,
        database: &str,
        name: Option<&str>,
        operation: &str,
        params: &Document,
    ) -> Result<Outcome, BackendError> {
        let batch_size =
            usize_param(params, "batch_size")?.unwrap_or(VecCursor::DEFAULT_BATCH_SIZE);
        let writes = matches!(
            operation,
            "insert_one" | "insert_many" | "update_one" | "update_many" | "replace_one"
        );
        // Without a collection, reads see an empty detached collection and
        // anything that mutates has nowhere to go.
        let coll = match name {
            Some(name) => Self::collection(db, name, writes),
            None if writes || is_mutating(operation) => {
                return Err(BackendError::MissingCollection {
                    operation: operation.to_string(),
                })
            }
            None => Collection::default(),
        };
        let name = name.unwrap_or_default();

        let outcome = match operation {
            "find" => {
                let projection = doc_param(params, "projection")?;
                let mut rows = Vec::new();
                for doc in select(&coll.read(), params)? {
                    let doc = match &projection {
                        Some(p) => query::project(&doc, p)?,
                        None => doc,
                    };
                    rows.push(Value::Document(doc));
                }
                Outcome::Cursor(Box::new(VecCursor::new(rows, batch_size)))
            }
            "find_one" => {
                let mut one = params.clone();
                one.insert("limit".to_string(), Value::Int(1));
                let projection = doc_param(params, "projection")?;
                let row = match (select(&coll.read(), &one)?.into_iter().next(), &projection) {
                    (Some(doc), Some(p)) => Value::Document(query::project(&doc, p)?),
                    (Some(doc), None) => Value::Document(doc),
                    (None, _) => Value::Null,
                };
                Outcome::Value(row)
            }
            "aggregate" => {
                let rows = run_aggregate(&coll.read(), params)?;
                Outcome::Cursor(Box::new(VecCursor::new(
                    rows.into_iter().map(Value::Document).collect(),
                    batch_size,
                )))
            }
            "list_indexes" => {
                let exists = !name.is_empty() && db.collections.contains_key(name);
                let mut rows = Vec::new();
                if exists {
                    let mut key = Document::new();
                    key.insert("_id".to_string(), Value::Int(1));
                    let mut index = Document::new();
                    index.insert("v".to_string(), Value::Int(2));
                    index.insert("key".to_string(), Value::Document(key));
                    index.insert("name".to_string(), Value::from("_id_"));
                    rows.push(Value::Document(index));
                }
                Outcome::Cursor(Box::new(VecCursor::new(rows, batch_size)))
            }
            "insert_one" => {
                let mut doc = required_doc(params, "document")?;
                let id = ensure_id(&mut doc);
                let mut docs = coll.write();
                if contains_id(&docs, &id) {
                    return Err(duplicate(&id));
                }
                docs.push(doc);
                Outcome::Write(WriteAck::InsertOne {
                    acknowledged: true,
                    inserted_id: id,
                })
            }
            "insert_many" => {
                let mut incoming = docs_param(params, "documents")?;
                let ids: Vec<Value> = incoming.iter_mut().map(ensure_id).collect();
                let mut docs = coll.write();
                for (i, id) in ids.iter().enumerate() {
                    if contains_id(&docs, id) || ids[..i].contains(id) {
                        return Err(duplicate(id));
                    }
                }
                docs.extend(incoming);
                Outcome::Write(WriteAck::InsertMany {
                    acknowledged: true,
                    inserted_ids: ids,
                })
            }
            "update_one" => Outcome::Write(update_docs(&mut coll.write(), params, false, false)?),
            "update_many" => Outcome::Write(update_docs(&mut coll.write(), params, true, false)?),
            "replace_one" => Outcome::Write(update_docs(&mut coll.write(), params, false, true)?),
            "delete_one" => Outcome::Write(delete_docs(&mut coll.write(), params, false)?),
            "delete_many" => Outcome::Write(delete_docs(&mut coll.write(), params, true)?),
            "count_documents" => {
                let count = select(&coll.read(), params)?.len();
                Outcome::Value(Value::from(count as u64))
            }
            "estimated_document_count" => Outcome::Value(Value::from(coll.read().len() as u64)),
            "distinct" => Outcome::Value(distinct(&coll.read(), params)?),
            "find_one_and_delete" => {
                let mut docs = coll.write();
                let removed = first_match(&docs, params)?.map(|i| docs.remove(i));
                Outcome::Value(removed.map_or(Value::Null, Value::Document))
            }
            "find_one_and_update" | "find_one_and_replace" => {
                let replace = operation == "find_one_and_replace";
                let after = return_after(params)?;
                let mut docs = coll.write();
                let before = first_match(&docs, params)?.map(|i| (i, docs[i].clone()));
                // Pin the update to the document the sort selected.
                let mut targeted = params.clone();
                if let Some(id) = before.as_ref().and_then(|(_, old)| old.get("_id")) {
                    let mut by_id = Document::new();
                    by_id.insert("_id".to_string(), id.clone());
                    targeted.insert("filter".to_string(), Value::Document(by_id));
                }
                update_docs(&mut docs, &targeted, false, replace)?;
                let result = match before {
                    Some((i, old)) => Value::Document(if after { docs[i].clone() } else { old }),
                    None if after && bool_param(params, "upsert")? => {
                        docs.last().cloned().map_or(Value::Null, Value::Document)
                    }
                    None => Value::Null,
                };
                Outcome::Value(result)
            }
            "drop" => {
                db.collections.remove(name);
                debug!(database, collection = name, "dropped collection");
                Outcome::Value(Value::Null)
            }
            other => {
                return Err(BackendError::UnknownOperation {
                    name: other.to_string(),
                })
            }
        };
        Ok(outcome)
    }

    fn execute_on_database(
        db: &Database,
        database: &str,
        operation: &str,
        params: &Document,
    ) -> Result<Outcome, BackendError> {
        let outcome = match operation {
            "list_collection_names" => {
                let names = collection_names(db);
                Outcome::Value(Value::Array(names.into_iter().map(Value::String).collect()))
            }
            "list_collections" => {
                let rows = collection_names(db)
                    .into_iter()
                    .map(|name| {
                        let mut info = Document::new();
                        info.insert("name".to_string(), Value::String(name));
                        info.insert("type".to_string(), Value::from("collection"));
                        info.insert("options".to_string(), Value::Document(Document::new()));
                        Value::Document(info)
                    })
                    .collect();
                Outcome::Cursor(Box::new(VecCursor::new(rows, VecCursor::DEFAULT_BATCH_SIZE)))
            }
            "create_collection" => {
                let name = string_param(params, "name")?;
                if db.collections.contains_key(&name) {
                    return Err(BackendError::CollectionExists { name });
                }
                db.collections.insert(name.clone(), Collection::default());
                let mut reply = Document::new();
                reply.insert("name".to_string(), Value::String(name));
                Outcome::Value(Value::Document(reply))
            }
            "drop_collection" => {
                let name = string_param(params, "name_or_collection")?;
                let mut reply = ok_reply();
                reply.insert("ns".to_string(), Value::String(format!("{database}.{name}")));
                if db.collections.remove(&name).is_none() {
                    reply.insert("ok".to_string(), Value::Float(0.0));
                    reply.insert("errmsg".to_string(), Value::from("ns not found"));
                }
                Outcome::Value(Value::Document(reply))
            }
            "command" => Outcome::Value(Value::Document(run_command(db, database, params)?)),
            other => {
                return Err(BackendError::UnknownOperation {
                    name: other.to_string(),
                })
            }
        };
        Ok(outcome)
    }
}

fn collection_names(db: &Database) -> BTreeSet<String> {
    db.collections.iter().map(|e| e.key().clone()).collect()
}

/// Database commands: `ping` and `dbStats`.
fn run_command(db: &Database, database: &str, params: &Document) -> Result<Document, BackendError> {
    let command = match params.get("command") {
        Some(Value::String(name)) => name.clone(),
        Some(Value::Document(doc)) => doc
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| BackendError::invalid("command", "empty command document"))?,
        _ => return Err(BackendError::invalid("command", "expected a name or a document")),
    };

    let mut reply = ok_reply();
    match command.as_str() {
        "ping" => {}
        "dbStats" => {
            let objects: usize = db.collections.iter().map(|c| c.value().read().len()).sum();
            reply.insert("db".to_string(), Value::from(database));
            reply.insert("collections".to_string(), Value::from(db.collections.len() as u64));
            reply.insert("objects".to_string(), Value::from(objects as u64));
        }
        other => {
            return Err(BackendError::invalid(
                "command",
                format!("unsupported command {other}"),
            ))
        }
    }
    Ok(reply)
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        params: Document,
    ) -> Result<Outcome, BackendError> {
        let db = self.database(&invocation.database)?;
        let database = invocation.database.as_str();
        let operation = invocation.operation.name();
        match invocation.collection.as_deref() {
            Some(collection) => {
                Self::execute_on_collection(&db, database, Some(collection), operation, &params)
            }
            None if invocation.operation.scope() == Some(Scope::Collection) => {
                Self::execute_on_collection(&db, database, None, operation, &params)
            }
            None => Self::execute_on_database(&db, database, operation, &params),
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use docbridge_core::{BaseTopic, CommandDescriptor, ExtendedJsonCodec, ParameterCodec};

    use super::*;
    use crate::traits::Cursor;

    fn invocation(topic: &str) -> Invocation {
        let base = BaseTopic::parse("mongodb/#").unwrap();
        Invocation::from(CommandDescriptor::parse(topic, &base).unwrap())
    }

    fn params(json: &str) -> Document {
        ExtendedJsonCodec.decode(json.as_bytes()).unwrap()
    }

    async fn run(
        backend: &MemoryBackend,
        topic: &str,
        json: &str,
    ) -> Result<Outcome, BackendError> {
        backend.execute(&invocation(topic), params(json)).await
    }

    async fn drain(outcome: Outcome) -> Vec<Value> {
        let Outcome::Cursor(mut cursor) = outcome else {
            panic!("expected a cursor, got {outcome:?}");
        };
        let mut out = Vec::new();
        while let Some(batch) = cursor.next_batch().await.unwrap() {
            out.extend(batch);
        }
        out
    }

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        run(
            &backend,
            "mongodb/site/robots/insert_many",
            concat!(
                r#"{"documents":[{"_id":1,"name":"r1","battery":90},"#,
                r#"{"_id":2,"name":"r2","battery":40},{"_id":3,"name":"r3","battery":10}]}"#
            ),
        )
        .await
        .unwrap();
        backend
    }

    #[tokio::test]
    async fn insert_one_generates_an_id() {
        let backend = MemoryBackend::new();
        let outcome = run(&backend, "mongodb/db/coll/insert_one", r#"{"document":{"a":1}}"#)
            .await
            .unwrap();
        let Outcome::Write(WriteAck::InsertOne { inserted_id, acknowledged }) = outcome else {
            panic!("unexpected outcome");
        };
        assert!(acknowledged);
        assert!(matches!(inserted_id, Value::ObjectId(_)));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let backend = seeded().await;
        let err = run(&backend, "mongodb/site/robots/insert_one", r#"{"document":{"_id":1}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn find_filters_sorts_and_limits() {
        let backend = seeded().await;
        let rows = drain(
            run(
                &backend,
                "mongodb/site/robots/find",
                concat!(
                    r#"{"filter":{"battery":{"$gte":40}},"sort":{"battery":1},"limit":1,"#,
                    r#""projection":{"name":1,"_id":0}}"#
                ),
            )
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(rows, vec![Value::Document(params(r#"{"name":"r2"}"#))]);
    }

    #[tokio::test]
    async fn find_on_missing_collection_is_empty() {
        let backend = MemoryBackend::new();
        let rows = drain(run(&backend, "mongodb/db/none/find", "{}").await.unwrap()).await;
        assert!(rows.is_empty());
        let names = run(&backend, "mongodb/db/list_collection_names", "{}").await.unwrap();
        assert!(matches!(names, Outcome::Value(Value::Array(ref v)) if v.is_empty()));
    }

    #[tokio::test]
    async fn update_and_upsert() {
        let backend = seeded().await;
        let outcome = run(
            &backend,
            "mongodb/site/robots/update_many",
            r#"{"filter":{"battery":{"$lt":50}},"update":{"$set":{"charging":true}}}"#,
        )
        .await
        .unwrap();
        let Outcome::Write(WriteAck::Update {
            matched_count,
            modified_count,
            upserted_id,
            ..
        }) = outcome
        else {
            panic!("unexpected outcome");
        };
        assert_eq!((matched_count, modified_count, upserted_id), (2, 2, None));

        let outcome = run(
            &backend,
            "mongodb/site/robots/update_one",
            r#"{"filter":{"name":"r9"},"update":{"$set":{"battery":100}},"upsert":true}"#,
        )
        .await
        .unwrap();
        let Outcome::Write(WriteAck::Update { matched_count, upserted_id, .. }) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(matched_count, 0);
        assert!(upserted_id.is_some());

        let count = run(&backend, "mongodb/site/robots/count_documents", r#"{"filter":{}}"#)
            .await
            .unwrap();
        assert!(matches!(count, Outcome::Value(Value::Int(4))));
    }

    #[tokio::test]
    async fn update_rejects_plain_documents() {
        let backend = seeded().await;
        let err = run(
            &backend,
            "mongodb/site/robots/update_one",
            r#"{"filter":{},"update":{"battery":1}}"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BackendError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn delete_one_removes_a_single_match() {
        let backend = seeded().await;
        let outcome = run(
            &backend,
            "mongodb/site/robots/delete_one",
            r#"{"filter":{"battery":{"$lt":100}}}"#,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, Outcome::Write(WriteAck::Delete { deleted_count: 1, .. })));
        let count = run(&backend, "mongodb/site/robots/estimated_document_count", "{}")
            .await
            .unwrap();
        assert!(matches!(count, Outcome::Value(Value::Int(2))));
    }

    #[tokio::test]
    async fn find_one_and_update_returns_requested_version() {
        let backend = seeded().await;
        let outcome = run(
            &backend,
            "mongodb/site/robots/find_one_and_update",
            r#"{"filter":{"_id":2},"update":{"$inc":{"battery":5}},"return_document":"after"}"#,
        )
        .await
        .unwrap();
        let Outcome::Value(Value::Document(doc)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(doc["battery"], Value::Int(45));
    }

    #[tokio::test]
    async fn aggregate_pipeline() {
        let backend = seeded().await;
        let rows = drain(
            run(
                &backend,
                "mongodb/site/robots/aggregate",
                r#"{"pipeline":[{"$match":{"battery":{"$gt":20}}},{"$count":"n"}]}"#,
            )
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(rows, vec![Value::Document(params(r#"{"n":2}"#))]);
    }

    #[tokio::test]
    async fn distinct_values() {
        let backend = seeded().await;
        let outcome = run(&backend, "mongodb/site/robots/distinct", r#"{"key":"name"}"#)
            .await
            .unwrap();
        let Outcome::Value(Value::Array(names)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn database_operations() {
        let backend = seeded().await;
        let names = run(&backend, "mongodb/site/list_collection_names", "{}").await.unwrap();
        assert!(matches!(
            names,
            Outcome::Value(Value::Array(ref v)) if v == &vec![Value::from("robots")]
        ));

        let created = run(&backend, "mongodb/site/create_collection", r#"{"name":"robots"}"#).await;
        assert!(matches!(created, Err(BackendError::CollectionExists { .. })));

        let ping = run(&backend, "mongodb/site/command", r#"{"command":{"ping":1}}"#)
            .await
            .unwrap();
        assert!(matches!(
            ping,
            Outcome::Value(Value::Document(ref d)) if d["ok"] == Value::Float(1.0)
        ));
    }

    #[tokio::test]
    async fn multi_key_sort_follows_key_order() {
        let backend = MemoryBackend::new();
        run(
            &backend,
            "mongodb/db/coll/insert_many",
            r#"{"documents":[{"_id":1,"p":1,"a":"a"},{"_id":2,"p":2,"a":"z"}]}"#,
        )
        .await
        .unwrap();
        let rows = drain(
            run(&backend, "mongodb/db/coll/find", r#"{"sort":{"p":-1,"a":1}}"#)
                .await
                .unwrap(),
        )
        .await;
        let ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.as_document().and_then(|d| d["_id"].as_i64()))
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn command_name_is_the_first_key() {
        let backend = MemoryBackend::new();
        let reply = run(&backend, "mongodb/db/command", r#"{"command":{"ping":1,"comment":"x"}}"#)
            .await
            .unwrap();
        assert!(matches!(
            reply,
            Outcome::Value(Value::Document(ref d)) if d["ok"] == Value::Float(1.0)
        ));
    }

    #[tokio::test]
    async fn generated_ids_lead_the_document() {
        let backend = MemoryBackend::new();
        run(&backend, "mongodb/db/coll/insert_one", r#"{"document":{"b":1,"a":2}}"#)
            .await
            .unwrap();
        let rows = drain(run(&backend, "mongodb/db/coll/find", "{}").await.unwrap()).await;
        let keys: Vec<&String> = rows[0].as_document().unwrap().keys().collect();
        assert_eq!(keys, ["_id", "b", "a"]);
    }

    #[tokio::test]
    async fn collection_operations_without_collection() {
        let backend = seeded().await;
        let rows = drain(run(&backend, "mongodb/site/find", "{}").await.unwrap()).await;
        assert!(rows.is_empty());

        let err = run(&backend, "mongodb/site/insert_one", r#"{"document":{}}"#)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::MissingCollection { operation } if operation == "insert_one"
        ));
    }

    #[tokio::test]
    async fn unknown_operations_fail() {
        let backend = MemoryBackend::new();
        let err = run(&backend, "mongodb/db/coll/rename", "{}").await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownOperation { name } if name == "rename"));
    }

    #[tokio::test]
    async fn database_allow_list() {
        let backend = MemoryBackend::from_uri("memory://?databases=db").unwrap();
        assert!(run(&backend, "mongodb/db/coll/find", "{}").await.is_ok());
        let err = run(&backend, "mongodb/other/coll/find", "{}").await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownDatabase { name } if name == "other"));
    }

    #[test]
    fn rejects_foreign_uris() {
        assert!(MemoryBackend::from_uri("mongodb://localhost:27017").is_err());
        assert!(MemoryBackend::from_uri("memory://").is_ok());
    }

    #[tokio::test]
    async fn closed_backend_refuses_work() {
        let backend = MemoryBackend::new();
        backend.close().await.unwrap();
        assert!(backend.ping().await.is_err());
        assert!(matches!(
            run(&backend, "mongodb/db/coll/find", "{}").await,
            Err(BackendError::Closed)
        ));
    }
}
