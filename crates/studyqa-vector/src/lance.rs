//! LanceDB-backed namespaced index: one table per namespace.
//!
//! Scores are `1 - _distance` under the configured distance type, so cosine
//! tables report cosine similarity. Querying a namespace that has no table
//! yields zero matches.

use anyhow::{anyhow, Result};
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use studyqa_core::traits::{FetchRequest, QueryRequest, VectorIndex};
use studyqa_core::types::{MatchMetadata, Namespace, SimilarityMetric};

/// One row to write. `metadata` lands in typed columns next to the vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanceRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: MatchMetadata,
}

pub struct LanceIndex {
    db: Connection,
    dim: usize,
    metric: SimilarityMetric,
    distance: DistanceType,
}

pub fn build_schema(dim: usize) -> Result<Arc<Schema>> {
    let dim = i32::try_from(dim).map_err(|_| anyhow!("dimension {} too large", dim))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("page_number", DataType::Int32, true),
        Field::new("total_pages", DataType::Int32, true),
        Field::new("chapter", DataType::Int32, true),
        Field::new("book", DataType::Utf8, true),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ])))
}

impl LanceIndex {
    pub async fn open(uri: &str, dim: usize, metric: SimilarityMetric) -> Result<Self> {
        let db = connect(uri).execute().await?;
        let distance = match metric {
            SimilarityMetric::Cosine => DistanceType::Cosine,
            SimilarityMetric::DotProduct => DistanceType::Dot,
        };
        Ok(Self { db, dim, metric, distance })
    }

    /// Insert or replace records by id, creating the namespace table on
    /// first write. Returns the number of records written. Under the dot
    /// product metric vectors are stored unit-normalised so scores stay in
    /// [-1, 1]; zero vectors are rejected.
    pub async fn upsert(&self, namespace: &Namespace, records: &[LanceRecord]) -> Result<usize> {
        if records.is_empty() { return Ok(0); }
        let name = table_name(namespace)?;
        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        match self.open_namespace(namespace).await? {
            Some(t) => {
                let mut mi = t.merge_insert(&["id"]);
                mi.when_matched_update_all(None).when_not_matched_insert_all();
                mi.execute(reader).await?;
            }
            None => {
                self.db.create_table(name, reader).execute().await?;
            }
        }
        tracing::debug!(namespace = %namespace, rows = records.len(), "upserted");
        Ok(records.len())
    }

    pub async fn count(&self, namespace: &Namespace) -> Result<usize> {
        match self.open_namespace(namespace).await? {
            Some(t) => Ok(t.count_rows(None).await?),
            None => Ok(0),
        }
    }

    async fn open_namespace(&self, namespace: &Namespace) -> Result<Option<Table>> {
        let name = table_name(namespace)?;
        let names = self.db.table_names().execute().await?;
        if !names.iter().any(|n| n == name) { return Ok(None); }
        Ok(Some(self.db.open_table(name).execute().await?))
    }

    fn records_to_batch(&self, records: &[LanceRecord]) -> Result<RecordBatch> {
        let schema = build_schema(self.dim)?;
        let mut ids = Vec::new(); let mut sources = Vec::new(); let mut texts = Vec::new();
        let mut pages = Vec::new(); let mut totals = Vec::new(); let mut chapters = Vec::new(); let mut books = Vec::new();
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
        for r in records {
            if r.vector.len() != self.dim {
                return Err(anyhow!("dim mismatch for `{}`: got {} expected {}", r.id, r.vector.len(), self.dim));
            }
            ids.push(r.id.clone());
            sources.push(r.metadata.source.clone());
            texts.push(r.metadata.text.clone());
            pages.push(to_i32(r.metadata.page_number)?);
            totals.push(to_i32(r.metadata.total_pages)?);
            chapters.push(to_i32(r.metadata.chapter)?);
            books.push(r.metadata.book.clone());
            let values = match self.metric {
                SimilarityMetric::DotProduct => unit_normalise(&r.id, &r.vector)?,
                SimilarityMetric::Cosine => r.vector.clone(),
            };
            vectors.push(Some(values.into_iter().map(Some).collect()));
        }
        let dim = i32::try_from(self.dim)?;
        let batch = RecordBatch::try_new(schema, vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(texts)),
            Arc::new(Int32Array::from(pages)),
            Arc::new(Int32Array::from(totals)),
            Arc::new(Int32Array::from(chapters)),
            Arc::new(StringArray::from(books)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), dim)),
        ])?;
        Ok(batch)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    fn dimension(&self) -> Option<usize> { Some(self.dim) }

    async fn query(&self, request: &QueryRequest) -> Result<Value> {
        let Some(table) = self.open_namespace(&request.namespace).await? else {
            return Ok(json!({ "matches": [] }));
        };
        let mut stream = table
            .vector_search(request.vector.clone())?
            .distance_type(self.distance)
            .limit(request.top_k)
            .execute()
            .await?;
        let mut matches = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let ids = string_column(&batch, "id")?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow!("missing _distance column"))?;
            for i in 0..batch.num_rows() {
                let mut m = Map::new();
                m.insert("id".into(), Value::String(ids.value(i).to_string()));
                m.insert("score".into(), json!(1.0 - distances.value(i)));
                if request.include_metadata {
                    m.insert("metadata".into(), serde_json::to_value(row_metadata(&batch, i)?)?);
                }
                matches.push(Value::Object(m));
            }
        }
        Ok(json!({ "matches": matches }))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Value> {
        let mut vectors = Map::new();
        let Some(table) = self.open_namespace(&request.namespace).await? else {
            return Ok(json!({ "vectors": vectors }));
        };
        if request.ids.is_empty() { return Ok(json!({ "vectors": vectors })); }
        let ids_list = request.ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect::<Vec<_>>().join(",");
        let mut stream = table.query().only_if(format!("id IN ({})", ids_list)).execute().await?;
        while let Some(batch) = stream.try_next().await? {
            let ids = string_column(&batch, "id")?;
            for i in 0..batch.num_rows() {
                let id = ids.value(i).to_string();
                let metadata = row_metadata(&batch, i)?;
                vectors.insert(id.clone(), json!({ "id": id, "metadata": metadata }));
            }
        }
        Ok(json!({ "vectors": vectors }))
    }
}

/// Lance table names allow `[A-Za-z0-9_.-]`.
fn table_name(namespace: &Namespace) -> Result<&str> {
    let name = namespace.as_str();
    if name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        Ok(name)
    } else {
        Err(anyhow!("namespace `{}` is not a valid table name", name))
    }
}

fn unit_normalise(id: &str, vector: &[f32]) -> Result<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(anyhow!("vector `{}` cannot be normalised (norm {})", id, norm));
    }
    Ok(vector.iter().map(|x| x / norm).collect())
}

fn to_i32(v: Option<u32>) -> Result<Option<i32>> {
    v.map(i32::try_from).transpose().map_err(|e| anyhow!("page field out of range: {}", e))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("missing {} column", name))
}

fn opt_int(batch: &RecordBatch, name: &str, i: usize) -> Option<u32> {
    let col = batch.column_by_name(name)?.as_any().downcast_ref::<Int32Array>()?;
    if col.is_null(i) { return None; }
    u32::try_from(col.value(i)).ok()
}

fn row_metadata(batch: &RecordBatch, i: usize) -> Result<MatchMetadata> {
    let book = batch
        .column_by_name("book")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .filter(|c| !c.is_null(i))
        .map(|c| c.value(i).to_string());
    Ok(MatchMetadata {
        source: string_column(batch, "source")?.value(i).to_string(),
        page_number: opt_int(batch, "page_number", i),
        total_pages: opt_int(batch, "total_pages", i),
        chapter: opt_int(batch, "chapter", i),
        book,
        text: string_column(batch, "text")?.value(i).to_string(),
    })
}
