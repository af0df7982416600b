//! SQLite-backed vector store for knowledge chunks.

use async_trait::async_trait;
use moneyez_agent::{Document, KnowledgeStore};
use moneyez_ai::Embedder;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Chunker, DocumentInfo, KnowledgeError, Result, loader};

const DOCUMENT_ID: &str = "document_id";
const DOCUMENT_NAME: &str = "document_name";
const UNNAMED: &str = "Unnamed document";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    document_id  TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    size         INTEGER NOT NULL DEFAULT 0,
    content_type TEXT NOT NULL DEFAULT 'unknown',
    created_at   TEXT NOT NULL,
    chunk_count  INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL REFERENCES documents(document_id) ON DELETE CASCADE,
    content     TEXT NOT NULL,
    metadata    TEXT NOT NULL,
    embedding   BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
";

/// Documents, chunks and embeddings in one SQLite file
pub struct SqliteKnowledgeStore {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
}

impl SqliteKnowledgeStore {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { path, embedder };
        store
            .with_connection(|conn| Ok(conn.execute_batch(SCHEMA)?))
            .await?;
        tracing::info!(
            path = %store.path.display(),
            embedding_model = store.embedder.model_name(),
            "knowledge store ready"
        );
        Ok(store)
    }

    /// Run `f` on a fresh connection in a blocking task
    async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; \
                 PRAGMA synchronous = NORMAL; \
                 PRAGMA foreign_keys = ON; \
                 PRAGMA busy_timeout = 5000;",
            )?;
            f(&mut conn)
        })
        .await
        .map_err(|e| KnowledgeError::Task(e.to_string()))?
    }

    /// Extract, chunk, embed and store an uploaded file
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
        chunker: Chunker,
    ) -> Result<DocumentInfo> {
        if !loader::is_supported(content_type) {
            return Err(KnowledgeError::UnsupportedType(content_type.to_string()));
        }
        let size = bytes.len() as u64;
        let ct = content_type.to_string();
        let text = tokio::task::spawn_blocking(move || loader::extract_text(&bytes, &ct))
            .await
            .map_err(|e| KnowledgeError::Task(e.to_string()))??;

        let pieces = chunker.split(&text);
        if pieces.is_empty() {
            return Err(KnowledgeError::EmptyDocument);
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let chunks: Vec<Document> = pieces
            .into_iter()
            .map(|content| {
                Document::new(content)
                    .with_metadata(DOCUMENT_ID, &document_id)
                    .with_metadata(DOCUMENT_NAME, filename)
            })
            .collect();

        let info = DocumentInfo {
            document_id,
            name: filename.to_string(),
            size,
            created_at: now_timestamp(),
            content_type: content_type.to_string(),
            chunk_count: chunks.len(),
        };
        self.write_chunks(chunks, Some(info.clone())).await?;
        tracing::info!(
            document_id = %info.document_id,
            name = %info.name,
            chunks = info.chunk_count,
            "document ingested"
        );
        Ok(info)
    }

    /// Embed `chunks` and store them; `info`, when given, registers the document first
    async fn write_chunks(&self, mut chunks: Vec<Document>, info: Option<DocumentInfo>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        for chunk in &mut chunks {
            if !chunk.metadata.contains_key(DOCUMENT_ID) {
                chunk
                    .metadata
                    .insert(DOCUMENT_ID.to_string(), uuid::Uuid::new_v4().to_string());
            }
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(KnowledgeError::Corrupt(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let now = now_timestamp();
            if let Some(info) = &info {
                tx.execute(
                    "INSERT OR REPLACE INTO documents
                        (document_id, name, size, content_type, created_at, chunk_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![
                        info.document_id,
                        info.name,
                        info.size as i64,
                        info.content_type,
                        info.created_at
                    ],
                )?;
            }

            let mut touched = HashSet::new();
            for (chunk, embedding) in chunks.iter().zip(&embeddings) {
                let document_id = &chunk.metadata[DOCUMENT_ID];
                let name = chunk
                    .metadata
                    .get(DOCUMENT_NAME)
                    .or_else(|| chunk.metadata.get("source"))
                    .map(String::as_str)
                    .unwrap_or(UNNAMED);
                tx.execute(
                    "INSERT OR IGNORE INTO documents (document_id, name, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![document_id, name, now],
                )?;
                let metadata = serde_json::to_string(&chunk.metadata)
                    .map_err(|e| KnowledgeError::Corrupt(e.to_string()))?;
                tx.execute(
                    "INSERT INTO chunks (document_id, content, metadata, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![document_id, chunk.content, metadata, encode_embedding(embedding)],
                )?;
                touched.insert(document_id.clone());
            }

            for document_id in &touched {
                tx.execute(
                    "UPDATE documents SET chunk_count =
                        (SELECT COUNT(*) FROM chunks WHERE document_id = ?1)
                     WHERE document_id = ?1",
                    params![document_id],
                )?;
            }
            tx.commit()?;
            Ok(chunks.len())
        })
        .await
    }

    /// Remove a document and its chunks; `false` if it was not registered
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let id = document_id.to_string();
        let deleted = self
            .with_connection(move |conn| {
                Ok(conn.execute("DELETE FROM documents WHERE document_id = ?1", params![id])?)
            })
            .await?;
        tracing::info!(document_id, deleted = deleted > 0, "document delete");
        Ok(deleted > 0)
    }

    /// All registered documents, newest first
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT document_id, name, size, created_at, content_type, chunk_count
                 FROM documents ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(DocumentInfo {
                    document_id: row.get(0)?,
                    name: row.get(1)?,
                    size: row.get::<_, i64>(2)?.max(0) as u64,
                    created_at: row.get(3)?,
                    content_type: row.get(4)?,
                    chunk_count: row.get::<_, i64>(5)?.max(0) as usize,
                })
            })?;
            let documents = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(documents)
        })
        .await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<DocumentInfo>> {
        let id = document_id.to_string();
        Ok(self
            .list_documents()
            .await?
            .into_iter()
            .find(|d| d.document_id == id))
    }

    /// The `k` chunks most similar to `query` by cosine similarity
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        let query_vec = self.embedder.embed_query(query).await?;
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare("SELECT content, metadata, embedding FROM chunks")?;
            let mut rows = stmt.query([])?;
            let mut scored: Vec<(f32, Document)> = Vec::new();
            while let Some(row) = rows.next()? {
                let content: String = row.get(0)?;
                let metadata: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                let score = cosine_similarity(&query_vec, &decode_embedding(&blob)?);
                let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)
                    .map_err(|e| KnowledgeError::Corrupt(e.to_string()))?;
                scored.push((score, Document { content, metadata }));
            }
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            Ok(scored.into_iter().take(k).map(|(_, doc)| doc).collect())
        })
        .await
    }

    pub async fn document_exists(&self, document_id: &str) -> Result<bool> {
        let id = document_id.to_string();
        self.with_connection(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM documents WHERE document_id = ?1",
                    params![id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
        .await
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> moneyez_agent::Result<Vec<Document>> {
        self.search(query, k)
            .await
            .map_err(|e| moneyez_agent::Error::Retrieval(e.to_string()))
    }

    async fn add_documents(&self, documents: Vec<Document>) -> moneyez_agent::Result<()> {
        self.write_chunks(documents, None)
            .await
            .map(|_| ())
            .map_err(|e| moneyez_agent::Error::Retrieval(e.to_string()))
    }
}

/// UTC, fixed microsecond precision so timestamps sort as text
fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Little-endian f32 bytes
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(KnowledgeError::Corrupt(format!(
            "embedding blob of {} bytes",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// 0.0 for mismatched lengths or zero vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
