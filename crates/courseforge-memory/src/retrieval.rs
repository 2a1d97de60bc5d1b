use std::collections::HashSet;

use anyhow::Result;
use courseforge_schema::ChapterPlan;

use crate::index::VectorIndex;
use crate::pdf::extract_structured_content;

/// Document handed to ingestion, decoupled from the persistence row shape.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub id: i64,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Feeds uploaded documents into the per-course vector collection and pulls
/// the retrieval context for a chapter plan.
#[derive(Clone)]
pub struct RetrievalService {
    index: VectorIndex,
    collection_prefix: String,
}

impl RetrievalService {
    pub fn new(index: VectorIndex, collection_prefix: impl Into<String>) -> Self {
        Self {
            index,
            collection_prefix: collection_prefix.into(),
        }
    }

    pub fn collection_for(&self, course_id: i64) -> String {
        format!("{}{}", self.collection_prefix, course_id)
    }

    /// Ingests every PDF in `documents`. Non-PDF content types are skipped
    /// silently; a document that fails to parse or upsert loses its own
    /// retrieval context but never aborts the rest of the batch. Returns the
    /// number of paragraphs stored.
    pub async fn ingest_documents(
        &self,
        course_id: i64,
        documents: &[DocumentSource],
    ) -> Result<usize> {
        let collection = self.collection_for(course_id);
        let mut stored = 0;

        for document in documents {
            if document.content_type != "application/pdf" {
                tracing::info!("skipping non-PDF document: {}", document.filename);
                continue;
            }

            let content = match extract_structured_content(&document.data) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("failed to parse PDF {}: {e}", document.filename);
                    continue;
                }
            };

            for paragraph in &content.paragraphs {
                let content_id = format!(
                    "doc_{}_page_{}_para_{}",
                    document.id, paragraph.page, paragraph.paragraph_index
                );
                let metadata = serde_json::json!({
                    "type": "pdf_paragraph",
                    "course_id": course_id,
                    "document_id": document.id,
                    "filename": document.filename,
                    "page_number": paragraph.page,
                    "paragraph_index": paragraph.paragraph_index,
                    "word_count": paragraph.word_count,
                });
                if let Err(e) = self
                    .index
                    .upsert(&collection, &content_id, &paragraph.text, metadata)
                    .await
                {
                    tracing::warn!(
                        "vector upsert failed for {} ({content_id}): {e}",
                        document.filename
                    );
                    break;
                }
                stored += 1;
            }

            tracing::info!(
                "ingested {} paragraphs from {}",
                content.paragraphs.len(),
                document.filename
            );
        }

        Ok(stored)
    }

    /// Retrieval context for one chapter plan: two nearest passages for the
    /// caption plus three per content bullet, de-duplicated by exact text.
    /// Ordering carries no meaning.
    pub async fn rag_for_chapter(
        &self,
        course_id: i64,
        plan: &ChapterPlan,
    ) -> Result<Vec<String>> {
        let collection = self.collection_for(course_id);
        let mut seen = HashSet::new();
        let mut passages = Vec::new();

        for hit in self.index.query(&collection, &plan.caption, 2).await? {
            if seen.insert(hit.text.clone()) {
                passages.push(hit.text);
            }
        }
        for bullet in &plan.content {
            for hit in self.index.query(&collection, bullet, 3).await? {
                if seen.insert(hit.text.clone()) {
                    passages.push(hit.text);
                }
            }
        }

        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use std::sync::Arc;

    const PARAGRAPH: &str =
        "Ownership is the core concept of the Rust memory model and this sentence is long.";

    fn service() -> RetrievalService {
        let index = VectorIndex::open_in_memory(Arc::new(HashEmbeddingProvider::new(16))).unwrap();
        RetrievalService::new(index, "course_")
    }

    fn pdf_document(id: i64, text: &str) -> DocumentSource {
        DocumentSource {
            id,
            filename: format!("doc-{id}.pdf"),
            content_type: "application/pdf".into(),
            data: crate::pdf::tests::make_pdf(text),
        }
    }

    #[tokio::test]
    async fn ingest_then_caption_query_round_trips() {
        let service = service();
        let stored = service
            .ingest_documents(7, &[pdf_document(1, PARAGRAPH)])
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let plan = ChapterPlan {
            caption: PARAGRAPH.into(),
            content: vec![],
            time: 30,
            note: None,
        };
        let context = service.rag_for_chapter(7, &plan).await.unwrap();
        assert!(context.iter().any(|text| text.contains("Ownership")));
    }

    #[tokio::test]
    async fn non_pdf_documents_are_skipped_silently() {
        let service = service();
        let stored = service
            .ingest_documents(
                1,
                &[DocumentSource {
                    id: 1,
                    filename: "notes.txt".into(),
                    content_type: "text/plain".into(),
                    data: b"plain text".to_vec(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn broken_pdf_does_not_abort_the_batch() {
        let service = service();
        let broken = DocumentSource {
            id: 1,
            filename: "broken.pdf".into(),
            content_type: "application/pdf".into(),
            data: b"not really a pdf".to_vec(),
        };
        let stored = service
            .ingest_documents(1, &[broken, pdf_document(2, PARAGRAPH)])
            .await
            .unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn rag_context_deduplicates_by_exact_text() {
        let service = service();
        service
            .ingest_documents(3, &[pdf_document(1, PARAGRAPH)])
            .await
            .unwrap();

        // Caption and bullet both match the same paragraph.
        let plan = ChapterPlan {
            caption: PARAGRAPH.into(),
            content: vec![PARAGRAPH.into()],
            time: 10,
            note: None,
        };
        let context = service.rag_for_chapter(3, &plan).await.unwrap();
        assert_eq!(context.len(), 1);
    }

    #[tokio::test]
    async fn rag_for_empty_collection_is_empty() {
        let service = service();
        let plan = ChapterPlan {
            caption: "anything".into(),
            content: vec!["bullet".into()],
            time: 10,
            note: None,
        };
        let context = service.rag_for_chapter(99, &plan).await.unwrap();
        assert!(context.is_empty());
    }
}
