//! Retrieval nodes: decide whether to retrieve, build queries, fetch and rank documents.

use std::collections::HashSet;

use crate::retriever::{Document, Retriever};
use crate::state::{ConversationState, StateUpdate};

/// Substrings marking a question that benefits from the knowledge base
pub const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "tài chính",
    "thông tin",
    "giải thích",
    "là gì",
    "định nghĩa",
    "khái niệm",
    "cách",
    "làm sao",
    "tư vấn",
    "nên",
    "hướng dẫn",
    "quy định",
    "luật",
    "chính sách",
    "so sánh",
    "khác nhau",
];

/// Request phrases stripped from the search query, in this order
pub const FILLER_PHRASES: &[&str] = &[
    "cho tôi",
    "giúp tôi",
    "làm ơn",
    "xin vui lòng",
    "bạn có thể",
    "tôi muốn",
    "tôi cần",
    "xin",
    "hãy",
    "thông tin về",
];

/// Domain terms collected into the keyword query, in this order
pub const FINANCIAL_TERMS: &[&str] = &[
    "đầu tư",
    "tiết kiệm",
    "chi tiêu",
    "thu nhập",
    "lãi suất",
    "chứng khoán",
    "cổ phiếu",
    "trái phiếu",
    "ngân sách",
    "vay",
    "nợ",
    "thuế",
    "bảo hiểm",
    "quỹ",
    "tài chính cá nhân",
];

/// Decide whether the latest user turn needs retrieval. Always resets the queries.
pub fn decide_rag(state: &ConversationState, use_rag: bool) -> StateUpdate {
    let need_rag = use_rag
        && state
            .latest_user_text()
            .map(|text| needs_knowledge(&text))
            .unwrap_or(false);

    tracing::debug!(need_rag, "rag decision");
    StateUpdate {
        need_rag: Some(need_rag),
        queries: Some(vec![]),
        ..Default::default()
    }
}

/// Case-insensitive keyword test
pub fn needs_knowledge(text: &str) -> bool {
    let lower = text.to_lowercase();
    KNOWLEDGE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Append the cleaned query and, if domain terms occur, a keyword query
pub fn generate_queries(state: &ConversationState) -> StateUpdate {
    let Some(text) = state.latest_user_text() else {
        return StateUpdate::queries(vec![]);
    };

    let mut queries = state.queries.clone();
    let optimized = optimize_query(&text);
    tracing::debug!(original = %text, optimized = %optimized, "query generation");
    queries.push(optimized);

    if let Some(keyword_query) = keyword_query(&text) {
        tracing::debug!(keyword_query = %keyword_query, "keyword query");
        queries.push(keyword_query);
    }

    StateUpdate::queries(queries)
}

/// Strip filler phrases; fall back to the original if less than half remains
pub fn optimize_query(text: &str) -> String {
    let optimized = FILLER_PHRASES
        .iter()
        .fold(text.to_string(), |acc, phrase| {
            acc.replace(phrase, "").trim().to_string()
        });

    if optimized.chars().count() * 2 < text.chars().count() {
        text.to_string()
    } else {
        optimized
    }
}

/// Matched domain terms joined by spaces, in list order
pub fn keyword_query(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let matched: Vec<&str> = FINANCIAL_TERMS
        .iter()
        .copied()
        .filter(|term| lower.contains(term))
        .collect();
    (!matched.is_empty()).then(|| matched.join(" "))
}

/// Run every query, dedupe by exact content, rank against the first query.
///
/// Any retriever failure degrades to empty results.
pub async fn retrieve_knowledge(state: &ConversationState, retriever: &Retriever) -> StateUpdate {
    if state.queries.is_empty() {
        return StateUpdate::retrieved(vec![]);
    }

    let mut accepted: Vec<Document> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for query in &state.queries {
        match retriever.retrieve(query).await {
            Ok(docs) => {
                tracing::debug!(query = %query, found = docs.len(), "retrieved documents");
                for doc in docs {
                    if seen.insert(doc.content.clone()) {
                        accepted.push(doc);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Knowledge retrieval failed, continuing without context: {}", e);
                return StateUpdate::retrieved(vec![]);
            }
        }
    }

    if accepted.len() > 1 {
        accepted = rank_documents(accepted, &state.queries[0]);
    }

    tracing::info!(documents = accepted.len(), "knowledge retrieved");
    StateUpdate::retrieved(accepted)
}

/// Stable sort by descending term overlap with `query`
pub fn rank_documents(mut docs: Vec<Document>, query: &str) -> Vec<Document> {
    let query_terms = term_set(query);
    docs.sort_by_cached_key(|doc| {
        std::cmp::Reverse(term_set(&doc.content).intersection(&query_terms).count())
    });
    docs
}

fn term_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Single quotes unless the value has one and no double quote, like a Python repr
fn quote_attr(value: &str) -> String {
    if value.contains('\'') && !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        format!("'{}'", value.replace('\'', "\\'"))
    }
}

/// Render documents as a tagged block for the system prompt
pub fn format_docs(docs: &[Document]) -> String {
    if docs.is_empty() {
        return "<documents></documents>".to_string();
    }

    let rendered: String = docs
        .iter()
        .map(|doc| {
            let attrs: String = doc
                .metadata
                .iter()
                .map(|(k, v)| format!(" {}={}", k, quote_attr(v)))
                .collect();
            format!("<document{}>\n{}\n</document>", attrs, doc.content)
        })
        .collect();

    format!("<documents>\n{}\n</documents>", rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::retriever::KnowledgeStore;
    use async_trait::async_trait;
    use moneyez_ai::Message;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn user_state(text: &str) -> ConversationState {
        ConversationState::with_messages(vec![Message::user(text)])
    }

    #[test]
    fn test_rag_skipped_when_disabled() {
        let update = decide_rag(&user_state("Lãi suất là gì?"), false);
        assert_eq!(update.need_rag, Some(false));
        assert_eq!(update.queries, Some(vec![]));
    }

    #[test]
    fn test_rag_skipped_without_user_turn() {
        let state = ConversationState::with_messages(vec![
            Message::user("Lãi suất là gì?"),
            Message::assistant("..."),
        ]);
        assert_eq!(decide_rag(&state, true).need_rag, Some(false));
        assert_eq!(decide_rag(&ConversationState::default(), true).need_rag, Some(false));
    }

    #[test]
    fn test_rag_keyword_is_case_insensitive() {
        assert_eq!(decide_rag(&user_state("LÀ GÌ vậy"), true).need_rag, Some(true));
        assert_eq!(decide_rag(&user_state("ăn phở 50k"), true).need_rag, Some(false));
    }

    #[test]
    fn test_optimize_strips_fillers() {
        assert_eq!(
            optimize_query("cho tôi biết lãi suất tiết kiệm hiện nay"),
            "biết lãi suất tiết kiệm hiện nay"
        );
    }

    #[test]
    fn test_optimize_keeps_original_when_too_short() {
        let original = "xin hãy giúp tôi vay";
        assert_eq!(optimize_query(original), original);
    }

    #[test]
    fn test_generate_adds_keyword_query_in_list_order() {
        let update = generate_queries(&user_state("Thuế và đầu tư chứng khoán"));
        assert_eq!(
            update.queries.unwrap(),
            vec![
                "Thuế và đầu tư chứng khoán".to_string(),
                "đầu tư chứng khoán thuế".to_string()
            ]
        );
    }

    #[test]
    fn test_generate_without_user_turn() {
        let state = ConversationState::default();
        assert_eq!(generate_queries(&state).queries, Some(vec![]));
    }

    #[test]
    fn test_rank_is_stable_and_descending() {
        let docs = vec![
            Document::new("alpha"),
            Document::new("lãi suất ngân hàng"),
            Document::new("beta"),
            Document::new("lãi suất"),
        ];
        let ranked = rank_documents(docs, "lãi suất ngân hàng");
        let contents: Vec<&str> = ranked.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["lãi suất ngân hàng", "lãi suất", "alpha", "beta"]
        );
    }

    #[test]
    fn test_format_docs() {
        assert_eq!(format_docs(&[]), "<documents></documents>");

        let docs = vec![
            Document::new("plain"),
            Document::new("body").with_metadata("document_id", "42"),
        ];
        assert_eq!(
            format_docs(&docs),
            "<documents>\n<document>\nplain\n</document><document document_id='42'>\nbody\n</document>\n</documents>"
        );
    }

    #[test]
    fn test_format_docs_quotes_like_repr() {
        let doc = Document::new("x").with_metadata("document_name", "Sổ tay 'tiết kiệm'");
        assert!(format_docs(&[doc]).contains(r#"document_name="Sổ tay 'tiết kiệm'""#));

        let doc = Document::new("x").with_metadata("document_name", r#"it's "quoted""#);
        assert!(format_docs(&[doc]).contains(r#"document_name='it\'s "quoted"'"#));
    }

    struct MapStore {
        results: HashMap<String, Vec<Document>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KnowledgeStore for MapStore {
        async fn similarity_search(&self, query: &str, _k: usize) -> Result<Vec<Document>> {
            self.calls.lock().push(query.to_string());
            Ok(self.results.get(query).cloned().unwrap_or_default())
        }

        async fn add_documents(&self, _documents: Vec<Document>) -> Result<()> {
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KnowledgeStore for FailingStore {
        async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Document>> {
            Err(Error::Retrieval("connection refused".into()))
        }

        async fn add_documents(&self, _documents: Vec<Document>) -> Result<()> {
            Err(Error::Retrieval("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_retrieve_dedupes_across_queries() {
        let mut results = HashMap::new();
        results.insert(
            "lãi suất".to_string(),
            vec![Document::new("shared"), Document::new("lãi suất cao")],
        );
        results.insert(
            "kw".to_string(),
            vec![Document::new("shared"), Document::new("other")],
        );
        let store = Arc::new(MapStore {
            results,
            calls: Mutex::new(vec![]),
        });
        let retriever = Retriever::new(store.clone(), 3);

        let mut state = ConversationState::default();
        state.queries = vec!["lãi suất".into(), "kw".into()];
        let update = retrieve_knowledge(&state, &retriever).await;

        let docs = update.retrieved_docs.unwrap();
        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["lãi suất cao", "shared", "other"]);
        assert_eq!(update.rag_context.unwrap().len(), 3);
        assert_eq!(*store.calls.lock(), vec!["lãi suất", "kw"]);
    }

    #[tokio::test]
    async fn test_retrieve_failure_degrades_to_empty() {
        let retriever = Retriever::new(Arc::new(FailingStore), 3);
        let mut state = ConversationState::default();
        state.queries = vec!["q".into()];
        let update = retrieve_knowledge(&state, &retriever).await;
        assert_eq!(update.retrieved_docs, Some(vec![]));
        assert_eq!(update.rag_context, Some(vec![]));
    }
}
