use propdb_core::types::{IndexRecord, QueryResult};

/// Brute-force cosine search over records held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<IndexRecord>,
}

impl MemoryStore {
    pub fn new(records: Vec<IndexRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record scored by cosine distance to `vector`, unordered.
    pub fn scan(&self, vector: &[f32]) -> Vec<QueryResult> {
        self.records
            .iter()
            .map(|r| QueryResult {
                content: r.chunk.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_distance(vector, &r.vector),
                parent_document_id: r.chunk.parent_document_id.clone(),
                sequence_index: r.chunk.sequence_index,
            })
            .collect()
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}
