use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Arrow schema of a chunk table whose vectors have `dim` components.
pub fn chunk_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("doc_id", DataType::Utf8, false),
        Field::new("seq", DataType::Int32, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("filename", DataType::Utf8, false),
        Field::new("file_type", DataType::Utf8, false),
        Field::new("section", DataType::Utf8, true),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}
