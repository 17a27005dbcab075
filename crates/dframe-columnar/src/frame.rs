#![forbid(unsafe_code)]

use crate::builder::build_column;
use crate::chunk::{Chunk, ChunkData, ChunkLayout};
use crate::domain::Domain;
use crate::error::{FrameError, FrameResult};
use crate::types::{ColumnSchema, ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ColumnParts")]
pub struct Column {
    schema: ColumnSchema,
    domain: Option<Arc<Domain>>,
    chunks: Vec<Chunk>,
}

#[derive(Deserialize)]
struct ColumnParts {
    schema: ColumnSchema,
    domain: Option<Arc<Domain>>,
    chunks: Vec<Chunk>,
}

impl TryFrom<ColumnParts> for Column {
    type Error = FrameError;

    fn try_from(parts: ColumnParts) -> FrameResult<Self> {
        Self::from_chunks(parts.schema, parts.domain, parts.chunks)
    }
}

impl Column {
    pub(crate) fn from_parts(
        schema: ColumnSchema,
        domain: Option<Arc<Domain>>,
        chunks: Vec<Chunk>,
    ) -> Self {
        Self {
            schema,
            domain,
            chunks,
        }
    }

    /// Assemble a column from already-encoded chunks, checking every chunk against the schema.
    pub fn from_chunks(
        schema: ColumnSchema,
        domain: Option<Arc<Domain>>,
        chunks: Vec<Chunk>,
    ) -> FrameResult<Self> {
        let domain = match schema.column_type {
            ColumnType::Categorical => Some(domain.unwrap_or_default()),
            _ => None,
        };

        for chunk in &chunks {
            if chunk.data().column_type() != schema.column_type {
                return Err(FrameError::TypeMismatch {
                    column: schema.name.clone(),
                    expected: schema.column_type,
                    actual: chunk.data().column_type().name(),
                });
            }
            if let Some(validity) = chunk.validity() {
                if validity.len() != chunk.len() {
                    return Err(FrameError::ValidityMismatch {
                        column: schema.name.clone(),
                        expected: chunk.len(),
                        actual: validity.len(),
                    });
                }
            }
            if let (ChunkData::Categorical(codes), Some(domain)) = (chunk.data(), &domain) {
                let levels = domain.len();
                let bad = codes
                    .iter()
                    .enumerate()
                    .find(|(row, code)| chunk.is_valid(*row) && **code as usize >= levels);
                if let Some((_, code)) = bad {
                    return Err(FrameError::InvalidCode {
                        column: schema.name.clone(),
                        code: *code,
                        levels,
                    });
                }
            }
        }

        Ok(Self::from_parts(schema, domain, chunks))
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn column_type(&self) -> ColumnType {
        self.schema.column_type
    }

    /// Categorical domain; `None` for numeric columns.
    pub fn domain(&self) -> Option<&Arc<Domain>> {
        self.domain.as_ref()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn value_in_chunk(&self, chunk: &Chunk, row: usize) -> Value {
        match chunk.data() {
            ChunkData::Categorical(_) => chunk
                .code(row)
                .and_then(|code| self.domain.as_ref()?.level(code).cloned())
                .map(Value::Text)
                .unwrap_or(Value::Null),
            ChunkData::Number(_) => chunk.number(row).map(Value::Number).unwrap_or(Value::Null),
            ChunkData::Integer(_) => chunk.integer(row).map(Value::Integer).unwrap_or(Value::Null),
        }
    }
}

/// An ordered set of equally long, equally chunked columns.
///
/// Serialized as name, layout and columns; loading re-runs the [`Frame::from_columns`] checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "FrameParts")]
pub struct Frame {
    name: String,
    layout: ChunkLayout,
    columns: Vec<Column>,
    #[serde(skip)]
    column_index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct FrameParts {
    name: String,
    layout: ChunkLayout,
    columns: Vec<Column>,
}

impl TryFrom<FrameParts> for Frame {
    type Error = FrameError;

    fn try_from(parts: FrameParts) -> FrameResult<Self> {
        Self::from_columns(parts.name, parts.columns, parts.layout)
    }
}

impl Frame {
    pub fn from_columns(
        name: impl Into<String>,
        columns: Vec<Column>,
        layout: ChunkLayout,
    ) -> FrameResult<Self> {
        let name = name.into();
        let mut column_index = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            check_layout(&name, column, &layout)?;
            if column_index.insert(column.name().to_string(), idx).is_some() {
                return Err(FrameError::DuplicateColumn {
                    frame: name,
                    column: column.name().to_string(),
                });
            }
        }

        Ok(Self {
            name,
            layout,
            columns,
            column_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn row_count(&self) -> usize {
        self.layout.row_count()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn chunk_count(&self) -> usize {
        self.layout.chunk_count()
    }

    pub fn schema(&self) -> Vec<ColumnSchema> {
        self.columns.iter().map(|c| c.schema.clone()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.column(self.column_index(name)?)
    }

    /// Like [`Frame::column`], but reports a missing index as an error.
    pub fn require_column(&self, idx: usize) -> FrameResult<&Column> {
        self.columns
            .get(idx)
            .ok_or_else(|| FrameError::ColumnOutOfBounds {
                frame: self.name.clone(),
                index: idx,
                count: self.columns.len(),
            })
    }

    pub fn value(&self, row: usize, col: usize) -> Value {
        let Some(column) = self.columns.get(col) else {
            return Value::Null;
        };
        let Some((chunk, in_chunk)) = self.layout.chunk_of_row(row) else {
            return Value::Null;
        };
        match column.chunks.get(chunk) {
            Some(c) => column.value_in_chunk(c, in_chunk),
            None => Value::Null,
        }
    }

    /// All values of a column in row order.
    pub fn column_values(&self, col: usize) -> Vec<Value> {
        let Some(column) = self.columns.get(col) else {
            return Vec::new();
        };
        column
            .chunks
            .iter()
            .flat_map(|chunk| (0..chunk.len()).map(move |row| column.value_in_chunk(chunk, row)))
            .collect()
    }

    pub fn chunk(&self, idx: usize) -> Option<ChunkView<'_>> {
        let rows = self.layout.chunk_range(idx)?;
        Some(ChunkView {
            frame: self,
            index: idx,
            rows,
        })
    }

    pub fn chunks(&self) -> impl Iterator<Item = ChunkView<'_>> + '_ {
        (0..self.chunk_count()).filter_map(move |idx| self.chunk(idx))
    }

    /// Build a column laid out along this frame's chunks, without attaching it.
    ///
    /// Categorical columns start from `domain` when given, so codes can line up with another
    /// frame's domain.
    pub fn column_from_values(
        &self,
        schema: ColumnSchema,
        domain: Option<Domain>,
        values: &[Value],
    ) -> FrameResult<Column> {
        build_column(&self.name, schema, domain, values, &self.layout)
    }

    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        values: Vec<Value>,
    ) -> FrameResult<()> {
        let name = name.into();
        if self.column_index.contains_key(&name) {
            return Err(FrameError::DuplicateColumn {
                frame: self.name.clone(),
                column: name,
            });
        }
        let column = self.column_from_values(ColumnSchema::new(name, column_type), None, &values)?;
        self.push_column(column);
        Ok(())
    }

    /// Append a column holding `value` in every row; `Value::Null` yields an all-missing column.
    pub fn add_constant_column(
        &mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        value: Value,
    ) -> FrameResult<()> {
        let values = vec![value; self.row_count()];
        self.add_column(name, column_type, values)
    }

    /// Replace the column with the same name in place, or append it when the name is new.
    pub fn set_column(&mut self, column: Column) -> FrameResult<()> {
        check_layout(&self.name, &column, &self.layout)?;
        match self.column_index(column.name()) {
            Some(idx) => self.columns[idx] = column,
            None => self.push_column(column),
        }
        Ok(())
    }

    fn push_column(&mut self, column: Column) {
        self.column_index
            .insert(column.name().to_string(), self.columns.len());
        self.columns.push(column);
    }
}

fn check_layout(frame: &str, column: &Column, layout: &ChunkLayout) -> FrameResult<()> {
    if column.chunks.len() != layout.chunk_count() {
        return Err(FrameError::ChunkLayoutMismatch {
            frame: frame.to_string(),
            expected: layout.row_count(),
            actual: column.len(),
        });
    }
    for (chunk, expected) in column.chunks.iter().zip(layout.sizes()) {
        if chunk.len() != expected {
            return Err(FrameError::ColumnLengthMismatch {
                frame: frame.to_string(),
                column: column.name().to_string(),
                expected: layout.row_count(),
                actual: column.len(),
            });
        }
    }
    Ok(())
}

/// One chunk of a frame across all of its columns.
///
/// Row arguments are chunk-local (`0..len()`); [`ChunkView::start`] maps them back to frame rows.
/// Accessors return `None` for missing cells, out-of-range rows, unknown columns and columns of
/// the wrong type.
#[derive(Clone, Debug)]
pub struct ChunkView<'a> {
    frame: &'a Frame,
    index: usize,
    rows: Range<usize>,
}

impl<'a> ChunkView<'a> {
    pub fn frame(&self) -> &'a Frame {
        self.frame
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// First frame row covered by this chunk.
    pub fn start(&self) -> usize {
        self.rows.start
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_range(&self) -> Range<usize> {
        self.rows.clone()
    }

    fn cell(&self, col: usize) -> Option<(&'a Column, &'a Chunk)> {
        let column = self.frame.columns.get(col)?;
        let chunk = column.chunks.get(self.index)?;
        Some((column, chunk))
    }

    pub fn code(&self, col: usize, row: usize) -> Option<u32> {
        self.cell(col)?.1.code(row)
    }

    /// Resolved categorical label.
    pub fn level(&self, col: usize, row: usize) -> Option<&'a Arc<str>> {
        let (column, chunk) = self.cell(col)?;
        column.domain.as_ref()?.level(chunk.code(row)?)
    }

    pub fn number(&self, col: usize, row: usize) -> Option<f64> {
        self.cell(col)?.1.number(row)
    }

    pub fn integer(&self, col: usize, row: usize) -> Option<i64> {
        self.cell(col)?.1.integer(row)
    }

    pub fn value(&self, col: usize, row: usize) -> Value {
        match self.cell(col) {
            Some((column, chunk)) => column.value_in_chunk(chunk, row),
            None => Value::Null,
        }
    }

    pub fn is_missing(&self, col: usize, row: usize) -> bool {
        self.cell(col).map_or(true, |(_, chunk)| !chunk.is_valid(row))
    }
}
