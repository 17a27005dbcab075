#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::chunk::{Chunk, ChunkData, ChunkLayout};
use crate::domain::Domain;
use crate::error::{FrameError, FrameResult};
use crate::frame::{Column, Frame};
use crate::types::{ColumnSchema, ColumnType, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct FrameOptions {
    /// Rows per chunk when no explicit layout is given.
    pub chunk_rows: usize,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self { chunk_rows: 65_536 }
    }
}

/// Row-at-a-time frame construction.
///
/// Chunks are sealed either every [`FrameOptions::chunk_rows`] rows or along an explicit
/// layout given with [`FrameBuilder::with_chunk_layout`].
pub struct FrameBuilder {
    name: String,
    options: FrameOptions,
    layout: Option<Vec<usize>>,
    builders: Vec<ColumnBuilder>,
    sealed: Vec<usize>,
    in_chunk: usize,
    rows: usize,
}

impl FrameBuilder {
    pub fn new(name: impl Into<String>, schema: Vec<ColumnSchema>) -> Self {
        Self::with_options(name, schema, FrameOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        schema: Vec<ColumnSchema>,
        options: FrameOptions,
    ) -> Self {
        let builders = schema
            .into_iter()
            .map(|col| ColumnBuilder::new(col, None))
            .collect();

        Self {
            name: name.into(),
            options,
            layout: None,
            builders,
            sealed: Vec::new(),
            in_chunk: 0,
            rows: 0,
        }
    }

    /// Fix the chunk sizes up front. The appended rows must cover the layout exactly.
    pub fn with_chunk_layout(mut self, sizes: &[usize]) -> Self {
        self.layout = Some(sizes.to_vec());
        self
    }

    /// Seed the domain of categorical column `col` with `levels`, in order.
    ///
    /// Levels already present keep their codes, so this is safe after rows were appended.
    pub fn with_domain<I, S>(mut self, col: usize, levels: I) -> FrameResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let count = self.builders.len();
        let builder = self
            .builders
            .get_mut(col)
            .ok_or_else(|| FrameError::ColumnOutOfBounds {
                frame: self.name.clone(),
                index: col,
                count,
            })?;
        builder.preset_levels(levels)?;
        Ok(self)
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn append_row(&mut self, row: &[Value]) -> FrameResult<()> {
        if row.len() != self.builders.len() {
            return Err(FrameError::SchemaMismatch {
                frame: self.name.clone(),
                expected: self.builders.len(),
                actual: row.len(),
            });
        }
        if let Some(sizes) = &self.layout {
            let expected: usize = sizes.iter().sum();
            if self.rows >= expected {
                return Err(FrameError::ChunkLayoutMismatch {
                    frame: self.name.clone(),
                    expected,
                    actual: self.rows + 1,
                });
            }
        }

        // Validate the whole row before touching any builder so a rejected row leaves no trace.
        for (builder, value) in self.builders.iter().zip(row) {
            builder.check(value)?;
        }
        for (builder, value) in self.builders.iter_mut().zip(row) {
            builder.push(value)?;
        }

        self.rows += 1;
        self.in_chunk += 1;
        self.seal_full_chunks();
        Ok(())
    }

    fn chunk_target(&self) -> Option<usize> {
        match &self.layout {
            Some(sizes) => sizes.get(self.sealed.len()).copied(),
            None => Some(self.options.chunk_rows.max(1)),
        }
    }

    fn seal_full_chunks(&mut self) {
        while let Some(target) = self.chunk_target() {
            if self.in_chunk < target {
                break;
            }
            self.seal_chunk();
        }
    }

    fn seal_chunk(&mut self) {
        for builder in &mut self.builders {
            builder.flush();
        }
        self.sealed.push(self.in_chunk);
        self.in_chunk = 0;
    }

    pub fn finalize(mut self) -> FrameResult<Frame> {
        // Explicit layouts may end in empty chunks.
        self.seal_full_chunks();

        match &self.layout {
            Some(sizes) => {
                if self.sealed.len() != sizes.len() {
                    return Err(FrameError::ChunkLayoutMismatch {
                        frame: self.name.clone(),
                        expected: sizes.iter().sum(),
                        actual: self.rows,
                    });
                }
            }
            None => {
                if self.in_chunk > 0 {
                    self.seal_chunk();
                }
            }
        }

        let layout = ChunkLayout::from_sizes(&self.sealed)?;
        let columns = self.builders.into_iter().map(ColumnBuilder::finish).collect();
        Frame::from_columns(self.name, columns, layout)
    }
}

enum ChunkBuffer {
    Categorical(Vec<u32>),
    Number(Vec<f64>),
    Integer(Vec<i64>),
}

/// Accumulates one column chunk by chunk.
pub(crate) struct ColumnBuilder {
    schema: ColumnSchema,
    domain: Domain,
    current: ChunkBuffer,
    validity: BitVec,
    chunks: Vec<Chunk>,
}

impl ColumnBuilder {
    pub(crate) fn new(schema: ColumnSchema, domain: Option<Domain>) -> Self {
        let current = match schema.column_type {
            ColumnType::Categorical => ChunkBuffer::Categorical(Vec::new()),
            ColumnType::Number => ChunkBuffer::Number(Vec::new()),
            ColumnType::Integer => ChunkBuffer::Integer(Vec::new()),
        };
        Self {
            schema,
            domain: domain.unwrap_or_default(),
            current,
            validity: BitVec::new(),
            chunks: Vec::new(),
        }
    }

    fn preset_levels<I, S>(&mut self, levels: I) -> FrameResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        if self.schema.column_type != ColumnType::Categorical {
            return Err(FrameError::TypeMismatch {
                column: self.schema.name.clone(),
                expected: self.schema.column_type,
                actual: "categorical domain",
            });
        }
        for level in levels {
            self.intern(level.into())?;
        }
        Ok(())
    }

    fn intern(&mut self, level: Arc<str>) -> FrameResult<u32> {
        self.domain
            .intern(level)
            .ok_or_else(|| FrameError::DomainOverflow {
                column: self.schema.name.clone(),
                max: Domain::MAX_LEVELS,
            })
    }

    fn mismatch(&self, value: &Value) -> FrameError {
        FrameError::TypeMismatch {
            column: self.schema.name.clone(),
            expected: self.schema.column_type,
            actual: value.kind(),
        }
    }

    pub(crate) fn check(&self, value: &Value) -> FrameResult<()> {
        let ok = match (self.schema.column_type, value) {
            (_, Value::Null) => true,
            (ColumnType::Categorical, Value::Text(_)) => true,
            (ColumnType::Number, Value::Number(_) | Value::Integer(_)) => true,
            (ColumnType::Integer, Value::Integer(_)) => true,
            (ColumnType::Integer, Value::Number(v)) => integral_i64(*v).is_some(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.mismatch(value))
        }
    }

    pub(crate) fn push(&mut self, value: &Value) -> FrameResult<()> {
        if value.is_null() {
            match &mut self.current {
                ChunkBuffer::Categorical(v) => v.push(0),
                ChunkBuffer::Number(v) => v.push(0.0),
                ChunkBuffer::Integer(v) => v.push(0),
            }
            self.validity.push(false);
            return Ok(());
        }

        match (self.schema.column_type, value) {
            (ColumnType::Categorical, Value::Text(s)) => {
                let code = self.intern(s.clone())?;
                if let ChunkBuffer::Categorical(codes) = &mut self.current {
                    codes.push(code);
                }
            }
            (ColumnType::Number, _) => {
                let v = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                if let ChunkBuffer::Number(values) = &mut self.current {
                    values.push(v);
                }
            }
            (ColumnType::Integer, Value::Integer(v)) => {
                if let ChunkBuffer::Integer(values) = &mut self.current {
                    values.push(*v);
                }
            }
            (ColumnType::Integer, Value::Number(v)) => {
                let v = integral_i64(*v).ok_or_else(|| self.mismatch(value))?;
                if let ChunkBuffer::Integer(values) = &mut self.current {
                    values.push(v);
                }
            }
            _ => return Err(self.mismatch(value)),
        }
        self.validity.push(true);
        Ok(())
    }

    /// Seal the buffered rows into a chunk, even when there are none.
    pub(crate) fn flush(&mut self) {
        let data = match &mut self.current {
            ChunkBuffer::Categorical(v) => ChunkData::Categorical(std::mem::take(v)),
            ChunkBuffer::Number(v) => ChunkData::Number(std::mem::take(v)),
            ChunkBuffer::Integer(v) => ChunkData::Integer(std::mem::take(v)),
        };
        let validity = std::mem::take(&mut self.validity);
        self.chunks.push(Chunk::new(data, Some(validity)));
    }

    pub(crate) fn finish(self) -> Column {
        let domain = match self.schema.column_type {
            ColumnType::Categorical => Some(Arc::new(self.domain)),
            _ => None,
        };
        Column::from_parts(self.schema, domain, self.chunks)
    }
}

/// `v` as an `i64` when it is a whole number inside the `i64` range.
fn integral_i64(v: f64) -> Option<i64> {
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Build a column for `values` along an existing layout.
pub(crate) fn build_column(
    frame: &str,
    schema: ColumnSchema,
    domain: Option<Domain>,
    values: &[Value],
    layout: &ChunkLayout,
) -> FrameResult<Column> {
    if values.len() != layout.row_count() {
        return Err(FrameError::ColumnLengthMismatch {
            frame: frame.to_string(),
            column: schema.name,
            expected: layout.row_count(),
            actual: values.len(),
        });
    }

    let mut builder = ColumnBuilder::new(schema, domain);
    for range in (0..layout.chunk_count()).filter_map(|c| layout.chunk_range(c)) {
        for value in &values[range] {
            builder.check(value)?;
            builder.push(value)?;
        }
        builder.flush();
    }
    Ok(builder.finish())
}
