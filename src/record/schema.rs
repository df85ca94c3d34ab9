use std::str::FromStr;

use super::error::{RecordError, RecordResult};
use super::value::{DataType, Value};

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Get the size of this column in bytes
    pub fn size(&self) -> usize {
        self.data_type.size()
    }
}

/// Column layout of a fixed-length record payload.
///
/// A payload is `ceil(columns / 8)` bytes of null bitmap (bit set = NULL,
/// column `i` at byte `i / 8`, bit `i % 8`) followed by each column's
/// encoding in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
    null_bitmap_size: usize,
    record_size: usize,
}

impl TableSchema {
    /// Create a new table schema
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let null_bitmap_size = columns.len().div_ceil(8);
        let record_size = null_bitmap_size + columns.iter().map(|c| c.size()).sum::<usize>();

        Self {
            columns,
            null_bitmap_size,
            record_size,
        }
    }

    /// Get all columns
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Get NULL bitmap size in bytes
    pub fn null_bitmap_size(&self) -> usize {
        self.null_bitmap_size
    }

    /// Get total record size in bytes (including NULL bitmap)
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Get the byte offset of a column within a record (after NULL bitmap)
    pub fn column_offset(&self, col_idx: usize) -> usize {
        self.null_bitmap_size
            + self.columns[..col_idx]
                .iter()
                .map(|c| c.size())
                .sum::<usize>()
    }

    /// Encode one value per column into a payload of `record_size()` bytes
    pub fn encode(&self, values: &[Value]) -> RecordResult<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "Expected {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut data = vec![0u8; self.null_bitmap_size];
        data.reserve(self.record_size - self.null_bitmap_size);
        for (i, (value, col)) in values.iter().zip(&self.columns).enumerate() {
            if value.is_null() {
                data[i / 8] |= 1 << (i % 8);
            }
            data.extend(value.serialize(&col.data_type, &col.name)?);
        }

        Ok(data)
    }

    /// Decode a payload produced by [`TableSchema::encode`]
    pub fn decode(&self, data: &[u8]) -> RecordResult<Vec<Value>> {
        if data.len() != self.record_size {
            return Err(RecordError::InvalidRecordLength {
                expected: self.record_size,
                actual: data.len(),
            });
        }

        let mut offset = self.null_bitmap_size;
        self.columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let is_null = data[i / 8] & (1 << (i % 8)) != 0;
                let bytes = &data[offset..offset + col.size()];
                offset += col.size();
                Value::deserialize(bytes, &col.data_type, is_null)
            })
            .collect()
    }
}

impl FromStr for TableSchema {
    type Err = RecordError;

    /// Parse a comma separated column list such as
    /// `id:INT,name:VARCHAR(16),FLOAT`. Unnamed columns are called `c<i>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let columns = s
            .split(',')
            .enumerate()
            .map(|(i, part)| match part.split_once(':') {
                Some((name, ty)) => Ok(ColumnDef::new(name.trim(), ty.parse()?)),
                None => Ok(ColumnDef::new(format!("c{}", i), part.parse()?)),
            })
            .collect::<RecordResult<Vec<_>>>()?;

        Ok(Self::new(columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("name", DataType::Varchar(20)),
            ColumnDef::new("score", DataType::Float),
        ])
    }

    #[test]
    fn test_schema_creation() {
        let schema = create_test_schema();
        assert_eq!(schema.column_count(), 3);
        assert_eq!(schema.null_bitmap_size(), 1);
        assert_eq!(schema.record_size(), 1 + 8 + 20 + 8);
    }

    #[test]
    fn test_column_offset() {
        let schema = create_test_schema();
        assert_eq!(schema.column_offset(0), 1);
        assert_eq!(schema.column_offset(1), 1 + 8);
        assert_eq!(schema.column_offset(2), 1 + 8 + 20);
    }

    #[test]
    fn test_find_column() {
        let schema = create_test_schema();
        assert_eq!(schema.find_column("name"), Some(1));
        assert_eq!(schema.find_column("nonexistent"), None);
    }

    #[test]
    fn test_encode_decode() {
        let schema = create_test_schema();
        let cases = vec![
            vec![
                Value::Int(1),
                Value::String("Alice".to_string()),
                Value::Float(95.5),
            ],
            vec![Value::Int(-7), Value::Null, Value::Null],
            vec![Value::Null, Value::String(String::new()), Value::Float(0.0)],
        ];

        for values in cases {
            let data = schema.encode(&values).unwrap();
            assert_eq!(data.len(), schema.record_size());
            assert_eq!(schema.decode(&data).unwrap(), values);
        }
    }

    #[test]
    fn test_null_bitmap_layout() {
        let schema = create_test_schema();
        let data = schema
            .encode(&[Value::Int(3), Value::Null, Value::Null])
            .unwrap();

        assert_eq!(data[0], 0b0000_0110);
        assert_eq!(&data[1..9], &3i64.to_le_bytes());
        assert!(data[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_null_bitmap_spans_bytes() {
        let columns = (0..9)
            .map(|i| ColumnDef::new(format!("c{}", i), DataType::Int))
            .collect();
        let schema = TableSchema::new(columns);
        assert_eq!(schema.null_bitmap_size(), 2);

        let mut values = vec![Value::Int(1); 9];
        values[8] = Value::Null;
        let data = schema.encode(&values).unwrap();
        assert_eq!(&data[..2], &[0, 1]);
        assert_eq!(schema.decode(&data).unwrap(), values);
    }

    #[test]
    fn test_encode_column_count_mismatch() {
        let schema = create_test_schema();
        assert!(matches!(
            schema.encode(&[Value::Int(1)]),
            Err(RecordError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_encode_type_mismatch() {
        let schema = create_test_schema();
        let values = vec![
            Value::String("not_an_int".to_string()),
            Value::Null,
            Value::Null,
        ];
        assert!(matches!(
            schema.encode(&values),
            Err(RecordError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_wrong_length() {
        let schema = create_test_schema();
        assert!(matches!(
            schema.decode(&[0u8; 10]),
            Err(RecordError::InvalidRecordLength {
                expected: 37,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_parse_schema() {
        let schema: TableSchema = "id:INT, name:varchar(16),FLOAT".parse().unwrap();
        assert_eq!(
            schema.columns(),
            &[
                ColumnDef::new("id", DataType::Int),
                ColumnDef::new("name", DataType::Varchar(16)),
                ColumnDef::new("c2", DataType::Float),
            ]
        );
        assert_eq!(schema.record_size(), 1 + 8 + 16 + 8);

        assert!("id:INT,bad:BLOB".parse::<TableSchema>().is_err());
    }
}
