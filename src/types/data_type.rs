use eyre::{bail, Result};

/// Column data types, with their on-disk tag values.
///
/// The tag bytes are part of the record wire format and the catalog
/// snapshot format; they must never be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Null = 0,
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Boolean = 5,
}

impl DataType {
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => DataType::Null,
            1 => DataType::Integer,
            2 => DataType::Float,
            3 => DataType::Text,
            4 => DataType::Blob,
            5 => DataType::Boolean,
            _ => bail!("invalid data type tag: {:#04x}", b),
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Null => "NULL",
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Boolean => "BOOLEAN",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_round_trips_through_tag_byte() {
        for ty in [
            DataType::Null,
            DataType::Integer,
            DataType::Float,
            DataType::Text,
            DataType::Blob,
            DataType::Boolean,
        ] {
            assert_eq!(DataType::from_byte(ty.as_byte()).unwrap(), ty);
        }
    }

    #[test]
    fn data_type_rejects_unknown_tag() {
        assert!(DataType::from_byte(6).is_err());
        assert!(DataType::from_byte(0xFF).is_err());
    }
}
