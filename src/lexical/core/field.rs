//! Field catalog.
//!
//! Every field name used in an index is registered once in a [`FieldInfos`]
//! catalog and assigned a stable number in first-seen order. The catalog holds
//! how a field is stored, indexed and vectorized; documents only carry names,
//! values and boosts.
//!
//! # Examples
//!
//! ```
//! use tessera::lexical::core::field::{
//!     FieldDefaults, FieldInfo, FieldInfos, IndexOption, StoreOption, TermVectorOption,
//! };
//!
//! let mut infos = FieldInfos::new(FieldDefaults::default());
//! let id = FieldInfo::new("id", StoreOption::Yes, IndexOption::Untokenized, TermVectorOption::No)
//!     .unwrap();
//! assert_eq!(infos.add_field(id).unwrap(), 0);
//! assert_eq!(infos.get_or_add("body").unwrap(), 1);
//! assert!(infos.get("body").unwrap().is_tokenized());
//! ```

use std::io::{Read, Seek, Write};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::storage::structured::{StructReader, StructWriter};

pub const STORED: u32 = 0x01;
pub const COMPRESSED: u32 = 0x02;
pub const INDEXED: u32 = 0x04;
pub const TOKENIZED: u32 = 0x08;
pub const OMIT_NORMS: u32 = 0x10;
pub const STORE_TERM_VECTOR: u32 = 0x20;
pub const STORE_POSITIONS: u32 = 0x40;
pub const STORE_OFFSETS: u32 = 0x80;

const ALL_BITS: u32 = 0xFF;

/// Whether and how field values are kept in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOption {
    No,
    Yes,
    Compressed,
}

/// Whether and how field values are inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOption {
    No,
    /// Each value is indexed as a single term.
    Untokenized,
    UntokenizedOmitNorms,
    /// Values run through the analyzer.
    Yes,
    YesOmitNorms,
}

/// Which term-vector detail is kept per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermVectorOption {
    No,
    Yes,
    WithPositions,
    WithOffsets,
    WithPositionsOffsets,
}

/// Options applied to field names first seen without explicit registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefaults {
    pub store: StoreOption,
    pub index: IndexOption,
    pub term_vector: TermVectorOption,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        FieldDefaults {
            store: StoreOption::Yes,
            index: IndexOption::Yes,
            term_vector: TermVectorOption::WithPositionsOffsets,
        }
    }
}

impl StoreOption {
    fn bits(self) -> u32 {
        match self {
            StoreOption::No => 0,
            StoreOption::Yes => STORED,
            StoreOption::Compressed => STORED | COMPRESSED,
        }
    }

    fn from_bits(bits: u32) -> Self {
        if bits & COMPRESSED != 0 {
            StoreOption::Compressed
        } else if bits & STORED != 0 {
            StoreOption::Yes
        } else {
            StoreOption::No
        }
    }
}

impl IndexOption {
    fn bits(self) -> u32 {
        match self {
            IndexOption::No => 0,
            IndexOption::Untokenized => INDEXED,
            IndexOption::UntokenizedOmitNorms => INDEXED | OMIT_NORMS,
            IndexOption::Yes => INDEXED | TOKENIZED,
            IndexOption::YesOmitNorms => INDEXED | TOKENIZED | OMIT_NORMS,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match (bits & INDEXED != 0, bits & TOKENIZED != 0, bits & OMIT_NORMS != 0) {
            (false, _, _) => IndexOption::No,
            (true, false, false) => IndexOption::Untokenized,
            (true, false, true) => IndexOption::UntokenizedOmitNorms,
            (true, true, false) => IndexOption::Yes,
            (true, true, true) => IndexOption::YesOmitNorms,
        }
    }
}

impl TermVectorOption {
    fn bits(self) -> u32 {
        match self {
            TermVectorOption::No => 0,
            TermVectorOption::Yes => STORE_TERM_VECTOR,
            TermVectorOption::WithPositions => STORE_TERM_VECTOR | STORE_POSITIONS,
            TermVectorOption::WithOffsets => STORE_TERM_VECTOR | STORE_OFFSETS,
            TermVectorOption::WithPositionsOffsets => {
                STORE_TERM_VECTOR | STORE_POSITIONS | STORE_OFFSETS
            }
        }
    }

    fn from_bits(bits: u32) -> Self {
        if bits & STORE_TERM_VECTOR == 0 {
            return TermVectorOption::No;
        }
        match (bits & STORE_POSITIONS != 0, bits & STORE_OFFSETS != 0) {
            (false, false) => TermVectorOption::Yes,
            (true, false) => TermVectorOption::WithPositions,
            (false, true) => TermVectorOption::WithOffsets,
            (true, true) => TermVectorOption::WithPositionsOffsets,
        }
    }
}

/// One registered field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    name: String,
    number: u32,
    boost: f32,
    bits: u32,
}

impl FieldInfo {
    /// Describe a field. The number is assigned when it joins a catalog.
    pub fn new<S: Into<String>>(
        name: S,
        store: StoreOption,
        index: IndexOption,
        term_vector: TermVectorOption,
    ) -> Result<Self> {
        Self::from_bits(name, store.bits() | index.bits() | term_vector.bits(), 1.0)
    }

    /// Describe a field from raw flag bits.
    pub fn from_bits<S: Into<String>>(name: S, bits: u32, boost: f32) -> Result<Self> {
        let name = name.into();
        validate_bits(&name, bits)?;
        Ok(FieldInfo {
            name,
            number: 0,
            boost,
            bits,
        })
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn is_stored(&self) -> bool {
        self.bits & STORED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.bits & COMPRESSED != 0
    }

    pub fn is_indexed(&self) -> bool {
        self.bits & INDEXED != 0
    }

    pub fn is_tokenized(&self) -> bool {
        self.bits & TOKENIZED != 0
    }

    pub fn omit_norms(&self) -> bool {
        self.bits & OMIT_NORMS != 0
    }

    /// Indexed fields keep a norm byte per document unless norms are omitted.
    pub fn has_norms(&self) -> bool {
        self.is_indexed() && !self.omit_norms()
    }

    pub fn store_term_vector(&self) -> bool {
        self.bits & STORE_TERM_VECTOR != 0
    }

    pub fn store_positions(&self) -> bool {
        self.bits & STORE_POSITIONS != 0
    }

    pub fn store_offsets(&self) -> bool {
        self.bits & STORE_OFFSETS != 0
    }

    pub fn store_option(&self) -> StoreOption {
        StoreOption::from_bits(self.bits)
    }

    pub fn index_option(&self) -> IndexOption {
        IndexOption::from_bits(self.bits)
    }

    pub fn term_vector_option(&self) -> TermVectorOption {
        TermVectorOption::from_bits(self.bits)
    }

    /// Same configuration, ignoring the assigned number.
    fn same_config(&self, other: &FieldInfo) -> bool {
        self.name == other.name && self.bits == other.bits && self.boost == other.boost
    }
}

fn validate_bits(name: &str, bits: u32) -> Result<()> {
    if name.is_empty() {
        return Err(TesseraError::invalid_argument("field name must not be empty"));
    }
    if bits & !ALL_BITS != 0 {
        return Err(TesseraError::invalid_argument(format!(
            "field {name}: unknown flag bits {bits:#x}"
        )));
    }
    if bits & (STORED | INDEXED) == 0 {
        return Err(TesseraError::invalid_argument(format!(
            "field {name} must be stored or indexed"
        )));
    }
    if bits & COMPRESSED != 0 && bits & STORED == 0 {
        return Err(TesseraError::invalid_argument(format!(
            "field {name}: compression requires a stored field"
        )));
    }
    if bits & TOKENIZED != 0 && bits & INDEXED == 0 {
        return Err(TesseraError::invalid_argument(format!(
            "field {name}: tokenization requires an indexed field"
        )));
    }
    if bits & STORE_TERM_VECTOR != 0 && bits & INDEXED == 0 {
        return Err(TesseraError::invalid_argument(format!(
            "field {name}: term vectors require an indexed field"
        )));
    }
    if bits & (STORE_POSITIONS | STORE_OFFSETS) != 0 && bits & STORE_TERM_VECTOR == 0 {
        return Err(TesseraError::invalid_argument(format!(
            "field {name}: term vector positions or offsets require term vectors"
        )));
    }
    Ok(())
}

/// Append-only registry of fields, numbered in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfos {
    defaults: FieldDefaults,
    fields: Vec<FieldInfo>,
    by_name: AHashMap<String, u32>,
}

impl Default for FieldInfos {
    fn default() -> Self {
        Self::new(FieldDefaults::default())
    }
}

impl FieldInfos {
    pub fn new(defaults: FieldDefaults) -> Self {
        FieldInfos {
            defaults,
            fields: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    pub fn defaults(&self) -> FieldDefaults {
        self.defaults
    }

    /// Register a field or return the number of an identical registration.
    pub fn add_field(&mut self, mut info: FieldInfo) -> Result<u32> {
        if let Some(&number) = self.by_name.get(info.name()) {
            let existing = &self.fields[number as usize];
            if existing.same_config(&info) {
                return Ok(number);
            }
            return Err(TesseraError::invalid_argument(format!(
                "field {} is already registered with different options",
                info.name()
            )));
        }
        let number = self.fields.len() as u32;
        info.number = number;
        self.by_name.insert(info.name.clone(), number);
        self.fields.push(info);
        Ok(number)
    }

    /// Number of `name`, registering it with the catalog defaults if needed.
    pub fn get_or_add(&mut self, name: &str) -> Result<u32> {
        if let Some(&number) = self.by_name.get(name) {
            return Ok(number);
        }
        let info = FieldInfo::new(
            name,
            self.defaults.store,
            self.defaults.index,
            self.defaults.term_vector,
        )?;
        self.add_field(info)
    }

    pub fn get(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name).map(|&n| &self.fields[n as usize])
    }

    pub fn get_by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.fields.get(number as usize)
    }

    pub fn number_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Unregister every field numbered `len` or above.
    pub fn truncate(&mut self, len: usize) {
        for info in self.fields.drain(len.min(self.fields.len())..) {
            self.by_name.remove(info.name());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    /// Whether any field stores term vectors.
    pub fn has_vectors(&self) -> bool {
        self.fields.iter().any(|f| f.store_term_vector())
    }

    /// Fold `other` into this catalog, OR-ing the flags of shared names.
    ///
    /// Returns the remap table: entry `i` is the number in this catalog of
    /// field `i` of `other`.
    pub fn merge(&mut self, other: &FieldInfos) -> Result<Vec<u32>> {
        let mut remap = Vec::with_capacity(other.len());
        for field in other.iter() {
            match self.by_name.get(field.name()).copied() {
                Some(number) => {
                    let existing = &mut self.fields[number as usize];
                    let bits = existing.bits | field.bits;
                    validate_bits(field.name(), bits)?;
                    existing.bits = bits;
                    remap.push(number);
                }
                None => {
                    let mut info = field.clone();
                    info.number = 0;
                    remap.push(self.add_field(info)?);
                }
            }
        }
        Ok(remap)
    }

    pub fn write<W: Write>(&self, writer: &mut StructWriter<W>) -> Result<()> {
        writer.write_u8(self.defaults.store.bits() as u8)?;
        writer.write_u8(self.defaults.index.bits() as u8)?;
        writer.write_u8(self.defaults.term_vector.bits() as u8)?;
        writer.write_vint(self.fields.len() as u32)?;
        for field in &self.fields {
            writer.write_string(&field.name)?;
            writer.write_f32(field.boost)?;
            writer.write_vint(field.bits)?;
        }
        Ok(())
    }

    pub fn read<R: Read + Seek>(reader: &mut StructReader<R>) -> Result<Self> {
        let defaults = FieldDefaults {
            store: StoreOption::from_bits(reader.read_u8()? as u32),
            index: IndexOption::from_bits(reader.read_u8()? as u32),
            term_vector: TermVectorOption::from_bits(reader.read_u8()? as u32),
        };
        let count = reader.read_vint()?;
        let mut infos = FieldInfos::new(defaults);
        for _ in 0..count {
            let name = reader.read_string()?;
            let boost = reader.read_f32()?;
            let bits = reader.read_vint()?;
            let info = FieldInfo::from_bits(name, bits, boost)
                .map_err(|e| TesseraError::corrupt(format!("bad field entry: {e}")))?;
            infos.add_field(info)?;
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn text_field(name: &str) -> FieldInfo {
        FieldInfo::new(
            name,
            StoreOption::Yes,
            IndexOption::Yes,
            TermVectorOption::WithPositionsOffsets,
        )
        .unwrap()
    }

    #[test]
    fn test_register_or_get() {
        let mut infos = FieldInfos::default();
        assert_eq!(infos.add_field(text_field("title")).unwrap(), 0);
        assert_eq!(infos.add_field(text_field("body")).unwrap(), 1);
        assert_eq!(infos.add_field(text_field("title")).unwrap(), 0);
        assert_eq!(infos.len(), 2);

        let conflicting = FieldInfo::new(
            "title",
            StoreOption::No,
            IndexOption::Yes,
            TermVectorOption::No,
        )
        .unwrap();
        assert!(matches!(
            infos.add_field(conflicting),
            Err(TesseraError::InvalidArgument(_))
        ));
        assert_eq!(infos.get_by_number(1).unwrap().name(), "body");
        assert_eq!(infos.number_of("missing"), None);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(FieldInfo::new("f", StoreOption::Yes, IndexOption::No, TermVectorOption::Yes).is_err());
        assert!(FieldInfo::new("f", StoreOption::No, IndexOption::No, TermVectorOption::No).is_err());
        assert!(FieldInfo::from_bits("f", INDEXED | STORE_POSITIONS, 1.0).is_err());
        assert!(FieldInfo::from_bits("f", COMPRESSED | INDEXED, 1.0).is_err());
        assert!(FieldInfo::from_bits("", STORED, 1.0).is_err());
    }

    #[test]
    fn test_option_bits_roundtrip() {
        let info = FieldInfo::new(
            "f",
            StoreOption::Compressed,
            IndexOption::UntokenizedOmitNorms,
            TermVectorOption::WithOffsets,
        )
        .unwrap();
        assert_eq!(info.store_option(), StoreOption::Compressed);
        assert_eq!(info.index_option(), IndexOption::UntokenizedOmitNorms);
        assert_eq!(info.term_vector_option(), TermVectorOption::WithOffsets);
        assert!(!info.has_norms());
        assert!(info.store_offsets() && !info.store_positions());
    }

    #[test]
    fn test_merge_unions_bits_and_remaps() {
        let mut a = FieldInfos::default();
        a.add_field(FieldInfo::new("x", StoreOption::Yes, IndexOption::No, TermVectorOption::No).unwrap())
            .unwrap();
        a.add_field(text_field("y")).unwrap();

        let mut b = FieldInfos::default();
        b.add_field(text_field("z")).unwrap();
        b.add_field(
            FieldInfo::new("x", StoreOption::No, IndexOption::Untokenized, TermVectorOption::No).unwrap(),
        )
        .unwrap();

        let remap = a.merge(&b).unwrap();
        assert_eq!(remap, vec![2, 0]);
        let x = a.get("x").unwrap();
        assert!(x.is_stored() && x.is_indexed());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut infos = FieldInfos::new(FieldDefaults {
            store: StoreOption::No,
            index: IndexOption::YesOmitNorms,
            term_vector: TermVectorOption::No,
        });
        infos.add_field(text_field("title").with_boost(2.5)).unwrap();
        infos.get_or_add("body").unwrap();

        let mut w = StructWriter::in_memory();
        infos.write(&mut w).unwrap();
        let mut r = StructReader::new(Cursor::new(w.into_inner()));
        let read = FieldInfos::read(&mut r).unwrap();
        assert_eq!(read, infos);
        assert_eq!(read.get("title").unwrap().boost(), 2.5);
        assert_eq!(read.get("body").unwrap().index_option(), IndexOption::YesOmitNorms);
    }
}
