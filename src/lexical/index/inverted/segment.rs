//! Segment descriptors and the generation commit protocol.
//!
//! Every commit writes a new `segments_<gen>` file; files are never rewritten
//! in place. Readers discover the newest generation with
//! [`find_segments_file`], which tolerates a writer committing concurrently.
//!
//! Descriptor layout:
//!
//! ```text
//! u32 magic, u32 format, u64 version, u64 counter
//! field catalog
//! vint segment count
//! per segment: string name, vint doc count, vlong deletion gen,
//!              u8 compound flag, vint norm count, vlong norm gen + 1 (0 = none)
//! u32 crc32 of everything above
//! ```

use std::io::{Cursor, Read};

use log::{debug, warn};

use crate::error::{Result, TesseraError};
use crate::lexical::core::field::FieldInfos;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};
use crate::util::id::{self, SEGMENTS_GEN};

/// Leading bytes of every commit descriptor ("TSSR").
pub const SEGMENTS_MAGIC: u32 = 0x5453_5352;

/// Current descriptor format.
pub const FORMAT: u32 = 1;

/// How many generations past the last known one are tried blindly.
pub const GEN_LOOKAHEAD_COUNT: u64 = 10;

/// Per-segment files bundled into a compound file.
pub const SEGMENT_EXTENSIONS: [&str; 7] = ["tis", "tix", "tfx", "frq", "prx", "fdt", "fdx"];

pub const COMPOUND_EXTENSION: &str = "cfs";
pub const DELETIONS_EXTENSION: &str = "del";

/// Metadata of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub name: String,
    pub doc_count: u32,
    /// Generation of the deletions file; 0 when the segment has none.
    pub del_gen: u64,
    pub use_compound_file: bool,
    /// Per field number: `None` when the segment has no norms for the field,
    /// `Some(0)` for the norms written with the segment, `Some(g)` for norms
    /// rewritten at generation `g`.
    pub norm_gens: Vec<Option<u64>>,
}

impl SegmentInfo {
    pub fn new<S: Into<String>>(name: S, doc_count: u32) -> Self {
        SegmentInfo {
            name: name.into(),
            doc_count,
            del_gen: 0,
            use_compound_file: false,
            norm_gens: Vec::new(),
        }
    }

    pub fn has_deletions(&self) -> bool {
        self.del_gen > 0
    }

    pub fn del_file_name(&self) -> Option<String> {
        (self.del_gen > 0)
            .then(|| id::generation_file_name(&self.name, self.del_gen, DELETIONS_EXTENSION))
    }

    pub fn advance_del_gen(&mut self) {
        self.del_gen += 1;
    }

    pub fn norm_gen(&self, field: u32) -> Option<u64> {
        self.norm_gens.get(field as usize).copied().flatten()
    }

    pub fn has_norms(&self, field: u32) -> bool {
        self.norm_gen(field).is_some()
    }

    /// Name of the norms file of `field`, if the segment has norms for it.
    ///
    /// Generation 0 norms live next to the other segment files (inside the
    /// compound file when there is one); later generations are always
    /// separate files.
    pub fn norm_file_name(&self, field: u32) -> Option<String> {
        match self.norm_gen(field)? {
            0 => Some(id::segment_file_name(&self.name, &format!("f{field}"))),
            generation => Some(id::generation_file_name(
                &self.name,
                generation,
                &format!("s{field}"),
            )),
        }
    }

    /// Whether the norms of `field` are read from the segment's own files
    /// rather than a separate generation file.
    pub fn norms_in_segment(&self, field: u32) -> bool {
        self.norm_gen(field) == Some(0)
    }

    pub fn advance_norm_gen(&mut self, field: u32) {
        let idx = field as usize;
        if self.norm_gens.len() <= idx {
            self.norm_gens.resize(idx + 1, None);
        }
        self.norm_gens[idx] = Some(self.norm_gens[idx].unwrap_or(0) + 1);
    }

    pub fn compound_file_name(&self) -> String {
        id::segment_file_name(&self.name, COMPOUND_EXTENSION)
    }

    /// Files written with the segment, before any compound wrapping.
    pub fn core_files(&self) -> Vec<String> {
        let mut files: Vec<String> = SEGMENT_EXTENSIONS
            .iter()
            .map(|ext| id::segment_file_name(&self.name, ext))
            .collect();
        for (field, generation) in self.norm_gens.iter().enumerate() {
            if *generation == Some(0) {
                files.push(id::segment_file_name(&self.name, &format!("f{field}")));
            }
        }
        files
    }

    /// Every file this segment currently references.
    pub fn files(&self) -> Vec<String> {
        let mut files = if self.use_compound_file {
            vec![self.compound_file_name()]
        } else {
            self.core_files()
        };
        if let Some(del) = self.del_file_name() {
            files.push(del);
        }
        for (field, generation) in self.norm_gens.iter().enumerate() {
            if let Some(g) = generation.filter(|g| *g > 0) {
                files.push(id::generation_file_name(&self.name, g, &format!("s{field}")));
            }
        }
        files
    }
}

/// The durable commit record: segment list, field catalog and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfos {
    pub format: u32,
    /// Bumped on every commit.
    pub version: u64,
    /// Source of new segment names.
    pub counter: u64,
    /// Generation of the descriptor this was read from or last written to.
    pub generation: u64,
    pub field_infos: FieldInfos,
    pub segments: Vec<SegmentInfo>,
}

impl SegmentInfos {
    pub fn new(field_infos: FieldInfos) -> Self {
        SegmentInfos {
            format: FORMAT,
            version: 0,
            counter: 0,
            generation: 0,
            field_infos,
            segments: Vec::new(),
        }
    }

    /// Allocate the next segment name.
    pub fn next_segment_name(&mut self) -> String {
        let name = id::segment_name(self.counter);
        self.counter += 1;
        name
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Documents across all segments, deleted ones included.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }

    /// Name of the descriptor for the current generation.
    pub fn segments_file_name(&self) -> String {
        id::segments_file_name(self.generation)
    }

    /// Every file referenced by this commit, the descriptor included.
    pub fn files(&self) -> Vec<String> {
        let mut files = Vec::new();
        if self.generation > 0 {
            files.push(self.segments_file_name());
        }
        for segment in &self.segments {
            files.extend(segment.files());
        }
        files
    }

    /// Read and verify one descriptor.
    pub fn read(storage: &dyn Storage, file_name: &str) -> Result<Self> {
        let generation = id::parse_segments_generation(file_name).ok_or_else(|| {
            TesseraError::invalid_argument(format!("{file_name} is not a segments file"))
        })?;

        let mut bytes = Vec::new();
        storage.open_input(file_name)?.read_to_end(&mut bytes)?;
        if bytes.len() < 4 {
            return Err(TesseraError::corrupt(format!("{file_name} is truncated")));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != stored_crc {
            return Err(TesseraError::corrupt(format!(
                "checksum mismatch in {file_name}"
            )));
        }

        let mut reader = StructReader::new(Cursor::new(body));
        let magic = reader.read_u32()?;
        if magic != SEGMENTS_MAGIC {
            return Err(TesseraError::corrupt(format!(
                "bad magic {magic:#x} in {file_name}"
            )));
        }
        let format = reader.read_u32()?;
        if format > FORMAT {
            return Err(TesseraError::corrupt(format!(
                "unknown descriptor format {format} in {file_name}"
            )));
        }
        let version = reader.read_u64()?;
        let counter = reader.read_u64()?;
        let field_infos = FieldInfos::read(&mut reader)?;

        let count = reader.read_vint()?;
        let mut segments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = reader.read_string()?;
            let doc_count = reader.read_vint()?;
            let del_gen = reader.read_vlong()?;
            let use_compound_file = reader.read_u8()? != 0;
            let norm_count = reader.read_vint()?;
            let mut norm_gens = Vec::with_capacity(norm_count as usize);
            for _ in 0..norm_count {
                norm_gens.push(reader.read_vlong()?.checked_sub(1));
            }
            segments.push(SegmentInfo {
                name,
                doc_count,
                del_gen,
                use_compound_file,
                norm_gens,
            });
        }

        Ok(SegmentInfos {
            format,
            version,
            counter,
            generation,
            field_infos,
            segments,
        })
    }

    /// Load the newest readable commit.
    pub fn read_current(storage: &dyn Storage) -> Result<Self> {
        find_segments_file(storage, |storage, file| SegmentInfos::read(storage, file))
    }

    /// Version of the newest readable commit.
    pub fn read_current_version(storage: &dyn Storage) -> Result<u64> {
        find_segments_file(storage, |storage, file| {
            SegmentInfos::read(storage, file).map(|infos| infos.version)
        })
    }

    /// Whether the storage holds any commit descriptor.
    pub fn exists(storage: &dyn Storage) -> Result<bool> {
        Ok(max_listed_generation(storage)?.is_some())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = StructWriter::in_memory();
        writer.write_u32(SEGMENTS_MAGIC)?;
        writer.write_u32(self.format)?;
        writer.write_u64(self.version)?;
        writer.write_u64(self.counter)?;
        self.field_infos.write(&mut writer)?;
        writer.write_vint(self.segments.len() as u32)?;
        for segment in &self.segments {
            writer.write_string(&segment.name)?;
            writer.write_vint(segment.doc_count)?;
            writer.write_vlong(segment.del_gen)?;
            writer.write_u8(segment.use_compound_file as u8)?;
            writer.write_vint(segment.norm_gens.len() as u32)?;
            for generation in &segment.norm_gens {
                writer.write_vlong(generation.map_or(0, |g| g + 1))?;
            }
        }
        let mut bytes = writer.into_inner();
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    /// Write the next generation of the descriptor.
    ///
    /// On success `generation` and `version` are advanced and the name of the
    /// new descriptor is returned; the previous descriptor is left for the
    /// caller to hand to the deleter. On failure both are restored and any
    /// partial file is removed.
    pub fn write(&mut self, storage: &dyn Storage) -> Result<String> {
        let previous = (self.generation, self.version);
        self.generation += 1;
        self.version += 1;
        let file_name = self.segments_file_name();

        let result = self.encode().and_then(|bytes| {
            let mut writer = StructWriter::new(storage.create_output(&file_name)?);
            writer.write_bytes(&bytes)?;
            writer.close()
        });
        if let Err(e) = result {
            (self.generation, self.version) = previous;
            if storage.file_exists(&file_name) {
                let _ = storage.delete_file(&file_name);
            }
            return Err(e);
        }

        if let Err(e) = write_generation_pointer(storage, self.generation) {
            warn!("Failed to write {SEGMENTS_GEN} for generation {}: {e}", self.generation);
        }
        debug!("Wrote {file_name} (version {})", self.version);
        Ok(file_name)
    }
}

fn write_generation_pointer(storage: &dyn Storage, generation: u64) -> Result<()> {
    let mut writer = StructWriter::new(storage.create_output(SEGMENTS_GEN)?);
    writer.write_u64(generation)?;
    writer.write_u64(generation)?;
    writer.close()
}

/// Generation recorded in `segments.gen`, when both copies agree.
pub fn read_generation_pointer(storage: &dyn Storage) -> Option<u64> {
    let input = storage.open_input(SEGMENTS_GEN).ok()?;
    let mut reader = StructReader::new(input);
    let first = reader.read_u64().ok()?;
    let second = reader.read_u64().ok()?;
    (first == second).then_some(first)
}

/// Highest generation among the descriptors present in the listing.
pub fn max_listed_generation(storage: &dyn Storage) -> Result<Option<u64>> {
    Ok(storage
        .list_files()?
        .iter()
        .filter_map(|f| id::parse_segments_generation(f))
        .max())
}

/// Run `load` against the newest commit descriptor.
///
/// The generation is taken from the directory listing. When the listing
/// shows no progress past the last attempt, the pointer file is consulted
/// (trusted only when both copies agree and point further), then the same
/// generation is retried once, then up to [`GEN_LOOKAHEAD_COUNT`] later
/// generations are tried blindly. Once a transient failure has been seen
/// and no route makes progress, the generation before the first failing one
/// is tried if it exists; otherwise the first failure is returned.
pub fn find_segments_file<T, F>(storage: &dyn Storage, mut load: F) -> Result<T>
where
    F: FnMut(&dyn Storage, &str) -> Result<T>,
{
    let mut last_gen: Option<u64> = None;
    let mut retried_same = false;
    let mut lookaheads = 0;
    let mut first_failure: Option<(u64, TesseraError)> = None;

    loop {
        let listed = max_listed_generation(storage)?;
        let generation = match (listed, last_gen) {
            (None, None) => {
                match read_generation_pointer(storage) {
                    Some(g) if g > 0 => g,
                    _ => return Err(TesseraError::not_found("no segments file in storage")),
                }
            }
            (Some(g), Some(last)) if g > last => g,
            (Some(g), None) => g,
            (_, Some(last)) => match read_generation_pointer(storage) {
                Some(g) if g > last => {
                    debug!("Listing is stale at generation {last}; {SEGMENTS_GEN} points to {g}");
                    g
                }
                _ if !retried_same && first_failure.is_some() => {
                    retried_same = true;
                    last
                }
                _ if lookaheads < GEN_LOOKAHEAD_COUNT && first_failure.is_some() => {
                    lookaheads += 1;
                    debug!("Trying generation {} past the listing", last + 1);
                    last + 1
                }
                _ => break,
            },
        };

        let file_name = id::segments_file_name(generation);
        match load(storage, &file_name) {
            Ok(value) => {
                debug!("Loaded commit generation {generation}");
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                debug!("Failed to load {file_name}: {e}");
                if first_failure.is_none() {
                    first_failure = Some((generation, e));
                }
                last_gen = Some(last_gen.map_or(generation, |g| g.max(generation)));
            }
            Err(e) => return Err(e),
        }
    }

    let Some((failed_gen, error)) = first_failure else {
        return Err(TesseraError::not_found("no readable segments file in storage"));
    };
    if failed_gen > 1 {
        let previous = id::segments_file_name(failed_gen - 1);
        if storage.file_exists(&previous) {
            warn!(
                "Falling back to {previous} after {} failed: {error}",
                id::segments_file_name(failed_gen)
            );
            return load(storage, &previous);
        }
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::core::field::{FieldInfo, IndexOption, StoreOption, TermVectorOption};
    use crate::storage::memory::MemoryStorage;

    fn sample_infos() -> SegmentInfos {
        let mut fields = FieldInfos::default();
        fields
            .add_field(
                FieldInfo::new("f", StoreOption::Yes, IndexOption::Yes, TermVectorOption::No)
                    .unwrap(),
            )
            .unwrap();
        let mut infos = SegmentInfos::new(fields);
        let name = infos.next_segment_name();
        let mut segment = SegmentInfo::new(name, 3);
        segment.norm_gens = vec![Some(0)];
        infos.segments.push(segment);
        infos
    }

    #[test]
    fn test_write_read_roundtrip() {
        let storage = MemoryStorage::default();
        let mut infos = sample_infos();
        assert_eq!(infos.write(&storage).unwrap(), "segments_1");
        assert_eq!(infos.version, 1);
        assert_eq!(read_generation_pointer(&storage), Some(1));

        let read = SegmentInfos::read_current(&storage).unwrap();
        assert_eq!(read, infos);
        assert_eq!(SegmentInfos::read_current_version(&storage).unwrap(), 1);
    }

    #[test]
    fn test_segment_files() {
        let mut segment = SegmentInfo::new("_0", 10);
        segment.norm_gens = vec![Some(0), None, Some(0)];
        assert!(segment.files().contains(&"_0.f2".to_string()));
        assert_eq!(segment.norm_file_name(1), None);

        segment.advance_del_gen();
        segment.advance_norm_gen(2);
        segment.use_compound_file = true;
        assert_eq!(segment.files(), vec!["_0.cfs", "_0_1.del", "_0_1.s2"]);
        assert_eq!(segment.norm_file_name(0).unwrap(), "_0.f0");
        assert!(!segment.norms_in_segment(2));
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let storage = MemoryStorage::default();
        let mut infos = sample_infos();
        infos.write(&storage).unwrap();

        let mut bytes = Vec::new();
        storage
            .open_input("segments_1")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        bytes[10] ^= 0xFF;
        storage.put_file("segments_1", bytes);
        assert!(matches!(
            SegmentInfos::read(&storage, "segments_1"),
            Err(TesseraError::Corrupt(_))
        ));
    }

    #[test]
    fn test_falls_back_to_previous_generation() {
        let storage = MemoryStorage::default();
        let mut infos = sample_infos();
        infos.write(&storage).unwrap();
        storage.put_file("segments_2", b"partially written".to_vec());

        let read = SegmentInfos::read_current(&storage).unwrap();
        assert_eq!(read.generation, 1);
    }

    #[test]
    fn test_reads_newest_generation() {
        let storage = MemoryStorage::default();
        let mut infos = sample_infos();
        infos.write(&storage).unwrap();
        infos.write(&storage).unwrap();
        storage.delete_file("segments_1").unwrap();
        assert_eq!(SegmentInfos::read_current(&storage).unwrap().generation, 2);
    }

    /// Storage whose listing was captured earlier and no longer matches the
    /// files actually present.
    #[derive(Debug)]
    struct FrozenListing {
        inner: MemoryStorage,
        listing: Vec<String>,
    }

    impl Storage for FrozenListing {
        fn open_input(&self, name: &str) -> Result<Box<dyn crate::storage::StorageInput>> {
            self.inner.open_input(name)
        }
        fn create_output(&self, name: &str) -> Result<Box<dyn crate::storage::StorageOutput>> {
            self.inner.create_output(name)
        }
        fn file_exists(&self, name: &str) -> bool {
            self.inner.file_exists(name)
        }
        fn delete_file(&self, name: &str) -> Result<()> {
            self.inner.delete_file(name)
        }
        fn rename_file(&self, from: &str, to: &str) -> Result<()> {
            self.inner.rename_file(from, to)
        }
        fn file_size(&self, name: &str) -> Result<u64> {
            self.inner.file_size(name)
        }
        fn list_files(&self) -> Result<Vec<String>> {
            Ok(self.listing.clone())
        }
        fn create_lock(&self, name: &str) -> Result<Box<dyn crate::storage::StorageLock>> {
            self.inner.create_lock(name)
        }
    }

    /// Generation found by `find_segments_file` plus every file it tried.
    fn discover(storage: &dyn Storage) -> (u64, Vec<String>) {
        let mut attempts = Vec::new();
        let infos = find_segments_file(storage, |storage, name| {
            attempts.push(name.to_string());
            SegmentInfos::read(storage, name)
        })
        .unwrap();
        (infos.generation, attempts)
    }

    /// Three commits, with the listing frozen after the second and the
    /// second descriptor removed since.
    fn stale_after_second_commit() -> FrozenListing {
        let inner = MemoryStorage::default();
        let mut infos = sample_infos();
        infos.write(&inner).unwrap();
        infos.write(&inner).unwrap();
        let listing = inner.list_files().unwrap();
        infos.write(&inner).unwrap();
        inner.delete_file("segments_1").unwrap();
        inner.delete_file("segments_2").unwrap();
        FrozenListing { inner, listing }
    }

    fn put_pointer(storage: &MemoryStorage, first: u64, second: u64) {
        let mut bytes = first.to_le_bytes().to_vec();
        bytes.extend_from_slice(&second.to_le_bytes());
        storage.put_file(SEGMENTS_GEN, bytes);
    }

    #[test]
    fn test_pointer_file_overtakes_stale_listing() {
        let storage = stale_after_second_commit();
        assert_eq!(read_generation_pointer(&storage), Some(3));

        let (generation, attempts) = discover(&storage);
        assert_eq!(generation, 3);
        assert_eq!(attempts, vec!["segments_2", "segments_3"]);
    }

    #[test]
    fn test_disagreeing_pointer_copies_are_ignored() {
        let storage = stale_after_second_commit();
        put_pointer(&storage.inner, 3, 9);
        assert_eq!(read_generation_pointer(&storage), None);

        // Retry the listed generation once, then look past it
        let (generation, attempts) = discover(&storage);
        assert_eq!(generation, 3);
        assert_eq!(attempts, vec!["segments_2", "segments_2", "segments_3"]);
    }

    #[test]
    fn test_lookahead_finds_unlisted_generation() {
        let inner = MemoryStorage::default();
        let mut infos = sample_infos();
        infos.write(&inner).unwrap();
        let listing = inner.list_files().unwrap();
        for _ in 0..3 {
            infos.write(&inner).unwrap();
        }
        for file in ["segments_1", "segments_2", "segments_3", SEGMENTS_GEN] {
            inner.delete_file(file).unwrap();
        }
        let storage = FrozenListing { inner, listing };

        // Only segments_4 exists and nothing points at it
        let (generation, attempts) = discover(&storage);
        assert_eq!(generation, 4);
        assert_eq!(
            attempts,
            vec!["segments_1", "segments_1", "segments_2", "segments_3", "segments_4"]
        );
    }

    #[test]
    fn test_empty_storage_is_not_found() {
        let storage = MemoryStorage::default();
        assert!(!SegmentInfos::exists(&storage).unwrap());
        assert!(matches!(
            SegmentInfos::read_current(&storage),
            Err(TesseraError::NotFound(_))
        ));
    }
}
