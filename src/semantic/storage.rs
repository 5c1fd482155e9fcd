//! Binary storage for the local vector collection.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (2)
//! - model_id: [u8; 32] (SHA256 hash of embedder name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_tag: u8 (0 = numeric, 1 = uuid)
//! - id: u64 (little-endian) | len: u16 + utf8 bytes
//! - embedding: [f32; dimensions] (little-endian)
//! - payload_len: u32 + JSON object bytes

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::eid::PointId;
use crate::semantic::index::{Payload, Point};

/// Current file format version
const FORMAT_VERSION: u8 = 2;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

const ID_TAG_NUM: u8 = 0;
const ID_TAG_UUID: u8 = 1;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// Storage manager for vector points.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the collection dimension and every point.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
    ) -> Result<(usize, Vec<Point>), VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        let dimensions = header.dimensions as usize;
        let mut points = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            points.push(Self::read_entry(&mut reader, dimensions)?);
        }

        Ok((dimensions, points))
    }

    /// Save the collection.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save<'a>(
        &self,
        dimensions: usize,
        points: impl ExactSizeIterator<Item = &'a Point>,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(dimensions).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("{dimensions} dimensions exceed u16"))
        })?;
        let temp_path = self.path.with_extension("tmp");

        let result = Self::write_to_file(&temp_path, dimensions, points, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file<'a>(
        path: &Path,
        dimensions: u16,
        points: impl ExactSizeIterator<Item = &'a Point>,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: points.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        for point in points {
            Self::write_entry(&mut writer, point)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];

        // Version check first
        if version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        // Verify checksum (computed over header without checksum field)
        let mut checksum_bytes = [0u8; 4];
        checksum_bytes.copy_from_slice(&header_bytes[43..47]);
        if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&header_bytes[0..43]) {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header_bytes[35..43]);
        let entry_count = u64::from_le_bytes(count_bytes);

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(reader: &mut impl Read, dimensions: usize) -> Result<Point, VectorStorageError> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;

        let id = match tag[0] {
            ID_TAG_NUM => {
                let mut id_bytes = [0u8; 8];
                reader.read_exact(&mut id_bytes)?;
                PointId::Num(u64::from_le_bytes(id_bytes))
            }
            ID_TAG_UUID => {
                let mut len_bytes = [0u8; 2];
                reader.read_exact(&mut len_bytes)?;
                let mut buf = vec![0u8; u16::from_le_bytes(len_bytes) as usize];
                reader.read_exact(&mut buf)?;
                let s = String::from_utf8(buf)
                    .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;
                PointId::Uuid(s)
            }
            other => {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "unknown id tag {other}"
                )))
            }
        };

        let mut vector = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            vector.push(f32::from_le_bytes(float_bytes));
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let mut payload_bytes = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
        reader.read_exact(&mut payload_bytes)?;
        let payload: Payload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;

        Ok(Point {
            id,
            vector,
            payload,
        })
    }

    fn write_entry(writer: &mut impl Write, point: &Point) -> Result<(), VectorStorageError> {
        match &point.id {
            PointId::Num(n) => {
                writer.write_all(&[ID_TAG_NUM])?;
                writer.write_all(&n.to_le_bytes())?;
            }
            PointId::Uuid(s) => {
                let len = u16::try_from(s.len())
                    .map_err(|_| VectorStorageError::InvalidFormat("point id too long".into()))?;
                writer.write_all(&[ID_TAG_UUID])?;
                writer.write_all(&len.to_le_bytes())?;
                writer.write_all(s.as_bytes())?;
            }
        }

        for &value in &point.vector {
            writer.write_all(&value.to_le_bytes())?;
        }

        let payload = serde_json::to_vec(&point.payload)
            .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&payload)?;

        Ok(())
    }
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn points() -> Vec<Point> {
        vec![
            Point {
                id: PointId::Num(1),
                vector: vec![1.0, 0.0, 0.0],
                payload: json!({"schema": "X"}).as_object().cloned().unwrap(),
            },
            Point {
                id: PointId::Uuid("6f1c1f2e-3b4a-4c5d-8e9f-0a1b2c3d4e5f".to_string()),
                vector: vec![0.0, 0.6, 0.8],
                payload: json!({"conversation": [{"role": "user", "message": "ş"}]})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
        ]
    }

    #[test]
    fn test_save_and_load_with_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(tmp.path().join("vectors.bin"));
        let original = points();

        storage.save(3, original.iter(), &test_model_id()).unwrap();
        assert!(storage.exists());

        let (dimensions, loaded) = storage.load(&test_model_id()).unwrap();
        assert_eq!(dimensions, 3);
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_model_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(tmp.path().join("vectors.bin"));
        storage.save(3, [].iter(), &test_model_id()).unwrap();

        let result = storage.load(&[0xFF; 32]);
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        let result = storage.save(3, [].iter(), &test_model_id());

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        storage.save(3, points().iter(), &test_model_id()).unwrap();

        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&test_model_id());
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
    }
}
