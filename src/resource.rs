use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use num_traits::FromPrimitive;
use thiserror::Error;

mod decompress;
pub mod vocab;

use decompress::CompressionType;

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    View,
    Pic,
    Script,
    Text,
    Sound,
    Memory,
    Vocab,
    Font,
    Cursor,
    Patch,
    Bitmap,
    Palette,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: ResourceType,
    pub number: u16,
    pub data: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("resource map is malformed at record {0}")]
    InvalidMap(usize),
    #[error("{0:?} {1} uses unknown compression method {2}")]
    UnknownCompression(ResourceType, u16, u16),
    #[error("{0:?} {1} failed to decompress: {2}")]
    Decompression(ResourceType, u16, String),
    #[error("{0:?} {1} header does not match the resource map")]
    HeaderMismatch(ResourceType, u16),
}

pub trait ResourceProvider {
    fn find_resource(&self, resource_type: ResourceType, number: u16) -> Option<&Resource>;
}

pub(crate) struct ResourceMapEntry {
    resource_type: ResourceType,
    resource_number: u16,
    resource_file_number: u8,
    resource_file_offset: u32,
}

#[derive(Default, Debug)]
pub struct ResourceManager {
    resources: HashMap<(ResourceType, u16), Resource>,
}

impl ResourceManager {
    pub fn load(game_path: &Path) -> Result<Self, ResourceError> {
        let map = read_resource_map(&game_path.join("resource.map"))?;
        let mut volumes: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut manager = ResourceManager::default();

        for entry in &map {
            if !volumes.contains_key(&entry.resource_file_number) {
                let path = game_path.join(format!("resource.{:03}", entry.resource_file_number));
                let data = std::fs::read(&path).map_err(|source| ResourceError::Io { path, source })?;
                volumes.insert(entry.resource_file_number, data);
            }
            let volume = &volumes[&entry.resource_file_number];
            match read_resource(volume, entry) {
                Ok(resource) => {
                    manager.resources.insert((resource.resource_type, resource.number), resource);
                }
                // A few shipped games have map entries pointing past the end of a volume
                Err(e) => warn!("Skipping resource: {e}"),
            }
        }

        info!("Loaded {} resources from {}", manager.resources.len(), game_path.display());
        Ok(manager)
    }

    pub fn insert(&mut self, resource_type: ResourceType, number: u16, data: Vec<u8>) {
        self.resources.insert(
            (resource_type, number),
            Resource {
                resource_type,
                number,
                data,
            },
        );
    }

    pub fn numbers(&self, resource_type: ResourceType) -> Vec<u16> {
        let mut numbers: Vec<u16> = self
            .resources
            .keys()
            .filter(|(t, _)| *t == resource_type)
            .map(|(_, n)| *n)
            .collect();
        numbers.sort();
        numbers
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceProvider for ResourceManager {
    fn find_resource(&self, resource_type: ResourceType, number: u16) -> Option<&Resource> {
        self.resources.get(&(resource_type, number))
    }
}

fn read_u16(data: &[u8], idx: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(idx..idx + 2)?.try_into().ok()?))
}

pub(crate) fn read_resource_map(path: &Path) -> Result<Vec<ResourceMapEntry>, ResourceError> {
    let buffer = std::fs::read(path).map_err(|source| ResourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_resource_map(&buffer)
}

fn parse_resource_map(buffer: &[u8]) -> Result<Vec<ResourceMapEntry>, ResourceError> {
    let mut entries: Vec<ResourceMapEntry> = Vec::new();

    for (i, rec) in buffer.chunks(6).enumerate() {
        if rec.len() < 6 {
            return Err(ResourceError::InvalidMap(i));
        }
        // 0xffff ffff ffff marks the end of the resource map
        if rec.iter().all(|&x| x == 0xff) {
            return Ok(entries);
        }

        let value = u16::from_le_bytes([rec[0], rec[1]]);
        // 5 bit number of the resource type
        let Some(resource_type) = ResourceType::from_u16(value >> 11) else {
            return Err(ResourceError::InvalidMap(i));
        };
        // 11 bit resource number
        let resource_number = value & 0x7ff;

        let value = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
        // 6 bit volume number, 26 bit byte offset within it
        let resource_file_number = (value >> 26) as u8;
        let resource_file_offset = value & 0x3ffffff;

        entries.push(ResourceMapEntry {
            resource_type,
            resource_number,
            resource_file_number,
            resource_file_offset,
        });
    }

    Err(ResourceError::InvalidMap(entries.len()))
}

fn read_resource(volume: &[u8], entry: &ResourceMapEntry) -> Result<Resource, ResourceError> {
    let (resource_type, number) = (entry.resource_type, entry.resource_number);
    let offset = entry.resource_file_offset as usize;
    let truncated = || ResourceError::Decompression(resource_type, number, "truncated volume".into());

    let id = read_u16(volume, offset).ok_or_else(truncated)?;
    if id != ((resource_type as u16) << 11 | number) {
        return Err(ResourceError::HeaderMismatch(resource_type, number));
    }
    // the compressed size includes the decompressed size and method words
    let compressed_size = read_u16(volume, offset + 2).ok_or_else(truncated)? as usize;
    let decompressed_size = read_u16(volume, offset + 4).ok_or_else(truncated)? as usize;
    let method = read_u16(volume, offset + 6).ok_or_else(truncated)?;

    let start = offset + 8;
    let compressed = volume
        .get(start..start + compressed_size.saturating_sub(4))
        .ok_or_else(truncated)?;

    debug!(
        "{resource_type:?} {number}: method {method}, {} -> {decompressed_size} bytes",
        compressed.len()
    );

    let data = match CompressionType::from_u16(method) {
        Some(CompressionType::None) => compressed.to_vec(),
        Some(CompressionType::LZW) => decompress::lzw_decode(compressed)
            .map_err(|e| ResourceError::Decompression(resource_type, number, e))?,
        Some(CompressionType::Huffman) => decompress::huffman_decode(compressed)
            .map_err(|e| ResourceError::Decompression(resource_type, number, e))?,
        None => return Err(ResourceError::UnknownCompression(resource_type, number, method)),
    };

    if data.len() != decompressed_size {
        warn!(
            "{resource_type:?} {number}: expected {decompressed_size} bytes, got {}",
            data.len()
        );
    }

    Ok(Resource {
        resource_type,
        number,
        data,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn map_record(resource_type: ResourceType, number: u16, volume: u8, offset: u32) -> Vec<u8> {
        let mut rec = ((resource_type as u16) << 11 | number).to_le_bytes().to_vec();
        rec.extend(((volume as u32) << 26 | offset).to_le_bytes());
        rec
    }

    #[test]
    fn parses_map_until_terminator() {
        let mut map = map_record(ResourceType::Script, 5, 0, 0);
        map.extend(map_record(ResourceType::View, 0x7ff, 2, 0x1234));
        map.extend([0xff; 6]);

        let entries = parse_resource_map(&map).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].resource_type, ResourceType::View);
        assert_eq!(entries[1].resource_number, 0x7ff);
        assert_eq!(entries[1].resource_file_number, 2);
        assert_eq!(entries[1].resource_file_offset, 0x1234);
    }

    #[test]
    fn map_without_terminator_is_invalid() {
        let map = map_record(ResourceType::Script, 5, 0, 0);
        assert!(matches!(parse_resource_map(&map), Err(ResourceError::InvalidMap(1))));
    }

    #[test]
    fn reads_uncompressed_volume_entry() {
        let mut volume = vec![0xaa; 3];
        volume.extend(((ResourceType::Text as u16) << 11 | 9).to_le_bytes());
        volume.extend(7u16.to_le_bytes());
        volume.extend(3u16.to_le_bytes());
        volume.extend(0u16.to_le_bytes());
        volume.extend(b"hi!");

        let entry = ResourceMapEntry {
            resource_type: ResourceType::Text,
            resource_number: 9,
            resource_file_number: 0,
            resource_file_offset: 3,
        };
        let resource = read_resource(&volume, &entry).unwrap();
        assert_eq!(resource.data, b"hi!".to_vec());
    }

    #[test]
    fn rejects_mismatched_header() {
        let volume = [0u8; 16];
        let entry = ResourceMapEntry {
            resource_type: ResourceType::Pic,
            resource_number: 1,
            resource_file_number: 0,
            resource_file_offset: 0,
        };
        assert!(matches!(
            read_resource(&volume, &entry),
            Err(ResourceError::HeaderMismatch(ResourceType::Pic, 1))
        ));
    }

    #[test]
    fn in_memory_resources() {
        let mut manager = ResourceManager::default();
        manager.insert(ResourceType::Script, 3, vec![0, 0]);
        manager.insert(ResourceType::Script, 1, vec![0, 0]);
        assert_eq!(manager.numbers(ResourceType::Script), vec![1, 3]);
        assert!(manager.find_resource(ResourceType::View, 1).is_none());
    }
}
