//! On-disk cache of compiled SPIR-V.
//!
//! Entries are keyed by a SHA-256 over the preprocessed source, the compile
//! options fingerprint and the pipeline kind, so any change to one of them
//! misses the cache. Each file ends with a digest of its own contents; a file
//! that is truncated, tampered with or written by another format version is
//! treated as a miss and recompiled.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::GraphicsError;

use super::{CompiledStage, PipelineKind, ShaderStage};

const MAGIC: &[u8; 4] = b"SPVC";
const FORMAT_VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;

/// Directory-backed SPIR-V cache.
#[derive(Debug, Clone)]
pub struct ShaderCache {
    dir: PathBuf,
}

impl ShaderCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a compile of `source` with the given options and kind.
    pub fn key(source: &str, options_fingerprint: &str, kind: &PipelineKind) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0]);
        hasher.update(options_fingerprint.as_bytes());
        hasher.update([0]);
        hasher.update(format!("{kind:?}").as_bytes());
        hex(&hasher.finalize())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.spvc"))
    }

    /// Load cached stages. Missing or corrupt entries return `None`.
    pub fn load(&self, key: &str) -> Option<Vec<CompiledStage>> {
        let path = self.path(key);
        let bytes = std::fs::read(&path).ok()?;
        match decode(&bytes) {
            Some(stages) => {
                log::trace!("Shader cache hit {}", key);
                Some(stages)
            }
            None => {
                log::warn!("Discarding corrupt shader cache entry {}", path.display());
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    pub fn store(&self, key: &str, stages: &[CompiledStage]) -> Result<(), GraphicsError> {
        std::fs::create_dir_all(&self.dir)?;
        // Write then rename so readers never see a partial file
        let tmp = self.dir.join(format!("{key}.tmp"));
        std::fs::write(&tmp, encode(stages))?;
        std::fs::rename(&tmp, self.path(key))?;
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn stage_tag(stage: ShaderStage) -> u8 {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Fragment => 1,
        ShaderStage::Compute => 2,
    }
}

fn stage_from_tag(tag: u8) -> Option<ShaderStage> {
    match tag {
        0 => Some(ShaderStage::Vertex),
        1 => Some(ShaderStage::Fragment),
        2 => Some(ShaderStage::Compute),
        _ => None,
    }
}

fn encode(stages: &[CompiledStage]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(stages.len() as u32).to_le_bytes());
    for stage in stages {
        out.push(stage_tag(stage.stage));
        out.extend_from_slice(&(stage.entry_point.len() as u32).to_le_bytes());
        out.extend_from_slice(stage.entry_point.as_bytes());
        out.extend_from_slice(&(stage.spirv.len() as u32).to_le_bytes());
        for word in &stage.spirv {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < n {
            return None;
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }
}

fn decode(bytes: &[u8]) -> Option<Vec<CompiledStage>> {
    let body_len = bytes.len().checked_sub(DIGEST_LEN)?;
    let (body, digest) = bytes.split_at(body_len);
    if Sha256::digest(body).as_slice() != digest {
        return None;
    }

    let mut reader = Reader { bytes: body };
    if reader.take(4)? != MAGIC || reader.u32()? != FORMAT_VERSION {
        return None;
    }

    let count = reader.u32()?;
    let mut stages = Vec::new();
    for _ in 0..count {
        let stage = stage_from_tag(reader.u8()?)?;
        let entry_len = reader.u32()? as usize;
        let entry_point = String::from_utf8(reader.take(entry_len)?.to_vec()).ok()?;
        let words = reader.u32()? as usize;
        let spirv = reader
            .take(words.checked_mul(4)?)?
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        stages.push(CompiledStage {
            stage,
            entry_point,
            spirv,
        });
    }

    reader.bytes.is_empty().then_some(stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<CompiledStage> {
        vec![CompiledStage {
            stage: ShaderStage::Compute,
            entry_point: "cs_main".into(),
            spirv: vec![0x0723_0203, 1, 2, 3],
        }]
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path().join("spv"));
        let key = ShaderCache::key("src", "opts", &PipelineKind::compute());

        assert!(cache.load(&key).is_none());
        cache.store(&key, &sample()).unwrap();
        assert_eq!(cache.load(&key), Some(sample()));
    }

    #[test]
    fn test_key_depends_on_all_inputs() {
        let kind = PipelineKind::compute();
        let base = ShaderCache::key("a", "o", &kind);
        assert_eq!(base, ShaderCache::key("a", "o", &kind));
        assert_ne!(base, ShaderCache::key("b", "o", &kind));
        assert_ne!(base, ShaderCache::key("a", "p", &kind));
        assert_ne!(
            base,
            ShaderCache::key(
                "a",
                "o",
                &PipelineKind::Compute {
                    entry: "other".into()
                }
            )
        );
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path());
        let key = ShaderCache::key("src", "opts", &PipelineKind::compute());
        cache.store(&key, &sample()).unwrap();

        let path = dir.path().join(format!("{key}.spvc"));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        assert!(cache.load(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_truncated_entry_is_a_miss() {
        assert!(decode(&[1, 2, 3]).is_none());
        let mut bytes = encode(&sample());
        bytes.truncate(bytes.len() - 1);
        assert!(decode(&bytes).is_none());
    }
}
