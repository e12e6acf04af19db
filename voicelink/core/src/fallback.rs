//! Fallback Clips
//!
//! Local audio played when the service reports an error the user should
//! hear about even though no TTS is coming: an exhausted quota, a missing
//! device card, a disabled feature.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Which clip to play
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FallbackClip {
    /// `4002`: the account ran out of quota
    InsufficientQuota,
    /// `4001`: no device card is bound
    CardMissing,
    /// `4000`: the requested feature is disabled
    FeatureDisabled,
}

impl FallbackClip {
    /// The clip for a service error code, if that code has one
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "4002" => Some(Self::InsufficientQuota),
            "4001" => Some(Self::CardMissing),
            "4000" => Some(Self::FeatureDisabled),
            _ => None,
        }
    }
}

/// Loaded clip bytes
#[derive(Clone, Debug, Default)]
pub struct FallbackClips {
    clips: BTreeMap<FallbackClip, Vec<u8>>,
}

impl FallbackClips {
    /// No clips loaded
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a clip
    pub fn insert(&mut self, clip: FallbackClip, bytes: Vec<u8>) {
        self.clips.insert(clip, bytes);
    }

    /// Bytes of a clip, if loaded
    #[must_use]
    pub fn get(&self, clip: FallbackClip) -> Option<&[u8]> {
        self.clips.get(&clip).map(Vec::as_slice)
    }

    /// Number of loaded clips
    #[must_use]
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    /// Whether no clip is loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Read every configured clip from disk
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] for the first file that cannot be
    /// read.
    pub fn load(paths: &BTreeMap<FallbackClip, PathBuf>) -> Result<Self, ConfigError> {
        let mut clips = Self::new();
        for (clip, path) in paths {
            let bytes = std::fs::read(path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                source: e,
            })?;
            tracing::debug!(?clip, path = %path.display(), len = bytes.len(), "Loaded fallback clip");
            clips.insert(*clip, bytes);
        }
        Ok(clips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_codes() {
        assert_eq!(
            FallbackClip::from_code("4002"),
            Some(FallbackClip::InsufficientQuota)
        );
        assert_eq!(FallbackClip::from_code("4001"), Some(FallbackClip::CardMissing));
        assert_eq!(
            FallbackClip::from_code("4000"),
            Some(FallbackClip::FeatureDisabled)
        );
        assert_eq!(FallbackClip::from_code("5000"), None);
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"\x01\x02\x03").unwrap();

        let mut paths = BTreeMap::new();
        paths.insert(FallbackClip::CardMissing, file.path().to_path_buf());

        let clips = FallbackClips::load(&paths).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips.get(FallbackClip::CardMissing), Some(&[1u8, 2, 3][..]));
        assert_eq!(clips.get(FallbackClip::InsufficientQuota), None);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let mut paths = BTreeMap::new();
        paths.insert(
            FallbackClip::FeatureDisabled,
            PathBuf::from("/nonexistent/voicelink/feature_disabled.mp3"),
        );
        assert!(matches!(
            FallbackClips::load(&paths),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
