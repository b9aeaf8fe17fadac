use std::io::Cursor;
use std::path::Path;

use tracing::debug;

use crate::error::SessionError;

/// SPIR-V magic number in host byte order.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read a compiled shader binary fully into memory.
pub fn read_shader_file(path: &Path) -> Result<Vec<u8>, SessionError> {
    let code = std::fs::read(path).map_err(|source| SessionError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("read {} byte shader from {}", code.len(), path.display());
    Ok(code)
}

/// Reinterpret a shader binary as SPIR-V words.
///
/// The length must be a whole multiple of 4 and the first word the SPIR-V
/// magic number. Byte-swapped modules are converted to host order.
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>, SessionError> {
    if code.len() % 4 != 0 {
        return Err(SessionError::ShaderMisaligned { len: code.len() });
    }
    ash::util::read_spv(&mut Cursor::new(code))
        .map_err(|source| SessionError::ShaderInvalid {
            len: code.len(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn whole_words_convert() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0];
        assert_eq!(spirv_words(&module_bytes(&words)).unwrap(), words);
    }

    #[test]
    fn swapped_magic_is_normalized() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[1], 0x0001_0000);
    }

    #[test]
    fn ragged_length_is_rejected() {
        for len in [1usize, 2, 3, 5, 1023] {
            let err = spirv_words(&vec![0u8; len]).unwrap_err();
            assert!(
                matches!(err, SessionError::ShaderMisaligned { len: l } if l == len),
                "len {len}: got {err:?}"
            );
        }
    }

    #[test]
    fn aligned_input_without_magic_is_invalid() {
        for bytes in [Vec::new(), vec![0xde, 0xad, 0xbe, 0xef], module_bytes(&[0, 1, 2, 3])] {
            let err = spirv_words(&bytes).unwrap_err();
            assert!(
                matches!(err, SessionError::ShaderInvalid { len, .. } if len == bytes.len()),
                "{} bytes: got {err:?}",
                bytes.len()
            );
            assert!(err.to_string().contains("not SPIR-V"));
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.spv");
        let err = read_shader_file(&path).unwrap_err();
        assert_eq!(err.to_string(), format!("failed to read {}", path.display()));
    }

    #[test]
    fn file_contents_are_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compute.spv");
        let bytes = module_bytes(&[SPIRV_MAGIC, 1, 2, 3]);
        std::fs::write(&path, &bytes).unwrap();
        assert_eq!(read_shader_file(&path).unwrap(), bytes);
    }
}
