use std::path::Path;

use anyhow::{bail, Context};

/// Reads a precompiled QPU instruction stream: little-endian 32-bit words.
pub fn load_code(path: &Path) -> anyhow::Result<Vec<u32>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading QPU code from {}", path.display()))?;
    parse_code(&bytes).with_context(|| format!("parsing QPU code in {}", path.display()))
}

pub fn parse_code(bytes: &[u8]) -> anyhow::Result<Vec<u32>> {
    if bytes.is_empty() {
        bail!("instruction stream is empty");
    }
    if bytes.len() % 8 != 0 {
        bail!(
            "instruction stream is {} bytes, not a whole number of 64-bit instructions",
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn words_are_little_endian() {
        let words = parse_code(&[0x00, 0x70, 0x03, 0x10, 0x00, 0x00, 0x00, 0xe0]).unwrap();
        assert_eq!(words, vec![0x1003_7000, 0xe000_0000]);
    }

    #[test]
    fn partial_instructions_are_rejected() {
        let err = parse_code(&[0; 12]).unwrap_err();
        assert!(err.to_string().contains("12 bytes"), "{err}");
        assert!(parse_code(&[]).is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        let err = load_code(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing QPU code in"), "{err:#}");
    }
}
