//! Framed blob files: an 8-byte little-endian payload length, then the
//! payload. The file may be longer than `length + 8`; the header is
//! authoritative.

use std::fs;
use std::path::Path;

use docx_session_core::SessionError;

const HEADER_LEN: usize = 8;

/// Write a framed blob atomically (temp file, then rename).
pub fn write_framed(path: &Path, payload: &[u8]) -> Result<(), SessionError> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(payload);

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, &bytes)
        .map_err(|e| SessionError::io(format!("failed to write {}", temp_path.display()), e))?;
    fs::rename(&temp_path, path)
        .map_err(|e| SessionError::io(format!("failed to rename to {}", path.display()), e))?;
    Ok(())
}

/// Read a framed blob. `NotFound` when the file is missing.
pub fn read_framed(path: &Path) -> Result<Vec<u8>, SessionError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SessionError::NotFound(format!(
                "no file at {}",
                path.display()
            )))
        }
        Err(e) => {
            return Err(SessionError::io(
                format!("failed to read {}", path.display()),
                e,
            ))
        }
    };

    if bytes.len() < HEADER_LEN {
        return Err(SessionError::Format(format!(
            "{} is too short to carry a frame header",
            path.display()
        )));
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&bytes[..HEADER_LEN]);
    let length = u64::from_le_bytes(header) as usize;
    bytes
        .get(HEADER_LEN..HEADER_LEN + length)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            SessionError::Format(format!(
                "{} frame header claims {length} bytes beyond the file end",
                path.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.docx");
        write_framed(&path, b"document bytes").unwrap();
        assert_eq!(read_framed(&path).unwrap(), b"document bytes");
    }

    #[test]
    fn header_is_authoritative_over_file_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.docx");
        // 5-byte payload framed by hand, with trailing garbage.
        let mut bytes = 5u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"hellotrailing-garbage");
        std::fs::write(&path, &bytes).unwrap();
        assert_eq!(read_framed(&path).unwrap(), b"hello");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = read_framed(&dir.path().join("absent.docx")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn truncated_frame_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.docx");
        let mut bytes = 100u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        std::fs::write(&path, &bytes).unwrap();
        assert_eq!(read_framed(&path).unwrap_err().kind(), "format_error");
    }
}
