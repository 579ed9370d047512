use crate::error::DomError;

/// One part (entry) of the package, addressed by its URI, e.g.
/// `word/document.xml` or `word/media/image1.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub data: Vec<u8>,
}

/// An OPC container holding the document's parts.
///
/// Entries are written stored (method 0); a compressed entry is rejected on
/// read. Part order is preserved so that serialization is deterministic:
/// identical part sets produce byte-identical packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    parts: Vec<Part>,
}

const LOCAL_HEADER_SIG: u32 = 0x0403_4B50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4B50;
const EOCD_SIG: u32 = 0x0605_4B50;
const EOCD_MIN_LEN: usize = 22;

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    pub fn part_data(&self, name: &str) -> Option<&[u8]> {
        self.part(name).map(|p| p.data.as_slice())
    }

    /// Insert or replace a part, preserving the position of an existing one.
    pub fn set_part(&mut self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        if let Some(existing) = self.parts.iter_mut().find(|p| p.name == name) {
            existing.data = data;
        } else {
            self.parts.push(Part { name, data });
        }
    }

    pub fn remove_part(&mut self, name: &str) -> Option<Part> {
        let pos = self.parts.iter().position(|p| p.name == name)?;
        Some(self.parts.remove(pos))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomError> {
        let eocd = find_eocd(bytes)?;
        let entry_count = read_u16(bytes, eocd + 10)? as usize;
        let cd_offset = read_u32(bytes, eocd + 16)? as usize;

        let mut parts = Vec::with_capacity(entry_count);
        let mut pos = cd_offset;
        for _ in 0..entry_count {
            if read_u32(bytes, pos)? != CENTRAL_DIR_SIG {
                return Err(DomError::Package(
                    "central directory entry signature mismatch".into(),
                ));
            }
            let method = read_u16(bytes, pos + 10)?;
            let crc = read_u32(bytes, pos + 16)?;
            let compressed = read_u32(bytes, pos + 20)? as usize;
            let uncompressed = read_u32(bytes, pos + 24)? as usize;
            let name_len = read_u16(bytes, pos + 28)? as usize;
            let extra_len = read_u16(bytes, pos + 30)? as usize;
            let comment_len = read_u16(bytes, pos + 32)? as usize;
            let local_offset = read_u32(bytes, pos + 42)? as usize;

            if method != 0 {
                return Err(DomError::Package(format!(
                    "compressed entries are not supported (method {method})"
                )));
            }
            if compressed != uncompressed {
                return Err(DomError::Package("stored entry size mismatch".into()));
            }

            let name = slice(bytes, pos + 46, name_len)?;
            let name = std::str::from_utf8(name)
                .map_err(|_| DomError::Package("entry name is not UTF-8".into()))?
                .to_string();

            // Local header carries its own (possibly different) name/extra lengths.
            if read_u32(bytes, local_offset)? != LOCAL_HEADER_SIG {
                return Err(DomError::Package(format!(
                    "local header signature mismatch for {name}"
                )));
            }
            let local_name_len = read_u16(bytes, local_offset + 26)? as usize;
            let local_extra_len = read_u16(bytes, local_offset + 28)? as usize;
            let data_start = local_offset + 30 + local_name_len + local_extra_len;
            let data = slice(bytes, data_start, compressed)?.to_vec();

            if crc32fast::hash(&data) != crc {
                return Err(DomError::Package(format!("checksum mismatch in {name}")));
            }

            parts.push(Part { name, data });
            pos += 46 + name_len + extra_len + comment_len;
        }

        Ok(Self { parts })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut entries = 0u16;

        for part in &self.parts {
            let offset = out.len() as u32;
            let crc = crc32fast::hash(&part.data);
            let name = part.name.as_bytes();
            let len = part.data.len() as u32;

            push_u32(&mut out, LOCAL_HEADER_SIG);
            push_u16(&mut out, 20); // version needed
            push_u16(&mut out, 0); // flags
            push_u16(&mut out, 0); // method: stored
            push_u16(&mut out, 0); // mod time
            push_u16(&mut out, 0); // mod date
            push_u32(&mut out, crc);
            push_u32(&mut out, len);
            push_u32(&mut out, len);
            push_u16(&mut out, name.len() as u16);
            push_u16(&mut out, 0); // extra
            out.extend_from_slice(name);
            out.extend_from_slice(&part.data);

            push_u32(&mut central, CENTRAL_DIR_SIG);
            push_u16(&mut central, 20); // version made by
            push_u16(&mut central, 20); // version needed
            push_u16(&mut central, 0);
            push_u16(&mut central, 0);
            push_u16(&mut central, 0);
            push_u16(&mut central, 0);
            push_u32(&mut central, crc);
            push_u32(&mut central, len);
            push_u32(&mut central, len);
            push_u16(&mut central, name.len() as u16);
            push_u16(&mut central, 0); // extra
            push_u16(&mut central, 0); // comment
            push_u16(&mut central, 0); // disk
            push_u16(&mut central, 0); // internal attrs
            push_u32(&mut central, 0); // external attrs
            push_u32(&mut central, offset);
            central.extend_from_slice(name);

            entries += 1;
        }

        let cd_offset = out.len() as u32;
        let cd_size = central.len() as u32;
        out.extend_from_slice(&central);

        push_u32(&mut out, EOCD_SIG);
        push_u16(&mut out, 0); // disk
        push_u16(&mut out, 0); // cd disk
        push_u16(&mut out, entries);
        push_u16(&mut out, entries);
        push_u32(&mut out, cd_size);
        push_u32(&mut out, cd_offset);
        push_u16(&mut out, 0); // comment

        out
    }
}

fn find_eocd(bytes: &[u8]) -> Result<usize, DomError> {
    if bytes.len() < EOCD_MIN_LEN {
        return Err(DomError::Package("too short to be a package".into()));
    }
    let floor = bytes.len().saturating_sub(EOCD_MIN_LEN + u16::MAX as usize);
    let mut pos = bytes.len() - EOCD_MIN_LEN;
    loop {
        if read_u32(bytes, pos)? == EOCD_SIG {
            return Ok(pos);
        }
        if pos == floor {
            return Err(DomError::Package("end-of-directory record not found".into()));
        }
        pos -= 1;
    }
}

fn slice(bytes: &[u8], start: usize, len: usize) -> Result<&[u8], DomError> {
    bytes
        .get(start..start + len)
        .ok_or_else(|| DomError::Package("truncated package".into()))
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, DomError> {
    let b = slice(bytes, pos, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, DomError> {
    let b = slice(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_parts_in_order() {
        let mut package = Package::new();
        package.set_part("word/document.xml", b"<w:document/>".to_vec());
        package.set_part("word/media/image1.png", vec![0x89, 0x50, 0x4E, 0x47]);

        let bytes = package.to_bytes();
        assert_eq!(&bytes[..4], b"PK\x03\x04");

        let reread = Package::from_bytes(&bytes).unwrap();
        assert_eq!(reread, package);
        assert_eq!(
            reread.part_names().collect::<Vec<_>>(),
            vec!["word/document.xml", "word/media/image1.png"]
        );
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut package = Package::new();
        package.set_part("a.xml", b"alpha".to_vec());
        package.set_part("b.xml", b"beta".to_vec());
        assert_eq!(package.to_bytes(), package.clone().to_bytes());
    }

    #[test]
    fn set_part_replaces_in_place() {
        let mut package = Package::new();
        package.set_part("a.xml", b"one".to_vec());
        package.set_part("b.xml", b"two".to_vec());
        package.set_part("a.xml", b"three".to_vec());

        assert_eq!(package.part_data("a.xml").unwrap(), b"three");
        assert_eq!(package.part_names().next(), Some("a.xml"));
    }

    #[test]
    fn rejects_non_package_bytes() {
        assert!(Package::from_bytes(b"this is not a zip archive at all").is_err());
        assert!(Package::from_bytes(b"xx").is_err());
    }

    #[test]
    fn detects_corruption() {
        let mut package = Package::new();
        package.set_part("word/document.xml", b"<w:document/>".to_vec());
        let mut bytes = package.to_bytes();
        // Flip a payload byte under the crc: data starts at 30 + name length.
        bytes[30 + "word/document.xml".len() + 2] ^= 0xFF;
        assert!(Package::from_bytes(&bytes).is_err());
    }
}
