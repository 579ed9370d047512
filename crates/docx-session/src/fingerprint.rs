//! Content-addressed fingerprints for diff matching.
//!
//! Fingerprints are content-only: the private id attribute never enters the
//! hash, so reassigning ids across syncs cannot produce false diffs.

use sha2::{Digest, Sha256};

use docx_dom::{BodyChild, IdMode, WordDocument};

/// Separator between hashed fields; outside the XML character range a
/// document can carry in text.
const FIELD_SEP: u8 = 0x1F;

/// 16-hex-char fingerprint of a body element, or `None` for kinds the diff
/// does not track (section breaks).
pub fn fingerprint(child: &BodyChild) -> Option<String> {
    let mut hasher = Sha256::new();
    match child {
        BodyChild::Paragraph(p) => {
            match p.heading_level() {
                Some(level) => {
                    hasher.update(b"heading");
                    hasher.update([FIELD_SEP, level]);
                }
                None => hasher.update(b"paragraph"),
            }
            hasher.update([FIELD_SEP]);
            hasher.update(p.text().as_bytes());
        }
        BodyChild::Table(t) => {
            hasher.update(b"table");
            hasher.update([FIELD_SEP]);
            hasher.update((t.rows.len() as u64).to_le_bytes());
            hasher.update((t.column_count() as u64).to_le_bytes());
            for text in t.cell_text() {
                hasher.update([FIELD_SEP]);
                hasher.update(text.as_bytes());
            }
        }
        BodyChild::Section(_) => return None,
    }
    Some(hex::encode(&hasher.finalize()[..8]))
}

/// Content-only hash of the whole document: the main part serialized with
/// ids stripped, then SHA-256. Used solely for change-detection gating.
pub fn content_hash(doc: &WordDocument) -> String {
    let xml = doc.main_part_xml(IdMode::Strip);
    hex::encode(Sha256::digest(xml.as_bytes()))
}

/// Plain SHA-256 of raw bytes, for file-level change detection.
pub fn file_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
