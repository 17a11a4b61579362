// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Content sniffing for uploaded files
//!
//! Upload policies compare against the type detected from the file's leading bytes, never
//! the MIME type the client declared.

/// Guesses a MIME type from raw bytes
pub trait ContentSniffer: Send + Sync {
    /// Best-guess MIME type, or `None` when the content is not recognized
    fn sniff(&self, bytes: &[u8]) -> Option<&'static str>;
}

/// Fallback when nothing is recognized
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Signature table: offset, magic bytes, MIME type
const SIGNATURES: &[(usize, &[u8], &str)] = &[
    (0, b"\x89PNG\r\n\x1a\n", "image/png"),
    (0, b"\xff\xd8\xff", "image/jpeg"),
    (0, b"GIF87a", "image/gif"),
    (0, b"GIF89a", "image/gif"),
    (0, b"BM", "image/bmp"),
    (0, b"II*\0", "image/tiff"),
    (0, b"MM\0*", "image/tiff"),
    (0, b"\0\0\x01\0", "image/x-icon"),
    (0, b"%PDF-", "application/pdf"),
    (0, b"PK\x03\x04", "application/zip"),
    (0, b"\x1f\x8b", "application/gzip"),
    (0, b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (0, b"Rar!\x1a\x07", "application/vnd.rar"),
    (0, b"ID3", "audio/mpeg"),
    (0, b"\xff\xfb", "audio/mpeg"),
    (0, b"OggS", "audio/ogg"),
    (0, b"fLaC", "audio/flac"),
    (0, b"\x1a\x45\xdf\xa3", "video/webm"),
    (0, b"\0asm", "application/wasm"),
    (0, b"\x7fELF", "application/x-elf"),
];

/// Sniffer based on well-known file signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicSniffer;

impl MagicSniffer {
    fn riff(bytes: &[u8]) -> Option<&'static str> {
        if bytes.len() < 12 || &bytes[..4] != b"RIFF" {
            return None;
        }
        match &bytes[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        }
    }

    fn iso_media(bytes: &[u8]) -> Option<&'static str> {
        if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
            return None;
        }
        match &bytes[8..12] {
            b"avif" | b"avis" => Some("image/avif"),
            b"heic" | b"heix" | b"mif1" => Some("image/heic"),
            b"qt  " => Some("video/quicktime"),
            b"M4A " => Some("audio/mp4"),
            _ => Some("video/mp4"),
        }
    }

    fn text(bytes: &[u8]) -> Option<&'static str> {
        let head = &bytes[..bytes.len().min(512)];
        let text = std::str::from_utf8(head).ok()?;
        let trimmed = text.trim_start_matches('\u{feff}').trim_start();
        if trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && trimmed.contains("<svg"))
        {
            Some("image/svg+xml")
        } else if trimmed.starts_with("<?xml") {
            Some("application/xml")
        } else if head.iter().any(|b| *b < 0x09 || (*b > 0x0d && *b < 0x20)) {
            None
        } else {
            Some("text/plain")
        }
    }
}

impl ContentSniffer for MagicSniffer {
    fn sniff(&self, bytes: &[u8]) -> Option<&'static str> {
        if bytes.is_empty() {
            return None;
        }
        SIGNATURES
            .iter()
            .find(|(offset, magic, _)| bytes.get(*offset..*offset + magic.len()) == Some(*magic))
            .map(|(_, _, mime)| *mime)
            .or_else(|| Self::riff(bytes))
            .or_else(|| Self::iso_media(bytes))
            .or_else(|| Self::text(bytes))
    }
}
