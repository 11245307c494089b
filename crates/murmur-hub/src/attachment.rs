//! Attachment inlining.
//!
//! Before an IMAGE or FILE envelope is persisted its payload is moved into
//! the blob store and replaced by a generated blob name in `url`. On error
//! the envelope is left exactly as it was.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::BlobStore;
use crate::envelope::{ContentType, Envelope};
use crate::error::AttachmentError;

/// Extension given to every inline image blob.
pub const IMAGE_EXTENSION: &str = "png";

/// How many leading bytes of a file are inspected for a signature.
pub const SNIFF_LEN: usize = 16;

const BASE64_MARKER: &str = "base64";

const IMAGE_SUFFIXES: &[&str] = &["jpeg", "jpg", "png", "gif", "tif", "bmp", "dwg"];
const AUDIO_SUFFIXES: &[&str] = &["mp3", "wma", "wav", "mid", "ape", "flac"];
const VIDEO_SUFFIXES: &[&str] = &[
    "rmvb", "flv", "mp4", "mpg", "mpeg", "avi", "rm", "mov", "wmv", "webm",
];

/// A file signature: every `(offset, magic)` part must match.
struct Signature {
    parts: &'static [(usize, &'static [u8])],
    suffix: &'static str,
}

impl Signature {
    fn matches(&self, prefix: &[u8]) -> bool {
        self.parts.iter().all(|(offset, magic)| {
            prefix
                .get(*offset..*offset + magic.len())
                .map_or(false, |window| window == *magic)
        })
    }
}

// Order matters where signatures share a prefix (RIFF, ftyp).
const SIGNATURES: &[Signature] = &[
    Signature { parts: &[(0, &[0xff, 0xd8, 0xff])], suffix: "jpg" },
    Signature { parts: &[(0, &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a])], suffix: "png" },
    Signature { parts: &[(0, b"GIF8")], suffix: "gif" },
    Signature { parts: &[(0, &[0x49, 0x49, 0x2a, 0x00])], suffix: "tif" },
    Signature { parts: &[(0, &[0x4d, 0x4d, 0x00, 0x2a])], suffix: "tif" },
    // "BM", 4-byte file size, then 4 reserved zero bytes
    Signature { parts: &[(0, b"BM"), (6, &[0, 0, 0, 0])], suffix: "bmp" },
    Signature { parts: &[(0, b"AC10")], suffix: "dwg" },
    Signature { parts: &[(0, b"8BPS")], suffix: "psd" },
    Signature { parts: &[(0, b"{\\rtf")], suffix: "rtf" },
    Signature { parts: &[(0, b"%PDF")], suffix: "pdf" },
    Signature { parts: &[(0, b"%!PS")], suffix: "ps" },
    Signature { parts: &[(0, b"<!DOCTYPE")], suffix: "html" },
    Signature { parts: &[(0, b"<html")], suffix: "html" },
    Signature { parts: &[(0, &[b'P', b'K', 0x03, 0x04])], suffix: "zip" },
    Signature { parts: &[(0, b"ID3")], suffix: "mp3" },
    Signature { parts: &[(0, b"fLaC")], suffix: "flac" },
    Signature { parts: &[(0, b"MThd")], suffix: "mid" },
    Signature { parts: &[(0, b"MAC ")], suffix: "ape" },
    Signature { parts: &[(0, b"RIFF"), (8, b"WAVE")], suffix: "wav" },
    Signature { parts: &[(0, b"RIFF"), (8, b"AVI ")], suffix: "avi" },
    Signature { parts: &[(4, b"ftypqt")], suffix: "mov" },
    Signature { parts: &[(4, b"ftyp")], suffix: "mp4" },
    Signature { parts: &[(0, &[0x1a, 0x45, 0xdf, 0xa3])], suffix: "webm" },
    Signature { parts: &[(0, b"FLV")], suffix: "flv" },
    Signature { parts: &[(0, b".RMF")], suffix: "rm" },
    Signature { parts: &[(0, &[0x30, 0x26, 0xb2, 0x75, 0x8e, 0x66, 0xcf, 0x11])], suffix: "wmv" },
    Signature { parts: &[(0, &[0x00, 0x00, 0x01, 0xba])], suffix: "mpg" },
];

/// Identify a file by its leading bytes.
pub fn sniff_suffix(bytes: &[u8]) -> Option<&'static str> {
    let prefix = &bytes[..bytes.len().min(SNIFF_LEN)];
    SIGNATURES
        .iter()
        .find(|signature| signature.matches(prefix))
        .map(|signature| signature.suffix)
}

/// Map a lowercase suffix onto the content type stored with the message.
pub fn content_type_for_suffix(suffix: &str) -> ContentType {
    if IMAGE_SUFFIXES.contains(&suffix) {
        ContentType::Image
    } else if AUDIO_SUFFIXES.contains(&suffix) {
        ContentType::Audio
    } else if VIDEO_SUFFIXES.contains(&suffix) {
        ContentType::Video
    } else {
        ContentType::File
    }
}

fn normalize_suffix(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Moves image and file payloads into the blob store.
#[derive(Clone)]
pub struct AttachmentInliner {
    blobs: Arc<dyn BlobStore>,
}

impl AttachmentInliner {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Inline the attachment of `envelope`, if it has one.
    ///
    /// Non-attachment content types pass through untouched, as do attachments
    /// that already reference stored content through `url`.
    #[instrument(skip(self, envelope), fields(from = %envelope.from, content_type = envelope.content_type))]
    pub async fn inline(&self, envelope: &mut Envelope) -> Result<(), AttachmentError> {
        match envelope.content_kind() {
            Some(ContentType::Image) => self.inline_image(envelope).await,
            Some(ContentType::File) => self.inline_file(envelope).await,
            _ => Ok(()),
        }
    }

    async fn inline_image(&self, envelope: &mut Envelope) -> Result<(), AttachmentError> {
        let Some(start) = envelope.content.find(BASE64_MARKER) else {
            if envelope.content.is_empty() && !envelope.url.is_empty() {
                return Ok(());
            }
            return Err(AttachmentError::MissingMarker);
        };

        let payload = envelope.content[start + BASE64_MARKER.len()..]
            .trim_start_matches(',')
            .trim();
        let bytes = STANDARD.decode(payload)?;

        let name = format!("{}.{}", Uuid::new_v4(), IMAGE_EXTENSION);
        self.write(&name, &bytes).await?;

        debug!(blob = %name, size = bytes.len(), "Inlined image");
        envelope.content.clear();
        envelope.url = name;
        Ok(())
    }

    async fn inline_file(&self, envelope: &mut Envelope) -> Result<(), AttachmentError> {
        if envelope.file.is_empty() {
            if !envelope.url.is_empty() {
                return Ok(());
            }
            return Err(AttachmentError::EmptyFile);
        }

        let suffix = match sniff_suffix(&envelope.file) {
            Some(sniffed) => sniffed.to_string(),
            None => normalize_suffix(&envelope.file_suffix),
        };
        let kind = content_type_for_suffix(&suffix);

        let name = if suffix.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), suffix)
        };
        self.write(&name, &envelope.file).await?;

        debug!(blob = %name, size = envelope.file.len(), kind = ?kind, "Inlined file");
        envelope.file = Vec::new();
        envelope.url = name;
        envelope.set_content_kind(kind);
        Ok(())
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), AttachmentError> {
        self.blobs
            .write(name, bytes)
            .await
            .map_err(|source| AttachmentError::BlobWrite {
                name: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryBlobs {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryBlobs {
        fn only(&self) -> (String, Vec<u8>) {
            let blobs = self.blobs.lock().unwrap();
            assert_eq!(blobs.len(), 1);
            let (name, bytes) = blobs.iter().next().unwrap();
            (name.clone(), bytes.clone())
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), BackendError> {
            self.blobs
                .lock()
                .unwrap()
                .insert(name.to_string(), bytes.to_vec());
            Ok(())
        }
    }

    struct FullDisk;

    #[async_trait]
    impl BlobStore for FullDisk {
        async fn write(&self, _name: &str, _bytes: &[u8]) -> Result<(), BackendError> {
            Err(BackendError::storage("no space left on device"))
        }
    }

    fn attachment(kind: ContentType) -> Envelope {
        let mut env = Envelope {
            from: "alice".into(),
            to: "bob".into(),
            ..Default::default()
        };
        env.set_content_kind(kind);
        env
    }

    #[tokio::test]
    async fn test_inline_image_writes_decoded_bytes() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::Image);
        env.content = format!("data:image/png;base64,{}", STANDARD.encode(b"not really a png"));

        inliner.inline(&mut env).await.unwrap();

        let (name, bytes) = blobs.only();
        assert_eq!(bytes, b"not really a png");
        assert!(env.content.is_empty());
        assert_eq!(env.url, name);
        assert!(env.url.ends_with(".png"));
        assert_eq!(env.content_kind(), Some(ContentType::Image));
    }

    #[tokio::test]
    async fn test_inline_image_rejects_bad_payload_untouched() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::Image);
        env.content = "data:image/png;base64,@@not base64@@".into();
        let before = env.clone();

        let result = inliner.inline(&mut env).await;

        assert!(matches!(result, Err(AttachmentError::Decode(_))));
        assert_eq!(env, before);
        assert!(blobs.blobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inline_image_without_marker() {
        let inliner = AttachmentInliner::new(Arc::new(MemoryBlobs::default()));
        let mut env = attachment(ContentType::Image);
        env.content = "just text".into();

        let result = inliner.inline(&mut env).await;
        assert!(matches!(result, Err(AttachmentError::MissingMarker)));
    }

    #[tokio::test]
    async fn test_already_stored_image_passes_through() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::Image);
        env.url = "existing.png".into();

        inliner.inline(&mut env).await.unwrap();
        assert_eq!(env.url, "existing.png");
        assert!(blobs.blobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inline_file_sniffs_signature() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::File);
        env.file = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x01];
        env.file_suffix = "txt".into();

        inliner.inline(&mut env).await.unwrap();

        let (name, bytes) = blobs.only();
        assert_eq!(bytes.len(), 10);
        assert!(name.ends_with(".png"));
        assert_eq!(env.url, name);
        assert!(env.file.is_empty());
        assert_eq!(env.content_kind(), Some(ContentType::Image));
    }

    #[tokio::test]
    async fn test_inline_file_falls_back_to_suffix() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::File);
        env.file = b"plain bytes".to_vec();
        env.file_suffix = ".MP3".into();

        inliner.inline(&mut env).await.unwrap();

        assert!(env.url.ends_with(".mp3"));
        assert_eq!(env.content_kind(), Some(ContentType::Audio));
    }

    #[tokio::test]
    async fn test_inline_file_without_any_suffix() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::File);
        env.file = b"opaque".to_vec();

        inliner.inline(&mut env).await.unwrap();

        assert!(!env.url.contains('.'));
        assert_eq!(env.content_kind(), Some(ContentType::File));
    }

    #[tokio::test]
    async fn test_blob_failure_leaves_envelope_untouched() {
        let inliner = AttachmentInliner::new(Arc::new(FullDisk));
        let mut env = attachment(ContentType::File);
        env.file = b"%PDF-1.7".to_vec();
        let before = env.clone();

        let result = inliner.inline(&mut env).await;

        match result {
            Err(AttachmentError::BlobWrite { name, .. }) => assert!(name.ends_with(".pdf")),
            other => panic!("expected blob write error, got {other:?}"),
        }
        assert_eq!(env, before);
    }

    #[tokio::test]
    async fn test_text_is_not_inlined() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::Text);
        env.content = "base64,aGVsbG8=".into();

        inliner.inline(&mut env).await.unwrap();
        assert_eq!(env.content, "base64,aGVsbG8=");
        assert!(blobs.blobs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sniff_riff_containers() {
        let mut wav = b"RIFF\0\0\0\0WAVEfmt ".to_vec();
        let mut avi = b"RIFF\0\0\0\0AVI LIST".to_vec();
        wav.extend_from_slice(&[0; 8]);
        avi.extend_from_slice(&[0; 8]);

        assert_eq!(sniff_suffix(&wav), Some("wav"));
        assert_eq!(sniff_suffix(&avi), Some("avi"));
        assert_eq!(sniff_suffix(b"RIFF"), None);
    }

    #[test]
    fn test_sniff_bmp_needs_reserved_header() {
        let mut bmp = b"BM".to_vec();
        bmp.extend_from_slice(&1078u32.to_le_bytes());
        bmp.extend_from_slice(&[0; 4]);
        bmp.extend_from_slice(&54u32.to_le_bytes());

        assert_eq!(sniff_suffix(&bmp), Some("bmp"));
        assert_eq!(sniff_suffix(b"BMW service notes\n"), None);
    }

    #[tokio::test]
    async fn test_text_starting_with_bm_keeps_caller_suffix() {
        let blobs = Arc::new(MemoryBlobs::default());
        let inliner = AttachmentInliner::new(blobs.clone());
        let mut env = attachment(ContentType::File);
        env.file = b"BMW service notes\n".to_vec();
        env.file_suffix = "txt".into();

        inliner.inline(&mut env).await.unwrap();

        assert!(env.url.ends_with(".txt"));
        assert_eq!(env.content_kind(), Some(ContentType::File));
        assert_eq!(blobs.only().1, b"BMW service notes\n");
    }

    #[test]
    fn test_sniff_iso_media() {
        assert_eq!(sniff_suffix(b"\0\0\0\x18ftypmp42"), Some("mp4"));
        assert_eq!(sniff_suffix(b"\0\0\0\x14ftypqt  "), Some("mov"));
    }

    #[test]
    fn test_suffix_mapping() {
        assert_eq!(content_type_for_suffix("jpeg"), ContentType::Image);
        assert_eq!(content_type_for_suffix("flac"), ContentType::Audio);
        assert_eq!(content_type_for_suffix("webm"), ContentType::Video);
        assert_eq!(content_type_for_suffix("pdf"), ContentType::File);
        assert_eq!(content_type_for_suffix(""), ContentType::File);
    }
}
