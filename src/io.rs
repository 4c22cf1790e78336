use crate::parse::ParseError;
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::codec::Transcoder;

#[derive(Debug, Clone)]
pub struct UploadMeta {
    /// e.g. "application/gzip" or "text/csv"
    pub content_type: String,
    /// e.g. "gzip", "zstd", or empty
    pub content_encoding: String,
    /// file name as picked by the operator (used for extension fallback)
    pub name_hint: String,
    /// Which character encoding to expect (defaults to UTF-8)
    pub charset: &'static encoding_rs::Encoding,
}

impl Default for UploadMeta {
    fn default() -> Self {
        Self {
            content_type: String::new(),
            content_encoding: String::new(),
            name_hint: String::new(),
            charset: encoding_rs::UTF_8,
        }
    }
}

impl UploadMeta {
    /// Best-effort meta from a file name's extension.
    pub fn from_name(name: &str) -> Self {
        let mut meta = Self {
            name_hint: name.to_string(),
            ..Default::default()
        };
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".gz") {
            meta.content_type = "application/gzip".into();
            meta.content_encoding = "gzip".into();
        } else if lower.ends_with(".zst") {
            meta.content_type = "application/zstd".into();
            meta.content_encoding = "zstd".into();
        } else {
            meta.content_type = "text/csv".into();
        }
        meta
    }

    fn is_gzip(&self) -> bool {
        let ce = self.content_encoding.to_ascii_lowercase();
        let ct = self.content_type.to_ascii_lowercase();
        ce.split(',').any(|s| s.trim() == "gzip")
            || matches!(ct.as_str(), "application/gzip" | "application/x-gzip")
            || self.name_hint.ends_with(".gz")
    }

    fn is_zstd(&self) -> bool {
        let ce = self.content_encoding.to_ascii_lowercase();
        ce.split(',').any(|s| s.trim() == "zstd")
            || self.content_type.eq_ignore_ascii_case("application/zstd")
            || self.name_hint.ends_with(".zst")
    }
}

/// Wrap a raw upload with optional decompression and transcoding to UTF-8.
pub fn build_upload_reader<R>(raw: R, meta: &UploadMeta) -> Box<dyn AsyncRead + Unpin + Send>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = BufReader::new(raw);
    let decompressed: Box<dyn AsyncRead + Unpin + Send> = if meta.is_gzip() {
        Box::new(GzipDecoder::new(buf))
    } else if meta.is_zstd() {
        Box::new(ZstdDecoder::new(buf))
    } else {
        Box::new(buf)
    };

    if meta.charset == encoding_rs::UTF_8 {
        decompressed
    } else {
        let framed = FramedRead::new(decompressed, Transcoder::new(meta.charset));
        Box::new(StreamReader::new(framed))
    }
}

/// Open a local upload, inferring compression from its extension.
pub async fn reader_from_path(
    path: &Path,
) -> Result<(Box<dyn AsyncRead + Unpin + Send>, UploadMeta), ParseError> {
    let file = File::open(path)
        .await
        .map_err(|e| ParseError::Unreadable(format!("{}: {e}", path.display())))?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let meta = UploadMeta::from_name(name);
    Ok((build_upload_reader(file, &meta), meta))
}

/// Drain an upload into a string.
///
/// Anything that is not valid UTF-8 after transcoding fails the read, and a
/// leading byte-order mark is dropped.
pub async fn read_upload_text<R>(mut reader: R) -> Result<String, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => ParseError::Encoding(e.to_string()),
        _ => ParseError::Unreadable(e.to_string()),
    })?;

    let mut text = String::from_utf8(bytes).map_err(|e| ParseError::Encoding(e.to_string()))?;
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    Ok(text)
}
