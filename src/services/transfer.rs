//! Download and streaming pipeline.
//!
//! Both call shapes resolve a short-lived key to a catalog row, then copy
//! bytes from the blob's effective path (owner or link target). Streaming
//! serves HTTP 206 windows bounded by `BYTE_RANGE_MAX_SIZE`; clients request
//! successive windows. Key resolution always re-queries the catalog — the
//! key cache is never the authority on liveness, so a key resolved after a
//! logical delete reports *deleted*, not *not-found*.

use std::io::SeekFrom;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use sqlx::SqlitePool;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::cache::Caches;
use crate::db::models::DFile;
use crate::error::{AppError, AppResult};
use crate::services::files;
use crate::storage::paths::PathLayout;

/// Upper bound on bytes served by a single range request (30 MB).
pub const BYTE_RANGE_MAX_SIZE: i64 = 30_000_000;

const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// An inclusive byte range. `end` may be `i64::MAX` before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub fn size(&self) -> i64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range` header of the form `bytes=<a>-<b>`.
///
/// Four sub-cases: `a-b`, tail-only `-b` (start stays 0), head-only `a-`
/// (end stays MAX), and malformed (both defaults). Parsing never fails;
/// normalization against the file size happens in [`adjust_byte_range`].
pub fn parse_range_header(header: Option<&str>) -> ByteRange {
    let full = ByteRange {
        start: 0,
        end: i64::MAX,
    };
    let Some(raw) = header else { return full };

    let mut split = raw.splitn(2, '=');
    let _unit = split.next();
    let Some(part) = split.next() else { return full };
    let part = part.trim();
    if part.is_empty() {
        return full;
    }

    let mut br = full;
    match part.find('-') {
        Some(0) => {
            // '-b': only the end is given.
            if let Ok(v) = part[1..].parse::<i64>() {
                br.end = v;
            }
        }
        Some(dash) if dash == part.len() - 1 => {
            // 'a-': only the start is given.
            if let Ok(v) = part[..dash].parse::<i64>() {
                br.start = v;
            }
        }
        Some(dash) => {
            if let Ok(v) = part[..dash].parse::<i64>() {
                br.start = v;
            }
            if let Ok(v) = part[dash + 1..].parse::<i64>() {
                br.end = v;
            }
        }
        None => {}
    }
    br
}

/// Clamps a parsed range to the file size and the 30 MB serving cap.
pub fn adjust_byte_range(mut br: ByteRange, file_size: i64) -> AppResult<ByteRange> {
    if br.end >= file_size {
        br.end = file_size - 1;
    }

    if br.start > br.end {
        return Err(AppError::BadRequest(
            "invalid byte range request, start > end".into(),
        ));
    }

    if br.size() > file_size {
        return Err(AppError::BadRequest(
            "invalid byte range request, range exceeds file size".into(),
        ));
    }

    if br.size() > BYTE_RANGE_MAX_SIZE {
        br.end = br.start + BYTE_RANGE_MAX_SIZE - 1;
    }

    Ok(br)
}

/// Whole-file download by download key. Sets Content-Disposition from the
/// key's override name, falling back to the catalog name. Does not refresh
/// the key's TTL.
pub async fn download_by_key(
    pool: &SqlitePool,
    caches: &Caches,
    layout: &PathLayout,
    key: &str,
) -> AppResult<Response<Body>> {
    let cached = files::resolve_download_key(caches, key)
        .await
        .ok_or(AppError::FileNotFound)?;

    let df = files::find_dfile(pool, &cached.file_id).await?;
    if df.is_deleted() {
        return Err(AppError::FileDeleted);
    }

    let dname = if cached.name.is_empty() {
        df.name.clone()
    } else {
        cached.name.clone()
    };

    let body = blob_body(layout, &df, None).await?;
    tracing::info!(file_id = %df.file_id, size = df.size, "transferring whole file");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, df.size)
        .header(header::CONTENT_DISPOSITION, attachment_quoted(&dname)?)
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {e}")))
}

/// Byte-range streaming by download key. Refreshes the key's TTL on every
/// access so long playback sessions do not expire mid-stream.
pub async fn stream_by_key(
    pool: &SqlitePool,
    caches: &Caches,
    layout: &PathLayout,
    key: &str,
    range_header: Option<&str>,
) -> AppResult<Response<Body>> {
    let cached = files::resolve_download_key(caches, key)
        .await
        .ok_or(AppError::FileNotFound)?;

    let df = files::find_dfile(pool, &cached.file_id).await?;
    if df.is_deleted() {
        return Err(AppError::FileDeleted);
    }

    files::refresh_download_key(caches, key, &cached).await;

    let br = adjust_byte_range(parse_range_header(range_header), df.size)?;
    let body = blob_body(layout, &df, Some(br)).await?;
    tracing::info!(file_id = %df.file_id, start = br.start, end = br.end, "streaming range");

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, br.size())
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", br.start, br.end, df.size),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {e}")))
}

/// Internal whole-file download by real file id (no key). Used by trusted
/// callers and the backup surface.
pub async fn download_by_id(
    pool: &SqlitePool,
    layout: &PathLayout,
    file_id: &str,
) -> AppResult<Response<Body>> {
    if file_id.is_empty() {
        return Err(AppError::FileNotFound);
    }
    let df = files::find_dfile(pool, file_id).await?;
    if df.is_deleted() {
        return Err(AppError::FileDeleted);
    }

    let body = blob_body(layout, &df, None).await?;
    tracing::info!(file_id = %df.file_id, size = df.size, "transferring whole file by id");

    let disposition = format!("attachment; filename={}", urlencoding::encode(&df.name));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, df.size)
        .header(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .map_err(|e| AppError::Internal(format!("bad disposition header: {e}")))?,
        )
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {e}")))
}

/// Opens the blob behind `df` (honoring symbolic links) and returns a body
/// for the whole file or a bounded slice. The resulting path must never be
/// used for deletion.
async fn blob_body(
    layout: &PathLayout,
    df: &DFile,
    range: Option<ByteRange>,
) -> AppResult<Body> {
    let path = layout.storage_path(df.effective_file_id());
    let mut file = tokio::fs::File::open(&path).await?;

    match range {
        None => Ok(Body::from_stream(ReaderStream::with_capacity(
            file,
            STREAM_BUFFER_SIZE,
        ))),
        Some(br) => {
            if br.start > 0 {
                file.seek(SeekFrom::Start(br.start as u64)).await?;
            }
            let bounded = file.take(br.size() as u64);
            Ok(Body::from_stream(ReaderStream::with_capacity(
                bounded,
                STREAM_BUFFER_SIZE,
            )))
        }
    }
}

/// `attachment; filename="<name>"`, percent-encoding the name when it does
/// not survive as a raw header value.
fn attachment_quoted(name: &str) -> AppResult<HeaderValue> {
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
        return Ok(v);
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(name)
    ))
    .map_err(|e| AppError::Internal(format!("bad disposition header: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::deletion;
    use crate::testutil;

    #[test]
    fn parses_the_four_range_shapes() {
        let br = parse_range_header(Some("bytes=100-300"));
        assert_eq!(br, ByteRange { start: 100, end: 300 });

        let br = parse_range_header(Some("bytes=-5"));
        assert_eq!(br, ByteRange { start: 0, end: 5 });

        let br = parse_range_header(Some("bytes=10-"));
        assert_eq!(br, ByteRange { start: 10, end: i64::MAX });

        for malformed in [None, Some("bytes="), Some("="), Some("bytes"), Some("bytes=-")] {
            let br = parse_range_header(malformed);
            assert_eq!(br, ByteRange { start: 0, end: i64::MAX }, "{malformed:?}");
        }
    }

    #[test]
    fn unparsable_numbers_keep_their_defaults() {
        let br = parse_range_header(Some("bytes=abc-300"));
        assert_eq!(br, ByteRange { start: 0, end: 300 });

        let br = parse_range_header(Some("bytes=100-xyz"));
        assert_eq!(br, ByteRange { start: 100, end: i64::MAX });
    }

    #[test]
    fn adjust_clamps_end_to_file_size() {
        let br = adjust_byte_range(ByteRange { start: 0, end: i64::MAX }, 100).unwrap();
        assert_eq!(br, ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn adjust_rejects_inverted_ranges() {
        let err = adjust_byte_range(ByteRange { start: 50, end: 10 }, 100).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        // start beyond EOF becomes inverted after clamping.
        let err = adjust_byte_range(ByteRange { start: 200, end: 300 }, 100).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn adjust_caps_the_served_window() {
        let size = 40_000_000;
        let br = adjust_byte_range(ByteRange { start: 0, end: i64::MAX }, size).unwrap();
        assert_eq!(br.size(), BYTE_RANGE_MAX_SIZE);
        assert_eq!(br.end, BYTE_RANGE_MAX_SIZE - 1);

        let br = adjust_byte_range(ByteRange { start: 10, end: i64::MAX }, size).unwrap();
        assert_eq!(br.start, 10);
        assert_eq!(br.size(), BYTE_RANGE_MAX_SIZE);
    }

    async fn upload_bytes(ctx: &testutil::TestCtx, name: &str, content: &[u8]) -> String {
        crate::services::files::upload(&ctx.pool, &ctx.layout, &ctx.locks, content, name)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn download_by_key_serves_whole_file_with_override_name() {
        let ctx = testutil::ctx().await;
        let file_id = upload_bytes(&ctx, "hello.txt", b"hello").await;
        let key = files::mint_download_key(&ctx.pool, &ctx.caches, &file_id, "greeting.txt")
            .await
            .unwrap();

        let resp = download_by_key(&ctx.pool, &ctx.caches, &ctx.layout, &key)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"greeting.txt\""
        );

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn stream_serves_the_requested_window() {
        let ctx = testutil::ctx().await;
        let content: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
        let file_id = upload_bytes(&ctx, "movie.mp4", &content).await;
        let key = files::mint_download_key(&ctx.pool, &ctx.caches, &file_id, "")
            .await
            .unwrap();

        let resp = stream_by_key(
            &ctx.pool,
            &ctx.caches,
            &ctx.layout,
            &key,
            Some("bytes=0-100"),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "101");
        assert_eq!(
            resp.headers()[header::CONTENT_RANGE],
            "bytes 0-100/1048576"
        );
        assert_eq!(resp.headers()[header::ACCEPT_RANGES], "bytes");

        let body = axum::body::to_bytes(resp.into_body(), 2048).await.unwrap();
        assert_eq!(&body[..], &content[..=100]);
    }

    #[tokio::test]
    async fn stream_honors_offsets_and_symbolic_links() {
        let ctx = testutil::ctx().await;
        let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let owner = upload_bytes(&ctx, "clip.mp4", &content).await;
        // Symbolic twin shares the owner's blob.
        let twin = upload_bytes(&ctx, "clip.mp4", &content).await;
        assert_ne!(owner, twin);

        let key = files::mint_download_key(&ctx.pool, &ctx.caches, &twin, "")
            .await
            .unwrap();
        let resp = stream_by_key(
            &ctx.pool,
            &ctx.caches,
            &ctx.layout,
            &key,
            Some("bytes=100-300"),
        )
        .await
        .unwrap();
        assert_eq!(
            resp.headers()[header::CONTENT_RANGE],
            format!("bytes 100-300/{}", content.len())
        );

        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        assert_eq!(&body[..], &content[100..=300]);
    }

    #[tokio::test]
    async fn repeated_stream_calls_on_one_key_succeed() {
        let ctx = testutil::ctx().await;
        let file_id = upload_bytes(&ctx, "clip.mp4", &[1u8; 512]).await;
        let key = files::mint_download_key(&ctx.pool, &ctx.caches, &file_id, "")
            .await
            .unwrap();

        for _ in 0..2 {
            let resp = stream_by_key(
                &ctx.pool,
                &ctx.caches,
                &ctx.layout,
                &key,
                Some("bytes=0-15"),
            )
            .await
            .unwrap();
            assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        }
    }

    #[tokio::test]
    async fn resolved_key_for_deleted_row_reports_deleted_not_missing() {
        let ctx = testutil::ctx().await;
        let file_id = upload_bytes(&ctx, "gone.txt", b"bye").await;
        let key = files::mint_download_key(&ctx.pool, &ctx.caches, &file_id, "")
            .await
            .unwrap();

        deletion::ldelete(&ctx.pool, &ctx.locks, &file_id).await.unwrap();

        let err = download_by_key(&ctx.pool, &ctx.caches, &ctx.layout, &key)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileDeleted));

        let err = stream_by_key(&ctx.pool, &ctx.caches, &ctx.layout, &key, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileDeleted));
    }

    #[tokio::test]
    async fn unknown_key_reports_not_found() {
        let ctx = testutil::ctx().await;
        let err = download_by_key(&ctx.pool, &ctx.caches, &ctx.layout, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileNotFound));
    }
}
