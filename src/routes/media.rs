use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ServeMediaQuery {
    pub download: Option<u8>,
}

/// Serve a file stored by the local storage backend, honouring `Range`.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<ServeMediaQuery>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let media_dir = PathBuf::from(&state.config.media_dir);
    let file_path = media_dir.join(&path);

    // The resolved file must stay inside the media directory.
    let canonical_media = tokio::fs::canonicalize(&media_dir)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let canonical_file = tokio::fs::canonicalize(&file_path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    if !canonical_file.starts_with(&canonical_media) {
        return Err(StatusCode::FORBIDDEN);
    }

    let metadata = tokio::fs::metadata(&canonical_file)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    if !metadata.is_file() {
        return Err(StatusCode::NOT_FOUND);
    }
    let file_size = metadata.len();

    let content_type = mime_guess::from_path(&canonical_file)
        .first_raw()
        .unwrap_or("application/octet-stream");

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    if params.download.unwrap_or(0) != 0 {
        let fname = canonical_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download");
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{fname}\""),
        );
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map_or(ByteRange::Whole, |r| parse_range(r, file_size));

    let response = match range {
        ByteRange::Partial { start, end } => {
            let length = end - start + 1;
            let mut file = tokio::fs::File::open(&canonical_file)
                .await
                .map_err(|_| StatusCode::NOT_FOUND)?;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{file_size}"))
                .body(Body::from_stream(ReaderStream::new(file.take(length))))
        }
        ByteRange::Unsatisfiable => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
            .body(Body::empty()),
        ByteRange::Whole => {
            let file = tokio::fs::File::open(&canonical_file)
                .await
                .map_err(|_| StatusCode::NOT_FOUND)?;
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, file_size.to_string())
                .body(Body::from_stream(ReaderStream::new(file)))
        }
    };

    response.map_err(|e| {
        tracing::error!(error = %e, "could not build media response");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    /// No usable `Range` header: serve the whole file.
    Whole,
    /// Inclusive bounds within the file.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interpret a `Range` header. Supports `bytes=a-b`, `bytes=a-` and the
/// suffix form `bytes=-n`. Other units, malformed specs and multi-range
/// requests are ignored.
fn parse_range(range: &str, file_size: u64) -> ByteRange {
    let Some(ranges) = range.trim().strip_prefix("bytes=") else {
        return ByteRange::Whole;
    };
    if ranges.contains(',') {
        return ByteRange::Whole;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Whole;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Whole;
        };
        if suffix == 0 || file_size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: file_size - suffix.min(file_size),
            end: file_size - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Whole;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Whole,
        }
    };
    if start >= file_size {
        return ByteRange::Unsatisfiable;
    }
    let last = file_size - 1;
    ByteRange::Partial {
        start,
        end: end.map_or(last, |e| e.min(last)),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_range, ByteRange};

    fn partial(start: u64, end: u64) -> ByteRange {
        ByteRange::Partial { start, end }
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("bytes=0-99", 1000), partial(0, 99));
        assert_eq!(parse_range("bytes=500-", 1000), partial(500, 999));
        assert_eq!(parse_range("bytes=-100", 1000), partial(900, 999));
        assert_eq!(parse_range("bytes=-5000", 1000), partial(0, 999));
        assert_eq!(parse_range("bytes=900-5000", 1000), partial(900, 999));
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(parse_range("bytes=1000-", 1000), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-1", 0), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 10), ByteRange::Unsatisfiable);
    }

    #[test]
    fn unusable_ranges_are_ignored() {
        assert_eq!(parse_range("items=0-1", 10), ByteRange::Whole);
        assert_eq!(parse_range("bytes=0-1,4-5", 10), ByteRange::Whole);
        assert_eq!(parse_range("bytes=5-1", 1000), ByteRange::Whole);
        assert_eq!(parse_range("bytes=abc", 10), ByteRange::Whole);
        assert_eq!(parse_range("bytes=x-3", 10), ByteRange::Whole);
    }
}
