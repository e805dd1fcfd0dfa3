//! Day file codec
//!
//! A day bucket is stored as zlib-compressed JSON at
//! `{directory}/{YYYY}/{MM}/{DD}/{prefix}{YYYY-MM-DD}`.

use chrono::NaiveDate;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{day_string, DayBucket};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize and compress a bucket
pub fn encode(bucket: &DayBucket) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(bucket)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decompress and parse a bucket, falling back to an empty one on bad input
pub fn decode(bytes: &[u8]) -> DayBucket {
    match try_decode(bytes) {
        Ok(bucket) => bucket,
        Err(e) => {
            warn!("Discarding unreadable day data: {}", e);
            DayBucket::default()
        }
    }
}

fn try_decode(bytes: &[u8]) -> Result<DayBucket, CodecError> {
    let mut json = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Location of the file holding `day`.
///
/// Directory segments and file name suffix come from the same date.
pub fn day_path(directory: &Path, prefix: &str, day: NaiveDate) -> PathBuf {
    directory
        .join(day.format("%Y").to_string())
        .join(day.format("%m").to_string())
        .join(day.format("%d").to_string())
        .join(format!("{}{}", prefix, day_string(day)))
}

/// Write `bucket` as the file for `day`, replacing any previous content
pub fn write_day(
    directory: &Path,
    prefix: &str,
    day: NaiveDate,
    bucket: &DayBucket,
) -> Result<PathBuf, CodecError> {
    let path = day_path(directory, prefix, day);
    let bytes = encode(bucket)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Write beside the target and rename so readers never see a partial file
    let tmp = tmp_path(&path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    debug!(
        "Wrote {} ({} bytes, {} sessions)",
        path.display(),
        bytes.len(),
        bucket.session_count()
    );
    Ok(path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Load the bucket for `day`; missing or unreadable files yield an empty bucket
pub fn read_day(directory: &Path, prefix: &str, day: NaiveDate) -> DayBucket {
    let path = day_path(directory, prefix, day);
    match fs::read(&path) {
        Ok(bytes) => decode(&bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => DayBucket::default(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            DayBucket::default()
        }
    }
}

/// Storage root and file prefix of one recorder instance
#[derive(Debug, Clone)]
pub struct DayFiles {
    directory: PathBuf,
    prefix: String,
}

impl DayFiles {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    pub fn path(&self, day: NaiveDate) -> PathBuf {
        day_path(&self.directory, &self.prefix, day)
    }

    pub fn write(&self, day: NaiveDate, bucket: &DayBucket) -> Result<PathBuf, CodecError> {
        write_day(&self.directory, &self.prefix, day, bucket)
    }

    pub fn read(&self, day: NaiveDate) -> DayBucket {
        read_day(&self.directory, &self.prefix, day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Action, VisitorKey};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_bucket() -> DayBucket {
        [
            (VisitorKey::Address("10.0.0.1".to_string()), vec![]),
            (
                VisitorKey::Address("2001:db8::1".to_string()),
                vec![Action::new("/blog/2024/post-1", "ref=home")],
            ),
            (
                VisitorKey::derive(day(2024, 3, 1), "10.0.0.3", Some("pepper")),
                (0..50)
                    .map(|i| Action::new(format!("/docs/page-{}", i % 7), ""))
                    .collect(),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_roundtrip_empty_bucket() {
        let bucket = DayBucket::default();
        let bytes = encode(&bucket).expect("encode");
        assert_eq!(decode(&bytes), bucket);
    }

    #[test]
    fn test_roundtrip_mixed_bucket() {
        let bucket = sample_bucket();
        let bytes = encode(&bucket).expect("encode");
        let decoded = decode(&bytes);
        assert_eq!(decoded, bucket);
        assert_eq!(decoded.session_count(), 3);
    }

    #[test]
    fn test_encoded_payload_is_zlib_json() {
        let mut bucket = DayBucket::default();
        bucket.push(
            VisitorKey::Address("1.2.3.4".to_string()),
            Action::new("/a", "b=c"),
        );
        let bytes = encode(&bucket).expect("encode");

        let mut json = String::new();
        ZlibDecoder::new(bytes.as_slice())
            .read_to_string(&mut json)
            .expect("zlib decompress");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["addr:1.2.3.4"][0]["page"], "/a");
        assert_eq!(value["addr:1.2.3.4"][0]["query"], "b=c");
    }

    #[test]
    fn test_decode_garbage_is_empty() {
        assert!(decode(b"definitely not zlib").is_empty());
        assert!(decode(&[]).is_empty());

        // Valid zlib, invalid payload
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"nokey\": []}").unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(decode(&bytes).is_empty());
    }

    #[test]
    fn test_day_path_layout() {
        let path = day_path(Path::new("/var/lib/pv"), "site-", day(2024, 1, 5));
        assert_eq!(
            path,
            PathBuf::from("/var/lib/pv/2024/01/05/site-2024-01-05")
        );
    }

    #[test]
    fn test_read_missing_day_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = read_day(dir.path(), "site-", day(2020, 2, 29));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_write_then_read_day() {
        let dir = tempfile::tempdir().unwrap();
        let d = day(2024, 12, 31);
        let bucket = sample_bucket();

        let path = write_day(dir.path(), "site-", d, &bucket).expect("write");
        assert!(path.ends_with("2024/12/31/site-2024-12-31"));
        assert!(!tmp_path(&path).exists());
        assert_eq!(read_day(dir.path(), "site-", d), bucket);

        // Overwrite with smaller content
        let mut smaller = DayBucket::default();
        smaller.push(VisitorKey::Address("x".to_string()), Action::new("/", ""));
        write_day(dir.path(), "site-", d, &smaller).expect("overwrite");
        assert_eq!(read_day(dir.path(), "site-", d), smaller);
    }

    #[test]
    fn test_read_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let d = day(2024, 6, 1);
        let path = day_path(dir.path(), "", d);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"garbage").unwrap();

        assert!(read_day(dir.path(), "", d).is_empty());
    }
}
