//! Multipart form assembly
//!
//! [`FormCollector`] bridges the streaming parser and the [`Request`] model:
//! value parts land in `request.args`, file parts drive the `request.upload`
//! record. Limits come from [`UploadConfig`]; a breach aborts the upload and
//! is reported to the caller after the offending `feed`.

use crate::request::{Request, UploadStatus};
use crate::Error;
use squall_multipart::{parse_content_disposition, Handler};

/// Default maximum file size (10MB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum total body size (50MB).
pub const DEFAULT_MAX_TOTAL_SIZE: usize = 50 * 1024 * 1024;

/// Default maximum number of parts.
pub const DEFAULT_MAX_FIELDS: usize = 100;

/// Default cap on the in-memory upload capture (64KB).
pub const DEFAULT_BUFFER_CAP: usize = 64 * 1024;

/// Limits for multipart form processing
#[derive(Debug, Clone)]
pub struct UploadConfig {
    max_file_size: usize,
    max_total_size: usize,
    max_fields: usize,
    buffer_cap: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_fields: DEFAULT_MAX_FIELDS,
            buffer_cap: DEFAULT_BUFFER_CAP,
        }
    }
}

impl UploadConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum file size.
    pub fn max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the maximum total body size.
    pub fn max_total_size(mut self, size: usize) -> Self {
        self.max_total_size = size;
        self
    }

    /// Set the maximum number of parts.
    pub fn max_fields(mut self, count: usize) -> Self {
        self.max_fields = count;
        self
    }

    /// Set the cap on the in-memory upload capture.
    pub fn buffer_cap(mut self, size: usize) -> Self {
        self.buffer_cap = size;
        self
    }

    /// Get the maximum total body size.
    pub fn get_max_total_size(&self) -> usize {
        self.max_total_size
    }
}

/// Routes multipart events into a [`Request`].
///
/// Handler callbacks cannot fail, so limit breaches are recorded and must be
/// checked with [`take_error`](FormCollector::take_error) after each `feed`;
/// once a breach is recorded all further part data is dropped.
pub struct FormCollector<'r> {
    request: &'r mut Request,
    config: UploadConfig,
    field: Vec<u8>,
    value: Vec<u8>,
    part_name: Option<String>,
    part_filename: Option<String>,
    part_mimetype: Option<String>,
    part_value: Vec<u8>,
    parts_seen: usize,
    total_len: usize,
    error: Option<Error>,
}

impl<'r> FormCollector<'r> {
    /// Create a collector writing into `request`.
    pub fn new(request: &'r mut Request, config: UploadConfig) -> Self {
        Self {
            request,
            config,
            field: Vec::new(),
            value: Vec::new(),
            part_name: None,
            part_filename: None,
            part_mimetype: None,
            part_value: Vec::new(),
            parts_seen: 0,
            total_len: 0,
            error: None,
        }
    }

    /// Take the recorded limit violation, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// True once a limit violation has been recorded.
    pub fn exceeded(&self) -> bool {
        self.error.is_some()
    }

    fn record_error(&mut self, error: Error) {
        if self.error.is_none() {
            log::warn!("multipart limit exceeded: {error}");
            self.request.upload.status = UploadStatus::Aborted;
            self.error = Some(error);
        }
    }

    fn in_file_part(&self) -> bool {
        self.part_filename.is_some()
    }
}

impl Handler for FormCollector<'_> {
    fn on_part_begin(&mut self) {
        self.part_name = None;
        self.part_filename = None;
        self.part_mimetype = None;
        self.part_value.clear();

        self.parts_seen += 1;
        if self.parts_seen > self.config.max_fields {
            self.record_error(Error::TooManyFields {
                count: self.parts_seen,
                max: self.config.max_fields,
            });
        }
    }

    fn on_header_field(&mut self, data: &[u8]) {
        self.field.extend_from_slice(data);
    }

    fn on_header_value(&mut self, data: &[u8]) {
        self.value.extend_from_slice(data);
    }

    fn on_header_end(&mut self) {
        let name = String::from_utf8_lossy(&self.field).into_owned();
        let value = String::from_utf8_lossy(&self.value).into_owned();
        if name.eq_ignore_ascii_case("content-disposition") {
            let (part_name, filename) = parse_content_disposition(&value);
            self.part_name = part_name;
            self.part_filename = filename;
        } else if name.eq_ignore_ascii_case("content-type") {
            self.part_mimetype = Some(value);
        }
        self.field.clear();
        self.value.clear();
    }

    fn on_headers_end(&mut self) {
        if self.exceeded() {
            return;
        }
        if self.in_file_part() {
            let upload = &mut self.request.upload;
            upload.status = UploadStatus::Started;
            upload.filename = self.part_filename.clone();
            upload.mimetype = self.part_mimetype.clone();
            upload.total_len = 0;
            upload.buffered_len = 0;
            upload.buffer.clear();
        }
    }

    fn on_part_data(&mut self, data: &[u8]) {
        if self.exceeded() {
            return;
        }

        self.total_len += data.len();
        if self.total_len > self.config.max_total_size {
            self.record_error(Error::BodyTooLarge {
                size: self.total_len,
                limit: self.config.max_total_size,
            });
            return;
        }

        if self.in_file_part() {
            let upload = &mut self.request.upload;
            upload.status = UploadStatus::Writing;
            upload.total_len += data.len();
            if upload.total_len > self.config.max_file_size {
                let size = upload.total_len;
                let limit = self.config.max_file_size;
                self.record_error(Error::BodyTooLarge { size, limit });
                return;
            }
            let room = self.config.buffer_cap.saturating_sub(upload.buffer.len());
            let take = data.len().min(room);
            upload.buffer.extend_from_slice(&data[..take]);
            upload.buffered_len = upload.buffer.len();
        } else {
            let room = self.config.buffer_cap.saturating_sub(self.part_value.len());
            let take = data.len().min(room);
            self.part_value.extend_from_slice(&data[..take]);
        }
    }

    fn on_part_end(&mut self) {
        if self.exceeded() {
            return;
        }
        if self.in_file_part() {
            self.request.upload.status = UploadStatus::Done;
        } else if let Some(name) = self.part_name.take() {
            let value = String::from_utf8_lossy(&self.part_value).into_owned();
            self.request.args.insert(name, value);
        }
        self.part_value.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use squall_multipart::MultipartParser;

    const BODY: &[u8] = b"--rim\r\n\
        Content-Disposition: form-data; name=\"label\"\r\n\
        \r\n\
        kitchen clock\r\n\
        --rim\r\n\
        Content-Disposition: form-data; name=\"firmware\"; filename=\"fw.bin\"\r\n\
        Content-Type: application/octet-stream\r\n\
        \r\n\
        ABCDEFGH\r\n\
        --rim--\r\n";

    fn run(config: UploadConfig, chunk: usize) -> (Request, Option<Error>, bool) {
        let mut request = Request::new(Method::Post, "/upload");
        let mut parser = MultipartParser::new("rim");
        let mut collector = FormCollector::new(&mut request, config);
        for piece in BODY.chunks(chunk) {
            parser.feed(piece, &mut collector);
            if collector.exceeded() {
                break;
            }
        }
        let error = collector.take_error();
        let succeeded = parser.succeeded();
        (request, error, succeeded)
    }

    #[test]
    fn test_collects_args_and_upload() {
        let (request, error, succeeded) = run(UploadConfig::default(), BODY.len());
        assert!(error.is_none());
        assert!(succeeded);

        assert_eq!(request.arg("label"), Some("kitchen clock"));
        let upload = &request.upload;
        assert_eq!(upload.status, UploadStatus::Done);
        assert_eq!(upload.filename.as_deref(), Some("fw.bin"));
        assert_eq!(upload.mimetype.as_deref(), Some("application/octet-stream"));
        assert_eq!(upload.total_len, 8);
        assert_eq!(upload.buffer, b"ABCDEFGH".to_vec());
    }

    #[test]
    fn test_chunked_delivery_matches_whole() {
        let (whole, _, _) = run(UploadConfig::default(), BODY.len());
        let (chunked, error, succeeded) = run(UploadConfig::default(), 3);
        assert!(error.is_none());
        assert!(succeeded);
        assert_eq!(chunked.args, whole.args);
        assert_eq!(chunked.upload.buffer, whole.upload.buffer);
        assert_eq!(chunked.upload.total_len, whole.upload.total_len);
    }

    #[test]
    fn test_buffer_cap_truncates_but_counts() {
        let (request, error, _) = run(UploadConfig::default().buffer_cap(4), BODY.len());
        assert!(error.is_none());

        let upload = &request.upload;
        assert_eq!(upload.total_len, 8);
        assert_eq!(upload.buffered_len, 4);
        assert_eq!(upload.buffer, b"ABCD".to_vec());
        assert_eq!(upload.status, UploadStatus::Done);
    }

    #[test]
    fn test_file_size_limit_aborts_upload() {
        let (request, error, _) = run(UploadConfig::default().max_file_size(4), BODY.len());
        assert!(matches!(error, Some(Error::BodyTooLarge { limit: 4, .. })));
        assert_eq!(request.upload.status, UploadStatus::Aborted);
    }

    #[test]
    fn test_field_count_limit() {
        let (_, error, _) = run(UploadConfig::default().max_fields(1), BODY.len());
        assert!(matches!(error, Some(Error::TooManyFields { max: 1, .. })));
    }

    #[test]
    fn test_total_size_limit() {
        let (_, error, _) = run(UploadConfig::default().max_total_size(10), BODY.len());
        assert!(matches!(error, Some(Error::BodyTooLarge { limit: 10, .. })));
    }
}
