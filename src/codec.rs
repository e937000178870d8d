/// Request body encoders and response body decoders
use crate::error::{ApiError, CodecError, Result};
use crate::request::RequestBody;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

/// Initial buffer for collected bodies
const READ_BUFFER: usize = 8 * 1024;

/// Turns a typed value into a request body
pub trait Encode {
    fn content_type(&self) -> &str;

    fn encode(&self) -> Result<RequestBody>;

    /// Extra headers that belong to this body, such as `Content-Disposition`
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Turns a successful response body into a typed result
///
/// `decode` may run more than once for one request when a transport
/// fault forces a retry, so it takes `&self` and must not assume a fresh
/// destination.
pub trait Decode {
    type Output;

    fn decode(&self, body: &mut dyn Read) -> std::result::Result<Self::Output, CodecError>;
}

/// JSON request body with a configurable media type
///
/// The service uses vendor media types per resource, for example
/// `application/vnd.mendeley-document.1+json`.
#[derive(Debug, Clone)]
pub struct Json<T> {
    value: T,
    content_type: String,
}

impl<T: Serialize> Json<T> {
    pub fn new(value: T) -> Self {
        Self::with_media_type(value, "application/json")
    }

    pub fn with_media_type(value: T, media_type: impl Into<String>) -> Self {
        Self {
            value,
            content_type: media_type.into(),
        }
    }
}

impl<T: Serialize> Encode for Json<T> {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn encode(&self) -> Result<RequestBody> {
        serde_json::to_vec(&self.value)
            .map(RequestBody::Bytes)
            .map_err(|e| ApiError::Encode(e.to_string()))
    }
}

/// `application/x-www-form-urlencoded` body
#[derive(Debug, Clone, Default)]
pub struct Form {
    pairs: Vec<(String, String)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((name.into(), value.into()));
        self
    }

    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

impl Encode for Form {
    fn content_type(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    fn encode(&self) -> Result<RequestBody> {
        Ok(RequestBody::Bytes(self.to_query_string().into_bytes()))
    }
}

/// Streams a file from disk as the request body
#[derive(Debug, Clone)]
pub struct FileUpload {
    path: PathBuf,
    content_type: String,
    file_name: String,
}

impl FileUpload {
    /// Upload `path`, announcing it under its own file name
    pub fn new(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Self {
            path,
            content_type: content_type.into(),
            file_name,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}

impl Encode for FileUpload {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn encode(&self) -> Result<RequestBody> {
        if !self.path.is_file() {
            return Err(ApiError::Encode(format!(
                "{} is not a readable file",
                self.path.display()
            )));
        }
        Ok(RequestBody::File(self.path.clone()))
    }

    fn headers(&self) -> Vec<(String, String)> {
        let escaped = self.file_name.replace('\\', "\\\\").replace('"', "\\\"");
        vec![(
            "Content-Disposition".to_string(),
            format!("attachment; filename=\"{}\"", escaped),
        )]
    }
}

/// Decodes a JSON body into `T`
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<T: DeserializeOwned> Decode for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, body: &mut dyn Read) -> std::result::Result<T, CodecError> {
        // Buffer first: serde_json reads byte-by-byte from an unbuffered reader.
        let mut bytes = Vec::with_capacity(READ_BUFFER);
        body.read_to_end(&mut bytes)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Collects the body as raw bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl Decode for RawBytes {
    type Output = Vec<u8>;

    fn decode(&self, body: &mut dyn Read) -> std::result::Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::with_capacity(READ_BUFFER);
        body.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Discards the body, for endpoints answering `204 No Content`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContent;

impl Decode for NoContent {
    type Output = ();

    fn decode(&self, body: &mut dyn Read) -> std::result::Result<(), CodecError> {
        io::copy(body, &mut io::sink())?;
        Ok(())
    }
}

/// Streams the body into a file, returning the number of bytes written
///
/// The file is truncated on every attempt.
#[derive(Debug, Clone)]
pub struct ToFile {
    path: PathBuf,
}

impl ToFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Decode for ToFile {
    type Output = u64;

    fn decode(&self, body: &mut dyn Read) -> std::result::Result<u64, CodecError> {
        let file = File::create(&self.path)
            .map_err(|e| CodecError::Malformed(format!("{}: {}", self.path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        let written = io::copy(body, &mut writer)?;
        writer
            .flush()
            .map_err(|e| CodecError::Malformed(format!("{}: {}", self.path.display(), e)))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Folder {
        id: String,
        name: String,
    }

    #[test]
    fn test_json_decoder() {
        let mut body: &[u8] = br#"[{"id":"f1","name":"Reading list"}]"#;
        let folders = JsonDecoder::<Vec<Folder>>::new().decode(&mut body).unwrap();

        assert_eq!(
            folders,
            vec![Folder {
                id: "f1".to_string(),
                name: "Reading list".to_string()
            }]
        );
    }

    #[test]
    fn test_json_decoder_reports_malformed() {
        let mut body: &[u8] = b"{\"id\":";
        let err = JsonDecoder::<Folder>::new().decode(&mut body).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_json_decoder_reports_stream_failure_as_io() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
        }

        let err = JsonDecoder::<Folder>::new().decode(&mut Broken).unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }

    #[test]
    fn test_json_encoder_media_type() {
        let body = Json::with_media_type(
            Folder {
                id: "f1".into(),
                name: "Drafts".into(),
            },
            "application/vnd.mendeley-folder.1+json",
        );

        assert_eq!(body.content_type(), "application/vnd.mendeley-folder.1+json");
        match body.encode().unwrap() {
            RequestBody::Bytes(bytes) => {
                assert_eq!(bytes, br#"{"id":"f1","name":"Drafts"}"#.to_vec())
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_form_encoding() {
        let form = Form::new()
            .field("grant_type", "password")
            .field("username", "ada@example.com")
            .field("password", "p&ss word");

        assert_eq!(
            form.to_query_string(),
            "grant_type=password&username=ada%40example.com&password=p%26ss+word"
        );
    }

    #[test]
    fn test_file_upload_headers() {
        let upload = FileUpload::new("/tmp/paper \"draft\".pdf", "application/pdf");
        assert_eq!(
            upload.headers(),
            vec![(
                "Content-Disposition".to_string(),
                "attachment; filename=\"paper \\\"draft\\\".pdf\"".to_string()
            )]
        );
        assert!(matches!(
            FileUpload::new("/definitely/not/here.pdf", "application/pdf").encode(),
            Err(ApiError::Encode(_))
        ));
    }

    #[test]
    fn test_to_file_writes_body() {
        let path = std::env::temp_dir().join(format!("shelfmark_dl_{}", rand::random::<u32>()));
        let mut body: &[u8] = b"%PDF-1.7 fake";

        let written = ToFile::new(&path).decode(&mut body).unwrap();

        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 fake");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_no_content_drains() {
        let mut body: &[u8] = b"ignored";
        NoContent.decode(&mut body).unwrap();
        assert!(body.is_empty());
    }
}
