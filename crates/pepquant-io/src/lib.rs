use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWriteExt, BufReader};

pub mod mzml;
pub mod snapshot;
pub mod util;

/// A file or directory on local storage
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataPath(PathBuf);

impl FromStr for DataPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidPath);
        }
        Ok(DataPath(s.into()))
    }
}

impl From<PathBuf> for DataPath {
    fn from(path: PathBuf) -> Self {
        DataPath(path)
    }
}

impl std::fmt::Display for DataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl DataPath {
    /// Recursively create directories as needed
    pub fn mkdir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.0)
    }

    /// Push a filename to the current path, see [`PathBuf::push`]
    pub fn push<P: AsRef<str>>(&mut self, path: P) {
        self.0.push(path.as_ref())
    }

    /// Return a new path with `path` appended
    pub fn join<P: AsRef<str>>(&self, path: P) -> Self {
        let mut new = self.clone();
        new.push(path);
        new
    }

    pub fn filename(&self) -> Option<&str> {
        self.0.file_name().and_then(|s| s.to_str())
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Remove the file at this path. A missing file is not an error
    pub fn remove(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.0) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Does the path end in "gz" or "gzip"?
    fn gzip_heuristic(&self) -> bool {
        match self.0.extension() {
            Some(ext) => ext.to_ascii_lowercase() == "gz" || ext.to_ascii_lowercase() == "gzip",
            _ => false,
        }
    }

    async fn mk_bufreader(
        &self,
    ) -> Result<BufReader<Box<dyn AsyncRead + Unpin + Send + Sync>>, Error> {
        let file = tokio::fs::File::open(&self.0)
            .await
            .map_err(|source| Error::Open {
                path: self.to_string(),
                source,
            })?;
        Ok(BufReader::new(Box::new(file)))
    }

    /// Open a buffered stream to the file, decompressing it if gzipped
    pub async fn read(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send + Sync>, Error> {
        let reader = self.mk_bufreader().await?;
        match self.gzip_heuristic() {
            true => {
                let gzip = GzipDecoder::new(reader);
                Ok(Box::new(BufReader::new(gzip)))
            }
            false => Ok(Box::new(reader)),
        }
    }

    pub async fn write_bytes(&self, bytes: Vec<u8>) -> Result<(), Error> {
        let bytes: Vec<u8> = match self.gzip_heuristic() {
            true => {
                let inner = Vec::with_capacity(bytes.len() / 2);
                let mut wtr = GzipEncoder::new(inner);
                wtr.write_all(&bytes).await?;
                wtr.shutdown().await?;
                wtr.into_inner()
            }
            false => bytes,
        };
        let mut file = tokio::fs::File::create(&self.0).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn write_bytes_sync(&self, bytes: Vec<u8>) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        rt.block_on(async { self.write_bytes(bytes).await })
    }
}

/// Open `path` and run `func` on its (decompressed) contents, blocking on a
/// single-threaded runtime until it completes
pub fn read_and_execute<P, F, Fut, T>(path: P, func: F) -> Result<T, Error>
where
    P: AsRef<str>,
    Fut: futures::Future<Output = Result<T, Error>>,
    F: FnOnce(Box<dyn AsyncBufRead + Unpin>) -> Fut,
{
    let path = path.as_ref().parse::<DataPath>()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let reader = path.read().await?;
        func(reader).await
    })
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid path")]
    InvalidPath,
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    IO(#[from] tokio::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("MzML error: {0}")]
    MzML(#[from] mzml::MzMLError),
    #[error("no evidence snapshot found in {0}")]
    MissingSnapshot(String),
    #[error("corrupt {level} snapshot: {source}")]
    Snapshot {
        level: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
