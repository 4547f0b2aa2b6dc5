//! Lazy zip streaming for multi-file shares.
//!
//! A producer task compresses entries in order into a bounded in-memory pipe
//! while the consumer drains it, so peak memory is one pipe buffer plus the
//! deflate state regardless of total share size. The resulting
//! [`ArchiveStream`] is finite and can only be read once.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use bytes::Bytes;
use futures::io::AsyncWriteExt;
use futures::{Future, Stream};
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

const PIPE_CAPACITY: usize = 64 * 1024;
const CHUNK_SIZE: usize = 32 * 1024;

enum EntrySource {
    Path(PathBuf),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// One named byte source to place in the archive.
pub struct ArchiveEntry {
    name: String,
    source: EntrySource,
}

impl ArchiveEntry {
    /// The file is opened only when the producer reaches this entry.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::Path(path.into()),
        }
    }

    pub fn reader(name: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::Reader(Box::new(reader)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn open(self) -> io::Result<(String, Box<dyn AsyncRead + Send + Unpin>)> {
        let reader: Box<dyn AsyncRead + Send + Unpin> = match self.source {
            EntrySource::Path(path) => Box::new(tokio::fs::File::open(path).await?),
            EntrySource::Reader(reader) => reader,
        };
        Ok((self.name, reader))
    }
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Start streaming `entries` as a zip archive.
///
/// Must be called from within a tokio runtime.
pub fn stream(entries: Vec<ArchiveEntry>) -> ArchiveStream {
    let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
    let producer = tokio::spawn(write_archive(entries, sink));
    ArchiveStream {
        reader: ReaderStream::with_capacity(source, CHUNK_SIZE),
        producer: Some(producer),
        done: false,
    }
}

async fn write_archive(entries: Vec<ArchiveEntry>, sink: DuplexStream) -> io::Result<()> {
    let mut writer = ZipFileWriter::with_tokio(sink);
    let mut buf = vec![0u8; CHUNK_SIZE];

    for entry in entries {
        let (name, mut source) = entry.open().await?;
        let builder = ZipEntryBuilder::new(name.into(), Compression::Deflate);
        let mut entry_writer = writer
            .write_entry_stream(builder)
            .await
            .map_err(io::Error::other)?;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            entry_writer.write_all(&buf[..n]).await?;
        }
        entry_writer.close().await.map_err(io::Error::other)?;
    }

    // dropping the returned sink closes the pipe and ends the stream
    writer.close().await.map_err(io::Error::other)?;
    Ok(())
}

/// Zip bytes as they are produced.
///
/// The stream only ends cleanly (`None` without a preceding error) once the
/// producer has written the central directory, so a consumer that sees a
/// clean end knows it received a complete archive.
pub struct ArchiveStream {
    reader: ReaderStream<DuplexStream>,
    producer: Option<JoinHandle<io::Result<()>>>,
    done: bool,
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut this.reader).poll_next(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                // pipe closed: the producer's outcome decides if the archive is whole
                let Some(producer) = this.producer.as_mut() else {
                    this.done = true;
                    return Poll::Ready(None);
                };
                let outcome = ready!(Pin::new(producer).poll(cx));
                this.producer = None;
                this.done = true;
                match outcome {
                    Ok(Ok(())) => Poll::Ready(None),
                    Ok(Err(e)) => Poll::Ready(Some(Err(e))),
                    Err(e) => Poll::Ready(Some(Err(io::Error::other(e)))),
                }
            }
        }
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl std::fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
