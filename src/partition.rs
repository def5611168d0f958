use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::{BodySink, ContentDescriptor, ContentSource, Liveness, Resolved, SourceError};

/// A resource stored as an ordered sequence of partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionedResource {
    pub id: u64,
    pub name: String,
    /// Sum of all partition lengths.
    pub length: u64,
    pub last_modified: SystemTime,
}

/// Sequential access to the partitions of one resource, in ascending
/// sequence order. Only the current partition can be read.
#[async_trait]
pub trait PartitionCursor: Send {
    /// Move to the next partition and return its declared length, or `None`
    /// once every partition has been visited.
    async fn advance(&mut self) -> io::Result<Option<u64>>;

    /// Read bytes of the current partition starting at `index`.
    /// Returns 0 at the end of the partition.
    async fn read_at(&mut self, index: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// Storage keeping resources as independently sized, append-only partitions.
///
/// Shared by all requests; every [`PartitionStore::open`] must return an
/// independent cursor.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    type Cursor: PartitionCursor;

    async fn lookup(&self, name: &str) -> io::Result<Option<PartitionedResource>>;

    async fn open(&self, id: u64) -> io::Result<Self::Cursor>;
}

/// Streams the window `[offset, offset + length)` of a partitioned resource
/// into `sink`, where a `length` of zero means "until the last partition".
///
/// Partitions are scanned in order while keeping a running total of their
/// lengths. The partition containing `offset` is read from the matching
/// local index, every later one from its start, one buffer at a time, so no
/// partition is ever held in memory as a whole. Running out of partitions
/// before `length` is reached is not an error: the number of bytes actually
/// written is returned.
pub async fn read_window<C, S>(
    cursor: &mut C,
    offset: u64,
    length: u64,
    buffer_size: usize,
    sink: &mut S,
    liveness: &mut Liveness,
) -> io::Result<u64>
where
    C: PartitionCursor + ?Sized,
    S: BodySink + ?Sized,
{
    let mut remaining = (length > 0).then_some(length);
    let mut pending_offset = Some(offset);
    let mut cumulative = 0u64;
    let mut written = 0u64;
    let mut partition = 0usize;

    'partitions: while let Some(declared) = cursor.advance().await? {
        let before = cumulative;
        cumulative += declared;
        partition += 1;

        let mut index = match pending_offset {
            Some(offset) if offset < cumulative => {
                pending_offset = None;
                offset - before
            }
            Some(_) => continue,
            None => 0,
        };
        tracing::trace!(partition, index, declared, "reading partition");

        loop {
            let in_partition = declared.saturating_sub(index);
            let nbytes = match remaining {
                Some(0) => break 'partitions,
                Some(remaining) => remaining.min(in_partition),
                None => in_partition,
            };
            let nbytes = usize::try_from(nbytes).unwrap_or(usize::MAX).min(buffer_size);
            if nbytes == 0 {
                break;
            }

            if !liveness.check(&*sink) {
                break 'partitions;
            }

            let mut buffer = BytesMut::zeroed(nbytes);
            let n = cursor.read_at(index, &mut buffer).await?;
            if n == 0 {
                // payload shorter than declared
                break;
            }
            buffer.truncate(n);
            if !liveness.deliver(&mut *sink, buffer.freeze()).await? {
                break 'partitions;
            }

            index += n as u64;
            written += n as u64;
            if let Some(remaining) = remaining.as_mut() {
                *remaining -= n as u64;
            }
        }
    }

    Ok(written)
}

/// [`ContentSource`] over a [`PartitionStore`]. The per-request handle is
/// the resource id.
#[derive(Debug, Clone)]
pub struct PartitionedSource<P> {
    store: P,
}

impl<P: PartitionStore> PartitionedSource<P> {
    pub fn new(store: P) -> Self {
        PartitionedSource { store }
    }
}

#[async_trait]
impl<P: PartitionStore> ContentSource for PartitionedSource<P> {
    type Handle = u64;

    async fn resolve(&self, key: &str) -> Result<Resolved<u64>, SourceError> {
        let name = key.trim_start_matches('/');
        let resource = self
            .store
            .lookup(name)
            .await?
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;

        let descriptor = ContentDescriptor::new(resource.name, resource.length, resource.last_modified);
        Ok(Resolved { descriptor, handle: resource.id })
    }

    async fn write_window(
        &self,
        handle: &u64,
        offset: u64,
        length: u64,
        buffer_size: usize,
        sink: &mut dyn BodySink,
        liveness: &mut Liveness,
    ) -> io::Result<u64> {
        let mut cursor = self.store.open(*handle).await?;
        read_window(&mut cursor, offset, length, buffer_size, sink, liveness).await
    }
}

/// In-memory [`PartitionStore`].
///
/// Cheap to share: cursors hold their own reference to a resource's
/// partitions, so reads never block writers for longer than a lookup.
#[derive(Debug, Default)]
pub struct MemoryPartitionStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    by_name: HashMap<String, u64>,
    entries: HashMap<u64, Entry>,
}

#[derive(Debug)]
struct Entry {
    resource: PartitionedResource,
    partitions: Arc<[Bytes]>,
}

impl MemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` split into partitions of at most `partition_len` bytes.
    pub fn ingest(
        &self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        partition_len: usize,
        last_modified: SystemTime,
    ) -> PartitionedResource {
        let data = data.into();
        let partition_len = partition_len.max(1);
        let partitions = (0..data.len())
            .step_by(partition_len)
            .map(|start| data.slice(start..data.len().min(start + partition_len)))
            .collect();
        self.insert_partitions(name, partitions, last_modified)
    }

    /// Store a resource from partitions given in sequence order.
    /// Replaces any resource of the same name.
    pub fn insert_partitions(
        &self,
        name: impl Into<String>,
        partitions: Vec<Bytes>,
        last_modified: SystemTime,
    ) -> PartitionedResource {
        let name = name.into();
        let length = partitions.iter().map(|p| p.len() as u64).sum();

        let mut inner = self.inner.write();
        inner.next_id += 1;
        let resource = PartitionedResource {
            id: inner.next_id,
            name: name.clone(),
            length,
            last_modified,
        };
        if let Some(old) = inner.by_name.insert(name, resource.id) {
            inner.entries.remove(&old);
        }
        inner.entries.insert(
            resource.id,
            Entry {
                resource: resource.clone(),
                partitions: partitions.into(),
            },
        );

        tracing::debug!(id = resource.id, name = %resource.name, length, "stored partitioned resource");
        resource
    }
}

#[async_trait]
impl PartitionStore for MemoryPartitionStore {
    type Cursor = MemoryCursor;

    async fn lookup(&self, name: &str) -> io::Result<Option<PartitionedResource>> {
        let inner = self.inner.read();
        let resource = inner
            .by_name
            .get(name)
            .and_then(|id| inner.entries.get(id))
            .map(|entry| entry.resource.clone());
        Ok(resource)
    }

    async fn open(&self, id: u64) -> io::Result<MemoryCursor> {
        let inner = self.inner.read();
        let entry = inner
            .entries
            .get(&id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no resource with id {id}")))?;
        Ok(MemoryCursor {
            partitions: entry.partitions.clone(),
            current: None,
        })
    }
}

/// Cursor over the partitions of a [`MemoryPartitionStore`] resource.
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    partitions: Arc<[Bytes]>,
    current: Option<usize>,
}

#[async_trait]
impl PartitionCursor for MemoryCursor {
    async fn advance(&mut self) -> io::Result<Option<u64>> {
        let next = self.current.map_or(0, |i| i + 1);
        self.current = Some(next);
        Ok(self.partitions.get(next).map(|p| p.len() as u64))
    }

    async fn read_at(&mut self, index: u64, buf: &mut [u8]) -> io::Result<usize> {
        let partition = self
            .current
            .and_then(|i| self.partitions.get(i))
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no current partition"))?;
        let start = usize::try_from(index).unwrap_or(usize::MAX).min(partition.len());
        let n = buf.len().min(partition.len() - start);
        buf[..n].copy_from_slice(&partition[start..start + n]);
        Ok(n)
    }
}
