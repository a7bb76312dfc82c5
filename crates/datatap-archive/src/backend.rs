//! Member-level access to zip and tar archives.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ArchiveError, Result};
use crate::format::{Compression, ContainerFormat, ContainerOptions};

/// Name and payload size of a stored member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
}

/// Appends members to an archive being written.
pub(crate) trait MemberWriter {
    fn add_member(&mut self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Writes the archive trailer.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Random access to the members of an indexed archive.
pub(crate) trait MemberReader {
    fn members(&self) -> &[MemberInfo];

    fn read_member(&mut self, path: &str) -> Result<Vec<u8>>;
}

/// Creates a writer for `format` over `dest`.
pub(crate) fn member_writer<'w, W>(
    format: ContainerFormat,
    dest: W,
    options: &ContainerOptions,
) -> Box<dyn MemberWriter + 'w>
where
    W: Write + Seek + 'w,
{
    match format {
        ContainerFormat::Zip => Box::new(ZipMembers::new(dest, options)),
        ContainerFormat::Tar => Box::new(TarMembers {
            builder: tar::Builder::new(dest),
        }),
        ContainerFormat::TarGz => Box::new(TarGzMembers {
            builder: tar::Builder::new(GzEncoder::new(dest, options.gzip_level())),
        }),
    }
}

/// Indexes the archive in `source`.
pub(crate) fn member_reader<R>(
    format: ContainerFormat,
    source: R,
) -> Result<Box<dyn MemberReader>>
where
    R: Read + Seek + 'static,
{
    match format {
        ContainerFormat::Zip => Ok(Box::new(ZipIndex::open(source)?)),
        ContainerFormat::Tar => Ok(Box::new(TarIndex::open(source)?)),
        ContainerFormat::TarGz => {
            let mut decompressed = Vec::new();
            GzDecoder::new(source).read_to_end(&mut decompressed)?;
            debug!(bytes = decompressed.len(), "decompressed tar.gz archive");
            Ok(Box::new(TarIndex::open(Cursor::new(decompressed))?))
        }
    }
}

struct ZipMembers<W: Write + Seek> {
    writer: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> ZipMembers<W> {
    fn new(dest: W, options: &ContainerOptions) -> Self {
        let (method, level) = match options.compression {
            Compression::Deflated => (CompressionMethod::Deflated, options.level.map(i64::from)),
            Compression::Stored => (CompressionMethod::Stored, None),
        };
        let file_options = SimpleFileOptions::default()
            .compression_method(method)
            .compression_level(level)
            .unix_permissions(0o644);
        Self {
            writer: ZipWriter::new(dest),
            options: file_options,
        }
    }
}

impl<W: Write + Seek> MemberWriter for ZipMembers<W> {
    fn add_member(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        self.writer.start_file(path, self.options)?;
        self.writer.write_all(bytes)?;
        debug!(member = path, bytes = bytes.len(), "added zip member");
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.writer.finish()?;
        Ok(())
    }
}

fn append_tar_member<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    bytes: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder.append_data(&mut header, path, bytes)?;
    debug!(member = path, bytes = bytes.len(), "added tar member");
    Ok(())
}

struct TarMembers<W: Write> {
    builder: tar::Builder<W>,
}

impl<W: Write> MemberWriter for TarMembers<W> {
    fn add_member(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        append_tar_member(&mut self.builder, path, bytes)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.builder.into_inner()?.flush()?;
        Ok(())
    }
}

struct TarGzMembers<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
}

impl<W: Write> MemberWriter for TarGzMembers<W> {
    fn add_member(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        append_tar_member(&mut self.builder, path, bytes)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.builder.into_inner()?.finish()?.flush()?;
        Ok(())
    }
}

struct ZipIndex<R: Read + Seek> {
    archive: ZipArchive<R>,
    members: Vec<MemberInfo>,
}

impl<R: Read + Seek> ZipIndex<R> {
    fn open(source: R) -> Result<Self> {
        let mut archive = ZipArchive::new(source)?;
        let mut members = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            members.push(MemberInfo {
                name: file.name().to_string(),
                size: file.size(),
            });
        }
        debug!(members = members.len(), "indexed zip archive");
        Ok(Self { archive, members })
    }
}

impl<R: Read + Seek> MemberReader for ZipIndex<R> {
    fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    fn read_member(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut file = match self.archive.by_name(path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Err(ArchiveError::MemberNotFound(path.to_string())),
            Err(error) => return Err(error.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Tar archive indexed once: member name to data offset and size.
///
/// Every indexed member lies within the archive.
struct TarIndex<R: Read + Seek> {
    reader: R,
    members: Vec<MemberInfo>,
    offsets: HashMap<String, (u64, u64)>,
}

impl<R: Read + Seek> TarIndex<R> {
    fn open(mut source: R) -> Result<Self> {
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        let mut archive = tar::Archive::new(source);
        let mut members: Vec<MemberInfo> = Vec::new();
        let mut offsets = HashMap::new();
        for entry in archive.entries_with_seek()? {
            let entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = member_name(&entry.path()?.to_string_lossy());
            let size = entry.size();
            let offset = entry.raw_file_position();
            if offset.checked_add(size).is_none_or(|stop| stop > end) {
                return Err(ArchiveError::Truncated(name));
            }
            if offsets
                .insert(name.clone(), (offset, size))
                .is_some()
            {
                members.retain(|member| member.name != name);
            }
            members.push(MemberInfo { name, size });
        }
        debug!(members = members.len(), "indexed tar archive");
        Ok(Self {
            reader: archive.into_inner(),
            members,
            offsets,
        })
    }
}

impl<R: Read + Seek> MemberReader for TarIndex<R> {
    fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    fn read_member(&mut self, path: &str) -> Result<Vec<u8>> {
        let (offset, size) = *self
            .offsets
            .get(path)
            .ok_or_else(|| ArchiveError::MemberNotFound(path.to_string()))?;
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        (&mut self.reader).take(size).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != size {
            return Err(ArchiveError::Truncated(path.to_string()));
        }
        Ok(bytes)
    }
}

/// Member names as written by common tar tools, without a leading `./`.
fn member_name(raw: &str) -> String {
    raw.trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_archive(format: ContainerFormat, members: &[(&str, &str)]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        let mut writer = member_writer(format, &mut buffer, &ContainerOptions::default());
        for (path, text) in members {
            writer.add_member(path, text.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_every_format_reads_back_its_members() {
        for format in ContainerFormat::ALL {
            let bytes = write_archive(
                format,
                &[("a.txt", "alpha"), ("nested/b.bin", ""), ("c.txt", "gamma")],
            );
            let mut reader = member_reader(format, Cursor::new(bytes)).unwrap();
            let names: Vec<_> = reader.members().iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, ["a.txt", "nested/b.bin", "c.txt"], "{format}");
            assert_eq!(reader.read_member("c.txt").unwrap(), b"gamma");
            assert_eq!(reader.read_member("nested/b.bin").unwrap(), b"");
            assert_eq!(reader.read_member("a.txt").unwrap(), b"alpha");
            assert!(matches!(
                reader.read_member("missing.txt"),
                Err(ArchiveError::MemberNotFound(_))
            ));
        }
    }

    #[test]
    fn test_tar_names_drop_leading_dot_slash() {
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.as_gnu_mut().unwrap().name[..8].copy_from_slice(b"./hi.txt");
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b"hi"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut reader = member_reader(ContainerFormat::Tar, Cursor::new(bytes)).unwrap();
        assert_eq!(reader.members()[0].name, "hi.txt");
        assert_eq!(reader.read_member("hi.txt").unwrap(), b"hi");
    }

    #[test]
    fn test_tar_member_sizes_past_the_end_are_rejected() {
        let mut header = tar::Header::new_gnu();
        header.set_path("manifest.json").unwrap();
        header.set_size(1 << 62);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(&[b'x'; 512]);
        bytes.extend_from_slice(&[0; 1024]);

        let error = member_reader(ContainerFormat::Tar, Cursor::new(bytes.clone()))
            .err()
            .unwrap();
        assert!(matches!(error, ArchiveError::Truncated(ref name) if name == "manifest.json"));

        let mut gz = GzEncoder::new(Vec::new(), flate2::Compression::fast());
        gz.write_all(&bytes).unwrap();
        let compressed = gz.finish().unwrap();
        assert!(matches!(
            member_reader(ContainerFormat::TarGz, Cursor::new(compressed)),
            Err(ArchiveError::Truncated(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(member_reader(ContainerFormat::Zip, Cursor::new(b"not a zip".to_vec())).is_err());
        assert!(member_reader(ContainerFormat::TarGz, Cursor::new(b"not gzip".to_vec())).is_err());
    }
}
