//! Extractors implemented in-process
//!
//! These are the fallbacks at the end of each candidate list, so a
//! system without `unzip` or `tar` can still unpack the common formats.
//! Every entry name is checked before anything touches the disk.

use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use super::command::output_path;
use super::{codec, InvokeOptions, Strategy};
use crate::error::{ExtractError, Result};

/// The formats with an in-process implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// ZIP archives
    Zip,
    /// Tar archives, plain or wrapped in gzip, bzip2, xz or zstd
    Tar,
    /// A single gzip stream
    Gzip,
    /// A single bzip2 stream
    Bzip2,
    /// A single xz stream
    Xz,
    /// A single zstd frame sequence
    Zstd,
    /// 7-Zip archives
    SevenZip,
    /// uuencoded data (including `begin-base64`)
    Uuencode,
    /// Bare base64 data
    Base64,
    /// BinHex 4.0 encoded Macintosh files
    BinHex,
}

impl Builtin {
    /// Short name used in logs and self-test output
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Zip => "zip",
            Builtin::Tar => "tar",
            Builtin::Gzip => "gzip",
            Builtin::Bzip2 => "bzip2",
            Builtin::Xz => "xz",
            Builtin::Zstd => "zstd",
            Builtin::SevenZip => "7z",
            Builtin::Uuencode => "uudecode",
            Builtin::Base64 => "base64",
            Builtin::BinHex => "binhex",
        }
    }

    /// Whether support for this format was compiled in
    pub fn is_available(self) -> bool {
        match self {
            Builtin::SevenZip => cfg!(feature = "sevenz"),
            _ => true,
        }
    }
}

/// Adapts a [`Builtin`] format to the [`Strategy`] interface
#[derive(Debug, Clone, Copy)]
pub struct BuiltinExtractor {
    format: Builtin,
}

impl BuiltinExtractor {
    /// Create an extractor for the given format
    pub fn new(format: Builtin) -> Self {
        Self { format }
    }

    /// The wrapped format
    pub fn format(&self) -> Builtin {
        self.format
    }
}

impl Strategy for BuiltinExtractor {
    fn name(&self) -> String {
        format!("internal {}", self.format.name())
    }

    fn is_viable(&self) -> bool {
        self.format.is_available()
    }

    fn extract(&self, source: &Path, target: &Path, _options: &InvokeOptions) -> Result<()> {
        tracing::debug!("{} {}", self.name(), source.display());
        match self.format {
            Builtin::Zip => extract_zip(source, target),
            Builtin::Tar => extract_tar(source, target),
            Builtin::Gzip => decompress(source, target, Compression::Gzip),
            Builtin::Bzip2 => decompress(source, target, Compression::Bzip2),
            Builtin::Xz => decompress(source, target, Compression::Xz),
            Builtin::Zstd => decompress(source, target, Compression::Zstd),
            #[cfg(feature = "sevenz")]
            Builtin::SevenZip => extract_7z(source, target),
            #[cfg(not(feature = "sevenz"))]
            Builtin::SevenZip => Err(ExtractError::NoExtractor {
                mimetype: "application/x-7z-compressed".to_owned(),
            }),
            Builtin::Uuencode => codec::uudecode(source, target),
            Builtin::Base64 => codec::base64_decode(source, target),
            Builtin::BinHex => codec::binhex_decode(source, target),
        }
    }
}

/// Stream compression schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Plain,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Identify the compression from the first bytes of a stream
    fn sniff(header: &[u8]) -> Self {
        if infer::archive::is_gz(header) {
            Compression::Gzip
        } else if infer::archive::is_bz2(header) {
            Compression::Bzip2
        } else if infer::archive::is_xz(header) {
            Compression::Xz
        } else if infer::archive::is_zst(header) {
            Compression::Zstd
        } else {
            Compression::Plain
        }
    }

    /// Suffix dropped from the source name when decompressing a single file
    fn suffix(self) -> &'static [&'static str] {
        match self {
            Compression::Plain => &[],
            Compression::Gzip => &[".gz"],
            Compression::Bzip2 => &[".bz2"],
            Compression::Xz => &[".xz"],
            Compression::Zstd => &[".zst"],
        }
    }

    /// Wrap `file` in the matching decoder
    fn reader(self, file: fs_err::File) -> Result<Box<dyn Read>> {
        let buf_reader = BufReader::new(file);
        Ok(match self {
            Compression::Plain => Box::new(buf_reader),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(buf_reader)),
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(buf_reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(buf_reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(buf_reader)?),
        })
    }
}

/// Read up to the first 8 bytes of a file
fn read_magic(path: &Path) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(8);
    fs_err::File::open(path)?.take(8).read_to_end(&mut header)?;
    Ok(header)
}

/// Check that an archive entry name stays inside the directory it is
/// unpacked into, returning it as a relative path.
///
/// `None` means the entry names the extraction root itself (`.` or `./`),
/// which has nothing to unpack.
pub(crate) fn ensure_contained(entry: &Path) -> Result<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::PathTraversal {
                    entry: entry.to_path_buf(),
                })
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(relative))
}

/// Decompress a single-stream file into `target`
fn decompress(source: &Path, target: &Path, compression: Compression) -> Result<()> {
    let output = output_path(source, target, compression.suffix(), None);
    let mut reader = compression.reader(fs_err::File::open(source)?)?;
    let mut out = fs_err::File::create(&output)?;
    std::io::copy(&mut reader, &mut out)?;
    Ok(())
}

/// Extract a tar archive, detecting the outer compression from its magic bytes
fn extract_tar(source: &Path, target: &Path) -> Result<()> {
    let compression = Compression::sniff(&read_magic(source)?);
    let reader = compression.reader(fs_err::File::open(source)?)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    // Directories are created last so a read-only directory cannot block its
    // own contents.
    let mut directories = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| ExtractError::tar_extraction(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| ExtractError::tar_extraction(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| ExtractError::tar_extraction(e.to_string()))?
            .into_owned();
        if ensure_contained(&path)?.is_none() {
            continue;
        }

        if entry.header().entry_type() == tar::EntryType::Directory {
            directories.push(entry);
            continue;
        }
        entry
            .unpack_in(target)
            .map_err(|e| ExtractError::tar_extraction(e.to_string()))?;
    }
    for mut directory in directories {
        directory
            .unpack_in(target)
            .map_err(|e| ExtractError::tar_extraction(e.to_string()))?;
    }

    Ok(())
}

/// Extract a ZIP archive entry by entry
fn extract_zip(source: &Path, target: &Path) -> Result<()> {
    let file = fs_err::File::open(source)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| ExtractError::zip_extraction(e.to_string()))?;

    // Directory modes are applied last, as in `extract_tar`.
    let mut directory_modes = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractError::zip_extraction(e.to_string()))?;
        let Some(relative) = ensure_contained(Path::new(entry.name()))? else {
            continue;
        };
        let path = target.join(relative);

        if entry.is_dir() {
            fs_err::create_dir_all(&path)?;
            if let Some(mode) = entry.unix_mode() {
                directory_modes.push((path, mode));
            }
            continue;
        }

        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut out = fs_err::File::create(&path)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            set_mode(&path, mode)?;
        }
    }

    #[cfg(unix)]
    for (path, mode) in directory_modes.into_iter().rev() {
        set_mode(&path, mode)?;
    }

    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

/// Extract a 7z archive
#[cfg(feature = "sevenz")]
fn extract_7z(source: &Path, target: &Path) -> Result<()> {
    let file = fs_err::File::open(source)?;

    let mut escaped = None;
    sevenz_rust2::decompress_with_extract_fn(file, target, |entry, reader, dest| {
        match ensure_contained(Path::new(entry.name())) {
            Ok(Some(_)) => sevenz_rust2::default_entry_extract_fn(entry, reader, dest),
            Ok(None) => Ok(true),
            Err(_) => {
                escaped.get_or_insert_with(|| PathBuf::from(entry.name()));
                Ok(true)
            }
        }
    })
    .map_err(|e| ExtractError::sevenz_extraction(e.to_string()))?;

    match escaped {
        Some(entry) => Err(ExtractError::PathTraversal { entry }),
        None => Ok(()),
    }
}
