use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_matches::assert_matches;
use rstest::rstest;
use unball_archive::{
    staging::STAGING_PREFIX, ExtractError, Extractor, ExtractorBuilder, Registry, TypeResolver,
};

fn extractor() -> Extractor {
    ExtractorBuilder::new()
        .with_registry(Arc::new(Registry::internal_only().unwrap()))
        .with_resolver(TypeResolver::infer_only())
        .build()
        .unwrap()
}

fn sample_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("file{i}.txt")).collect()
}

fn write_zip(path: &Path, names: &[String]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for name in names {
        zip.start_file(name.as_str(), zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(name.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn write_tar<W: Write>(writer: W, files: &[(&str, u32)]) -> W {
    let mut tar = tar::Builder::new(writer);
    for (name, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(name.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        tar.append(&header, name.as_bytes()).unwrap();
    }
    tar.into_inner().unwrap()
}

/// Directory entries, excluding `skip`
fn listing(dir: &Path, skip: &str) -> Vec<String> {
    let mut names: Vec<String> = fs_err::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != skip)
        .collect();
    names.sort();
    names
}

fn assert_no_staging_left(dir: &Path) {
    assert!(
        listing(dir, "")
            .iter()
            .all(|name| !name.starts_with(STAGING_PREFIX)),
        "stray staging directory in {}",
        dir.display()
    );
}

#[derive(Debug, Clone, Copy)]
enum Destination {
    AlongsideSource,
    Explicit,
}

#[rstest]
#[case::alongside(Destination::AlongsideSource)]
#[case::explicit(Destination::Explicit)]
fn test_zip_with_nine_files(#[case] destination: Destination) {
    let source_dir = tempfile::tempdir().unwrap();
    let archive = source_dir.path().join("sample.zip");
    write_zip(&archive, &sample_names(9));
    let original = fs_err::read(&archive).unwrap();

    let explicit_dir = tempfile::tempdir().unwrap();
    let (target, out_dir) = match destination {
        Destination::AlongsideSource => (None, source_dir.path()),
        Destination::Explicit => (Some(explicit_dir.path()), explicit_dir.path()),
    };

    let published = extractor().extract(&archive, target).unwrap();

    assert_eq!(published, out_dir.join("sample"));
    assert_eq!(listing(out_dir, "sample.zip"), ["sample"]);
    assert_eq!(listing(&published, "").len(), 9);
    assert_eq!(fs_err::read(&archive).unwrap(), original);
    assert_no_staging_left(out_dir);
}

fn plain(path: &Path, files: &[(&str, u32)]) {
    write_tar(File::create(path).unwrap(), files);
}

fn gzipped(path: &Path, files: &[(&str, u32)]) {
    let encoder = flate2::write::GzEncoder::new(
        File::create(path).unwrap(),
        flate2::Compression::default(),
    );
    write_tar(encoder, files).finish().unwrap();
}

fn bzipped(path: &Path, files: &[(&str, u32)]) {
    let encoder =
        bzip2::write::BzEncoder::new(File::create(path).unwrap(), bzip2::Compression::default());
    write_tar(encoder, files).finish().unwrap();
}

fn xzipped(path: &Path, files: &[(&str, u32)]) {
    let encoder = xz2::write::XzEncoder::new(File::create(path).unwrap(), 6);
    write_tar(encoder, files).finish().unwrap();
}

fn zstded(path: &Path, files: &[(&str, u32)]) {
    let encoder = zstd::stream::write::Encoder::new(File::create(path).unwrap(), 0).unwrap();
    write_tar(encoder, files).finish().unwrap();
}

#[rstest]
#[case::tar("sample.tar", plain)]
#[case::tar_gz("sample.tar.gz", gzipped)]
#[case::tgz("sample.tgz", gzipped)]
#[case::tar_bz2("sample.tar.bz2", bzipped)]
#[case::tar_xz("sample.tar.xz", xzipped)]
#[case::tar_zst("sample.tar.zst", zstded)]
fn test_tarballs(#[case] name: &str, #[case] write: fn(&Path, &[(&str, u32)])) {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join(name);
    write(&archive, &[("one.txt", 0o644), ("two.txt", 0o644), ("three.txt", 0o644)]);

    let published = extractor().extract(&archive, None).unwrap();

    assert_eq!(published, dir.path().join("sample"));
    assert_eq!(listing(&published, ""), ["one.txt", "three.txt", "two.txt"]);
    assert_eq!(listing(dir.path(), name), ["sample"]);
    assert!(archive.is_file());
}

#[test]
fn test_tarball_with_current_directory_entry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("release.tar");

    let mut tar = tar::Builder::new(File::create(&archive).unwrap());
    let mut header = tar::Header::new_gnu();
    header.set_path("./").unwrap();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_cksum();
    tar.append(&header, std::io::empty()).unwrap();
    for name in ["./a.txt", "./b.txt"] {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(name.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append(&header, name.as_bytes()).unwrap();
    }
    tar.finish().unwrap();
    drop(tar);

    let published = extractor().extract(&archive, None).unwrap();

    assert_eq!(published, dir.path().join("release"));
    assert_eq!(listing(&published, ""), ["a.txt", "b.txt"]);
    assert_eq!(fs_err::read(published.join("b.txt")).unwrap(), b"./b.txt");
}

#[test]
fn test_single_compressed_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt.gz");
    let mut encoder =
        flate2::write::GzEncoder::new(File::create(&source).unwrap(), flate2::Compression::best());
    encoder.write_all(b"remember the milk").unwrap();
    encoder.finish().unwrap();

    let published = extractor().extract(&source, None).unwrap();

    assert_eq!(published, dir.path().join("notes.txt"));
    assert!(published.is_file());
    assert_eq!(fs_err::read(&published).unwrap(), b"remember the milk");
    assert!(source.is_file());
}

#[test]
fn test_existing_destination_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("sample.zip");
    write_zip(&archive, &sample_names(3));
    let original = fs_err::read(&archive).unwrap();

    let occupied = dir.path().join("sample");
    fs_err::create_dir(&occupied).unwrap();
    fs_err::write(occupied.join("precious"), b"do not touch").unwrap();

    assert_matches!(
        extractor().extract(&archive, None),
        Err(ExtractError::AlreadyExists { path }) if path == occupied
    );

    assert_eq!(listing(&occupied, ""), ["precious"]);
    assert_eq!(fs_err::read(occupied.join("precious")).unwrap(), b"do not touch");
    assert_eq!(fs_err::read(&archive).unwrap(), original);
    assert_eq!(listing(dir.path(), ""), ["sample", "sample.zip"]);
}

#[test]
fn test_nested_layers_stop_at_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("quine.gz");
    let mut data = b"innermost".to_vec();
    for _ in 0..7 {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&data).unwrap();
        data = encoder.finish().unwrap();
    }
    fs_err::write(&source, &data).unwrap();
    let out = tempfile::tempdir().unwrap();

    let published = extractor().extract(&source, Some(out.path())).unwrap();

    assert!(published.is_file());
    assert!(infer::archive::is_gz(&fs_err::read(&published).unwrap()));
    assert_eq!(listing(out.path(), "").len(), 1);
    assert_no_staging_left(out.path());
}

#[test]
fn test_builtin_tables_are_consistent() {
    let report = unball_archive::self_test().unwrap();
    assert!(report.is_clean(), "{report}");
}

#[test]
fn test_single_top_level_folder_is_collapsed() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("download.zip");
    write_zip(
        &archive,
        &["project/".to_owned(), "project/a.txt".to_owned(), "project/b.txt".to_owned()],
    );

    let published = extractor().extract(&archive, None).unwrap();

    assert_eq!(published, dir.path().join("project"));
    assert_eq!(listing(&published, ""), ["a.txt", "b.txt"]);
    assert_eq!(listing(dir.path(), "download.zip"), ["project"]);
}

#[test]
fn test_zip_traversal_is_rejected() {
    let outer = tempfile::tempdir().unwrap();
    let dir = outer.path().join("work");
    fs_err::create_dir(&dir).unwrap();
    let archive = dir.join("evil.zip");
    write_zip(&archive, &["ok.txt".to_owned(), "../evil.txt".to_owned()]);

    assert_matches!(
        extractor().extract(&archive, None),
        Err(ExtractError::PathTraversal { .. })
    );
    assert!(!outer.path().join("evil.txt").exists());
    assert_eq!(listing(&dir, ""), ["evil.zip"]);
}

#[rstest]
#[case::plain_text("notes.txt", None)]
#[case::disc_image("disc.iso", Some("application/x-iso9660-image"))]
fn test_unsupported_files(#[case] name: &str, #[case] described: Option<&str>) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join(name);
    fs_err::write(&source, "nothing to see here").unwrap();

    let err = extractor().extract(&source, None).unwrap_err();
    match described {
        Some(expected) => assert_matches!(
            &err,
            ExtractError::UnsupportedFiletype { mimetype, description: Some(_) } if mimetype == expected
        ),
        None => assert_matches!(
            &err,
            ExtractError::UnsupportedFiletype { description: None, .. }
        ),
    }
    assert_eq!(err.exit_code(), 1);
    assert_eq!(listing(dir.path(), ""), [name]);
}

#[test]
fn test_known_format_without_tools() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("archive.rar");
    fs_err::write(&source, "not really a rar").unwrap();

    let err = extractor().extract(&source, None).unwrap_err();
    assert_matches!(&err, ExtractError::NoExtractor { mimetype } if mimetype == "application/x-rar");
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn test_source_validation() {
    let dir = tempfile::tempdir().unwrap();

    assert_matches!(
        extractor().extract(&dir.path().join("missing.zip"), None),
        Err(ExtractError::SourceNotFound { .. })
    );
    assert_matches!(
        extractor().extract(dir.path(), None),
        Err(ExtractError::SourceIsDirectory { .. })
    );
}

#[cfg(unix)]
#[test]
fn test_unreadable_entries_become_readable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("locked.tar");
    plain(&archive, &[("open.txt", 0o644), ("sealed.txt", 0o000)]);

    let published = extractor().extract(&archive, None).unwrap();

    let mode = fs_err::metadata(published.join("sealed.txt"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o400, 0o400);
    assert_eq!(fs_err::read(published.join("sealed.txt")).unwrap(), b"sealed.txt");
}

#[test]
fn test_uuencoded_file_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("message.uue");
    fs_err::write(&source, "From: someone\n\nbegin 644 cat.txt\n#0V%T\n`\nend\n").unwrap();

    let published: PathBuf = extractor().extract(&source, None).unwrap();

    assert_eq!(published, dir.path().join("cat.txt"));
    assert_eq!(fs_err::read(&published).unwrap(), b"Cat");
}
