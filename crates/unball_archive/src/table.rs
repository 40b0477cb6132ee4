//! Declarative extractor tables
//!
//! These are plain data. [`crate::registry::Registry`] turns them into live
//! strategies in two passes: every concrete candidate is built first, then
//! [`Candidate::TryAll`] entries have their mimetype references resolved
//! against the result.
//!
//! Order is significant within every candidate list: the first viable entry
//! is the one that gets used.

use crate::strategy::builtin::Builtin;

/// A raw entry in a mimetype's candidate list
#[derive(Debug, Clone, Copy)]
pub enum Candidate {
    /// `program args... <source>`, run inside the target directory
    Command(&'static [&'static str]),
    /// A tool that must be told the output file name
    NamedOutput {
        args: &'static [&'static str],
        strip: &'static [&'static str],
        append: Option<&'static str>,
        /// Flag preceding the output name. A trailing space means the name is
        /// passed as a separate argument.
        outfile_flag: Option<&'static str>,
    },
    /// A stream decompressor fed the source on stdin
    Pipe {
        args: &'static [&'static str],
        strip: &'static [&'static str],
        append: Option<&'static str>,
    },
    /// StuffIt's `unstuff`
    Stuffit,
    /// An in-process decoder
    Builtin(Builtin),
    /// Try every listed option until one produces output
    TryAll(&'static [Trial]),
}

/// An option inside a [`Candidate::TryAll`]
#[derive(Debug, Clone, Copy)]
pub enum Trial {
    /// The first viable candidate registered for this mimetype
    Mimetype(&'static str),
    /// A concrete tool
    Tool(Candidate),
}

use Candidate::{Builtin as Internal, Command as Cmd};

/// The complete set of tables a registry is built from
#[derive(Debug, Clone, Copy)]
pub struct RawTables {
    pub extractors: &'static [(&'static str, &'static [Candidate])],
    pub extensions: &'static [(&'static str, &'static [&'static str])],
    pub aliases: &'static [(&'static str, &'static str)],
    pub descriptions: &'static [(&'static str, &'static str)],
    pub hints: &'static [(&'static str, &'static str)],
}

impl RawTables {
    /// The tables shipped with this crate
    pub const fn builtin() -> Self {
        Self {
            extractors: EXTRACTORS,
            extensions: EXTENSIONS,
            aliases: ALIASES,
            descriptions: DESCRIPTIONS,
            hints: HINTS,
        }
    }
}

/// Mimetype to candidate extractors
pub static EXTRACTORS: &[(&str, &[Candidate])] = &[
    (
        "application/x-7z-compressed",
        &[
            Cmd(&["7z", "x"]),
            Cmd(&["7za", "x"]),
            Cmd(&["7zr", "x"]),
            Internal(Builtin::SevenZip),
            Cmd(&["sqc", "x"]),
        ],
    ),
    (
        "application/x-ace-compressed",
        &[
            Cmd(&["unace-bin", "x", "-y"]),
            Cmd(&["unace", "x", "-y"]),
            Cmd(&["sqc", "x"]),
        ],
    ),
    (
        "application/x-adf",
        &[Cmd(&["unadf"]), Cmd(&["readdisk"]), Cmd(&["e-readdisk"])],
    ),
    (
        "application/x-adz",
        &[Candidate::Pipe {
            args: &["gunzip"],
            strip: &[".adz"],
            append: Some(".adf"),
        }],
    ),
    ("application/x-alz", &[Cmd(&["unalz"])]),
    ("application/x-ar", &[Cmd(&["ar", "x"])]),
    ("application/x-arc", &[Cmd(&["arc", "x"])]),
    (
        "application/arj",
        &[
            Cmd(&["arj", "x", "-y"]),
            Cmd(&["unarj", "x"]),
            Cmd(&["sqc", "x"]),
        ],
    ),
    (
        "application/bzip2",
        &[
            Candidate::Pipe {
                args: &["bunzip2"],
                strip: &[".bz2"],
                append: None,
            },
            Internal(Builtin::Bzip2),
        ],
    ),
    (
        "application/cab",
        &[Candidate::TryAll(&[
            Trial::Tool(Cmd(&["cabextract"])),
            Trial::Tool(Cmd(&["unshield"])),
            Trial::Tool(Cmd(&["sqc", "x"])),
        ])],
    ),
    (
        "application/x-compress",
        &[
            Candidate::Pipe {
                args: &["uncompress.real"],
                strip: &[".z"],
                append: None,
            },
            Candidate::Pipe {
                args: &["uncompress"],
                strip: &[".z"],
                append: None,
            },
        ],
    ),
    (
        "application/x-cpio",
        &[Cmd(&["cpio", "--force-local", "--quiet", "-idI"])],
    ),
    ("application/x-deb", &[Cmd(&["ar", "x"])]),
    (
        "application/x-diskmasher",
        &[
            Cmd(&["xdms", "u"]),
            Candidate::NamedOutput {
                args: &["undms"],
                strip: &[".dms"],
                append: Some(".adf"),
                outfile_flag: None,
            },
        ],
    ),
    (
        "application/x-dosexec",
        &[Candidate::TryAll(&[
            Trial::Mimetype("application/zip"),
            Trial::Mimetype("application/x-rar"),
            Trial::Mimetype("application/arj"),
            Trial::Mimetype("application/x-7z-compressed"),
            Trial::Mimetype("application/lzh"),
            Trial::Mimetype("application/x-ace-compressed"),
        ])],
    ),
    (
        "application/x-gzip",
        &[
            Candidate::Pipe {
                args: &["gunzip"],
                strip: &[".gz"],
                append: None,
            },
            Internal(Builtin::Gzip),
        ],
    ),
    ("application/lzh", &[Cmd(&["lha", "x"]), Cmd(&["sqc", "x"])]),
    ("application/lzx", &[Cmd(&["unlzx", "-x"])]),
    ("application/x-lzop", &[Cmd(&["lzop", "-x"])]),
    (
        "application/macbinary",
        &[Candidate::Stuffit, Cmd(&["macunpack", "-f"])],
    ),
    (
        "application/mac-binhex40",
        &[
            Candidate::Stuffit,
            Cmd(&["uudeview", "-i"]),
            Internal(Builtin::BinHex),
        ],
    ),
    (
        "application/mime",
        &[Cmd(&["uudeview", "-ib"]), Internal(Builtin::Base64)],
    ),
    ("application/msi", &[Cmd(&["7z", "x"])]),
    (
        "application/x-rar",
        &[
            Cmd(&["unrar", "x", "-y", "-p-"]),
            Cmd(&["rar", "x", "-y", "-p-"]),
            Cmd(&["sqc", "x"]),
        ],
    ),
    (
        "application/x-rpm",
        &[Cmd(&["rpm2cpio"]), Cmd(&["rpm2targz"])],
    ),
    (
        "application/x-rzip",
        &[Candidate::NamedOutput {
            args: &["runzip", "-k"],
            strip: &[".rz"],
            append: None,
            outfile_flag: Some("-o "),
        }],
    ),
    ("application/x-extension-sfark", &[Cmd(&["sfarkxtc"])]),
    ("application/x-slp", &[Cmd(&["alien", "-g"])]),
    ("application/x-squeeze", &[Cmd(&["sqc", "x"])]),
    ("application/x-stuffit", &[Candidate::Stuffit]),
    (
        "application/x-tar",
        &[Cmd(&["tar", "xf"]), Internal(Builtin::Tar)],
    ),
    (
        "application/x-uuencode",
        &[
            Cmd(&["uudeview", "-i"]),
            Cmd(&["uudecode"]),
            Internal(Builtin::Uuencode),
        ],
    ),
    ("application/x-xar", &[Cmd(&["xar", "-xf"])]),
    (
        "application/x-xx-encoded",
        &[Cmd(&["uudeview", "-i"]), Cmd(&["xxdecode"])],
    ),
    (
        "application/x-xz",
        &[
            Candidate::Pipe {
                args: &["unxz"],
                strip: &[".xz"],
                append: None,
            },
            Internal(Builtin::Xz),
        ],
    ),
    (
        "application/x-yenc-encoded",
        &[
            Cmd(&["uudeview", "-i"]),
            Cmd(&["ydecode"]),
            Cmd(&["yydecode"]),
        ],
    ),
    (
        "application/zip",
        &[
            Cmd(&["7z", "x"]),
            Cmd(&["7za", "x"]),
            Cmd(&["unzip", "-q"]),
            Internal(Builtin::Zip),
            Cmd(&["jar", "xf"]),
            Cmd(&["sqc", "x"]),
        ],
    ),
    (
        "application/x-zoo",
        &[Cmd(&["unzoo", "-x"]), Cmd(&["zoo", "-extract"])],
    ),
    (
        "application/zstd",
        &[
            Candidate::Pipe {
                args: &["unzstd"],
                strip: &[".zst"],
                append: None,
            },
            Internal(Builtin::Zstd),
        ],
    ),
];

/// Lowercase file suffix to mimetype(s), consulted when sniffing fails.
/// Several mimetypes are tried in order.
pub static EXTENSIONS: &[(&str, &[&str])] = &[
    (".7z", &["application/x-7z-compressed"]),
    (".a", &["application/x-ar"]),
    (".ace", &["application/x-ace-compressed"]),
    (".adf", &["application/x-adf"]),
    (".adz", &["application/x-adz"]),
    (".alz", &["application/x-alz"]),
    (".ar", &["application/x-ar"]),
    (".arc", &["application/x-arc"]),
    (".arj", &["application/arj"]),
    (".b64", &["application/mime"]),
    (".bh", &["application/x-blakhole", "application/mac-binhex40"]),
    (".bhx", &["application/mac-binhex40"]),
    (".bin", &["application/macbinary"]),
    (".bz2", &["application/bzip2"]),
    (".cab", &["application/cab"]),
    (".cbr", &["application/x-rar"]),
    (".cbt", &["application/x-tar"]),
    (".cbz", &["application/zip"]),
    (".cp", &["application/x-cpio"]),
    (".cpio", &["application/x-cpio"]),
    (".deb", &["application/x-deb"]),
    (".dgc", &["application/x-dgca-compressed"]),
    (".dms", &["application/x-dms"]),
    (".ear", &["application/java-archive"]),
    (".egg", &["application/zip"]),
    (".exe", &["application/x-dosexec"]),
    (".gca", &["application/x-gca-compressed"]),
    (".gz", &["application/x-gzip"]),
    (".hqx", &["application/mac-binhex40"]),
    (".ipk", &["application/x-tar"]),
    (".iso", &["application/x-iso9660-image"]),
    (".j", &["application/java-archive"]),
    (".jar", &["application/java-archive"]),
    (".lha", &["application/lzh"]),
    (".lzh", &["application/lzh"]),
    (".lzo", &["application/x-lzop"]),
    (".lzx", &["application/lzx"]),
    (".mim", &["application/mime"]),
    (".msi", &["application/msi"]),
    (".pak", &["application/zip"]),
    (".pk3", &["application/zip"]),
    (".rar", &["application/x-rar"]),
    (".rpm", &["application/x-rpm"]),
    (".rsn", &["application/x-rar"]),
    (".rz", &["application/x-rzip"]),
    (".sea", &["application/sea"]),
    (".sfark", &["application/x-extension-sfark"]),
    (".sh", &["application/x-sh"]),
    (".shar", &["application/x-sh"]),
    (".sit", &["application/x-stuffit"]),
    (".sitx", &["application/x-stuffitx"]),
    (".slp", &["application/x-slp"]),
    (".sqx", &["application/x-squeeze"]),
    (".tar", &["application/x-tar"]),
    (".taz", &["application/x-compress"]),
    (".tbz2", &["application/bzip2"]),
    (".tgz", &["application/x-gzip"]),
    (".txz", &["application/x-xz"]),
    (".tz", &["application/x-compress"]),
    (".tzst", &["application/zstd"]),
    (".uu", &["application/x-uuencode"]),
    (".uue", &["application/x-uuencode"]),
    (".war", &["application/x-webarchive", "application/java-archive"]),
    (".xar", &["application/x-xar"]),
    (".xpi", &["application/x-xpinstall"]),
    (".xx", &["application/x-xx-encoded"]),
    (".xxe", &["application/x-xx-encoded"]),
    (".xz", &["application/x-xz"]),
    (".ync", &["application/x-yenc-encoded"]),
    (".yenc", &["application/x-yenc-encoded"]),
    (".z", &["application/x-compress"]),
    (".zip", &["application/zip"]),
    (".zoo", &["application/x-zoo"]),
    (".zst", &["application/zstd"]),
];

/// Non-canonical mimetype to the canonical name it is registered under
pub static ALIASES: &[(&str, &str)] = &[
    ("application/x-archive", "application/x-ar"),
    ("application/x-unix-archive", "application/x-ar"),
    ("application/x-ace", "application/x-ace-compressed"),
    ("application/x-arj", "application/arj"),
    ("application/x-bcpio", "application/x-cpio"),
    ("application/x-bz2", "application/bzip2"),
    ("application/x-bzip", "application/bzip2"),
    ("application/x-bzip2", "application/bzip2"),
    ("application/x-compressed", "application/x-gzip"),
    ("application/gzip", "application/x-gzip"),
    ("application/x-dms", "application/x-diskmasher"),
    ("application/x-msdownload", "application/x-dosexec"),
    ("application/vnd.microsoft.portable-executable", "application/x-dosexec"),
    ("application/x-gtar", "application/x-tar"),
    ("application/java-archive", "application/zip"),
    ("application/x-lha", "application/lzh"),
    ("application/x-lharc", "application/lzh"),
    ("application/x-lzh", "application/lzh"),
    ("application/x-lzh-archive", "application/lzh"),
    ("application/x-lzh-compressed", "application/lzh"),
    ("application/x-lzx", "application/lzx"),
    ("application/x-macbinary", "application/macbinary"),
    ("application/x-mime-encoded", "application/mime"),
    ("application/x-msi", "application/msi"),
    ("application/x-msiexec", "application/msi"),
    ("application/x-ole-storage", "application/msi"),
    ("application/vnd.debian.binary-package", "application/x-deb"),
    ("application/vnd.rar", "application/x-rar"),
    ("application/x-rar-compressed", "application/x-rar"),
    ("application/sea", "application/x-stuffit"),
    ("application/x-sea", "application/x-stuffit"),
    ("application/stuffit-lite", "application/x-stuffit"),
    ("application/x-sv4cpio", "application/x-cpio"),
    ("application/vnd.ms-cab-compressed", "application/cab"),
    ("application/x-webarchive", "application/x-tar"),
    ("application/x-xpinstall", "application/zip"),
    ("application/x-zip", "application/zip"),
    ("application/x-zip-compressed", "application/zip"),
    ("application/x-zstd", "application/zstd"),
    ("application/x-iso9660", "application/x-iso9660-image"),
    ("application/x-shellscript", "application/x-sh"),
    ("text/x-shellscript", "application/x-sh"),
    ("x-compress", "application/x-compress"),
    ("x-gzip", "application/x-gzip"),
    ("x-uuencode", "application/x-uuencode"),
    ("text/x-uuencode", "application/x-uuencode"),
];

/// Formats that are recognised but cannot be extracted, with an explanation
pub static DESCRIPTIONS: &[(&str, &str)] = &[
    (
        "application/x-blakhole",
        "BlakHole archive. The only extraction tools for this seem to be Windows-only.",
    ),
    (
        "application/x-dgca-compressed",
        "DGCA archive. The only known site for these is in Japanese and the only \
         extraction tool seems to be Windows-only.",
    ),
    (
        "application/x-gca-compressed",
        "GCA archive. The only known site for these is in Japanese and the only \
         extraction tool seems to be Windows-only.",
    ),
    (
        "application/x-iso9660-image",
        "ISO9660 CD/DVD image. To extract files from this, use a virtual disc drive \
         like CDEmu (Linux) or DaemonTools (Windows)",
    ),
    (
        "application/x-sh",
        "shell script. If the file is more than a few hundred kilobytes in size, it's \
         almost definitely a 'shar' or 'makeself' archive. At present, there is no \
         method to extract such archives without executing untrusted code.",
    ),
    (
        "application/x-stuffitx",
        "StuffIt X archive. As of this writing, extractors for this format exist only \
         for Windows and MacOS X.",
    ),
];

/// Explanations shown when a supported format's extractor fails
pub static HINTS: &[(&str, &str)] = &[
    (
        "application/x-dosexec",
        "DOS/Windows Executable. It may be a self-extracting archive, but all attempts \
         to extract it failed.",
    ),
    (
        "application/msi",
        "Microsoft Installer package. If you trust it, you can use Wine's msiexec tool \
         to install it.",
    ),
    (
        "application/zip",
        "Zip archive. However, extraction failed. If the cause was an unsupported \
         compression method, try installing p7zip.",
    ),
];
