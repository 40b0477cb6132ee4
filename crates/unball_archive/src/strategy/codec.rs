//! Decoders for the text encodings mail and Usenet used to wrap files in
//!
//! uuencode (including the `begin-base64` variant), bare base64 and
//! BinHex 4.0. The name embedded in a uuencode or BinHex header is reduced
//! to its final component before anything is written.

use std::path::{Path, PathBuf};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use super::command::output_path;
use crate::error::{ExtractError, Result};

/// Standard alphabet, padding optional
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const BINHEX_ALPHABET: &[u8; 64] =
    b"!\"#$%&'()*+,-012345689@ABCDEFGHIJKLMNPQRSTUVXYZ[`abcdefhijklmpqr";
const BINHEX_BANNER: &[u8] = b"(This file must be converted with BinHex";
const BINHEX_RLE_MARKER: u8 = 0x90;

/// Reduce a name taken from an encoded header to a bare file name
fn header_file_name(name: &str) -> Result<PathBuf> {
    Path::new(name.trim())
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| ExtractError::PathTraversal {
            entry: PathBuf::from(name),
        })
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

fn lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

/// Decode every `begin`/`begin-base64` block in `source` into `target`
pub fn uudecode(source: &Path, target: &Path) -> Result<()> {
    let data = fs_err::read(source)?;
    let mut lines = lines(&data);
    let mut decoded_any = false;

    while let Some(line) = lines.next() {
        let header = String::from_utf8_lossy(line);
        let mut fields = header.splitn(3, ' ');
        let base64 = match fields.next() {
            Some("begin") => false,
            Some("begin-base64") => true,
            _ => continue,
        };
        let (Some(mode), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(mode) = u32::from_str_radix(mode, 8) else {
            continue;
        };

        let output = target.join(header_file_name(name)?);
        let contents = if base64 {
            decode_base64_block(&mut lines)?
        } else {
            decode_uu_block(&mut lines)?
        };
        fs_err::write(&output, contents)?;
        apply_mode(&output, Some(mode))?;
        decoded_any = true;
    }

    if decoded_any {
        Ok(())
    } else {
        Err(ExtractError::decode("uuencode", "no begin line found"))
    }
}

fn decode_uu_block<'a>(lines: &mut impl Iterator<Item = &'a [u8]>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for line in lines {
        if line == b"end" {
            return Ok(out);
        }
        let Some((&length, body)) = line.split_first() else {
            continue;
        };
        let length = usize::from(length.wrapping_sub(b' ') & 0x3f);
        if length == 0 {
            continue;
        }

        let start = out.len();
        for group in body.chunks(4) {
            let mut sextets = [0u8; 4];
            for (slot, &c) in sextets.iter_mut().zip(group) {
                *slot = c.wrapping_sub(b' ') & 0x3f;
            }
            out.push(sextets[0] << 2 | sextets[1] >> 4);
            out.push(sextets[1] << 4 | sextets[2] >> 2);
            out.push(sextets[2] << 6 | sextets[3]);
        }
        if out.len() - start < length {
            return Err(ExtractError::decode("uuencode", "line shorter than its length"));
        }
        out.truncate(start + length);
    }
    Err(ExtractError::decode("uuencode", "missing end line"))
}

fn decode_base64_block<'a>(lines: &mut impl Iterator<Item = &'a [u8]>) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    for line in lines {
        if line == b"====" {
            return LENIENT_BASE64
                .decode(&encoded)
                .map_err(|e| ExtractError::decode("base64", e.to_string()));
        }
        encoded.extend(line.iter().filter(|b| !b.is_ascii_whitespace()));
    }
    Err(ExtractError::decode("base64", "missing ==== terminator"))
}

/// Decode a file that is nothing but base64, optionally behind mail headers
pub fn base64_decode(source: &Path, target: &Path) -> Result<()> {
    let data = fs_err::read(source)?;
    let body = skip_mail_headers(&data);
    let encoded: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = LENIENT_BASE64
        .decode(&encoded)
        .map_err(|e| ExtractError::decode("base64", e.to_string()))?;

    fs_err::write(output_path(source, target, &[".b64", ".mim"], None), decoded)?;
    Ok(())
}

/// Everything after the first blank line if the data opens with a
/// `Name: value` header block
fn skip_mail_headers(data: &[u8]) -> &[u8] {
    let first_line = lines(data).next().unwrap_or_default();
    let looks_like_header = first_line
        .iter()
        .position(|&b| b == b':')
        .is_some_and(|colon| {
            colon > 0 && first_line[..colon].iter().all(|b| b.is_ascii_graphic())
        });
    if !looks_like_header {
        return data;
    }

    let mut offset = 0;
    for line in data.split_inclusive(|&b| b == b'\n') {
        offset += line.len();
        if line.iter().all(u8::is_ascii_whitespace) {
            return &data[offset..];
        }
    }
    data
}

/// Decode the data fork of a BinHex 4.0 file
pub fn binhex_decode(source: &Path, target: &Path) -> Result<()> {
    let data = fs_err::read(source)?;
    let decoded = unrle(&binhex_sextets(&data)?)?;

    let mut reader = ByteReader::new(&decoded);
    let name_length = usize::from(reader.u8()?);
    let name = String::from_utf8_lossy(reader.take(name_length)?).into_owned();
    reader.take(1 + 4 + 4 + 2)?; // version, type, creator, flags
    let data_length = reader.u32()? as usize;
    let _resource_length = reader.u32()?;
    let header_end = reader.position();
    let header_crc = reader.u16()?;
    if crc16_xmodem(&decoded[..header_end]) != header_crc {
        return Err(ExtractError::decode("binhex", "header CRC mismatch"));
    }

    let fork = reader.take(data_length)?;
    if crc16_xmodem(fork) != reader.u16()? {
        return Err(ExtractError::decode("binhex", "data fork CRC mismatch"));
    }

    fs_err::write(target.join(header_file_name(&name)?), fork)?;
    Ok(())
}

/// The 6-bit payload between the first pair of colons after the banner
fn binhex_sextets(data: &[u8]) -> Result<Vec<u8>> {
    let search_from = data
        .windows(BINHEX_BANNER.len())
        .position(|window| window == BINHEX_BANNER)
        .unwrap_or(0);
    let start = data[search_from..]
        .iter()
        .position(|&b| b == b':')
        .map(|colon| search_from + colon + 1)
        .ok_or_else(|| ExtractError::decode("binhex", "no start marker"))?;

    let mut out = Vec::with_capacity(data.len() * 3 / 4);
    let mut bits = 0u32;
    let mut bit_count = 0;
    for &c in &data[start..] {
        if c == b':' {
            return Ok(out);
        }
        if c.is_ascii_whitespace() {
            continue;
        }
        let value = BINHEX_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| {
                ExtractError::decode("binhex", format!("invalid character {:?}", c as char))
            })?;
        bits = (bits << 6) | value as u32;
        bit_count += 6;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
            bits &= (1 << bit_count) - 1;
        }
    }
    Err(ExtractError::decode("binhex", "no end marker"))
}

/// Undo BinHex run-length encoding
fn unrle(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != BINHEX_RLE_MARKER {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(0) => out.push(BINHEX_RLE_MARKER),
            Some(count) => {
                let last = *out
                    .last()
                    .ok_or_else(|| ExtractError::decode("binhex", "run with nothing to repeat"))?;
                out.extend(std::iter::repeat(last).take(usize::from(count) - 1));
            }
            None => return Err(ExtractError::decode("binhex", "truncated run")),
        }
    }
    Ok(out)
}

/// CRC-16 with polynomial 0x1021 and zero initial value
fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
        crc
    })
}

struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| ExtractError::decode("binhex", "unexpected end of data"))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
