// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Reading and writing LambdaMOO / ToastStunt textdump databases.
//!
//! Any format version from 0 to 17 can be read. Output is always version 17.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::str::FromStr;

pub use error::{Context, DanglingReference, DecodeError, EncodeError};
pub use model::{
    Activation, ActivationInfo, DEFAULT_MAX_STACKFRAMES, InterruptedTask, LineEnding, MooDatabase,
    MooObject, Property, QueuedTask, SuspendedTask, Verb, Vm, Waif,
};
pub use read::TextdumpReader;
pub use version::{CURRENT_VERSION, DbVersion};
pub use waif::{Interned, WaifIndexMode, WaifInterner, WaifTable};
pub use write::TextdumpWriter;

mod error;
mod model;
mod read;
mod version;
mod waif;
mod write;

// Object flag bit positions.
pub const FLAG_USER: u8 = 0;
pub const FLAG_PROGRAMMER: u8 = 1;
pub const FLAG_WIZARD: u8 = 2;
pub const FLAG_FERTILE: u8 = 7;

// Property permission bits.
pub const PF_READ: i64 = 1;
pub const PF_WRITE: i64 = 2;

/// How strings are turned into bytes and back.
///
/// LambdaMOO and ToastStunt treat strings as raw bytes, so ISO-8859-1 (one byte per code point)
/// is the default and makes a read/write cycle byte transparent. UTF-8 is available for dumps
/// known to have been produced that way.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncodingMode {
    #[default]
    #[serde(alias = "latin1", alias = "iso-8859-1")]
    ISO8859_1,
    #[serde(alias = "utf8", alias = "utf-8")]
    UTF8,
}

impl TryFrom<&str> for EncodingMode {
    type Error = &'static str;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "ISO-8859-1" | "iso-8859-1" | "iso8859-1" | "latin1" => Ok(EncodingMode::ISO8859_1),
            "UTF8" | "UTF-8" | "utf8" | "utf-8" => Ok(EncodingMode::UTF8),
            _ => Err("Invalid encoding mode"),
        }
    }
}

impl FromStr for EncodingMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EncodingMode::try_from(s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderOptions {
    pub encoding: EncodingMode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    pub encoding: EncodingMode,
    pub waif_index_mode: WaifIndexMode,
    /// Force a line ending; by default the one the database was read with is kept.
    pub line_ending: Option<LineEnding>,
}

pub fn decode<R: BufRead>(reader: R) -> Result<MooDatabase, DecodeError> {
    decode_with(reader, &ReaderOptions::default())
}

pub fn decode_with<R: BufRead>(
    reader: R,
    options: &ReaderOptions,
) -> Result<MooDatabase, DecodeError> {
    Ok(decode_with_report(reader, options)?.0)
}

/// Decode, also returning every object reference that names an undeclared object.
pub fn decode_with_report<R: BufRead>(
    reader: R,
    options: &ReaderOptions,
) -> Result<(MooDatabase, Vec<DanglingReference>), DecodeError> {
    let mut reader = TextdumpReader::new(reader, options)?;
    let db = reader.read_textdump()?;
    Ok((db, reader.take_dangling_references()))
}

pub fn encode<W: Write>(db: &MooDatabase, writer: W) -> Result<(), EncodeError> {
    encode_with(db, writer, &WriterOptions::default())
}

pub fn encode_with<W: Write>(
    db: &MooDatabase,
    writer: W,
    options: &WriterOptions,
) -> Result<(), EncodeError> {
    TextdumpWriter::new(writer, db, options).write_textdump()
}

pub fn encode_to_vec(db: &MooDatabase) -> Result<Vec<u8>, EncodeError> {
    let mut out = vec![];
    encode(db, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{EncodingMode, decode, encode_to_vec};
    use crate::{MooDatabase, MooObject};
    use std::str::FromStr;

    #[test]
    fn encoding_mode_names() {
        assert_eq!(EncodingMode::from_str("utf-8"), Ok(EncodingMode::UTF8));
        assert_eq!(
            EncodingMode::from_str("latin1"),
            Ok(EncodingMode::ISO8859_1)
        );
        assert!(EncodingMode::from_str("ebcdic").is_err());
    }

    #[test]
    fn empty_database_round_trips() {
        let db = MooDatabase::new();
        let bytes = encode_to_vec(&db).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(
            text,
            "** LambdaMOO Database, Format Version 17 **\n0\n0 values pending finalization\n0 clocks\n0 queued tasks\n0 suspended tasks\n0 interrupted tasks\n0 active connections\n0\n0\n0\n"
        );
        let decoded = decode(&bytes[..]).unwrap();
        assert_eq!(decoded, db);
    }

    #[test]
    fn missing_dense_object_is_an_encode_error() {
        let mut db = MooDatabase::new();
        db.total_objects = 2;
        db.objects.insert(0, MooObject::new(0, "only"));
        assert!(matches!(
            encode_to_vec(&db),
            Err(crate::EncodeError::MissingObject(1))
        ));
    }
}
