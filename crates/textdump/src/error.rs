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

use moodb_var::Objid;
use std::fmt::{Display, Formatter};

/// Where in the input a decode failure happened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    pub section: &'static str,
    pub object: Option<i64>,
    pub field: Option<&'static str>,
    pub line: usize,
}

impl Display for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.section)?;
        if let Some(object) = self.object {
            write!(f, " #{object}")?;
        }
        if let Some(field) = self.field {
            write!(f, ".{field}")?;
        }
        write!(f, " @ line {}", self.line)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("io error in {1}: {0}")]
    Io(std::io::Error, Context),
    #[error("unexpected end of input in {0}")]
    TruncatedInput(Context),
    #[error("malformed type tag {tag} in {ctx}")]
    MalformedTag { tag: i64, ctx: Context },
    #[error("count mismatch for {what} in {ctx}: expected {expected}, found {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
        ctx: Context,
    },
    #[error("reference to undeclared object {target} in {ctx}")]
    DanglingReference { target: Objid, ctx: Context },
    #[error("reference to waif {index} before its definition in {ctx}")]
    DanglingWaifReference { index: usize, ctx: Context },
    #[error("object #{id} is declared twice in {ctx}")]
    DuplicateObject { id: i64, ctx: Context },
    #[error("{kind} value cannot be a map key in {ctx}")]
    InvalidMapKey { kind: &'static str, ctx: Context },
    #[error("parse error: {0} in {1}")]
    Parse(String, Context),
    #[error("textdump version error: {0}")]
    Version(String),
}

impl DecodeError {
    pub fn context(&self) -> Option<&Context> {
        match self {
            DecodeError::Io(_, ctx)
            | DecodeError::TruncatedInput(ctx)
            | DecodeError::MalformedTag { ctx, .. }
            | DecodeError::CountMismatch { ctx, .. }
            | DecodeError::DanglingReference { ctx, .. }
            | DecodeError::DanglingWaifReference { ctx, .. }
            | DecodeError::DuplicateObject { ctx, .. }
            | DecodeError::InvalidMapKey { ctx, .. }
            | DecodeError::Parse(_, ctx) => Some(ctx),
            DecodeError::Version(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} value cannot be written as {position}")]
    UnsupportedValueKind {
        kind: &'static str,
        position: &'static str,
    },
    #[error("waif {0} is referenced but not present in the waif table")]
    DanglingWaifReference(usize),
    #[error("object #{0} is neither present nor recycled")]
    MissingObject(i64),
    #[error("object {object} declares {declared} properties but only has {present}")]
    PropdefsOverflow {
        object: Objid,
        declared: usize,
        present: usize,
    },
    #[error("task {0} has an empty activation stack")]
    EmptyStack(i64),
}

/// An object reference that names no declared object. These are reported rather than raised:
/// real databases carry stale references and the reference server loads them regardless.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DanglingReference {
    pub target: Objid,
    /// Where the reference was found, e.g. `#12.location` or `players[3]`.
    pub path: String,
}

impl Display for DanglingReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.path, self.target)
    }
}
